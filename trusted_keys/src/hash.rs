//! Digest algorithms
//!
//! Maps the kernel-side digest identifiers onto TPM algorithm ids.
//! Only the algorithms in [`HASH_MAP`] can name a sealed object.

use crate::{Result, TrustedKeyError};
use core::str::FromStr;

/// TPM 2.0 Algorithm Identifiers (TPM_ALG_ID)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpmAlgId {
    Sha1 = 0x0004,
    KeyedHash = 0x0008,
    Sha256 = 0x000B,
    Sha384 = 0x000C,
    Sha512 = 0x000D,
    Null = 0x0010,
    Sm3_256 = 0x0012,
}

/// Digest algorithm requested for the sealed object's name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgo {
    Md5,
    Sha1,
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
    Sm3_256,
}

impl HashAlgo {
    /// Digest length in bytes
    pub fn digest_size(self) -> usize {
        match self {
            HashAlgo::Md5 => 16,
            HashAlgo::Sha1 => 20,
            HashAlgo::Sha224 => 28,
            HashAlgo::Sha256 | HashAlgo::Sm3_256 => 32,
            HashAlgo::Sha384 => 48,
            HashAlgo::Sha512 => 64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HashAlgo::Md5 => "md5",
            HashAlgo::Sha1 => "sha1",
            HashAlgo::Sha224 => "sha224",
            HashAlgo::Sha256 => "sha256",
            HashAlgo::Sha384 => "sha384",
            HashAlgo::Sha512 => "sha512",
            HashAlgo::Sm3_256 => "sm3-256",
        }
    }
}

impl FromStr for HashAlgo {
    type Err = TrustedKeyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "md5" => Ok(HashAlgo::Md5),
            "sha1" => Ok(HashAlgo::Sha1),
            "sha224" => Ok(HashAlgo::Sha224),
            "sha256" => Ok(HashAlgo::Sha256),
            "sha384" => Ok(HashAlgo::Sha384),
            "sha512" => Ok(HashAlgo::Sha512),
            "sm3-256" => Ok(HashAlgo::Sm3_256),
            _ => Err(TrustedKeyError::InvalidArgument),
        }
    }
}

/// Digest algorithms a TPM 2.0 sealed object can be named with
pub static HASH_MAP: [(HashAlgo, TpmAlgId); 5] = [
    (HashAlgo::Sha1, TpmAlgId::Sha1),
    (HashAlgo::Sha256, TpmAlgId::Sha256),
    (HashAlgo::Sha384, TpmAlgId::Sha384),
    (HashAlgo::Sha512, TpmAlgId::Sha512),
    (HashAlgo::Sm3_256, TpmAlgId::Sm3_256),
];

/// Resolve the TPM algorithm id for `hash`
pub fn tpm_alg_for(hash: HashAlgo) -> Result<TpmAlgId> {
    HASH_MAP
        .iter()
        .find(|(algo, _)| *algo == hash)
        .map(|(_, alg)| *alg)
        .ok_or(TrustedKeyError::InvalidArgument)
}
