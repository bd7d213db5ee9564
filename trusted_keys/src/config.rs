//! Trusted key size limits
//!
//! Bounds applied to secrets and blobs by every seal/unseal operation.
//! The defaults match the sizes the keyring ABI has always exposed.

use crate::{Result, TrustedKeyError};
use static_assertions::const_assert;

/// Smallest secret the TPM may seal or return
pub const MIN_KEY_SIZE: usize = 32;
/// Largest secret the TPM may seal or return
pub const MAX_KEY_SIZE: usize = 128;
/// Largest encoded blob
pub const MAX_BLOB_SIZE: usize = 512;
/// Blob encoder scratch (one page)
pub const SCRATCH_SIZE: usize = 4096;

const_assert!(MIN_KEY_SIZE > 0);
const_assert!(MIN_KEY_SIZE <= MAX_KEY_SIZE);
const_assert!(MAX_KEY_SIZE < MAX_BLOB_SIZE);
const_assert!(MAX_BLOB_SIZE <= SCRATCH_SIZE);

/// Size limits carried by a [`crate::TpmChip`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedConfig {
    pub min_key_size: usize,
    pub max_key_size: usize,
    pub max_blob_size: usize,
    pub scratch_size: usize,
}

impl TrustedConfig {
    pub const DEFAULT: Self = Self {
        min_key_size: MIN_KEY_SIZE,
        max_key_size: MAX_KEY_SIZE,
        max_blob_size: MAX_BLOB_SIZE,
        scratch_size: SCRATCH_SIZE,
    };

    /// Reject limits that cannot describe a sealable key
    pub fn validate(&self) -> Result<()> {
        let ordered = self.min_key_size > 0
            && self.min_key_size <= self.max_key_size
            && self.max_key_size < self.max_blob_size
            && self.max_blob_size <= self.scratch_size;

        // Blob lengths travel as 16-bit TPM2B sizes
        if !ordered || self.max_blob_size > u16::MAX as usize {
            return Err(TrustedKeyError::InvalidArgument);
        }
        Ok(())
    }

    #[inline]
    pub fn key_size_ok(&self, len: usize) -> bool {
        (self.min_key_size..=self.max_key_size).contains(&len)
    }
}

impl Default for TrustedConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
