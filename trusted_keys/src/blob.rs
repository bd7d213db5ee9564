//! Key blob codec
//!
//! A sealed object is persisted as the DER envelope
//!
//! ```text
//! TPMKey ::= SEQUENCE {
//!     type        OBJECT IDENTIFIER,          -- 2.23.133.10.1.5
//!     emptyAuth   [0] EXPLICIT BOOLEAN OPTIONAL,
//!     parent      INTEGER,
//!     pubkey      OCTET STRING,               -- TPM2B_PUBLIC
//!     privkey     OCTET STRING                -- TPM2B_PRIVATE
//! }
//! ```
//!
//! Older blobs are the bare `TPM2B_PRIVATE || TPM2B_PUBLIC` concatenation.
//! Decoding always yields that raw layout, since it is what TPM2_Load takes.

use crate::config::TrustedConfig;
use crate::payload::TrustedKeyOptions;
use crate::{Result, TrustedKeyError};
use alloc::vec::Vec;
use der::asn1::{ObjectIdentifier, OctetStringRef};
use der::{Decode, Encode, Sequence};

/// TCG TPMSealedData
pub const TPM2_SEALED_DATA_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.10.1.5");

/// Encoded `[0] { BOOLEAN TRUE }`
const EMPTY_AUTH_LEN: usize = 5;

/// Worst-case header bytes of the three trailing elements, assuming the
/// octet strings fit a two-byte definite length
const TAIL_OVERHEAD: usize = 14;

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct TpmKey<'a> {
    key_type: ObjectIdentifier,
    #[asn1(context_specific = "0", optional = "true")]
    empty_auth: Option<bool>,
    parent: u32,
    public: OctetStringRef<'a>,
    private: OctetStringRef<'a>,
}

/// Views into a decoded blob; borrowed from the blob itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyContext<'a> {
    pub parent: u32,
    pub empty_auth: bool,
    pub public: &'a [u8],
    pub private: &'a [u8],
}

/// A decoded blob, copied out into the raw load layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedKey {
    pub parent: u32,
    pub empty_auth: bool,
    /// TPM2B_PRIVATE || TPM2B_PUBLIC
    pub raw: Vec<u8>,
}

/// Split the raw layout into its two TPM2B structures, size prefixes kept
pub fn split_raw(raw: &[u8]) -> Result<(&[u8], &[u8])> {
    // Must hold at least the two be16 size fields
    if raw.len() < 4 {
        return Err(TrustedKeyError::InvalidArgument);
    }

    let private_len = u16::from_be_bytes([raw[0], raw[1]]) as usize;
    // Room for the following public size field
    if private_len + 2 + 2 > raw.len() {
        return Err(TrustedKeyError::TooBig);
    }

    let public_at = 2 + private_len;
    let public_len = u16::from_be_bytes([raw[public_at], raw[public_at + 1]]) as usize;
    let end = public_at + 2 + public_len;
    if end > raw.len() {
        return Err(TrustedKeyError::TooBig);
    }

    Ok((&raw[..public_at], &raw[public_at..end]))
}

fn octets(data: &[u8]) -> Result<OctetStringRef<'_>> {
    OctetStringRef::new(data).map_err(|_| TrustedKeyError::TooBig)
}

/// Wrap the TPM2B_PRIVATE || TPM2B_PUBLIC returned by TPM2_Create
pub fn encode(options: &TrustedKeyOptions, raw: &[u8], config: &TrustedConfig) -> Result<Vec<u8>> {
    let (private, public) = split_raw(raw)?;

    let empty_auth = options.blobauth().is_empty();
    let head = TPM2_SEALED_DATA_OID
        .encoded_len()
        .map(|len| u32::from(len) as usize)
        .map_err(|_| TrustedKeyError::InvalidArgument)?
        + if empty_auth { EMPTY_AUTH_LEN } else { 0 };

    // A well behaved TPM never trips this; if it does, the response is hostile
    if head + public.len() + private.len() + TAIL_OVERHEAD > config.scratch_size {
        log::error!("BUG: scratch buffer is too small");
        return Err(TrustedKeyError::InvalidArgument);
    }

    let key = TpmKey {
        key_type: TPM2_SEALED_DATA_OID,
        empty_auth: empty_auth.then_some(true),
        parent: options.keyhandle().0,
        public: octets(public)?,
        private: octets(private)?,
    };

    let len = key
        .encoded_len()
        .map(|len| u32::from(len) as usize)
        .map_err(|_| TrustedKeyError::TooBig)?;
    if len > config.max_blob_size {
        return Err(TrustedKeyError::TooBig);
    }

    key.to_der().map_err(|err| {
        log::error!("BUG: blob encoder failed: {}", err);
        TrustedKeyError::TooBig
    })
}

/// Parse the DER envelope without copying
pub fn parse(blob: &[u8]) -> Result<KeyContext<'_>> {
    let key = TpmKey::from_der(blob).map_err(|err| {
        log::debug!("trusted: blob is not a TPMKey: {}", err);
        TrustedKeyError::InvalidArgument
    })?;

    if key.key_type != TPM2_SEALED_DATA_OID {
        log::debug!("trusted: blob OID {} is not TPMSealedData", key.key_type);
        return Err(TrustedKeyError::InvalidArgument);
    }

    Ok(KeyContext {
        parent: key.parent,
        empty_auth: key.empty_auth.unwrap_or(false),
        public: key.public.as_bytes(),
        private: key.private.as_bytes(),
    })
}

/// Parse the DER envelope and copy private then public into the raw layout
pub fn decode(blob: &[u8], config: &TrustedConfig) -> Result<DecodedKey> {
    let ctx = parse(blob)?;

    let len = ctx.private.len() + ctx.public.len();
    if len > config.max_blob_size {
        return Err(TrustedKeyError::InvalidArgument);
    }

    let mut raw = Vec::new();
    raw.try_reserve_exact(len + 4)
        .map_err(|_| TrustedKeyError::OutOfMemory)?;
    raw.extend_from_slice(ctx.private);
    raw.extend_from_slice(ctx.public);

    Ok(DecodedKey {
        parent: ctx.parent,
        empty_auth: ctx.empty_auth,
        raw,
    })
}
