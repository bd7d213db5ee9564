//! Trusted Keys (TPM 2.0)
//!
//! Seals a symmetric secret to a TPM-resident parent key and recovers it later.
//! Provides:
//! - Key blob codec (DER `TPMKey` envelope + legacy raw layout)
//! - TPM2_Create / TPM2_Load / TPM2_Unseal command flows
//! - Authorization session plumbing (password built in, HMAC pluggable)
//! - Exclusive chip access for the duration of each operation
//!
//! The transport moving command/response bytes and the HMAC session
//! cryptography are supplied by the caller through [`Transport`] and
//! [`SessionOps`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod blob;
pub mod chip;
pub mod commands;
pub mod config;
pub mod hash;
pub mod object;
pub mod payload;
pub mod response;
pub mod session;

mod load;
mod seal;
mod trusted;
mod unseal;

#[cfg(any(test, feature = "mock-tpm"))]
pub mod mock;

pub use blob::{DecodedKey, KeyContext};
pub use chip::{ChipOps, TpmChip, Transport};
pub use commands::{append_auth, TpmCommand, TpmHandle};
pub use config::TrustedConfig;
pub use hash::{HashAlgo, TpmAlgId};
pub use object::ObjectAttributes;
pub use payload::{TrustedKeyOptions, TrustedKeyPayload};
pub use session::{PasswordSession, SessionAttributes, SessionOps};
pub use trusted::{seal_trusted, unseal_trusted};

use core::fmt;

/// Result type used across the trusted key subsystem
pub type Result<T> = core::result::Result<T, TrustedKeyError>;

/// Trusted key error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustedKeyError {
    /// Bad digest algorithm, missing parent handle or malformed blob
    InvalidArgument,
    /// Allocation failed
    OutOfMemory,
    /// TPM refused the operation
    PermissionDenied,
    /// Blob or secret length outside configured bounds
    TooBig,
    /// Response shorter than it claims to be
    Fault,
    /// Chip could not be claimed
    NotAvailable,
    /// Transport failed to move the command/response
    Transport,
    /// Non-success TPM response code, not yet classified
    TpmStatus(u32),
}

impl TrustedKeyError {
    /// Negative errno equivalent, for keyring front ends
    pub fn errno(&self) -> i32 {
        const EPERM: i32 = 1;
        const EIO: i32 = 5;
        const E2BIG: i32 = 7;
        const ENOMEM: i32 = 12;
        const EFAULT: i32 = 14;
        const ENODEV: i32 = 19;
        const EINVAL: i32 = 22;

        match self {
            TrustedKeyError::InvalidArgument => -EINVAL,
            TrustedKeyError::OutOfMemory => -ENOMEM,
            TrustedKeyError::PermissionDenied | TrustedKeyError::TpmStatus(_) => -EPERM,
            TrustedKeyError::TooBig => -E2BIG,
            TrustedKeyError::Fault => -EFAULT,
            TrustedKeyError::NotAvailable => -ENODEV,
            TrustedKeyError::Transport => -EIO,
        }
    }
}

impl fmt::Display for TrustedKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustedKeyError::InvalidArgument => write!(f, "Invalid argument"),
            TrustedKeyError::OutOfMemory => write!(f, "Out of memory"),
            TrustedKeyError::PermissionDenied => write!(f, "Permission denied"),
            TrustedKeyError::TooBig => write!(f, "Size out of bounds"),
            TrustedKeyError::Fault => write!(f, "Malformed TPM response"),
            TrustedKeyError::NotAvailable => write!(f, "TPM not available"),
            TrustedKeyError::Transport => write!(f, "TPM transport error"),
            TrustedKeyError::TpmStatus(rc) => write!(f, "TPM returned 0x{:03X}", rc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(TrustedKeyError::InvalidArgument.errno(), -22);
        assert_eq!(TrustedKeyError::PermissionDenied.errno(), -1);
        assert_eq!(TrustedKeyError::TpmStatus(0x98E).errno(), -1);
        assert_eq!(TrustedKeyError::TooBig.errno(), -7);
        assert_eq!(TrustedKeyError::Fault.errno(), -14);
        assert_eq!(TrustedKeyError::OutOfMemory.errno(), -12);
    }

    #[test]
    fn test_display_status() {
        assert_eq!(TrustedKeyError::TpmStatus(0x2C3).to_string(), "TPM returned 0x2C3");
    }
}
