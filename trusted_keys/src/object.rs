//! Sealed object areas
//!
//! Builds the TPM2B_SENSITIVE_CREATE and TPM2B_PUBLIC templates for a
//! keyed-hash sealed object and reads back the attribute word that decides
//! whether the object may leave its TPM and parent.

use crate::commands::TpmCommand;
use crate::hash::TpmAlgId;
use crate::{Result, TrustedKeyError};
use bitflags::bitflags;

bitflags! {
    /// TPMA_OBJECT
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectAttributes: u32 {
        const FIXED_TPM             = 1 << 1;
        const ST_CLEAR              = 1 << 2;
        const FIXED_PARENT          = 1 << 4;
        const SENSITIVE_DATA_ORIGIN = 1 << 5;
        const USER_WITH_AUTH        = 1 << 6;
        const ADMIN_WITH_POLICY     = 1 << 7;
        const NO_DA                 = 1 << 10;
        const ENCRYPTED_DUPLICATION = 1 << 11;
        const RESTRICTED            = 1 << 16;
        const DECRYPT               = 1 << 17;
        const SIGN_ENCRYPT          = 1 << 18;
    }
}

/// Offset of `objectAttributes` inside TPMT_PUBLIC (after type and nameAlg)
pub const PUBLIC_ATTRIBUTES_OFFSET: usize = 4;

impl ObjectAttributes {
    /// Attributes of a new sealed object
    pub fn for_seal(has_policy: bool, migratable: bool) -> Self {
        let mut flags = ObjectAttributes::empty();
        if !has_policy {
            flags |= ObjectAttributes::USER_WITH_AUTH;
        }
        if !migratable {
            flags |= ObjectAttributes::FIXED_TPM | ObjectAttributes::FIXED_PARENT;
        }
        flags
    }

    /// Only an object pinned to both its TPM and its parent is non-migratable
    pub fn is_migratable(self) -> bool {
        !self.contains(ObjectAttributes::FIXED_TPM | ObjectAttributes::FIXED_PARENT)
    }
}

/// TPMS_SENSITIVE_CREATE: userAuth then data
pub fn sensitive_area(blobauth: &[u8], secret: &[u8]) -> TpmCommand {
    let mut sized = TpmCommand::new_sized();
    sized.add_tpm2b(blobauth).add_tpm2b(secret);
    sized
}

/// TPMT_PUBLIC for a keyed-hash object with null scheme and empty unique
pub fn public_area(
    name_alg: TpmAlgId,
    attributes: ObjectAttributes,
    policy_digest: &[u8],
) -> TpmCommand {
    let mut sized = TpmCommand::new_sized();
    sized
        .add_u16(TpmAlgId::KeyedHash as u16)
        .add_u16(name_alg as u16)
        .add_u32(attributes.bits())
        .add_tpm2b(policy_digest)
        // public parameters: scheme, then unique
        .add_u16(TpmAlgId::Null as u16)
        .add_u16(0);
    sized
}

/// Read `objectAttributes` from a TPMT_PUBLIC (size prefix already stripped)
pub fn public_attributes(public: &[u8]) -> Result<ObjectAttributes> {
    let word = public
        .get(PUBLIC_ATTRIBUTES_OFFSET..PUBLIC_ATTRIBUTES_OFFSET + 4)
        .ok_or(TrustedKeyError::TooBig)?;
    let bits = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
    Ok(ObjectAttributes::from_bits_retain(bits))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migratable_truth_table() {
        let tpm = ObjectAttributes::FIXED_TPM;
        let parent = ObjectAttributes::FIXED_PARENT;

        assert!(ObjectAttributes::empty().is_migratable());
        assert!(tpm.is_migratable());
        assert!(parent.is_migratable());
        assert!(!(tpm | parent).is_migratable());
        assert!(!(tpm | parent | ObjectAttributes::USER_WITH_AUTH).is_migratable());
    }

    #[test]
    fn test_seal_attributes() {
        assert_eq!(
            ObjectAttributes::for_seal(false, false),
            ObjectAttributes::USER_WITH_AUTH
                | ObjectAttributes::FIXED_TPM
                | ObjectAttributes::FIXED_PARENT
        );
        assert_eq!(ObjectAttributes::for_seal(true, true), ObjectAttributes::empty());
        assert_eq!(
            ObjectAttributes::for_seal(false, true),
            ObjectAttributes::USER_WITH_AUTH
        );
    }

    #[test]
    fn test_public_area_layout() {
        let attrs = ObjectAttributes::for_seal(false, false);
        let public = public_area(TpmAlgId::Sha256, attrs, &[]);
        assert_eq!(
            public.as_bytes(),
            &[
                0x00, 0x08, // TPM_ALG_KEYEDHASH
                0x00, 0x0B, // TPM_ALG_SHA256
                0x00, 0x00, 0x00, 0x52, // USER_WITH_AUTH | FIXED_PARENT | FIXED_TPM
                0x00, 0x00, // no policy
                0x00, 0x10, // TPM_ALG_NULL
                0x00, 0x00,
            ]
        );
        assert_eq!(public_attributes(public.as_bytes()), Ok(attrs));
    }

    #[test]
    fn test_sensitive_area_layout() {
        let sensitive = sensitive_area(b"", &[0x11; 3]);
        assert_eq!(sensitive.as_bytes(), &[0, 0, 0, 3, 0x11, 0x11, 0x11]);
    }

    #[test]
    fn test_short_public_rejected() {
        assert_eq!(public_attributes(&[0, 8, 0, 11, 0, 0]), Err(TrustedKeyError::TooBig));
    }
}
