//! TPM2_Load of a stored blob

use crate::blob;
use crate::chip::{ChipOps, Transport};
use crate::commands::{TpmCommand, TpmCommandCode, TpmHandle, TpmStructureTag, TPM_HEADER_SIZE};
use crate::object;
use crate::payload::{TrustedKeyOptions, TrustedKeyPayload};
use crate::response::TpmResponse;
use crate::session::{SessionAttributes, SessionOps};
use crate::{Result, TrustedKeyError};

fn load_status(err: TrustedKeyError) -> TrustedKeyError {
    match err {
        TrustedKeyError::TpmStatus(_) => TrustedKeyError::PermissionDenied,
        other => other,
    }
}

/// Load `payload.blob` under its parent and return the transient handle
///
/// DER blobs name their own parent; legacy raw blobs are loaded under
/// `options.keyhandle()`. `payload.old_format` records which layout was
/// chosen before anything is sent; `payload.migratable` is only updated by
/// a successful load.
pub(crate) fn load_cmd<T: Transport, S: SessionOps>(
    ops: &mut ChipOps<'_, T, S>,
    payload: &mut TrustedKeyPayload,
    options: &TrustedKeyOptions,
) -> Result<TpmHandle> {
    let config = ops.config();

    let decoded = match blob::decode(payload.blob(), &config) {
        Ok(key) => Some(key),
        Err(err) => {
            log::warn!("trusted: blob is not DER ({}), trying legacy layout", err);
            None
        }
    };
    payload.old_format = decoded.is_none();
    let (raw, parent) = match &decoded {
        Some(key) => (key.raw.as_slice(), TpmHandle(key.parent)),
        None => (payload.blob(), options.keyhandle()),
    };

    if parent.is_unset() {
        return Err(TrustedKeyError::InvalidArgument);
    }

    let (private, public) = blob::split_raw(raw)?;
    let migratable = object::public_attributes(&public[2..])?.is_migratable();
    let loaded = &raw[..private.len() + public.len()];

    let response = {
        let mut session = ops.start_auth_session()?;

        let mut cmd = TpmCommand::new(TpmStructureTag::Sessions, TpmCommandCode::Load);
        session.append_name(&mut cmd, parent);
        session.append_hmac_session(&mut cmd, SessionAttributes::empty(), options.keyauth());
        cmd.add_bytes(loaded);

        session
            .transmit(&mut cmd, 4, "loading blob")
            .map_err(load_status)?
    };

    let mut rsp = TpmResponse::new(&response)?;
    rsp.seek(TPM_HEADER_SIZE)?;
    let handle = TpmHandle(rsp.read_u32()?);

    payload.migratable = migratable;

    log::debug!("trusted: loaded blob as handle 0x{:08x}", handle.0);
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::TpmChip;
    use crate::hash::HashAlgo;
    use crate::mock::{tpm_response, CountingSession, MockTpm};
    use crate::object::ObjectAttributes;
    use alloc::vec::Vec;

    const PARENT: u32 = 0x8100_0001;

    fn tpm2b(data: &[u8]) -> Vec<u8> {
        let mut out = (data.len() as u16).to_be_bytes().to_vec();
        out.extend_from_slice(data);
        out
    }

    /// TPM2B_PRIVATE || TPM2B_PUBLIC with the given attribute word
    fn legacy_blob(attributes: ObjectAttributes) -> Vec<u8> {
        let mut public = Vec::new();
        public.extend_from_slice(&[0x00, 0x08, 0x00, 0x0B]);
        public.extend_from_slice(&attributes.bits().to_be_bytes());
        public.extend_from_slice(&[0x00, 0x00, 0x00, 0x10, 0x00, 0x00]);

        let mut out = tpm2b(&[0xEE; 24]);
        out.extend_from_slice(&tpm2b(&public));
        out
    }

    fn ok_load_response(handle: u32) -> Vec<u8> {
        let mut body = handle.to_be_bytes().to_vec();
        body.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0]);
        tpm_response(0x8002, 0, &body)
    }

    fn load_with(
        tpm: MockTpm,
        payload: &mut TrustedKeyPayload,
        keyhandle: u32,
    ) -> (Result<TpmHandle>, CountingSession) {
        let options = TrustedKeyOptions::new(TpmHandle(keyhandle), HashAlgo::Sha256);
        let chip = TpmChip::with_sessions(tpm, CountingSession::new());
        let result = match chip.acquire() {
            Ok(mut ops) => load_cmd(&mut ops, payload, &options),
            Err(err) => Err(err),
        };
        let (_, sessions) = chip.into_parts();
        (result, sessions)
    }

    #[test]
    fn test_legacy_fallback() {
        let mut tpm = MockTpm::new();
        tpm.push_raw_response(ok_load_response(0x8000_0007));

        let fixed = ObjectAttributes::FIXED_TPM | ObjectAttributes::FIXED_PARENT;
        let mut payload = TrustedKeyPayload::from_blob(&legacy_blob(fixed));
        let (result, sessions) = load_with(tpm, &mut payload, PARENT);

        assert_eq!(result, Ok(TpmHandle(0x8000_0007)));
        assert!(payload.old_format);
        assert!(!payload.migratable);
        assert_eq!(sessions.started(), sessions.ended());
    }

    #[test]
    fn test_migratable_from_attributes() {
        let mut tpm = MockTpm::new();
        tpm.push_raw_response(ok_load_response(0x8000_0001));

        let mut payload =
            TrustedKeyPayload::from_blob(&legacy_blob(ObjectAttributes::FIXED_TPM));
        let (result, _) = load_with(tpm, &mut payload, PARENT);
        assert!(result.is_ok());
        assert!(payload.migratable);
    }

    #[test]
    fn test_zero_parent_opens_no_session() {
        let mut payload = TrustedKeyPayload::from_blob(&legacy_blob(ObjectAttributes::empty()));
        let (result, sessions) = load_with(MockTpm::new(), &mut payload, 0);

        assert_eq!(result, Err(TrustedKeyError::InvalidArgument));
        assert_eq!(sessions.started(), 0);
        assert_eq!(sessions.ended(), 0);
    }

    #[test]
    fn test_blob_bounds() {
        let mut payload = TrustedKeyPayload::from_blob(&[0, 1, 2]);
        let (result, _) = load_with(MockTpm::new(), &mut payload, PARENT);
        assert_eq!(result, Err(TrustedKeyError::InvalidArgument));

        // private length runs past the public size field
        let mut payload = TrustedKeyPayload::from_blob(&[0x00, 0x10, 0xAA, 0xBB]);
        let (result, _) = load_with(MockTpm::new(), &mut payload, PARENT);
        assert_eq!(result, Err(TrustedKeyError::TooBig));

        // public length runs past the end
        let mut payload = TrustedKeyPayload::from_blob(&[0x00, 0x00, 0x00, 0x08, 0x00]);
        let (result, _) = load_with(MockTpm::new(), &mut payload, PARENT);
        assert_eq!(result, Err(TrustedKeyError::TooBig));
    }

    #[test]
    fn test_short_public_area() {
        let mut raw = tpm2b(&[0xEE; 8]);
        raw.extend_from_slice(&tpm2b(&[0x00, 0x08, 0x00, 0x0B, 0x00]));
        let mut payload = TrustedKeyPayload::from_blob(&raw);
        let (result, sessions) = load_with(MockTpm::new(), &mut payload, PARENT);

        assert_eq!(result, Err(TrustedKeyError::TooBig));
        assert_eq!(sessions.started(), 0);
    }

    #[test]
    fn test_refusal_is_permission_denied() {
        let mut tpm = MockTpm::new();
        tpm.push_raw_response(tpm_response(0x8001, 0x18B, &[]));

        let mut payload = TrustedKeyPayload::from_blob(&legacy_blob(ObjectAttributes::empty()));
        let (result, sessions) = load_with(tpm, &mut payload, PARENT);

        assert_eq!(result, Err(TrustedKeyError::PermissionDenied));
        assert_eq!(sessions.started(), 1);
        assert_eq!(sessions.ended(), 1);
        assert!(payload.old_format);
    }

    #[test]
    fn test_failed_load_replaces_stale_format() {
        let raw = legacy_blob(ObjectAttributes::empty());
        let options = TrustedKeyOptions::new(TpmHandle(PARENT), HashAlgo::Sha256);
        let der = blob::encode(&options, &raw, &crate::TrustedConfig::DEFAULT).unwrap();

        let mut tpm = MockTpm::new();
        tpm.push_raw_response(tpm_response(0x8001, 0x18B, &[]));
        let mut payload = TrustedKeyPayload::from_blob(&der).with_migratable(true);
        payload.old_format = true;

        let (result, _) = load_with(tpm, &mut payload, PARENT);
        assert_eq!(result, Err(TrustedKeyError::PermissionDenied));
        assert!(!payload.old_format);
        assert!(payload.migratable);
    }

    #[test]
    fn test_der_parent_overrides_keyhandle() {
        let raw = legacy_blob(ObjectAttributes::empty());
        let options = TrustedKeyOptions::new(TpmHandle(0x8100_0002), HashAlgo::Sha256);
        let der = blob::encode(&options, &raw, &crate::TrustedConfig::DEFAULT).unwrap();

        let mut tpm = MockTpm::new();
        tpm.push_raw_response(ok_load_response(0x8000_0003));
        let mut payload = TrustedKeyPayload::from_blob(&der);
        payload.old_format = true;

        let chip = TpmChip::new(tpm);
        let other = TrustedKeyOptions::new(TpmHandle(0), HashAlgo::Sha256);
        let handle = {
            let mut ops = chip.acquire().unwrap();
            load_cmd(&mut ops, &mut payload, &other).unwrap()
        };
        assert_eq!(handle, TpmHandle(0x8000_0003));
        assert!(!payload.old_format);

        let (tpm, _) = chip.into_parts();
        let sent = &tpm.sent()[0];
        assert_eq!(&sent[10..14], &0x8100_0002u32.to_be_bytes());
        assert!(sent.ends_with(&raw));
    }
}
