//! TPM2_Create of a sealed data object

use crate::blob;
use crate::chip::{ChipOps, Transport};
use crate::commands::{TpmCommand, TpmCommandCode, TpmStructureTag, TPM_HEADER_SIZE};
use crate::hash::TpmAlgId;
use crate::object::{self, ObjectAttributes};
use crate::payload::{TrustedKeyOptions, TrustedKeyPayload};
use crate::response::{rc_value, TpmResponse, TPM_RC_HASH};
use crate::session::{SessionAttributes, SessionOps};
use crate::{Result, TrustedKeyError};

/// Classify a TPM status returned by TPM2_Create
fn seal_status(err: TrustedKeyError) -> TrustedKeyError {
    match err {
        TrustedKeyError::TpmStatus(rc) if rc_value(rc) == TPM_RC_HASH => {
            TrustedKeyError::InvalidArgument
        }
        TrustedKeyError::TpmStatus(_) => TrustedKeyError::PermissionDenied,
        other => other,
    }
}

/// Build the TPM2_Create command body after the authorization area
fn append_create_params(
    cmd: &mut TpmCommand,
    payload: &TrustedKeyPayload,
    options: &TrustedKeyOptions,
    hash: TpmAlgId,
) {
    cmd.add_sized(&object::sensitive_area(options.blobauth(), payload.key()));

    let attributes =
        ObjectAttributes::for_seal(!options.policy_digest().is_empty(), payload.migratable);
    cmd.add_sized(&object::public_area(hash, attributes, options.policy_digest()));

    // outsideInfo, creationPCR
    cmd.add_u16(0).add_u32(0);
}

/// Seal `payload.key` under `options.keyhandle()` and store the encoded blob
///
/// Runs with the chip already acquired. On success `payload.blob` holds the
/// DER envelope and `payload.old_format` is cleared.
pub(crate) fn seal_cmd<T: Transport, S: SessionOps>(
    ops: &mut ChipOps<'_, T, S>,
    payload: &mut TrustedKeyPayload,
    options: &TrustedKeyOptions,
    hash: TpmAlgId,
) -> Result<()> {
    let config = ops.config();

    let response = {
        let mut session = ops.start_auth_session()?;

        let mut cmd = TpmCommand::new(TpmStructureTag::Sessions, TpmCommandCode::Create);
        session.append_name(&mut cmd, options.keyhandle());
        session.append_hmac_session(&mut cmd, SessionAttributes::DECRYPT, options.keyauth());
        append_create_params(&mut cmd, payload, options, hash);

        session
            .transmit(&mut cmd, 4, "sealing data")
            .map_err(seal_status)?
    };

    let mut rsp = TpmResponse::new(&response)?;
    rsp.seek(TPM_HEADER_SIZE)?;
    let blob_len = rsp.read_u32()? as usize;
    if blob_len > config.max_blob_size {
        return Err(TrustedKeyError::TooBig);
    }
    let raw = rsp.read_bytes(blob_len)?;

    payload.blob = blob::encode(options, raw, &config)?;
    payload.old_format = false;

    log::debug!(
        "trusted: sealed {} byte key into {} byte blob",
        payload.key.len(),
        payload.blob.len()
    );
    Ok(())
}
