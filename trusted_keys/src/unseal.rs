//! TPM2_Unseal of a loaded object
//!
//! Two authorization modes: the session helper's password/HMAC session
//! over `blobauth`, or a policy session the caller started beforehand. In
//! the policy mode no session nonce is known here, so `blobauth` goes out
//! in the clear as the policy password. Every such use is logged.

use crate::chip::{ChipOps, Transport};
use crate::commands::{
    append_auth, TpmCommand, TpmCommandCode, TpmHandle, TpmStructureTag, TPM_HEADER_SIZE,
};
use crate::config::TrustedConfig;
use crate::payload::{TrustedKeyOptions, TrustedKeyPayload};
use crate::response::TpmResponse;
use crate::session::{SessionAttributes, SessionOps};
use crate::{Result, TrustedKeyError};
use zeroize::{Zeroize, Zeroizing};

/// Secret returned by TPM2_Unseal: parameterSize, then TPM2B_SENSITIVE_DATA
fn extract_secret<'a>(response: &'a [u8], config: &TrustedConfig) -> Result<&'a [u8]> {
    let mut rsp = TpmResponse::new(response)?;
    rsp.seek(TPM_HEADER_SIZE + 4)?;

    let len = rsp.read_u16()? as usize;
    if !config.key_size_ok(len) {
        return Err(TrustedKeyError::Fault);
    }
    rsp.read_bytes(len)
}

/// Copy the unsealed data into the payload
///
/// Legacy objects carry the migratable flag as the last byte of the data.
fn store_secret(payload: &mut TrustedKeyPayload, data: &[u8]) {
    payload.key.zeroize();

    if payload.old_format {
        if let Some((flag, secret)) = data.split_last() {
            payload.key.extend_from_slice(secret);
            payload.migratable = *flag != 0;
        }
    } else {
        payload.key.extend_from_slice(data);
    }
}

/// Unseal the object at `handle` into `payload.key`
pub(crate) fn unseal_cmd<T: Transport, S: SessionOps>(
    ops: &mut ChipOps<'_, T, S>,
    payload: &mut TrustedKeyPayload,
    options: &TrustedKeyOptions,
    handle: TpmHandle,
) -> Result<()> {
    let config = ops.config();

    let response = {
        let mut session = ops.start_auth_session()?;

        let mut cmd = TpmCommand::new(TpmStructureTag::Sessions, TpmCommandCode::Unseal);
        session.append_name(&mut cmd, handle);

        match options.policy_handle() {
            None => session.append_hmac_session(
                &mut cmd,
                SessionAttributes::ENCRYPT,
                options.blobauth(),
            ),
            Some(policy) => {
                log::warn!(
                    "trusted: policy session 0x{:08x} authorizes unseal with a plaintext password",
                    policy.0
                );
                append_auth(
                    &mut cmd,
                    policy.0,
                    &[],
                    SessionAttributes::empty(),
                    options.blobauth(),
                );
                session.append_hmac_session_opt(&mut cmd, SessionAttributes::ENCRYPT, &[]);
            }
        }

        let response = session.transmit(&mut cmd, 6, "unsealing").map_err(|err| match err {
            TrustedKeyError::TpmStatus(_) => TrustedKeyError::PermissionDenied,
            other => other,
        })?;
        Zeroizing::new(response)
    };

    let data = extract_secret(&response, &config)?;
    store_secret(payload, data);
    Ok(())
}
