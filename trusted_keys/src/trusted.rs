//! Seal / unseal entry points
//!
//! Each call holds the chip for its whole duration. Unseal always flushes
//! the transient object it loaded, whatever the unseal itself returned.

use crate::chip::{TpmChip, Transport};
use crate::hash;
use crate::load::load_cmd;
use crate::payload::{TrustedKeyOptions, TrustedKeyPayload};
use crate::seal::seal_cmd;
use crate::session::SessionOps;
use crate::unseal::unseal_cmd;
use crate::{Result, TrustedKeyError};

/// Seal `payload.key` to the parent named by `options`
///
/// On success `payload.blob` holds the DER-encoded sealed object.
pub fn seal_trusted<T: Transport, S: SessionOps>(
    chip: &TpmChip<T, S>,
    payload: &mut TrustedKeyPayload,
    options: &TrustedKeyOptions,
) -> Result<()> {
    let hash = hash::tpm_alg_for(options.hash()).map_err(|err| {
        log::debug!("trusted: {} cannot name a sealed object", options.hash().name());
        err
    })?;

    if options.keyhandle().is_unset() {
        return Err(TrustedKeyError::InvalidArgument);
    }
    if !chip.config().key_size_ok(payload.key.len()) {
        return Err(TrustedKeyError::InvalidArgument);
    }

    let mut ops = chip.acquire()?;
    seal_cmd(&mut ops, payload, options, hash)
}

/// Recover the secret sealed in `payload.blob` into `payload.key`
pub fn unseal_trusted<T: Transport, S: SessionOps>(
    chip: &TpmChip<T, S>,
    payload: &mut TrustedKeyPayload,
    options: &TrustedKeyOptions,
) -> Result<()> {
    let mut ops = chip.acquire()?;

    let handle = load_cmd(&mut ops, payload, options)?;
    let result = unseal_cmd(&mut ops, payload, options, handle);
    ops.flush_context(handle);

    result
}
