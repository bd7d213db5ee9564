//! TPM chip access
//!
//! A [`TpmChip`] owns the transport and the session helper behind a spin
//! lock. [`TpmChip::acquire`] is the only way to reach either, so holding a
//! [`ChipOps`] is holding exclusive use of the TPM; dropping it releases the
//! chip. Authorization sessions are scoped the same way through
//! [`AuthSession`].

use crate::commands::{build_flush_context, TpmCommand, TpmHandle, TPM_HEADER_SIZE};
use crate::config::TrustedConfig;
use crate::response::TpmResponse;
use crate::session::{PasswordSession, SessionAttributes, SessionOps};
use crate::{Result, TrustedKeyError};
use alloc::vec::Vec;
use spin::{Mutex, MutexGuard};

/// Moves raw command/response buffers to and from the TPM.
///
/// Framing, retries and timeouts belong to the implementation.
pub trait Transport {
    /// Send a complete command, return the complete response
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>>;

    /// Whether the device is still there to be claimed
    fn is_available(&self) -> bool {
        true
    }
}

struct ChipState<T, S> {
    transport: T,
    sessions: S,
}

/// A TPM shared between callers
pub struct TpmChip<T, S = PasswordSession> {
    state: Mutex<ChipState<T, S>>,
    config: TrustedConfig,
}

impl<T: Transport> TpmChip<T, PasswordSession> {
    /// Chip using plain password authorization
    pub fn new(transport: T) -> Self {
        Self::with_sessions(transport, PasswordSession::new())
    }
}

impl<T: Transport, S: SessionOps> TpmChip<T, S> {
    pub fn with_sessions(transport: T, sessions: S) -> Self {
        Self {
            state: Mutex::new(ChipState {
                transport,
                sessions,
            }),
            config: TrustedConfig::DEFAULT,
        }
    }

    /// Replace the size limits
    pub fn with_config(mut self, config: TrustedConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn config(&self) -> &TrustedConfig {
        &self.config
    }

    /// Claim exclusive use of the chip, blocking while another caller holds it
    pub fn acquire(&self) -> Result<ChipOps<'_, T, S>> {
        let state = self.state.lock();
        if !state.transport.is_available() {
            log::warn!("tpm: chip not available");
            return Err(TrustedKeyError::NotAvailable);
        }

        Ok(ChipOps {
            state,
            config: self.config,
        })
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.state.get_mut().transport
    }

    pub fn sessions_mut(&mut self) -> &mut S {
        &mut self.state.get_mut().sessions
    }

    pub fn into_parts(self) -> (T, S) {
        let state = self.state.into_inner();
        (state.transport, state.sessions)
    }
}

/// Send a finished command and validate the response header
fn exchange<T: Transport>(transport: &mut T, cmd: &TpmCommand, desc: &str) -> Result<Vec<u8>> {
    log::debug!("tpm: {} ({} bytes)", desc, cmd.len());

    let response = transport.transmit(cmd.as_bytes())?;
    let mut rsp = TpmResponse::new(&response)?;
    if let Err(err) = rsp.validate_header() {
        log::debug!("tpm: {} failed: {}", desc, err);
        return Err(err);
    }

    Ok(response)
}

fn check_min_body(response: &[u8], min_body: usize) -> Result<()> {
    if response.len() < TPM_HEADER_SIZE + min_body {
        return Err(TrustedKeyError::Fault);
    }
    Ok(())
}

/// Exclusive use of a [`TpmChip`]
pub struct ChipOps<'a, T, S> {
    state: MutexGuard<'a, ChipState<T, S>>,
    config: TrustedConfig,
}

impl<'a, T: Transport, S: SessionOps> ChipOps<'a, T, S> {
    pub fn config(&self) -> TrustedConfig {
        self.config
    }

    /// Open an authorization session, ended when the returned guard drops
    pub fn start_auth_session(&mut self) -> Result<AuthSession<'_, T, S>> {
        let state = &mut *self.state;
        state.sessions.start_auth_session(&mut state.transport)?;
        Ok(AuthSession { state })
    }

    /// Send a sessionless command
    ///
    /// `min_body` is the number of bytes a successful response must carry
    /// after the header.
    pub fn transmit_cmd(
        &mut self,
        cmd: &mut TpmCommand,
        min_body: usize,
        desc: &str,
    ) -> Result<Vec<u8>> {
        cmd.finish()?;
        let response = exchange(&mut self.state.transport, cmd, desc)?;
        check_min_body(&response, min_body)?;
        Ok(response)
    }

    /// Evict a transient object; failures are only logged
    pub fn flush_context(&mut self, handle: TpmHandle) {
        let mut cmd = build_flush_context(handle);
        if let Err(err) = self.transmit_cmd(&mut cmd, 0, "flushing context") {
            log::warn!("tpm: failed to flush handle 0x{:08x}: {}", handle.0, err);
        }
    }
}

/// An open authorization session on an acquired chip
pub struct AuthSession<'s, T: Transport, S: SessionOps> {
    state: &'s mut ChipState<T, S>,
}

impl<'s, T: Transport, S: SessionOps> AuthSession<'s, T, S> {
    pub fn append_name(&mut self, cmd: &mut TpmCommand, handle: TpmHandle) {
        self.state.sessions.append_name(cmd, handle);
    }

    pub fn append_hmac_session(
        &mut self,
        cmd: &mut TpmCommand,
        attributes: SessionAttributes,
        passphrase: &[u8],
    ) {
        self.state
            .sessions
            .append_hmac_session(cmd, attributes, passphrase);
    }

    pub fn append_hmac_session_opt(
        &mut self,
        cmd: &mut TpmCommand,
        attributes: SessionAttributes,
        passphrase: &[u8],
    ) {
        self.state
            .sessions
            .append_hmac_session_opt(cmd, attributes, passphrase);
    }

    /// Finish, authorize and send `cmd`, then check the response under the session
    pub fn transmit(
        &mut self,
        cmd: &mut TpmCommand,
        min_body: usize,
        desc: &str,
    ) -> Result<Vec<u8>> {
        cmd.finish()?;
        self.state.sessions.fill_hmac_session(cmd)?;

        let mut response = exchange(&mut self.state.transport, cmd, desc)?;
        self.state.sessions.check_hmac_response(cmd, &mut response)?;
        check_min_body(&response, min_body)?;

        Ok(response)
    }
}

impl<'s, T: Transport, S: SessionOps> Drop for AuthSession<'s, T, S> {
    fn drop(&mut self) {
        let state = &mut *self.state;
        state.sessions.end_auth_session(&mut state.transport);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{TpmCommandCode, TpmStructureTag};
    use crate::mock::{tpm_response, CountingSession, MockTpm};

    #[test]
    fn test_acquire_unavailable() {
        let mut tpm = MockTpm::new();
        tpm.set_available(false);
        let chip = TpmChip::new(tpm);
        assert!(matches!(chip.acquire(), Err(TrustedKeyError::NotAvailable)));
    }

    #[test]
    fn test_session_ended_on_drop() {
        let mut chip = TpmChip::with_sessions(MockTpm::new(), CountingSession::new());
        {
            let mut ops = chip.acquire().unwrap();
            let _session = ops.start_auth_session().unwrap();
        }
        let sessions = chip.sessions_mut();
        assert_eq!(sessions.started(), 1);
        assert_eq!(sessions.ended(), 1);
    }

    #[test]
    fn test_session_ended_on_status() {
        let mut tpm = MockTpm::new();
        tpm.push_raw_response(tpm_response(0x8002, 0x98E, &[]));
        let mut chip = TpmChip::with_sessions(tpm, CountingSession::new());
        {
            let mut ops = chip.acquire().unwrap();
            let mut session = ops.start_auth_session().unwrap();
            let mut cmd = TpmCommand::new(TpmStructureTag::Sessions, TpmCommandCode::Unseal);
            assert_eq!(
                session.transmit(&mut cmd, 0, "test"),
                Err(TrustedKeyError::TpmStatus(0x98E))
            );
        }
        assert_eq!(chip.sessions_mut().ended(), 1);
    }

    #[test]
    fn test_short_success_body_is_fault() {
        let mut tpm = MockTpm::new();
        tpm.push_raw_response(tpm_response(0x8001, 0, &[0, 0]));
        let chip = TpmChip::new(tpm);
        let mut ops = chip.acquire().unwrap();
        let mut cmd = TpmCommand::new(TpmStructureTag::NoSessions, TpmCommandCode::Load);
        assert_eq!(ops.transmit_cmd(&mut cmd, 4, "test"), Err(TrustedKeyError::Fault));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = TrustedConfig {
            min_key_size: 0,
            ..TrustedConfig::DEFAULT
        };
        assert!(TpmChip::new(MockTpm::new()).with_config(config).is_err());
    }
}
