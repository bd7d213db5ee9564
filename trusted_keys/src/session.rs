//! Authorization sessions
//!
//! The trusted key commands never compute session HMACs or nonces
//! themselves; they drive a [`SessionOps`] implementation. [`PasswordSession`]
//! covers TPMs (or configurations) without HMAC session support.

use crate::chip::Transport;
use crate::commands::{append_auth, TpmCommand, TpmHandle, TPM_RS_PW};
use crate::Result;
use alloc::vec::Vec;
use bitflags::bitflags;

bitflags! {
    /// TPMA_SESSION
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SessionAttributes: u8 {
        const CONTINUE_SESSION = 0x01;
        const AUDIT_EXCLUSIVE  = 0x02;
        const AUDIT_RESET      = 0x04;
        /// First command parameter is encrypted
        const DECRYPT          = 0x20;
        /// First response parameter is encrypted
        const ENCRYPT          = 0x40;
        const AUDIT            = 0x80;
    }
}

/// Session bookkeeping collaborator.
///
/// Lifecycle per command: `start_auth_session`, then `append_name` for each
/// handle, `append_hmac_session` (and optionally `append_hmac_session_opt`),
/// `fill_hmac_session` once the command is complete, `check_hmac_response`
/// on a successful response, and finally `end_auth_session`. The chip layer
/// guarantees `end_auth_session` runs exactly once for every successful
/// start, whatever happens in between.
pub trait SessionOps {
    /// Open a session for the next command
    fn start_auth_session(&mut self, transport: &mut dyn Transport) -> Result<()>;

    /// Release whatever the session still holds
    fn end_auth_session(&mut self, transport: &mut dyn Transport);

    /// Append a handle to the handle area, recording its name if needed
    fn append_name(&mut self, cmd: &mut TpmCommand, handle: TpmHandle);

    /// Append the session's authorization for the preceding handle
    fn append_hmac_session(
        &mut self,
        cmd: &mut TpmCommand,
        attributes: SessionAttributes,
        passphrase: &[u8],
    );

    /// Append an extra session used only for parameter encryption.
    ///
    /// Sessions that cannot encrypt skip it.
    fn append_hmac_session_opt(
        &mut self,
        _cmd: &mut TpmCommand,
        _attributes: SessionAttributes,
        _passphrase: &[u8],
    ) {
    }

    /// Compute HMACs / encrypt parameters of a finished command
    fn fill_hmac_session(&mut self, cmd: &mut TpmCommand) -> Result<()>;

    /// Verify response integrity and decrypt response parameters in place
    fn check_hmac_response(&mut self, cmd: &TpmCommand, response: &mut Vec<u8>) -> Result<()>;
}

/// Plain password authorization (TPM_RS_PW).
///
/// No nonces, no HMACs, no parameter encryption: the auth value travels in
/// the clear. Trailing NUL padding of fixed-size auth values is trimmed.
#[derive(Debug, Default, Clone, Copy)]
pub struct PasswordSession;

impl PasswordSession {
    pub const fn new() -> Self {
        Self
    }
}

fn trim_trailing_nul(passphrase: &[u8]) -> &[u8] {
    let len = passphrase
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |last| last + 1);
    &passphrase[..len]
}

impl SessionOps for PasswordSession {
    fn start_auth_session(&mut self, _transport: &mut dyn Transport) -> Result<()> {
        Ok(())
    }

    fn end_auth_session(&mut self, _transport: &mut dyn Transport) {}

    fn append_name(&mut self, cmd: &mut TpmCommand, handle: TpmHandle) {
        cmd.add_u32(handle.0);
    }

    fn append_hmac_session(
        &mut self,
        cmd: &mut TpmCommand,
        _attributes: SessionAttributes,
        passphrase: &[u8],
    ) {
        // Password sessions cannot encrypt parameters
        append_auth(
            cmd,
            TPM_RS_PW,
            &[],
            SessionAttributes::empty(),
            trim_trailing_nul(passphrase),
        );
    }

    fn fill_hmac_session(&mut self, _cmd: &mut TpmCommand) -> Result<()> {
        Ok(())
    }

    fn check_hmac_response(&mut self, _cmd: &TpmCommand, _response: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_trailing_nul() {
        assert_eq!(trim_trailing_nul(b"abc\0\0\0"), b"abc");
        assert_eq!(trim_trailing_nul(&[0u8; 20]), b"");
        assert_eq!(trim_trailing_nul(b"a\0b"), b"a\0b");
    }

    #[test]
    fn test_password_record() {
        let mut session = PasswordSession::new();
        let mut cmd = TpmCommand::new_sized();
        session.append_name(&mut cmd, TpmHandle(0x8100_0001));
        session.append_hmac_session(&mut cmd, SessionAttributes::DECRYPT, b"key\0\0");

        assert_eq!(
            cmd.as_bytes(),
            &[
                0x81, 0x00, 0x00, 0x01, // parent handle
                0x00, 0x00, 0x00, 12, // area size
                0x40, 0x00, 0x00, 0x09, // TPM_RS_PW
                0x00, 0x00, // no nonce
                0x00, // no attributes
                0x00, 0x03, b'k', b'e', b'y',
            ]
        );
    }

    #[test]
    fn test_optional_session_skipped() {
        let mut session = PasswordSession::new();
        let mut cmd = TpmCommand::new_sized();
        session.append_hmac_session_opt(&mut cmd, SessionAttributes::ENCRYPT, &[]);
        assert!(cmd.is_empty());
    }
}
