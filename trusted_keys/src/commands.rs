//! TPM 2.0 Command Builder
//!
//! Constructs binary command packets for the trusted key flows.
//! Implements the subset of TCG TPM 2.0 Part 3 used here (Create, Load,
//! Unseal, FlushContext) plus the TPMS_AUTH_COMMAND record.

use crate::session::SessionAttributes;
use crate::{Result, TrustedKeyError};
use alloc::vec::Vec;
use zeroize::Zeroize;

/// Command/response header: tag (2) + size (4) + code (4)
pub const TPM_HEADER_SIZE: usize = 10;

/// Largest command the driver will accept (one page)
pub const TPM_BUFSIZE: usize = 4096;

/// Password authorization pseudo-session (TPM_RS_PW)
pub const TPM_RS_PW: u32 = 0x4000_0009;

/// Fixed part of TPMS_AUTH_COMMAND: handle + nonce size + attributes + hmac size
const AUTH_RECORD_FIXED: u32 = 9;

/// TPM 2.0 Command Codes
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpmCommandCode {
    Create = 0x0000_0153,
    Load = 0x0000_0157,
    Unseal = 0x0000_015E,
    FlushContext = 0x0000_0165,
}

/// TPM 2.0 Structure Tags
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpmStructureTag {
    /// No sessions, no authorization
    NoSessions = 0x8001,
    /// With sessions/authorization
    Sessions = 0x8002,
}

/// TPM object or session handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpmHandle(pub u32);

impl TpmHandle {
    /// Handles of zero never name a loadable parent
    #[inline]
    pub fn is_unset(&self) -> bool {
        self.0 == 0
    }
}

/// TPM Command Builder
///
/// Either a full command (header + body) or a TPM2B body that is later
/// spliced into a command with [`TpmCommand::add_sized`]. The buffer is wiped
/// on drop since it routinely carries auth values and secrets.
pub struct TpmCommand {
    buffer: Vec<u8>,
    header: bool,
    overflow: bool,
}

impl TpmCommand {
    /// Create a new command with tag and command code
    pub fn new(tag: TpmStructureTag, command_code: TpmCommandCode) -> Self {
        let mut buffer = Vec::with_capacity(256);

        // Tag (2 bytes)
        buffer.extend_from_slice(&(tag as u16).to_be_bytes());

        // Size placeholder (4 bytes) - updated in finish()
        buffer.extend_from_slice(&[0, 0, 0, 0]);

        // Command code (4 bytes)
        buffer.extend_from_slice(&(command_code as u32).to_be_bytes());

        Self {
            buffer,
            header: true,
            overflow: false,
        }
    }

    /// Create a headerless buffer for a TPM2B payload
    pub fn new_sized() -> Self {
        Self {
            buffer: Vec::new(),
            header: false,
            overflow: false,
        }
    }

    /// Add a u8 value
    pub fn add_u8(&mut self, value: u8) -> &mut Self {
        self.add_bytes(&[value])
    }

    /// Add a u16 value (big-endian)
    pub fn add_u16(&mut self, value: u16) -> &mut Self {
        self.add_bytes(&value.to_be_bytes())
    }

    /// Add a u32 value (big-endian)
    pub fn add_u32(&mut self, value: u32) -> &mut Self {
        self.add_bytes(&value.to_be_bytes())
    }

    /// Add a byte slice
    pub fn add_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        if self.buffer.len() + bytes.len() > TPM_BUFSIZE {
            self.overflow = true;
            return self;
        }
        self.buffer.extend_from_slice(bytes);
        self
    }

    /// Add a TPM2B structure (2-byte size + data)
    pub fn add_tpm2b(&mut self, data: &[u8]) -> &mut Self {
        match u16::try_from(data.len()) {
            Ok(len) => self.add_u16(len).add_bytes(data),
            Err(_) => {
                self.overflow = true;
                self
            }
        }
    }

    /// Add a headerless buffer as a TPM2B structure
    pub fn add_sized(&mut self, sized: &TpmCommand) -> &mut Self {
        if sized.overflow {
            self.overflow = true;
        }
        self.add_tpm2b(&sized.buffer)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Something did not fit; the command must not be sent
    pub fn overflowed(&self) -> bool {
        self.overflow
    }

    /// Command code of a full command
    pub fn command_code(&self) -> Option<u32> {
        if !self.header {
            return None;
        }
        let code = self.buffer.get(6..TPM_HEADER_SIZE)?;
        Some(u32::from_be_bytes([code[0], code[1], code[2], code[3]]))
    }

    /// Patch the size field; fails if anything overflowed
    pub fn finish(&mut self) -> Result<()> {
        if self.overflow {
            return Err(TrustedKeyError::TooBig);
        }
        if self.header {
            let size = self.buffer.len() as u32;
            // Update size field at offset 2
            self.buffer[2..6].copy_from_slice(&size.to_be_bytes());
        }
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Raw access for session helpers that patch HMAC fields in place
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }
}

impl Drop for TpmCommand {
    fn drop(&mut self) {
        self.buffer.zeroize();
    }
}

/// Append a TPMS_AUTH_COMMAND record preceded by the authorization area size.
///
/// `nonce` and `hmac` may be empty. `hmac` carries either a session HMAC or a
/// plaintext password, depending on the session type; nothing is computed here.
pub fn append_auth(
    cmd: &mut TpmCommand,
    session_handle: u32,
    nonce: &[u8],
    attributes: SessionAttributes,
    hmac: &[u8],
) {
    let area = AUTH_RECORD_FIXED as usize + nonce.len() + hmac.len();

    cmd.add_u32(area as u32)
        .add_u32(session_handle)
        .add_tpm2b(nonce)
        .add_u8(attributes.bits())
        .add_tpm2b(hmac);
}

/// Helper: Build TPM2_FlushContext command
pub fn build_flush_context(handle: TpmHandle) -> TpmCommand {
    let mut cmd = TpmCommand::new(TpmStructureTag::NoSessions, TpmCommandCode::FlushContext);
    cmd.add_u32(handle.0);
    cmd
}
