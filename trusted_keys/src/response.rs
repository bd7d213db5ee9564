//! TPM 2.0 Response Parser
//!
//! Bounded reader over TPM 2.0 response packets. Every read is checked
//! against the buffer; running off the end is a [`TrustedKeyError::Fault`].

use crate::commands::TPM_HEADER_SIZE;
use crate::{Result, TrustedKeyError};

/// TPM_RC_SUCCESS
pub const TPM_RC_SUCCESS: u32 = 0x000;

/// TPM_RC_HASH: hash algorithm not supported or not appropriate (format one)
pub const TPM_RC_HASH: u32 = 0x083;

/// Format-one response codes carry handle/parameter numbers in the upper bits
const RC_FMT1: u32 = 0x080;

/// Strip the parameter/handle/session number from a format-one code
pub fn rc_value(rc: u32) -> u32 {
    if rc & RC_FMT1 != 0 {
        rc & 0xBF
    } else {
        rc
    }
}

/// TPM Response Parser
pub struct TpmResponse<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> TpmResponse<'a> {
    /// Create a new response parser
    pub fn new(data: &'a [u8]) -> Result<Self> {
        if data.len() < TPM_HEADER_SIZE {
            return Err(TrustedKeyError::Fault);
        }

        Ok(Self { data, offset: 0 })
    }

    /// Response code from the header, without consuming anything
    pub fn response_code(&self) -> u32 {
        u32::from_be_bytes([self.data[6], self.data[7], self.data[8], self.data[9]])
    }

    /// Validate response header (tag, size, code)
    ///
    /// A declared size that disagrees with the buffer is a fault; a non-zero
    /// code is surfaced untouched as [`TrustedKeyError::TpmStatus`].
    pub fn validate_header(&mut self) -> Result<()> {
        let _tag = self.read_u16()?;
        let size = self.read_u32()?;
        let code = self.read_u32()?;

        if size as usize != self.data.len() {
            return Err(TrustedKeyError::Fault);
        }

        if code != TPM_RC_SUCCESS {
            return Err(TrustedKeyError::TpmStatus(code));
        }

        Ok(())
    }

    /// Move to an absolute offset
    pub fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.data.len() {
            return Err(TrustedKeyError::Fault);
        }
        self.offset = offset;
        Ok(())
    }

    /// Read u8
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read u16 (big-endian)
    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Read u32 (big-endian)
    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(count)
            .filter(|end| *end <= self.data.len())
            .ok_or(TrustedKeyError::Fault)?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    /// Read TPM2B structure (2-byte size + data)
    pub fn read_tpm2b(&mut self) -> Result<&'a [u8]> {
        let size = self.read_u16()? as usize;
        self.read_bytes(size)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Get remaining bytes
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(code: u32, body: &[u8]) -> alloc::vec::Vec<u8> {
        let mut out = alloc::vec::Vec::new();
        out.extend_from_slice(&0x8001u16.to_be_bytes());
        out.extend_from_slice(&((TPM_HEADER_SIZE + body.len()) as u32).to_be_bytes());
        out.extend_from_slice(&code.to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_short_response_is_fault() {
        assert!(matches!(TpmResponse::new(&[0x80, 0x01, 0, 0]), Err(TrustedKeyError::Fault)));
    }

    #[test]
    fn test_validate_header_success() {
        let data = response(0, &[1, 2, 3, 4]);
        let mut rsp = TpmResponse::new(&data).unwrap();
        rsp.validate_header().unwrap();
        assert_eq!(rsp.read_u32().unwrap(), 0x0102_0304);
        assert!(rsp.remaining().is_empty());
    }

    #[test]
    fn test_validate_header_size_mismatch() {
        let mut data = response(0, &[1, 2]);
        data.push(0xFF);
        let mut rsp = TpmResponse::new(&data).unwrap();
        assert_eq!(rsp.validate_header(), Err(TrustedKeyError::Fault));
    }

    #[test]
    fn test_validate_header_status() {
        let data = response(0x98E, &[]);
        let mut rsp = TpmResponse::new(&data).unwrap();
        assert_eq!(rsp.validate_header(), Err(TrustedKeyError::TpmStatus(0x98E)));
        assert_eq!(rsp.response_code(), 0x98E);
    }

    #[test]
    fn test_tpm2b_past_end() {
        let data = response(0, &[0x00, 0x10, 0xAA]);
        let mut rsp = TpmResponse::new(&data).unwrap();
        rsp.seek(TPM_HEADER_SIZE).unwrap();
        assert_eq!(rsp.read_tpm2b(), Err(TrustedKeyError::Fault));
    }

    #[test]
    fn test_rc_value_strips_parameter_number() {
        assert_eq!(rc_value(0x2C3), TPM_RC_HASH);
        assert_eq!(rc_value(0x1C3), TPM_RC_HASH);
        assert_eq!(rc_value(0x101), 0x101);
    }
}
