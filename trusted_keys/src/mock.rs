//! Simulated TPM for tests
//!
//! [`MockTpm`] understands enough of TPM2_Create, TPM2_Load, TPM2_Unseal and
//! TPM2_FlushContext to drive seal/unseal end to end. Sealed private areas
//! are only masked, not encrypted. Parents authorize with an empty password
//! unless one is set with [`MockTpm::set_parent_auth`]. Raw responses queued with
//! [`MockTpm::push_raw_response`] are returned before any simulation runs.

use crate::chip::Transport;
use crate::commands::{TpmCommandCode, TpmStructureTag, TPM_HEADER_SIZE, TPM_RS_PW};
use crate::object::ObjectAttributes;
use crate::session::{PasswordSession, SessionAttributes, SessionOps};
use crate::{Result, TpmCommand, TpmHandle, TrustedKeyError};
use alloc::collections::VecDeque;
use alloc::vec::Vec;

const RC_AUTH_UNAVAILABLE: u32 = 0x12F;
const RC_COMMAND_CODE: u32 = 0x143;
const RC_COMMAND_SIZE: u32 = 0x142;
const RC_INTEGRITY: u32 = 0x09F;
const RC_SIZE: u32 = 0x095;
/// TPM_RC_HANDLE, handle 1
const RC_HANDLE_1: u32 = 0x18B;
/// TPM_RC_HASH, parameter 2
const RC_HASH_2: u32 = 0x2C3;
/// TPM_RC_AUTH_FAIL, session 1
const RC_AUTH_FAIL_1: u32 = 0x98E;

const PRIVATE_MASK: u8 = 0x5C;
const PRIVATE_MAGIC: [u8; 2] = *b"MK";

/// nonce (empty), attributes, hmac (empty)
const AUTH_RESPONSE: [u8; 5] = [0, 0, SessionAttributes::CONTINUE_SESSION.bits(), 0, 0];

/// Build a response packet with a correct size field
pub fn tpm_response(tag: u16, code: u32, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(TPM_HEADER_SIZE + body.len());
    out.extend_from_slice(&tag.to_be_bytes());
    out.extend_from_slice(&((TPM_HEADER_SIZE + body.len()) as u32).to_be_bytes());
    out.extend_from_slice(&code.to_be_bytes());
    out.extend_from_slice(body);
    out
}

struct Reader<'a> {
    data: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, at: 0 }
    }

    fn bytes(&mut self, count: usize) -> core::result::Result<&'a [u8], u32> {
        let slice = self.data.get(self.at..self.at + count).ok_or(RC_SIZE)?;
        self.at += count;
        Ok(slice)
    }

    fn u16(&mut self) -> core::result::Result<u16, u32> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> core::result::Result<u32, u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn tpm2b(&mut self) -> core::result::Result<&'a [u8], u32> {
        let len = self.u16()? as usize;
        self.bytes(len)
    }
}

fn put_tpm2b(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    out.extend_from_slice(data);
}

fn trim_nul(value: &[u8]) -> &[u8] {
    let len = value.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    &value[..len]
}

/// First authorization record: (session handle, hmac or password)
fn read_auth<'a>(r: &mut Reader<'a>) -> core::result::Result<(u32, &'a [u8]), u32> {
    let area = r.u32()? as usize;
    let mut auth = Reader::new(r.bytes(area)?);
    let session = auth.u32()?;
    let _nonce = auth.tpm2b()?;
    let _attributes = auth.bytes(1)?;
    let hmac = auth.tpm2b()?;
    Ok((session, hmac))
}

fn wrap_private(auth: &[u8], data: &[u8]) -> Vec<u8> {
    let mut out = PRIVATE_MAGIC.to_vec();
    put_tpm2b(&mut out, auth);
    put_tpm2b(&mut out, data);
    out.iter_mut().for_each(|b| *b ^= PRIVATE_MASK);
    out
}

fn unwrap_private(private: &[u8]) -> core::result::Result<(Vec<u8>, Vec<u8>), u32> {
    let clear: Vec<u8> = private.iter().map(|b| b ^ PRIVATE_MASK).collect();
    let mut r = Reader::new(&clear);
    if r.bytes(2).map_err(|_| RC_INTEGRITY)? != PRIVATE_MAGIC {
        return Err(RC_INTEGRITY);
    }
    let auth = r.tpm2b().map_err(|_| RC_INTEGRITY)?.to_vec();
    let data = r.tpm2b().map_err(|_| RC_INTEGRITY)?.to_vec();
    Ok((auth, data))
}

fn is_persistent(handle: u32) -> bool {
    handle >> 24 == 0x81
}

fn is_policy_session(handle: u32) -> bool {
    handle >> 24 == 0x03
}

struct MockObject {
    handle: u32,
    auth: Vec<u8>,
    data: Vec<u8>,
    attributes: ObjectAttributes,
    has_policy: bool,
}

/// Simulated TPM transport
pub struct MockTpm {
    available: bool,
    transport_error: bool,
    scripted: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    objects: Vec<MockObject>,
    next_handle: u32,
    rejected_algs: Vec<u16>,
    parent_auth: Vec<(u32, Vec<u8>)>,
}

impl MockTpm {
    /// A TPM without SM3 support, with every persistent handle usable as parent
    pub fn new() -> Self {
        Self {
            available: true,
            transport_error: false,
            scripted: VecDeque::new(),
            sent: Vec::new(),
            objects: Vec::new(),
            next_handle: 0,
            rejected_algs: alloc::vec![crate::TpmAlgId::Sm3_256 as u16],
            parent_auth: Vec::new(),
        }
    }

    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    /// Fail every transmit at the transport level
    pub fn set_transport_error(&mut self, failing: bool) {
        self.transport_error = failing;
    }

    /// Require `auth` from Create and Load under `parent`
    pub fn set_parent_auth(&mut self, parent: TpmHandle, auth: &[u8]) {
        self.parent_auth.retain(|(handle, _)| *handle != parent.0);
        self.parent_auth.push((parent.0, auth.to_vec()));
    }

    /// Queue a verbatim response for the next command
    pub fn push_raw_response(&mut self, response: Vec<u8>) {
        self.scripted.push_back(response);
    }

    /// Every command received, in order
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// Command codes received, in order
    pub fn command_codes(&self) -> Vec<u32> {
        self.sent
            .iter()
            .filter_map(|cmd| cmd.get(6..TPM_HEADER_SIZE))
            .map(|code| u32::from_be_bytes([code[0], code[1], code[2], code[3]]))
            .collect()
    }

    /// Transient objects not yet flushed
    pub fn loaded_objects(&self) -> usize {
        self.objects.len()
    }

    fn check_parent_auth(&self, parent: u32, secret: &[u8]) -> core::result::Result<(), u32> {
        let expected = self
            .parent_auth
            .iter()
            .find(|(handle, _)| *handle == parent)
            .map_or(&[][..], |(_, auth)| auth.as_slice());
        if trim_nul(secret) != trim_nul(expected) {
            return Err(RC_AUTH_FAIL_1);
        }
        Ok(())
    }

    fn create(&mut self, r: &mut Reader<'_>) -> core::result::Result<Vec<u8>, u32> {
        let parent = r.u32()?;
        if !is_persistent(parent) {
            return Err(RC_HANDLE_1);
        }
        let (_, secret) = read_auth(r)?;
        self.check_parent_auth(parent, secret)?;

        let mut sensitive = Reader::new(r.tpm2b()?);
        let auth = sensitive.tpm2b()?;
        let data = sensitive.tpm2b()?;

        let public = r.tpm2b()?;
        let mut area = Reader::new(public);
        let _type = area.u16()?;
        let name_alg = area.u16()?;
        if self.rejected_algs.contains(&name_alg) {
            return Err(RC_HASH_2);
        }

        let _outside_info = r.tpm2b()?;
        let _creation_pcr = r.u32()?;

        let mut params = Vec::new();
        put_tpm2b(&mut params, &wrap_private(auth, data));
        put_tpm2b(&mut params, public);

        let mut body = (params.len() as u32).to_be_bytes().to_vec();
        body.extend_from_slice(&params);
        body.extend_from_slice(&AUTH_RESPONSE);
        Ok(body)
    }

    fn load(&mut self, r: &mut Reader<'_>) -> core::result::Result<Vec<u8>, u32> {
        let parent = r.u32()?;
        if !is_persistent(parent) {
            return Err(RC_HANDLE_1);
        }
        let (_, secret) = read_auth(r)?;
        self.check_parent_auth(parent, secret)?;

        let private = r.tpm2b()?;
        let public = r.tpm2b()?;
        let (auth, data) = unwrap_private(private)?;

        let mut area = Reader::new(public);
        area.bytes(4)?;
        let attributes = ObjectAttributes::from_bits_retain(area.u32()?);
        let has_policy = !area.tpm2b()?.is_empty();

        self.next_handle += 1;
        let handle = 0x8000_0000 | self.next_handle;
        self.objects.push(MockObject {
            handle,
            auth,
            data,
            attributes,
            has_policy,
        });

        let mut body = handle.to_be_bytes().to_vec();
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&AUTH_RESPONSE);
        Ok(body)
    }

    fn unseal(&mut self, r: &mut Reader<'_>) -> core::result::Result<Vec<u8>, u32> {
        let handle = r.u32()?;
        let object = self
            .objects
            .iter()
            .find(|o| o.handle == handle)
            .ok_or(RC_HANDLE_1)?;
        let (session, secret) = read_auth(r)?;

        if session == TPM_RS_PW {
            if !object.attributes.contains(ObjectAttributes::USER_WITH_AUTH) {
                return Err(RC_AUTH_UNAVAILABLE);
            }
        } else if !is_policy_session(session) || !object.has_policy {
            return Err(RC_AUTH_UNAVAILABLE);
        }
        if trim_nul(secret) != trim_nul(&object.auth) {
            return Err(RC_AUTH_FAIL_1);
        }

        let mut params = Vec::new();
        put_tpm2b(&mut params, &object.data);

        let mut body = (params.len() as u32).to_be_bytes().to_vec();
        body.extend_from_slice(&params);
        body.extend_from_slice(&AUTH_RESPONSE);
        Ok(body)
    }

    fn flush(&mut self, r: &mut Reader<'_>) -> core::result::Result<Vec<u8>, u32> {
        let handle = r.u32()?;
        let index = self
            .objects
            .iter()
            .position(|o| o.handle == handle)
            .ok_or(RC_HANDLE_1)?;
        self.objects.remove(index);
        Ok(Vec::new())
    }

    fn execute(&mut self, command: &[u8]) -> core::result::Result<(u16, Vec<u8>), u32> {
        let mut r = Reader::new(command);
        let tag = r.u16()?;
        let size = r.u32()? as usize;
        let code = r.u32()?;
        if size != command.len() {
            return Err(RC_COMMAND_SIZE);
        }

        let body = match code {
            c if c == TpmCommandCode::Create as u32 => self.create(&mut r)?,
            c if c == TpmCommandCode::Load as u32 => self.load(&mut r)?,
            c if c == TpmCommandCode::Unseal as u32 => self.unseal(&mut r)?,
            c if c == TpmCommandCode::FlushContext as u32 => self.flush(&mut r)?,
            _ => return Err(RC_COMMAND_CODE),
        };
        Ok((tag, body))
    }
}

impl Default for MockTpm {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTpm {
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        self.sent.push(command.to_vec());
        if self.transport_error {
            return Err(TrustedKeyError::Transport);
        }
        if let Some(response) = self.scripted.pop_front() {
            return Ok(response);
        }

        Ok(match self.execute(command) {
            Ok((tag, body)) => tpm_response(tag, 0, &body),
            Err(rc) => tpm_response(TpmStructureTag::NoSessions as u16, rc, &[]),
        })
    }

    fn is_available(&self) -> bool {
        self.available
    }
}

/// Password session that counts start/end calls and records each
/// authorization it appends
#[derive(Debug, Default)]
pub struct CountingSession {
    inner: PasswordSession,
    started: usize,
    ended: usize,
    fail_start: bool,
    appended: Vec<(SessionAttributes, Vec<u8>)>,
}

impl CountingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session whose start always fails
    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    pub fn started(&self) -> usize {
        self.started
    }

    pub fn ended(&self) -> usize {
        self.ended
    }

    /// Attributes and passphrase of every authorization appended, in order
    pub fn appended(&self) -> &[(SessionAttributes, Vec<u8>)] {
        &self.appended
    }
}

impl SessionOps for CountingSession {
    fn start_auth_session(&mut self, transport: &mut dyn Transport) -> Result<()> {
        if self.fail_start {
            return Err(TrustedKeyError::Transport);
        }
        self.inner.start_auth_session(transport)?;
        self.started += 1;
        Ok(())
    }

    fn end_auth_session(&mut self, transport: &mut dyn Transport) {
        self.ended += 1;
        self.inner.end_auth_session(transport);
    }

    fn append_name(&mut self, cmd: &mut TpmCommand, handle: TpmHandle) {
        self.inner.append_name(cmd, handle);
    }

    fn append_hmac_session(
        &mut self,
        cmd: &mut TpmCommand,
        attributes: SessionAttributes,
        passphrase: &[u8],
    ) {
        self.appended.push((attributes, passphrase.to_vec()));
        self.inner.append_hmac_session(cmd, attributes, passphrase);
    }

    fn fill_hmac_session(&mut self, cmd: &mut TpmCommand) -> Result<()> {
        self.inner.fill_hmac_session(cmd)
    }

    fn check_hmac_response(&mut self, cmd: &TpmCommand, response: &mut Vec<u8>) -> Result<()> {
        self.inner.check_hmac_response(cmd, response)
    }
}
