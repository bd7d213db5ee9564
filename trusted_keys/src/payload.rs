//! Trusted key payload and options
//!
//! The payload is the caller-owned secret and its sealed blob; options carry
//! the parent handle and authorization values. Both wipe their secrets on drop.

use crate::commands::TpmHandle;
use crate::hash::HashAlgo;
use crate::{Result, TrustedKeyError};
use alloc::vec::Vec;
use core::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of parent and blob authorization values (SHA-1 digest)
pub const TPM_DIGEST_SIZE: usize = 20;

/// Secret plus its sealed form
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct TrustedKeyPayload {
    /// Secret in clear
    pub key: Vec<u8>,
    /// Sealed object, DER or legacy layout
    pub blob: Vec<u8>,
    /// Object may leave its TPM/parent
    pub migratable: bool,
    /// `blob` is the legacy raw layout
    pub old_format: bool,
}

impl TrustedKeyPayload {
    /// Payload for sealing `key`
    ///
    /// The sealed object is bound to its TPM and parent (`fixedTPM` and
    /// `fixedParent` set) unless the caller asks otherwise with
    /// [`with_migratable`](Self::with_migratable).
    pub fn new(key: &[u8]) -> Self {
        Self {
            key: key.to_vec(),
            blob: Vec::new(),
            migratable: false,
            old_format: false,
        }
    }

    /// Payload for unsealing a stored blob
    pub fn from_blob(blob: &[u8]) -> Self {
        Self {
            key: Vec::new(),
            blob: blob.to_vec(),
            migratable: false,
            old_format: false,
        }
    }

    pub fn with_migratable(mut self, migratable: bool) -> Self {
        self.migratable = migratable;
        self
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn blob(&self) -> &[u8] {
        &self.blob
    }
}

impl fmt::Debug for TrustedKeyPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustedKeyPayload")
            .field("key_len", &self.key.len())
            .field("blob_len", &self.blob.len())
            .field("migratable", &self.migratable)
            .field("old_format", &self.old_format)
            .finish()
    }
}

/// Parent, authorization and policy for one seal/unseal
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct TrustedKeyOptions {
    #[zeroize(skip)]
    keyhandle: TpmHandle,
    keyauth: [u8; TPM_DIGEST_SIZE],
    blobauth: Vec<u8>,
    #[zeroize(skip)]
    hash: HashAlgo,
    policydigest: Vec<u8>,
    #[zeroize(skip)]
    policyhandle: Option<TpmHandle>,
}

impl TrustedKeyOptions {
    pub fn new(keyhandle: TpmHandle, hash: HashAlgo) -> Self {
        Self {
            keyhandle,
            keyauth: [0; TPM_DIGEST_SIZE],
            blobauth: Vec::new(),
            hash,
            policydigest: Vec::new(),
            policyhandle: None,
        }
    }

    /// Parent authorization, zero padded to the digest size
    pub fn with_keyauth(mut self, keyauth: &[u8]) -> Result<Self> {
        if keyauth.len() > TPM_DIGEST_SIZE {
            return Err(TrustedKeyError::InvalidArgument);
        }
        self.keyauth = [0; TPM_DIGEST_SIZE];
        self.keyauth[..keyauth.len()].copy_from_slice(keyauth);
        Ok(self)
    }

    /// Authorization bound into the sealed object; empty means emptyAuth
    pub fn with_blobauth(mut self, blobauth: &[u8]) -> Result<Self> {
        if blobauth.len() > TPM_DIGEST_SIZE {
            return Err(TrustedKeyError::InvalidArgument);
        }
        self.blobauth.zeroize();
        self.blobauth.extend_from_slice(blobauth);
        Ok(self)
    }

    /// Policy the object is sealed under; must be a digest of `hash`
    pub fn with_policy_digest(mut self, digest: &[u8]) -> Result<Self> {
        if digest.len() != self.hash.digest_size() {
            return Err(TrustedKeyError::InvalidArgument);
        }
        self.policydigest = digest.to_vec();
        Ok(self)
    }

    /// Policy session, started by the caller, used to authorize unseal
    pub fn with_policy_handle(mut self, handle: TpmHandle) -> Result<Self> {
        if handle.is_unset() {
            return Err(TrustedKeyError::InvalidArgument);
        }
        self.policyhandle = Some(handle);
        Ok(self)
    }

    pub fn keyhandle(&self) -> TpmHandle {
        self.keyhandle
    }

    pub fn keyauth(&self) -> &[u8] {
        &self.keyauth
    }

    pub fn blobauth(&self) -> &[u8] {
        &self.blobauth
    }

    pub fn hash(&self) -> HashAlgo {
        self.hash
    }

    pub fn policy_digest(&self) -> &[u8] {
        &self.policydigest
    }

    pub fn policy_handle(&self) -> Option<TpmHandle> {
        self.policyhandle
    }
}

impl fmt::Debug for TrustedKeyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustedKeyOptions")
            .field("keyhandle", &self.keyhandle)
            .field("blobauth_len", &self.blobauth.len())
            .field("hash", &self.hash)
            .field("policydigest_len", &self.policydigest.len())
            .field("policyhandle", &self.policyhandle)
            .finish()
    }
}
