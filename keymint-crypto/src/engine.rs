//! The crypto engine: every cryptographic operation the KDS performs.
//!
//! The engine is an explicit value, constructed once and shared behind an
//! `Arc`. It is immutable after construction and safe to use from any
//! thread. Tests construct their own engine with [`CryptoEngine::with_master_key`]
//! instead of touching process-global state.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rand_core::{OsRng, RngCore};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::{cipher, kdf, mac, master, KEY_SIZE};

// ---------------------------------------------------------------------------
// Algorithm selection
// ---------------------------------------------------------------------------

/// Symmetric cipher used to encrypt stored and in-flight key material.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EncType {
    /// AES-128-GCM.
    #[default]
    Aes,
}

/// Hash family behind every HKDF derivation and MAC.
///
/// A single family must back all derivations: storage keys are regenerated
/// from `(mkey, name)` on every unwrap, so changing the hash orphans every
/// stored ciphertext.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HashType {
    #[default]
    Sha256,
    Sha512,
}

/// Engine-level algorithm choices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CryptoOptions {
    pub enctype: EncType,
    pub hashtype: HashType,
}

// ---------------------------------------------------------------------------
// Session keys
// ---------------------------------------------------------------------------

/// The ephemeral key pair derived per ticket.
///
/// `sig_key` is the low half of the HKDF output, `enc_key` the high half.
/// The destination recomputes this split from the `esek` seed, so the
/// ordering is part of the protocol, not an implementation detail.
pub struct SessionKeys {
    pub sig_key: Zeroizing<[u8; KEY_SIZE]>,
    pub enc_key: Zeroizing<[u8; KEY_SIZE]>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct CryptoEngine {
    opts: CryptoOptions,
    mkey: Option<Zeroizing<[u8; KEY_SIZE]>>,
}

impl CryptoEngine {
    /// Load the master key from `path` (creating the file if absent) and
    /// build an engine around it.
    pub fn open(path: &Path, opts: CryptoOptions) -> Result<Self, CryptoError> {
        let mkey = master::load_or_create(path)?;
        Ok(Self {
            opts,
            mkey: Some(mkey),
        })
    }

    /// Build an engine around an in-memory master key. No file is touched.
    pub fn with_master_key(mkey: [u8; KEY_SIZE]) -> Self {
        Self {
            opts: CryptoOptions::default(),
            mkey: Some(Zeroizing::new(mkey)),
        }
    }

    /// Build an engine with no master key. Storage wrap/unwrap fail with
    /// [`CryptoError::NoMasterKey`]; everything else works.
    pub fn without_master_key() -> Self {
        Self {
            opts: CryptoOptions::default(),
            mkey: None,
        }
    }

    pub fn options(&self) -> CryptoOptions {
        self.opts
    }

    /// Fresh cryptographic-strength key material.
    pub fn new_key(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng.fill_bytes(key.as_mut());
        key
    }

    // -----------------------------------------------------------------------
    // Storage wrap / unwrap
    // -----------------------------------------------------------------------

    /// Derive the per-endpoint `(ekey, skey)` storage pair from the master
    /// key and the endpoint name.
    fn storage_keys(
        &self,
        name: &str,
    ) -> Result<(Zeroizing<[u8; KEY_SIZE]>, Zeroizing<[u8; KEY_SIZE]>), CryptoError> {
        let mkey = self.mkey.as_ref().ok_or(CryptoError::NoMasterKey)?;
        kdf::split_expand(self.opts.hashtype, mkey.as_ref(), name.as_bytes())
    }

    /// Encrypt and MAC an endpoint secret for storage.
    ///
    /// Returns `(ciphertext, signature)`.
    pub fn wrap(&self, name: &str, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let (ekey, skey) = self.storage_keys(name)?;
        let ciphertext = self.sym_encrypt(ekey.as_ref(), plaintext)?;
        let signature = mac::sign(self.opts.hashtype, skey.as_ref(), &ciphertext)?;
        Ok((ciphertext, signature))
    }

    /// Verify and decrypt a stored endpoint secret.
    ///
    /// The MAC is checked in constant time before any decryption happens.
    pub fn unwrap(
        &self,
        name: &str,
        ciphertext: &[u8],
        signature: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let (ekey, skey) = self.storage_keys(name)?;
        if !mac::verify(self.opts.hashtype, skey.as_ref(), ciphertext, signature)? {
            return Err(CryptoError::Signature);
        }
        let plain = self.sym_decrypt(ekey.as_ref(), ciphertext)?;
        Ok(Zeroizing::new(plain))
    }

    // -----------------------------------------------------------------------
    // Session derivation
    // -----------------------------------------------------------------------

    /// Derive the per-ticket `(sig_key, enc_key)` pair from a random seed
    /// and the reproducible `info` string.
    pub fn derive_session(&self, prk: &[u8], info: &str) -> Result<SessionKeys, CryptoError> {
        let (sig_key, enc_key) = kdf::split_expand(self.opts.hashtype, prk, info.as_bytes())?;
        Ok(SessionKeys { sig_key, enc_key })
    }

    // -----------------------------------------------------------------------
    // MAC
    // -----------------------------------------------------------------------

    /// Raw HMAC over `data`.
    pub fn sign(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        mac::sign(self.opts.hashtype, key, data)
    }

    /// Constant-time MAC verification.
    pub fn verify(&self, key: &[u8], data: &[u8], mac_bytes: &[u8]) -> Result<bool, CryptoError> {
        mac::verify(self.opts.hashtype, key, data, mac_bytes)
    }

    // -----------------------------------------------------------------------
    // Wire encryption (tickets, group keys, esek)
    // -----------------------------------------------------------------------

    /// Encrypt to the transport form: a base64 string of nonce || ciphertext.
    pub fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<String, CryptoError> {
        let ct = self.sym_encrypt(key, plaintext)?;
        Ok(B64.encode(ct))
    }

    /// Decrypt the transport form produced by [`CryptoEngine::encrypt`].
    pub fn decrypt(&self, key: &[u8], data: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let ct = B64.decode(data).map_err(|_| CryptoError::Decrypt)?;
        let plain = self.sym_decrypt(key, &ct)?;
        Ok(Zeroizing::new(plain))
    }

    // -----------------------------------------------------------------------
    // Cipher dispatch
    // -----------------------------------------------------------------------

    fn sym_encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self.opts.enctype {
            EncType::Aes => cipher::seal(key, plaintext),
        }
    }

    fn sym_decrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self.opts.enctype {
            EncType::Aes => cipher::open(key, data),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
