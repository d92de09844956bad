//! Symmetric cipher: AES-128-GCM.
//!
//! Wire form: nonce[12] || aead_ct. The nonce is drawn fresh per encryption.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Nonce,
};
use rand_core::{OsRng, RngCore};

use crate::error::CryptoError;

pub const NONCE_BYTES: usize = 12;

/// Generate a random 12-byte nonce. Used during encryption only.
fn nonce() -> [u8; NONCE_BYTES] {
    let mut n = [0u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut n);
    n
}

/// Seal (encrypt path). Returns `CryptoError::Encrypt` on failure.
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes128Gcm::new_from_slice(key).map_err(|_| CryptoError::Encrypt)?;
    let n = nonce();
    let ct = cipher
        .encrypt(Nonce::from_slice(&n), plaintext)
        .map_err(|_| CryptoError::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_BYTES + ct.len());
    out.extend_from_slice(&n);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Open (decrypt path). Returns `CryptoError::Decrypt` on failure.
pub fn open(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_BYTES {
        return Err(CryptoError::Decrypt);
    }
    let (n, ct) = data.split_at(NONCE_BYTES);
    let cipher = Aes128Gcm::new_from_slice(key).map_err(|_| CryptoError::Decrypt)?;
    cipher
        .decrypt(Nonce::from_slice(n), ct)
        .map_err(|_| CryptoError::Decrypt)
}
