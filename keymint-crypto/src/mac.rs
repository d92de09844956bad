//! Message authentication: HMAC with constant-time verification.

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;

use crate::engine::HashType;
use crate::error::CryptoError;

/// Compute a raw HMAC over `data`.
pub fn sign(hash: HashType, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mac = match hash {
        HashType::Sha256 => {
            let mut m = Hmac::<Sha256>::new_from_slice(key).map_err(|_| CryptoError::Signature)?;
            m.update(data);
            m.finalize().into_bytes().to_vec()
        }
        HashType::Sha512 => {
            let mut m = Hmac::<Sha512>::new_from_slice(key).map_err(|_| CryptoError::Signature)?;
            m.update(data);
            m.finalize().into_bytes().to_vec()
        }
    };
    Ok(mac)
}

/// Verify a MAC in constant time. Length mismatch is an immediate failure;
/// equal-length comparison never short-circuits.
pub fn verify(hash: HashType, key: &[u8], data: &[u8], mac: &[u8]) -> Result<bool, CryptoError> {
    let expected = sign(hash, key, data)?;
    if expected.len() != mac.len() {
        return Ok(false);
    }
    Ok(expected.ct_eq(mac).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let mac = sign(HashType::Sha256, b"key", b"data").unwrap();
        assert!(verify(HashType::Sha256, b"key", b"data", &mac).unwrap());
    }

    #[test]
    fn wrong_key_rejected() {
        let mac = sign(HashType::Sha256, b"key", b"data").unwrap();
        assert!(!verify(HashType::Sha256, b"other", b"data", &mac).unwrap());
    }

    #[test]
    fn wrong_data_rejected() {
        let mac = sign(HashType::Sha256, b"key", b"data").unwrap();
        assert!(!verify(HashType::Sha256, b"key", b"tampered", &mac).unwrap());
    }

    #[test]
    fn truncated_mac_rejected() {
        let mac = sign(HashType::Sha256, b"key", b"data").unwrap();
        assert!(!verify(HashType::Sha256, b"key", b"data", &mac[..16]).unwrap());
    }

    #[test]
    fn sha512_macs_are_longer() {
        let short = sign(HashType::Sha256, b"key", b"data").unwrap();
        let long = sign(HashType::Sha512, b"key", b"data").unwrap();
        assert_eq!(short.len(), 32);
        assert_eq!(long.len(), 64);
    }
}
