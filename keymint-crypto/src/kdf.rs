//! Key derivation: HKDF with empty salt, expanded to two KEY_SIZE halves.
//!
//! Every derivation in the service goes through [`split_expand`] so that the
//! low/high split is identical for storage keys and session keys. The first
//! half feeds whichever role the caller lists first; see the call sites in
//! `engine.rs` for the ordering contract.

use hkdf::Hkdf;
use sha2::{Sha256, Sha512};
use zeroize::Zeroizing;

use crate::engine::HashType;
use crate::error::CryptoError;
use crate::KEY_SIZE;

/// Derive `2 * KEY_SIZE` bytes from `ikm` and `info`, split into halves.
pub fn split_expand(
    hash: HashType,
    ikm: &[u8],
    info: &[u8],
) -> Result<(Zeroizing<[u8; KEY_SIZE]>, Zeroizing<[u8; KEY_SIZE]>), CryptoError> {
    let mut okm = Zeroizing::new([0u8; 2 * KEY_SIZE]);

    match hash {
        HashType::Sha256 => Hkdf::<Sha256>::new(None, ikm)
            .expand(info, okm.as_mut())
            .map_err(|_| CryptoError::Encrypt)?,
        HashType::Sha512 => Hkdf::<Sha512>::new(None, ikm)
            .expand(info, okm.as_mut())
            .map_err(|_| CryptoError::Encrypt)?,
    }

    let mut low = Zeroizing::new([0u8; KEY_SIZE]);
    let mut high = Zeroizing::new([0u8; KEY_SIZE]);
    low.copy_from_slice(&okm[..KEY_SIZE]);
    high.copy_from_slice(&okm[KEY_SIZE..]);
    Ok((low, high))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_inputs() {
        let (a1, a2) = split_expand(HashType::Sha256, b"ikm", b"info").unwrap();
        let (b1, b2) = split_expand(HashType::Sha256, b"ikm", b"info").unwrap();
        assert_eq!(*a1, *b1);
        assert_eq!(*a2, *b2);
    }

    #[test]
    fn differs_by_info() {
        let (a1, a2) = split_expand(HashType::Sha256, b"ikm", b"one").unwrap();
        let (b1, b2) = split_expand(HashType::Sha256, b"ikm", b"two").unwrap();
        assert_ne!(*a1, *b1);
        assert_ne!(*a2, *b2);
    }

    #[test]
    fn halves_are_independent() {
        let (low, high) = split_expand(HashType::Sha256, b"ikm", b"info").unwrap();
        assert_ne!(*low, *high);
    }

    #[test]
    fn hash_family_changes_output() {
        let (a, _) = split_expand(HashType::Sha256, b"ikm", b"info").unwrap();
        let (b, _) = split_expand(HashType::Sha512, b"ikm", b"info").unwrap();
        assert_ne!(*a, *b);
    }
}
