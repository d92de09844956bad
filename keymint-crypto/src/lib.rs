//! # keymint-crypto
//!
//! Symmetric primitives for the keymint key distribution service.
//!
//! The [`CryptoEngine`] owns the service master key and performs every
//! cryptographic operation the KDS needs:
//!
//! - per-endpoint storage wrapping (`wrap` / `unwrap`): HKDF-derived
//!   `(ekey, skey)` pairs, AES-GCM encryption, HMAC integrity
//! - per-ticket session derivation (`derive_session`)
//! - request/response MACs (`sign` / `verify`), constant-time comparison
//! - the base64 wire form used for tickets, group keys and `esek` envelopes
//!
//! ## Quick Start
//!
//! ```
//! use keymint_crypto::{CryptoEngine, KEY_SIZE};
//!
//! let engine = CryptoEngine::with_master_key([0x42; KEY_SIZE]);
//!
//! let (ciphertext, signature) = engine.wrap("host.example", b"endpoint secret").unwrap();
//! let plain = engine.unwrap("host.example", &ciphertext, &signature).unwrap();
//! assert_eq!(plain.as_slice(), b"endpoint secret");
//! ```

#![deny(unsafe_code)]

mod cipher;
mod engine;
mod error;
mod kdf;
mod mac;
mod master;

pub use engine::{CryptoEngine, CryptoOptions, EncType, HashType, SessionKeys};
pub use error::CryptoError;

/// Size in bytes of every symmetric key in the system: the master key,
/// endpoint secrets, group secrets and derived session keys.
pub const KEY_SIZE: usize = 16;
