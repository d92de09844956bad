//! Error type for the crypto engine.

use std::fmt;

/// Failure of a cryptographic operation.
///
/// Primitive failures deliberately carry no detail beyond their kind: the
/// distinction that matters to callers is which stage failed, not why.
#[derive(Debug, PartialEq, Eq)]
pub enum CryptoError {
    /// The engine has no master key; storage derivations are impossible.
    NoMasterKey,
    /// Symmetric encryption failed.
    Encrypt,
    /// Symmetric decryption failed.
    Decrypt,
    /// MAC computation or verification failed.
    Signature,
    /// The master-key file could not be read or created.
    MasterKey(String),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMasterKey => write!(f, "no master key loaded"),
            Self::Encrypt => write!(f, "failed to encrypt key"),
            Self::Decrypt => write!(f, "failed to decrypt key"),
            Self::Signature => write!(f, "signature check failed"),
            Self::MasterKey(msg) => write!(f, "master key file: {}", msg),
        }
    }
}

impl std::error::Error for CryptoError {}
