//! Error types for the KDS core.
//!
//! The transport layer maps these kinds to HTTP statuses; the core never
//! reasons about status codes itself.

use std::fmt;

use keymint_crypto::CryptoError;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
pub enum KdsError {
    /// A cryptographic primitive failed. Never retried.
    Crypto(CryptoError),
    /// The endpoint (or the requested generation) does not exist or is no
    /// longer served.
    KeyNotFound {
        name: String,
        generation: Option<u32>,
    },
    /// A write tried to flip an endpoint between host and group.
    GroupStatusChanged { name: String },
    /// The request was malformed; `field` names the offending part.
    BadRequest { field: &'static str },
    /// The request was well-formed but not acceptable.
    Unauthorized(UnauthorizedKind),
    /// The named resource already exists.
    Conflict { name: String },
    /// The persistence backend failed.
    Storage(String),
    /// A payload could not be serialized.
    Encoding(String),
}

/// Why a request was rejected as unauthorized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnauthorizedKind {
    /// Request timestamp older than the configured lifetime.
    Expired,
    /// Request signature did not verify under the claimed source key.
    Signature,
    /// Group-key request from an endpoint outside the group.
    NotMember,
    /// Nonce present but empty.
    BadNonce,
}

impl fmt::Display for KdsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crypto(e) => write!(f, "crypto: {}", e),
            Self::KeyNotFound { name, generation } => match generation {
                Some(gen) => write!(f, "key not found: {}:{}", name, gen),
                None => write!(f, "key not found: {}", name),
            },
            Self::GroupStatusChanged { name } => {
                write!(f, "group status of {} cannot be changed", name)
            }
            Self::BadRequest { field } => write!(f, "invalid {}", field),
            Self::Unauthorized(kind) => write!(f, "unauthorized: {}", kind),
            Self::Conflict { name } => write!(f, "already exists: {}", name),
            Self::Storage(msg) => write!(f, "storage error: {}", msg),
            Self::Encoding(msg) => write!(f, "encoding error: {}", msg),
        }
    }
}

impl fmt::Display for UnauthorizedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expired => write!(f, "request validity expired"),
            Self::Signature => write!(f, "invalid signature"),
            Self::NotMember => write!(f, "not a group member"),
            Self::BadNonce => write!(f, "invalid nonce"),
        }
    }
}

impl std::error::Error for KdsError {}

impl From<CryptoError> for KdsError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

impl KdsError {
    pub fn not_found(name: impl Into<String>, generation: Option<u32>) -> Self {
        Self::KeyNotFound {
            name: name.into(),
            generation,
        }
    }
}
