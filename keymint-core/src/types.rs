//! Core types: endpoint references, stored records, served key data.

use std::fmt;

use chrono::{DateTime, Utc};
use zeroize::Zeroizing;

use crate::error::KdsError;

// ---------------------------------------------------------------------------
// Endpoint references
// ---------------------------------------------------------------------------

/// An endpoint as named in a request: `"name"` or `"name:generation"`.
///
/// An absent generation means "latest at resolution time".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointRef {
    pub name: String,
    pub generation: Option<u32>,
}

impl EndpointRef {
    /// Parse the wire form. A trailing `:gen` must be a decimal integer;
    /// anything else after the last colon is malformed.
    pub fn parse(s: &str) -> Result<Self, KdsError> {
        let (name, generation) = match s.rsplit_once(':') {
            Some((name, gen)) => {
                let gen: u32 = gen
                    .parse()
                    .map_err(|_| KdsError::BadRequest { field: "endpoint" })?;
                (name, Some(gen))
            }
            None => (s, None),
        };

        if name.is_empty() {
            return Err(KdsError::BadRequest { field: "endpoint" });
        }

        Ok(Self {
            name: name.to_string(),
            generation,
        })
    }
}

impl fmt::Display for EndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.generation {
            Some(gen) => write!(f, "{}:{}", self.name, gen),
            None => write!(f, "{}", self.name),
        }
    }
}

// ---------------------------------------------------------------------------
// Stored records (ciphertext side)
// ---------------------------------------------------------------------------

/// Endpoint row as the repository sees it: name, kind, version counter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointInfo {
    pub name: String,
    pub is_group: bool,
    pub latest_generation: u32,
}

/// One wrapped key version, exactly as persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredKey {
    pub name: String,
    pub generation: u32,
    pub is_group: bool,
    pub ciphertext: Vec<u8>,
    pub signature: Vec<u8>,
    pub expiration: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Served key data (plaintext side)
// ---------------------------------------------------------------------------

/// A decrypted key as served by the storage manager.
///
/// `key` holds live secret material; it is zeroed on drop.
#[derive(Clone)]
pub struct KeyData {
    pub name: String,
    pub key: Zeroizing<Vec<u8>>,
    pub generation: u32,
    pub is_group: bool,
    pub expiration: Option<DateTime<Utc>>,
}

impl KeyData {
    /// The `name:generation` form of the resolved key, as embedded in
    /// ticket metadata and session-key derivation info strings.
    pub fn key_str(&self) -> String {
        format!("{}:{}", self.name, self.generation)
    }
}

impl fmt::Debug for KeyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // key material deliberately omitted
        f.debug_struct("KeyData")
            .field("name", &self.name)
            .field("generation", &self.generation)
            .field("is_group", &self.is_group)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_name() {
        let r = EndpointRef::parse("home.local").unwrap();
        assert_eq!(r.name, "home.local");
        assert_eq!(r.generation, None);
    }

    #[test]
    fn parses_name_with_generation() {
        let r = EndpointRef::parse("home.local:3").unwrap();
        assert_eq!(r.name, "home.local");
        assert_eq!(r.generation, Some(3));
    }

    #[test]
    fn rejects_non_numeric_generation() {
        assert!(EndpointRef::parse("home.local:latest").is_err());
    }

    #[test]
    fn rejects_empty_name() {
        assert!(EndpointRef::parse("").is_err());
        assert!(EndpointRef::parse(":1").is_err());
    }

    #[test]
    fn display_roundtrip() {
        for s in ["home.local", "home.local:7"] {
            assert_eq!(EndpointRef::parse(s).unwrap().to_string(), s);
        }
    }
}
