//! Signed-request validation.
//!
//! Every ticket and group-key request arrives as a base64 metadata blob plus
//! a MAC over it. Validation is eager: one pass produces a fully resolved
//! [`ValidatedRequest`] or the first applicable error, in a fixed order
//! (malformed input, then unknown source, then freshness, then signature).

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use keymint_crypto::CryptoEngine;

use crate::error::{KdsError, UnauthorizedKind};
use crate::manager::StorageManager;
use crate::types::{EndpointRef, KeyData};

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// The body of a ticket or group-key request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedRequest {
    pub metadata: String,
    pub signature: String,
}

/// An endpoint with its key resolved to a concrete generation.
#[derive(Debug)]
pub struct ResolvedEndpoint {
    pub reference: EndpointRef,
    pub key: KeyData,
}

impl ResolvedEndpoint {
    /// `name:generation` at the *resolved* generation. Tickets embed this so
    /// the destination can rebuild the derivation info string exactly.
    pub fn key_str(&self) -> String {
        self.key.key_str()
    }

    pub fn key_bytes(&self) -> &[u8] {
        &self.key.key
    }
}

/// A request that has passed every check, with both ends resolved and the
/// validation instant captured once.
#[derive(Debug)]
pub struct ValidatedRequest {
    /// The metadata exactly as transmitted; response signatures cover it.
    pub metadata_b64: String,
    pub source: ResolvedEndpoint,
    pub destination: ResolvedEndpoint,
    pub nonce: String,
    pub timestamp: DateTime<Utc>,
    /// When validation happened; issuance derives expirations from this.
    pub now: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

pub struct RequestValidator {
    storage: Arc<StorageManager>,
    crypto: Arc<CryptoEngine>,
    ttl: Duration,
}

impl RequestValidator {
    pub fn new(storage: Arc<StorageManager>, crypto: Arc<CryptoEngine>, ttl: Duration) -> Self {
        Self {
            storage,
            crypto,
            ttl,
        }
    }

    /// Validate a ticket request. The destination may be a host or a group.
    pub fn validate_ticket(&self, request: &SignedRequest) -> Result<ValidatedRequest, KdsError> {
        self.validate(request, None)
    }

    /// Validate a group-key request: everything a ticket request requires,
    /// plus the membership convention (the requester's name is prefixed by
    /// the group name and a dot) and a destination that resolves as a group.
    pub fn validate_group_key(
        &self,
        request: &SignedRequest,
    ) -> Result<ValidatedRequest, KdsError> {
        self.validate(request, Some(true))
    }

    fn validate(
        &self,
        request: &SignedRequest,
        destination_is_group: Option<bool>,
    ) -> Result<ValidatedRequest, KdsError> {
        let now = Utc::now();

        // 1. decode the metadata blob
        let raw = B64
            .decode(&request.metadata)
            .map_err(|_| KdsError::BadRequest { field: "metadata" })?;
        let meta: serde_json::Value =
            serde_json::from_slice(&raw).map_err(|_| KdsError::BadRequest { field: "metadata" })?;

        // 2. field shapes
        let source_str = text_field(&meta, "source")?;
        let destination_str = text_field(&meta, "destination")?;
        let timestamp_str = text_field(&meta, "timestamp")?;
        let nonce = text_field(&meta, "nonce")?.to_string();

        // 3. endpoint forms
        let source_ref = EndpointRef::parse(source_str)?;
        let destination_ref = EndpointRef::parse(destination_str)?;

        // 4. the claimed source must exist as a host
        let source_key =
            self.storage
                .get_key(&source_ref.name, source_ref.generation, Some(false))?;

        // 5. freshness
        let timestamp = parse_timestamp(timestamp_str)?;
        if now - timestamp > self.ttl {
            return Err(KdsError::Unauthorized(UnauthorizedKind::Expired));
        }

        // 6. nonce must be non-empty; it is reserved for replay protection
        //    and not otherwise consumed yet
        if nonce.is_empty() {
            return Err(KdsError::Unauthorized(UnauthorizedKind::BadNonce));
        }

        // 7. the MAC over the metadata blob, under the source's current key
        let provided = B64
            .decode(&request.signature)
            .map_err(|_| KdsError::Unauthorized(UnauthorizedKind::Signature))?;
        let valid = self
            .crypto
            .verify(&source_key.key, request.metadata.as_bytes(), &provided)
            .map_err(|_| KdsError::BadRequest { field: "signature" })?;
        if !valid {
            return Err(KdsError::Unauthorized(UnauthorizedKind::Signature));
        }

        // group-key requests: membership by naming convention, checked
        // before the destination is resolved
        if destination_is_group == Some(true) {
            let member_of = source_ref.name.split('.').next().unwrap_or("");
            if member_of != destination_ref.name {
                return Err(KdsError::Unauthorized(UnauthorizedKind::NotMember));
            }
        }

        let destination_key = self.storage.get_key(
            &destination_ref.name,
            destination_ref.generation,
            destination_is_group,
        )?;

        Ok(ValidatedRequest {
            metadata_b64: request.metadata.clone(),
            source: ResolvedEndpoint {
                reference: source_ref,
                key: source_key,
            },
            destination: ResolvedEndpoint {
                reference: destination_ref,
                key: destination_key,
            },
            nonce,
            timestamp,
            now,
        })
    }
}

fn text_field<'a>(
    meta: &'a serde_json::Value,
    field: &'static str,
) -> Result<&'a str, KdsError> {
    meta.get(field)
        .and_then(serde_json::Value::as_str)
        .ok_or(KdsError::BadRequest { field })
}

/// Accept RFC 3339 (our own responses) or a bare UTC timestamp without
/// offset (the historical client format).
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, KdsError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| KdsError::BadRequest { field: "timestamp" })
}
