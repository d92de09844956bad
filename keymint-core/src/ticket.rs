//! Ticket issuance.
//!
//! A ticket carries a fresh session-key pair to the requester, together with
//! a sealed envelope (`esek`) only the destination can open. The destination
//! re-derives the same pair from the envelope's seed and the info string
//! rebuilt from the response metadata, so both ends converge on
//! `(sig_key, enc_key)` without ever seeing each other's long-term keys.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use keymint_crypto::CryptoEngine;

use crate::error::KdsError;
use crate::validator::ValidatedRequest;

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// The signed response envelope shared by tickets and group keys.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub source: String,
    pub destination: String,
    pub expiration: String,
    pub encryption: bool,
}

/// Decrypted content of the `ticket` field (requester side).
#[derive(Debug, Serialize, Deserialize)]
pub struct TicketPayload {
    pub skey: String,
    pub ekey: String,
    pub esek: String,
}

/// Decrypted content of the `esek` field (destination side).
#[derive(Debug, Serialize, Deserialize)]
pub struct EsekPayload {
    pub key: String,
    pub timestamp: String,
    pub ttl: i64,
}

/// A complete ticket response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TicketResponse {
    pub metadata: String,
    pub signature: String,
    pub ticket: String,
}

// ---------------------------------------------------------------------------
// Issuer
// ---------------------------------------------------------------------------

pub struct TicketIssuer {
    crypto: Arc<CryptoEngine>,
    ttl: Duration,
}

impl TicketIssuer {
    pub fn new(crypto: Arc<CryptoEngine>, ttl: Duration) -> Self {
        Self { crypto, ttl }
    }

    /// Mint a ticket for a validated request.
    pub fn issue(&self, request: &ValidatedRequest) -> Result<TicketResponse, KdsError> {
        let time_str = wire_time(request.now);

        // The info string must be rebuildable by the destination from the
        // response metadata and the esek timestamp alone, so it uses the
        // resolved name:generation of both ends verbatim.
        let info = format!(
            "{},{},{}",
            request.source.key_str(),
            request.destination.key_str(),
            time_str
        );

        let seed = self.crypto.new_key();
        let session = self.crypto.derive_session(seed.as_ref(), &info)?;

        let esek_plain = serde_json::to_vec(&EsekPayload {
            key: B64.encode(seed.as_ref()),
            timestamp: time_str,
            ttl: self.ttl.num_seconds(),
        })
        .map_err(|e| KdsError::Encoding(e.to_string()))?;
        let esek = self
            .crypto
            .encrypt(request.destination.key_bytes(), &esek_plain)?;

        let ticket_plain = serde_json::to_vec(&TicketPayload {
            skey: B64.encode(session.sig_key.as_ref()),
            ekey: B64.encode(session.enc_key.as_ref()),
            esek,
        })
        .map_err(|e| KdsError::Encoding(e.to_string()))?;
        let ticket = self.crypto.encrypt(request.source.key_bytes(), &ticket_plain)?;

        let metadata = encode_response_meta(request, self.ttl)?;
        let signature = sign_response(&self.crypto, request, &metadata, &ticket)?;

        tracing::info!(
            source = %request.source.key_str(),
            destination = %request.destination.key_str(),
            "issued ticket"
        );

        Ok(TicketResponse {
            metadata,
            signature,
            ticket,
        })
    }
}

// ---------------------------------------------------------------------------
// Shared response plumbing (also used by the group-key issuer)
// ---------------------------------------------------------------------------

/// Timestamps on the wire: RFC 3339, microseconds, `Z` suffix.
pub(crate) fn wire_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Build and base64 the response metadata for a validated request.
pub(crate) fn encode_response_meta(
    request: &ValidatedRequest,
    ttl: Duration,
) -> Result<String, KdsError> {
    let meta = ResponseMeta {
        source: request.source.key_str(),
        destination: request.destination.key_str(),
        expiration: wire_time(request.now + ttl),
        encryption: true,
    };
    let json = serde_json::to_vec(&meta).map_err(|e| KdsError::Encoding(e.to_string()))?;
    Ok(B64.encode(json))
}

/// Sign `metadata || payload` with the requester's key, so the requester
/// can confirm the issuer holds a correct copy of its key.
pub(crate) fn sign_response(
    crypto: &CryptoEngine,
    request: &ValidatedRequest,
    metadata: &str,
    payload: &str,
) -> Result<String, KdsError> {
    let mut data = Vec::with_capacity(metadata.len() + payload.len());
    data.extend_from_slice(metadata.as_bytes());
    data.extend_from_slice(payload.as_bytes());
    let mac = crypto.sign(request.source.key_bytes(), &data)?;
    Ok(B64.encode(mac))
}
