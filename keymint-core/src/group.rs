//! Group-key issuance.
//!
//! The mirror of ticket issuance without the sealed envelope: the payload is
//! the group's current secret encrypted to the requester. Membership has
//! already been established by the validator.

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use keymint_crypto::CryptoEngine;

use crate::error::KdsError;
use crate::ticket::{encode_response_meta, sign_response};
use crate::validator::ValidatedRequest;

/// A complete group-key response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupKeyResponse {
    pub metadata: String,
    pub signature: String,
    pub group_key: String,
}

pub struct GroupKeyIssuer {
    crypto: Arc<CryptoEngine>,
    ttl: Duration,
}

impl GroupKeyIssuer {
    pub fn new(crypto: Arc<CryptoEngine>, ttl: Duration) -> Self {
        Self { crypto, ttl }
    }

    /// Hand the group's current secret to a validated member.
    pub fn issue(&self, request: &ValidatedRequest) -> Result<GroupKeyResponse, KdsError> {
        let group_key = self.crypto.encrypt(
            request.source.key_bytes(),
            request.destination.key_bytes(),
        )?;

        let metadata = encode_response_meta(request, self.ttl)?;
        let signature = sign_response(&self.crypto, request, &metadata, &group_key)?;

        tracing::info!(
            source = %request.source.key_str(),
            group = %request.destination.key_str(),
            "issued group key"
        );

        Ok(GroupKeyResponse {
            metadata,
            signature,
            group_key,
        })
    }
}
