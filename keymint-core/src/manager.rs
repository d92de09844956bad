//! Storage manager: the bridge between the ciphertext-only repository and
//! everything that needs plaintext keys.
//!
//! Host keys are wrapped externally supplied material; group keys are minted
//! here and nowhere else.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use zeroize::Zeroizing;

use keymint_crypto::CryptoEngine;

use crate::config::FreshnessWindows;
use crate::error::KdsError;
use crate::store::KeyStore;
use crate::types::{KeyData, StoredKey};

pub struct StorageManager {
    store: Arc<dyn KeyStore>,
    crypto: Arc<CryptoEngine>,
    windows: FreshnessWindows,
}

impl StorageManager {
    pub fn new(
        store: Arc<dyn KeyStore>,
        crypto: Arc<CryptoEngine>,
        windows: FreshnessWindows,
    ) -> Self {
        Self {
            store,
            crypto,
            windows,
        }
    }

    /// Wrap and store an externally supplied host key. Returns the new
    /// generation. Group keys are never written through this path.
    pub fn set_key(
        &self,
        name: &str,
        key: &[u8],
        expiration: Option<DateTime<Utc>>,
    ) -> Result<u32, KdsError> {
        let (ciphertext, signature) = self.crypto.wrap(name, key)?;
        let generation = self
            .store
            .set_key(name, &ciphertext, &signature, false, expiration)?;
        tracing::debug!(name, generation, "stored host key");
        Ok(generation)
    }

    /// Retrieve and decrypt a key.
    ///
    /// Freshness policy:
    /// - host key past its expiration: gone;
    /// - group key at a pinned generation: served until expiration plus the
    ///   post-expiry grace, so in-flight tickets bound to it stay usable;
    /// - group key at latest: treated as stale from `pre_expiry_stale`
    ///   before expiration, and replaced by a freshly minted generation.
    ///
    /// Minting is the only write path for group keys. Two concurrent
    /// readers of a stale group key may both mint; each sees its own new
    /// generation and both keys are valid.
    pub fn get_key(
        &self,
        name: &str,
        generation: Option<u32>,
        is_group: Option<bool>,
    ) -> Result<KeyData, KdsError> {
        let now = Utc::now();

        match self.store.get_key(name, generation, is_group)? {
            Some(record) => {
                if !self.is_stale(&record, generation, now) {
                    return self.decrypt_record(record);
                }
                if record.is_group && generation.is_none() {
                    return self.mint_group_key(name, now);
                }
                Err(KdsError::not_found(name, generation))
            }
            None => {
                // A group freshly created by create_group has an endpoint
                // row but no key records yet; an unpinned lookup mints its
                // first generation.
                match self.store.get_endpoint(name)? {
                    Some(ep)
                        if ep.is_group
                            && is_group != Some(false)
                            && generation.is_none() =>
                    {
                        self.mint_group_key(name, now)
                    }
                    _ => Err(KdsError::not_found(name, generation)),
                }
            }
        }
    }

    /// Delete a host endpoint and all its key versions.
    pub fn delete_key(&self, name: &str) -> Result<usize, KdsError> {
        self.store.delete(name, Some(false))
    }

    /// Create a group endpoint. Returns `false` if the name is taken.
    pub fn create_group(&self, name: &str) -> Result<bool, KdsError> {
        self.store.create_group(name)
    }

    /// Delete a group endpoint and all its key versions.
    pub fn delete_group(&self, name: &str) -> Result<usize, KdsError> {
        self.store.delete(name, Some(true))
    }

    /// Drop key records that expired longer ago than the post-expiry grace;
    /// nothing still reachable by a pinned in-flight ticket is touched.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<usize, KdsError> {
        let purged = self
            .store
            .purge_expired(now - self.windows.post_expiry_grace)?;
        if purged > 0 {
            tracing::info!(purged, "swept expired key records");
        }
        Ok(purged)
    }

    fn is_stale(&self, record: &StoredKey, pinned: Option<u32>, now: DateTime<Utc>) -> bool {
        let Some(expiration) = record.expiration else {
            return false;
        };
        if record.is_group {
            if pinned.is_some() {
                now >= expiration + self.windows.post_expiry_grace
            } else {
                now >= expiration - self.windows.pre_expiry_stale
            }
        } else {
            now >= expiration
        }
    }

    fn decrypt_record(&self, record: StoredKey) -> Result<KeyData, KdsError> {
        let key = self
            .crypto
            .unwrap(&record.name, &record.ciphertext, &record.signature)?;
        Ok(KeyData {
            name: record.name,
            key,
            generation: record.generation,
            is_group: record.is_group,
            expiration: record.expiration,
        })
    }

    fn mint_group_key(&self, name: &str, now: DateTime<Utc>) -> Result<KeyData, KdsError> {
        let secret = self.crypto.new_key();
        let (ciphertext, signature) = self.crypto.wrap(name, secret.as_ref())?;
        let expiration = now + self.windows.group_key_lifetime;
        let generation = self
            .store
            .set_key(name, &ciphertext, &signature, true, Some(expiration))?;
        tracing::info!(name, generation, "minted group key");
        Ok(KeyData {
            name: name.to_string(),
            key: Zeroizing::new(secret.to_vec()),
            generation,
            is_group: true,
            expiration: Some(expiration),
        })
    }
}
