//! Key repository backends: where wrapped endpoint keys live.
//!
//! Generations are per endpoint and append-only. A record, once written, is
//! never modified; supersession happens by appending the next generation.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::KdsError;
use crate::types::{EndpointInfo, StoredKey};

// ---------------------------------------------------------------------------
// Repository trait
// ---------------------------------------------------------------------------

/// Backend contract for the versioned key repository.
///
/// Implementations must make `set_key` serializable per endpoint name: two
/// concurrent writers on the same name observe distinct generations with no
/// lost update. `get_key` returns a consistent snapshot or `None`, never a
/// torn record.
pub trait KeyStore: Send + Sync {
    /// Append a new key generation for `name`, creating the endpoint if
    /// absent. Fails with [`KdsError::GroupStatusChanged`] if the endpoint
    /// exists with the other kind. Returns the new generation.
    fn set_key(
        &self,
        name: &str,
        ciphertext: &[u8],
        signature: &[u8],
        is_group: bool,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<u32, KdsError>;

    /// Fetch one key record: the pinned `generation` if given, else the
    /// endpoint's latest. An `is_group` filter that does not match the
    /// endpoint's kind makes the record invisible.
    fn get_key(
        &self,
        name: &str,
        generation: Option<u32>,
        is_group: Option<bool>,
    ) -> Result<Option<StoredKey>, KdsError>;

    /// Fetch the endpoint row itself. Needed to distinguish "no such
    /// endpoint" from "group with no key records yet".
    fn get_endpoint(&self, name: &str) -> Result<Option<EndpointInfo>, KdsError>;

    /// Create a group endpoint with no key records. Returns `false` if the
    /// name is already taken (by a group or a host); never an error.
    fn create_group(&self, name: &str) -> Result<bool, KdsError>;

    /// Delete the endpoint and every key record under it. An `is_group`
    /// filter that does not match leaves the endpoint alone. Returns the
    /// number of rows removed (records plus the endpoint row).
    fn delete(&self, name: &str, is_group: Option<bool>) -> Result<usize, KdsError>;

    /// Drop key records whose expiration is at or before `cutoff`. The
    /// latest generation of each endpoint is always retained. Returns the
    /// number of records removed.
    fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<usize, KdsError>;
}

// ---------------------------------------------------------------------------
// Shared row representation
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct RecordRow {
    ciphertext: Vec<u8>,
    signature: Vec<u8>,
    expiration: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug)]
struct EndpointRow {
    is_group: bool,
    latest_generation: u32,
    records: BTreeMap<u32, RecordRow>,
}

impl EndpointRow {
    fn new(is_group: bool) -> Self {
        Self {
            is_group,
            latest_generation: 0,
            records: BTreeMap::new(),
        }
    }

    fn append(
        &mut self,
        ciphertext: &[u8],
        signature: &[u8],
        expiration: Option<DateTime<Utc>>,
    ) -> u32 {
        self.latest_generation += 1;
        self.records.insert(
            self.latest_generation,
            RecordRow {
                ciphertext: ciphertext.to_vec(),
                signature: signature.to_vec(),
                expiration,
            },
        );
        self.latest_generation
    }

    fn lookup(&self, name: &str, generation: Option<u32>) -> Option<StoredKey> {
        let generation = generation.unwrap_or(self.latest_generation);
        self.records.get(&generation).map(|rec| StoredKey {
            name: name.to_string(),
            generation,
            is_group: self.is_group,
            ciphertext: rec.ciphertext.clone(),
            signature: rec.signature.clone(),
            expiration: rec.expiration,
        })
    }

    fn info(&self, name: &str) -> EndpointInfo {
        EndpointInfo {
            name: name.to_string(),
            is_group: self.is_group,
            latest_generation: self.latest_generation,
        }
    }

    fn matches(&self, is_group: Option<bool>) -> bool {
        is_group.map_or(true, |g| g == self.is_group)
    }

    /// Row count for delete accounting: every record plus the endpoint row.
    fn row_count(&self) -> usize {
        self.records.len() + 1
    }

    fn purge(&mut self, cutoff: DateTime<Utc>) -> usize {
        let latest = self.latest_generation;
        let before = self.records.len();
        self.records.retain(|generation, rec| {
            *generation == latest || rec.expiration.map_or(true, |exp| exp > cutoff)
        });
        before - self.records.len()
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// In-memory repository (tests, ephemeral deployments).
pub struct MemoryBackend {
    endpoints: RwLock<HashMap<String, EndpointRow>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore for MemoryBackend {
    fn set_key(
        &self,
        name: &str,
        ciphertext: &[u8],
        signature: &[u8],
        is_group: bool,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<u32, KdsError> {
        let mut endpoints = self.endpoints.write().unwrap();
        let row = endpoints
            .entry(name.to_string())
            .or_insert_with(|| EndpointRow::new(is_group));
        if row.is_group != is_group {
            return Err(KdsError::GroupStatusChanged {
                name: name.to_string(),
            });
        }
        Ok(row.append(ciphertext, signature, expiration))
    }

    fn get_key(
        &self,
        name: &str,
        generation: Option<u32>,
        is_group: Option<bool>,
    ) -> Result<Option<StoredKey>, KdsError> {
        let endpoints = self.endpoints.read().unwrap();
        Ok(endpoints
            .get(name)
            .filter(|row| row.matches(is_group))
            .and_then(|row| row.lookup(name, generation)))
    }

    fn get_endpoint(&self, name: &str) -> Result<Option<EndpointInfo>, KdsError> {
        let endpoints = self.endpoints.read().unwrap();
        Ok(endpoints.get(name).map(|row| row.info(name)))
    }

    fn create_group(&self, name: &str) -> Result<bool, KdsError> {
        let mut endpoints = self.endpoints.write().unwrap();
        if endpoints.contains_key(name) {
            return Ok(false);
        }
        endpoints.insert(name.to_string(), EndpointRow::new(true));
        Ok(true)
    }

    fn delete(&self, name: &str, is_group: Option<bool>) -> Result<usize, KdsError> {
        let mut endpoints = self.endpoints.write().unwrap();
        match endpoints.get(name) {
            Some(row) if row.matches(is_group) => {
                let count = row.row_count();
                endpoints.remove(name);
                Ok(count)
            }
            _ => Ok(0),
        }
    }

    fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<usize, KdsError> {
        let mut endpoints = self.endpoints.write().unwrap();
        Ok(endpoints.values_mut().map(|row| row.purge(cutoff)).sum())
    }
}

// ---------------------------------------------------------------------------
// File-checkpointed backend
// ---------------------------------------------------------------------------

/// Durable repository: an ordered in-memory tree checkpointed to one JSON
/// document per endpoint.
///
/// Directory layout:
/// ```text
/// endpoints/
///   {sha256(name)}.json
/// ```
///
/// Writes go to a temp file and are renamed into place, so a crashed write
/// leaves the previous checkpoint intact.
pub struct FileBackend {
    dir: PathBuf,
    endpoints: RwLock<BTreeMap<String, EndpointRow>>,
}

#[derive(Serialize, Deserialize)]
struct EndpointDoc {
    name: String,
    is_group: bool,
    latest_generation: u32,
    keys: Vec<KeyDoc>,
}

#[derive(Serialize, Deserialize)]
struct KeyDoc {
    generation: u32,
    ciphertext_hex: String,
    signature_hex: String,
    expiration: Option<DateTime<Utc>>,
}

impl FileBackend {
    /// Open (or initialize) the repository under `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, KdsError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| KdsError::Storage(format!("create dir: {}", e)))?;

        let mut endpoints = BTreeMap::new();
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| KdsError::Storage(format!("readdir: {}", e)))?;
        for entry in entries {
            let entry = entry.map_err(|e| KdsError::Storage(format!("entry: {}", e)))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                let (name, row) = read_doc(&path)?;
                endpoints.insert(name, row);
            }
        }

        Ok(Self {
            dir,
            endpoints: RwLock::new(endpoints),
        })
    }

    fn endpoint_path(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{:x}.json", Sha256::digest(name.as_bytes())))
    }

    fn persist(&self, name: &str, row: &EndpointRow) -> Result<(), KdsError> {
        let doc = EndpointDoc {
            name: name.to_string(),
            is_group: row.is_group,
            latest_generation: row.latest_generation,
            keys: row
                .records
                .iter()
                .map(|(generation, rec)| KeyDoc {
                    generation: *generation,
                    ciphertext_hex: hex::encode(&rec.ciphertext),
                    signature_hex: hex::encode(&rec.signature),
                    expiration: rec.expiration,
                })
                .collect(),
        };

        let path = self.endpoint_path(name);
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| KdsError::Storage(format!("serialize: {}", e)))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &json).map_err(|e| KdsError::Storage(format!("write: {}", e)))?;
        std::fs::rename(&tmp, &path).map_err(|e| KdsError::Storage(format!("rename: {}", e)))?;
        Ok(())
    }

    fn unlink(&self, name: &str) -> Result<(), KdsError> {
        let path = self.endpoint_path(name);
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| KdsError::Storage(format!("delete: {}", e)))?;
        }
        Ok(())
    }
}

fn read_doc(path: &Path) -> Result<(String, EndpointRow), KdsError> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| KdsError::Storage(format!("read: {}", e)))?;
    let doc: EndpointDoc =
        serde_json::from_str(&data).map_err(|e| KdsError::Storage(format!("parse: {}", e)))?;

    let mut records = BTreeMap::new();
    for key in doc.keys {
        let ciphertext = hex::decode(&key.ciphertext_hex)
            .map_err(|e| KdsError::Storage(format!("ciphertext: {}", e)))?;
        let signature = hex::decode(&key.signature_hex)
            .map_err(|e| KdsError::Storage(format!("signature: {}", e)))?;
        records.insert(
            key.generation,
            RecordRow {
                ciphertext,
                signature,
                expiration: key.expiration,
            },
        );
    }

    Ok((
        doc.name,
        EndpointRow {
            is_group: doc.is_group,
            latest_generation: doc.latest_generation,
            records,
        },
    ))
}

impl KeyStore for FileBackend {
    fn set_key(
        &self,
        name: &str,
        ciphertext: &[u8],
        signature: &[u8],
        is_group: bool,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<u32, KdsError> {
        let mut endpoints = self.endpoints.write().unwrap();
        let row = endpoints
            .entry(name.to_string())
            .or_insert_with(|| EndpointRow::new(is_group));
        if row.is_group != is_group {
            return Err(KdsError::GroupStatusChanged {
                name: name.to_string(),
            });
        }
        let generation = row.append(ciphertext, signature, expiration);
        self.persist(name, row)?;
        Ok(generation)
    }

    fn get_key(
        &self,
        name: &str,
        generation: Option<u32>,
        is_group: Option<bool>,
    ) -> Result<Option<StoredKey>, KdsError> {
        let endpoints = self.endpoints.read().unwrap();
        Ok(endpoints
            .get(name)
            .filter(|row| row.matches(is_group))
            .and_then(|row| row.lookup(name, generation)))
    }

    fn get_endpoint(&self, name: &str) -> Result<Option<EndpointInfo>, KdsError> {
        let endpoints = self.endpoints.read().unwrap();
        Ok(endpoints.get(name).map(|row| row.info(name)))
    }

    fn create_group(&self, name: &str) -> Result<bool, KdsError> {
        let mut endpoints = self.endpoints.write().unwrap();
        if endpoints.contains_key(name) {
            return Ok(false);
        }
        let row = EndpointRow::new(true);
        self.persist(name, &row)?;
        endpoints.insert(name.to_string(), row);
        Ok(true)
    }

    fn delete(&self, name: &str, is_group: Option<bool>) -> Result<usize, KdsError> {
        let mut endpoints = self.endpoints.write().unwrap();
        match endpoints.get(name) {
            Some(row) if row.matches(is_group) => {
                let count = row.row_count();
                self.unlink(name)?;
                endpoints.remove(name);
                Ok(count)
            }
            _ => Ok(0),
        }
    }

    fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<usize, KdsError> {
        let mut endpoints = self.endpoints.write().unwrap();
        let mut purged = 0;
        for (name, row) in endpoints.iter_mut() {
            let dropped = row.purge(cutoff);
            if dropped > 0 {
                self.persist(name, row)?;
                purged += dropped;
            }
        }
        Ok(purged)
    }
}
