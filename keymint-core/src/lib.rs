//! # keymint-core
//!
//! The key distribution service core: a versioned repository of
//! master-key-wrapped endpoint secrets, and the protocol machinery that
//! turns signed requests into session-key tickets and group keys.
//!
//! Pieces, leaves first:
//!
//! - [`store`]: the append-only `(endpoint, generation)` repository trait
//!   with in-memory and file-checkpointed backends
//! - [`manager`]: wrap/unwrap mediation plus group-key freshness and minting
//! - [`validator`]: eager validation of signed requests
//! - [`ticket`] / [`group`]: response issuance
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use keymint_core::{FreshnessWindows, MemoryBackend, StorageManager};
//! use keymint_crypto::{CryptoEngine, KEY_SIZE};
//!
//! let crypto = Arc::new(CryptoEngine::with_master_key([0x42; KEY_SIZE]));
//! let store = Arc::new(MemoryBackend::new());
//! let storage = StorageManager::new(store, crypto, FreshnessWindows::default());
//!
//! storage.set_key("host.example", b"0123456789abcdef", None).unwrap();
//! let key = storage.get_key("host.example", None, None).unwrap();
//! assert_eq!(key.generation, 1);
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod group;
pub mod manager;
pub mod store;
pub mod ticket;
pub mod types;
pub mod validator;

pub use config::{BackendKind, FreshnessWindows, KdsConfig};
pub use error::{KdsError, UnauthorizedKind};
pub use group::{GroupKeyIssuer, GroupKeyResponse};
pub use manager::StorageManager;
pub use store::{FileBackend, KeyStore, MemoryBackend};
pub use ticket::{EsekPayload, ResponseMeta, TicketIssuer, TicketPayload, TicketResponse};
pub use types::{EndpointInfo, EndpointRef, KeyData, StoredKey};
pub use validator::{RequestValidator, ResolvedEndpoint, SignedRequest, ValidatedRequest};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use keymint_crypto::{CryptoEngine, CryptoError, KEY_SIZE};
    use std::sync::Arc;

    const TEST_NAME: &str = "test-name";
    const TEST_KEY: &[u8] = b"test-key";

    fn engine() -> Arc<CryptoEngine> {
        Arc::new(CryptoEngine::with_master_key([0x5A; KEY_SIZE]))
    }

    fn manager() -> StorageManager {
        StorageManager::new(
            Arc::new(MemoryBackend::new()),
            engine(),
            FreshnessWindows::default(),
        )
    }

    fn wrapped(crypto: &CryptoEngine, name: &str, key: &[u8]) -> (Vec<u8>, Vec<u8>) {
        crypto.wrap(name, key).unwrap()
    }

    // === Repository ===

    #[test]
    fn generations_start_at_one_and_increase() {
        let store = MemoryBackend::new();
        assert_eq!(store.set_key(TEST_NAME, b"ct1", b"s1", false, None).unwrap(), 1);
        assert_eq!(store.set_key(TEST_NAME, b"ct2", b"s2", false, None).unwrap(), 2);
        assert_eq!(store.set_key(TEST_NAME, b"ct3", b"s3", false, None).unwrap(), 3);

        let latest = store.get_key(TEST_NAME, None, None).unwrap().unwrap();
        assert_eq!(latest.generation, 3);
        assert_eq!(latest.ciphertext, b"ct3");
    }

    #[test]
    fn pinned_generation_returns_that_record() {
        let store = MemoryBackend::new();
        store.set_key(TEST_NAME, b"ct1", b"s1", false, None).unwrap();
        store.set_key(TEST_NAME, b"ct2", b"s2", false, None).unwrap();

        let first = store.get_key(TEST_NAME, Some(1), None).unwrap().unwrap();
        assert_eq!(first.ciphertext, b"ct1");
        assert_eq!(first.signature, b"s1");

        assert!(store.get_key(TEST_NAME, Some(9), None).unwrap().is_none());
    }

    #[test]
    fn endpoint_kind_is_immutable() {
        let store = MemoryBackend::new();
        store.set_key("host", b"ct", b"s", false, None).unwrap();
        assert!(matches!(
            store.set_key("host", b"ct", b"s", true, None),
            Err(KdsError::GroupStatusChanged { .. })
        ));

        store.create_group("grp").unwrap();
        assert!(matches!(
            store.set_key("grp", b"ct", b"s", false, None),
            Err(KdsError::GroupStatusChanged { .. })
        ));
    }

    #[test]
    fn create_group_is_idempotent_failure() {
        let store = MemoryBackend::new();
        assert!(store.create_group("grp").unwrap());
        assert!(!store.create_group("grp").unwrap());

        let ep = store.get_endpoint("grp").unwrap().unwrap();
        assert!(ep.is_group);
        assert_eq!(ep.latest_generation, 0);
    }

    #[test]
    fn kind_filter_hides_mismatched_endpoints() {
        let store = MemoryBackend::new();
        store.set_key("host", b"ct", b"s", false, None).unwrap();

        assert!(store.get_key("host", None, Some(true)).unwrap().is_none());
        assert!(store.get_key("host", None, Some(false)).unwrap().is_some());
        assert!(store.get_key("host", None, None).unwrap().is_some());
    }

    #[test]
    fn delete_cascades_and_counts() {
        let store = MemoryBackend::new();
        store.set_key("host", b"ct1", b"s1", false, None).unwrap();
        store.set_key("host", b"ct2", b"s2", false, None).unwrap();

        // wrong kind filter leaves the endpoint alone
        assert_eq!(store.delete("host", Some(true)).unwrap(), 0);

        // two records plus the endpoint row
        assert_eq!(store.delete("host", Some(false)).unwrap(), 3);
        assert!(store.get_key("host", None, None).unwrap().is_none());
        assert!(store.get_endpoint("host").unwrap().is_none());

        assert_eq!(store.delete("host", Some(false)).unwrap(), 0);
    }

    #[test]
    fn purge_drops_old_records_but_never_the_latest() {
        let store = MemoryBackend::new();
        let past = Utc::now() - Duration::hours(2);
        store.set_key("grp-like", b"ct1", b"s1", false, Some(past)).unwrap();
        store.set_key("grp-like", b"ct2", b"s2", false, Some(past)).unwrap();

        let purged = store.purge_expired(Utc::now() - Duration::hours(1)).unwrap();
        assert_eq!(purged, 1);

        assert!(store.get_key("grp-like", Some(1), None).unwrap().is_none());
        // latest survives even though expired
        assert!(store.get_key("grp-like", Some(2), None).unwrap().is_some());
    }

    // === File backend ===

    #[test]
    fn file_backend_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = FileBackend::open(dir.path()).unwrap();
            store.set_key("host", b"ct1", b"s1", false, None).unwrap();
            store.set_key("host", b"ct2", b"s2", false, None).unwrap();
            store.create_group("grp").unwrap();
        }

        let store = FileBackend::open(dir.path()).unwrap();
        let rec = store.get_key("host", None, None).unwrap().unwrap();
        assert_eq!(rec.generation, 2);
        assert_eq!(rec.ciphertext, b"ct2");

        // generation counter continues, not restarts
        assert_eq!(store.set_key("host", b"ct3", b"s3", false, None).unwrap(), 3);

        let grp = store.get_endpoint("grp").unwrap().unwrap();
        assert!(grp.is_group);
        assert_eq!(grp.latest_generation, 0);
    }

    #[test]
    fn file_backend_delete_is_durable() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = FileBackend::open(dir.path()).unwrap();
            store.set_key("host", b"ct", b"s", false, None).unwrap();
            assert_eq!(store.delete("host", Some(false)).unwrap(), 2);
        }

        let store = FileBackend::open(dir.path()).unwrap();
        assert!(store.get_endpoint("host").unwrap().is_none());
    }

    // === Storage manager ===

    #[test]
    fn set_and_get_roundtrip() {
        let storage = manager();
        let generation = storage.set_key(TEST_NAME, TEST_KEY, None).unwrap();

        let data = storage.get_key(TEST_NAME, None, None).unwrap();
        assert_eq!(data.key.as_slice(), TEST_KEY);
        assert_eq!(data.name, TEST_NAME);
        assert_eq!(data.generation, generation);
        assert!(!data.is_group);
    }

    #[test]
    fn override_serves_the_newer_key() {
        let storage = manager();
        storage.set_key(TEST_NAME, TEST_KEY, None).unwrap();
        assert_eq!(
            storage.get_key(TEST_NAME, None, None).unwrap().key.as_slice(),
            TEST_KEY
        );

        let generation = storage.set_key(TEST_NAME, b"another-key", None).unwrap();
        assert_eq!(generation, 2);
        assert_eq!(
            storage.get_key(TEST_NAME, None, None).unwrap().key.as_slice(),
            b"another-key"
        );

        // the old generation stays pinnable
        assert_eq!(
            storage.get_key(TEST_NAME, Some(1), None).unwrap().key.as_slice(),
            TEST_KEY
        );
    }

    #[test]
    fn unset_name_is_not_found() {
        let storage = manager();
        assert!(matches!(
            storage.get_key(TEST_NAME, None, None),
            Err(KdsError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn expired_host_key_is_not_found() {
        let storage = manager();
        let past = Utc::now() - Duration::minutes(10);
        storage.set_key(TEST_NAME, TEST_KEY, Some(past)).unwrap();

        assert!(matches!(
            storage.get_key(TEST_NAME, None, None),
            Err(KdsError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn storage_ops_require_master_key() {
        let storage = StorageManager::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(CryptoEngine::without_master_key()),
            FreshnessWindows::default(),
        );

        assert_eq!(
            storage.set_key(TEST_NAME, TEST_KEY, None).unwrap_err(),
            KdsError::Crypto(CryptoError::NoMasterKey)
        );
    }

    #[test]
    fn foreign_master_key_fails_decrypt() {
        let store: Arc<dyn KeyStore> = Arc::new(MemoryBackend::new());
        let writer = StorageManager::new(
            store.clone(),
            Arc::new(CryptoEngine::with_master_key([1; KEY_SIZE])),
            FreshnessWindows::default(),
        );
        let reader = StorageManager::new(
            store,
            Arc::new(CryptoEngine::with_master_key([2; KEY_SIZE])),
            FreshnessWindows::default(),
        );

        writer.set_key(TEST_NAME, TEST_KEY, None).unwrap();
        assert_eq!(
            reader.get_key(TEST_NAME, None, None).unwrap_err(),
            KdsError::Crypto(CryptoError::Signature)
        );
    }

    // === Group keys ===

    #[test]
    fn fresh_group_mints_on_first_lookup() {
        let storage = manager();
        assert!(storage.create_group("home").unwrap());

        let first = storage.get_key("home", None, Some(true)).unwrap();
        assert!(first.is_group);
        assert_eq!(first.generation, 1);
        assert!(first.expiration.is_some());

        // a second lookup well inside the freshness window serves the same
        // generation rather than re-minting
        let second = storage.get_key("home", None, Some(true)).unwrap();
        assert_eq!(second.generation, 1);
        assert_eq!(second.key.as_slice(), first.key.as_slice());
    }

    #[test]
    fn minted_group_key_matches_its_stored_form() {
        let crypto = engine();
        let store: Arc<dyn KeyStore> = Arc::new(MemoryBackend::new());
        let storage =
            StorageManager::new(store.clone(), crypto.clone(), FreshnessWindows::default());

        storage.create_group("home").unwrap();
        let served = storage.get_key("home", None, Some(true)).unwrap();

        let stored = store.get_key("home", Some(1), Some(true)).unwrap().unwrap();
        let unwrapped = crypto
            .unwrap("home", &stored.ciphertext, &stored.signature)
            .unwrap();
        assert_eq!(served.key.as_slice(), unwrapped.as_slice());
    }

    #[test]
    fn stale_group_key_is_replaced() {
        // pre_expiry_stale longer than the minted lifetime makes every
        // minted key immediately stale for unpinned lookups
        let windows = FreshnessWindows {
            pre_expiry_stale: Duration::minutes(20),
            group_key_lifetime: Duration::minutes(15),
            ..FreshnessWindows::default()
        };
        let storage = StorageManager::new(Arc::new(MemoryBackend::new()), engine(), windows);

        storage.create_group("home").unwrap();
        let first = storage.get_key("home", None, Some(true)).unwrap();
        let second = storage.get_key("home", None, Some(true)).unwrap();
        assert!(second.generation > first.generation);
    }

    #[test]
    fn pinned_group_generation_has_post_expiry_grace() {
        let crypto = engine();
        let store: Arc<dyn KeyStore> = Arc::new(MemoryBackend::new());
        let storage =
            StorageManager::new(store.clone(), crypto.clone(), FreshnessWindows::default());

        // a group key that expired five minutes ago: inside the grace window
        let (ct, sig) = wrapped(&crypto, "home", b"old-group-secret");
        store
            .set_key("home", &ct, &sig, true, Some(Utc::now() - Duration::minutes(5)))
            .unwrap();

        let pinned = storage.get_key("home", Some(1), Some(true)).unwrap();
        assert_eq!(pinned.key.as_slice(), b"old-group-secret");

        // an unpinned lookup refuses the stale key and mints generation 2
        let latest = storage.get_key("home", None, Some(true)).unwrap();
        assert_eq!(latest.generation, 2);
    }

    #[test]
    fn pinned_group_generation_dies_after_grace() {
        let crypto = engine();
        let store: Arc<dyn KeyStore> = Arc::new(MemoryBackend::new());
        let storage =
            StorageManager::new(store.clone(), crypto.clone(), FreshnessWindows::default());

        let (ct, sig) = wrapped(&crypto, "home", b"old-group-secret");
        store
            .set_key("home", &ct, &sig, true, Some(Utc::now() - Duration::minutes(11)))
            .unwrap();

        assert!(matches!(
            storage.get_key("home", Some(1), Some(true)),
            Err(KdsError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn pinned_lookup_never_mints() {
        let storage = manager();
        storage.create_group("home").unwrap();

        assert!(matches!(
            storage.get_key("home", Some(1), Some(true)),
            Err(KdsError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn host_lookup_with_group_filter_is_not_found() {
        let storage = manager();
        storage.set_key("host", TEST_KEY, None).unwrap();

        assert!(matches!(
            storage.get_key("host", None, Some(true)),
            Err(KdsError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn sweep_respects_the_grace_window() {
        let crypto = engine();
        let store: Arc<dyn KeyStore> = Arc::new(MemoryBackend::new());
        let storage =
            StorageManager::new(store.clone(), crypto.clone(), FreshnessWindows::default());

        let (ct, sig) = wrapped(&crypto, "home", b"g1");
        store
            .set_key("home", &ct, &sig, true, Some(Utc::now() - Duration::minutes(30)))
            .unwrap();
        let (ct, sig) = wrapped(&crypto, "home", b"g2");
        store
            .set_key("home", &ct, &sig, true, Some(Utc::now() - Duration::minutes(5)))
            .unwrap();

        // generation 1 is past expiry + grace; generation 2 only past expiry
        assert_eq!(storage.sweep(Utc::now()).unwrap(), 1);
        assert!(store.get_key("home", Some(1), None).unwrap().is_none());
        assert!(store.get_key("home", Some(2), None).unwrap().is_some());
    }

    // === Concurrency ===

    #[test]
    fn concurrent_writers_get_distinct_generations() {
        let storage = Arc::new(manager());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let storage = storage.clone();
            handles.push(std::thread::spawn(move || {
                storage.set_key(TEST_NAME, TEST_KEY, None).unwrap()
            }));
        }

        let mut generations: Vec<u32> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        generations.sort_unstable();
        assert_eq!(generations, (1..=8).collect::<Vec<u32>>());
    }
}
