//! Service configuration.
//!
//! One explicit struct threaded through constructors; nothing reads ambient
//! global state. The server binary populates this from the environment.

use std::path::PathBuf;

use chrono::Duration;
use keymint_crypto::CryptoOptions;

/// Which key repository backend to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// Ordered, file-checkpointed backend. Survives restarts.
    #[default]
    File,
    /// In-memory map. For tests and ephemeral deployments.
    Memory,
}

/// The freshness windows applied when serving keys.
#[derive(Clone, Copy, Debug)]
pub struct FreshnessWindows {
    /// How long after expiry a pinned group-key generation is still served,
    /// so tickets already bound to it remain decryptable on the destination.
    pub post_expiry_grace: Duration,
    /// How long before expiry an unpinned group-key lookup is treated as
    /// stale and regenerated, so every "latest" reader gets a usable key.
    pub pre_expiry_stale: Duration,
    /// Lifetime given to each freshly minted group key.
    pub group_key_lifetime: Duration,
}

impl Default for FreshnessWindows {
    fn default() -> Self {
        Self {
            post_expiry_grace: Duration::minutes(10),
            pre_expiry_stale: Duration::minutes(2),
            group_key_lifetime: Duration::minutes(15),
        }
    }
}

/// Complete service configuration.
#[derive(Clone, Debug)]
pub struct KdsConfig {
    /// Location of the base64 master-key file. Created if absent.
    pub master_key_file: PathBuf,
    /// Cipher and hash selection for the crypto engine.
    pub crypto: CryptoOptions,
    /// How old a signed request may be before it is rejected.
    pub ticket_lifetime: Duration,
    /// Group-key freshness windows.
    pub windows: FreshnessWindows,
    /// Repository backend.
    pub backend: BackendKind,
    /// Data directory for the file backend.
    pub data_dir: PathBuf,
    /// Listen address for the HTTP surface.
    pub bind_address: String,
    pub port: u16,
    /// How often the expired-record sweeper runs. Zero disables it.
    pub sweep_interval: Duration,
}

impl Default for KdsConfig {
    fn default() -> Self {
        Self {
            master_key_file: PathBuf::from("./keymint-data/kds.mkey"),
            crypto: CryptoOptions::default(),
            ticket_lifetime: Duration::seconds(3600),
            windows: FreshnessWindows::default(),
            backend: BackendKind::default(),
            data_dir: PathBuf::from("./keymint-data"),
            bind_address: "0.0.0.0".to_string(),
            port: 9109,
            sweep_interval: Duration::minutes(5),
        }
    }
}
