//! Master-key file handling.
//!
//! The master key lives in a single base64-encoded file readable only by the
//! service owner. If the file is missing it is created exclusively
//! (`O_WRONLY | O_CREAT | O_EXCL`, mode 0o600) with fresh random material.
//! Any other I/O failure is fatal: a present-but-unreadable key file means
//! bad permissions or corruption, and guessing would orphan every stored
//! ciphertext.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rand_core::{OsRng, RngCore};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::KEY_SIZE;

/// Load the master key from `path`, creating it if absent.
pub fn load_or_create(path: &Path) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    match fs::read_to_string(path) {
        Ok(contents) => decode(contents.trim()),
        Err(e) if e.kind() == ErrorKind::NotFound => create(path),
        Err(e) => Err(CryptoError::MasterKey(format!("read {}: {}", path.display(), e))),
    }
}

fn decode(contents: &str) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    let raw = Zeroizing::new(
        B64.decode(contents)
            .map_err(|e| CryptoError::MasterKey(format!("not base64: {}", e)))?,
    );
    if raw.len() != KEY_SIZE {
        return Err(CryptoError::MasterKey(format!(
            "expected {} key bytes, found {}",
            KEY_SIZE,
            raw.len()
        )));
    }
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(&raw);
    Ok(key)
}

fn create(path: &Path) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    OsRng.fill_bytes(key.as_mut());

    let mut opts = OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }

    // The file handle lives only inside this scope; no descriptor is retained.
    let mut file = opts
        .open(path)
        .map_err(|e| CryptoError::MasterKey(format!("create {}: {}", path.display(), e)))?;
    file.write_all(B64.encode(key.as_ref()).as_bytes())
        .map_err(|e| CryptoError::MasterKey(format!("write {}: {}", path.display(), e)))?;

    Ok(key)
}
