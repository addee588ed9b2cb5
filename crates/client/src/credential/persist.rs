// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential persistence: JSON file with atomic writes.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::credential::{CredentialPair, CredentialStore};
use crate::error::ClientError;

/// File-backed credential store.
///
/// Keeps an in-memory mirror of the file so reads never touch disk. Writes
/// update the mirror first and then persist, so a failed write still leaves
/// the running process with the newest pair.
pub struct FileCredentialStore {
    path: PathBuf,
    current: Mutex<CredentialPair>,
}

impl FileCredentialStore {
    /// Open the store at `path`, loading any previously persisted pair.
    ///
    /// A missing file is an empty pair. An unreadable or corrupt file is
    /// logged and treated as empty so a bad file never wedges the client.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match load(&path) {
            Ok(Some(pair)) => pair,
            Ok(None) => CredentialPair::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), err = %e, "ignoring unreadable credential file");
                CredentialPair::default()
            }
        };
        Self { path, current: Mutex::new(current) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> CredentialPair {
        self.current.lock().clone()
    }

    fn set(&self, pair: &CredentialPair) -> Result<(), ClientError> {
        let mut current = self.current.lock();
        *current = pair.clone();
        save(&self.path, pair)
    }

    fn clear(&self) -> Result<(), ClientError> {
        let mut current = self.current.lock();
        *current = CredentialPair::default();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Load a persisted pair. `Ok(None)` when the file does not exist.
pub fn load(path: &Path) -> Result<Option<CredentialPair>, ClientError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let pair: CredentialPair =
        serde_json::from_str(&contents).map_err(|e| ClientError::Storage(e.to_string()))?;
    Ok(Some(pair))
}

/// Save a pair atomically (write tmp + rename).
///
/// Uses a unique temp filename (PID + counter) so concurrent saves never
/// share a `.tmp` file.
pub fn save(path: &Path, pair: &CredentialPair) -> Result<(), ClientError> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(pair).map_err(|e| ClientError::Storage(e.to_string()))?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
