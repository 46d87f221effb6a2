//! Frontier snapshots.
//!
//! A snapshot is a JSON envelope holding the serialized [`FrontierState`] and
//! the SHA-256 of that serialization. It is written to a temporary file,
//! synced, and renamed over `checkpoint.json`; the snapshot it replaces is
//! kept as `checkpoint.prev.json`. Loading prefers the current snapshot and
//! falls back to the previous one when the current fails verification.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::state::FrontierState;

const FORMAT_VERSION: u32 = 1;
const CURRENT: &str = "checkpoint.json";
const PREVIOUS: &str = "checkpoint.prev.json";
const TEMP: &str = "checkpoint.json.tmp";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt checkpoint: {0}")]
    Corrupt(String),

    #[error("failed to serialize checkpoint: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("checkpoint belongs to a crawl seeded from {saved}, not {requested}; pass --restart to start over")]
    SeedMismatch { saved: String, requested: String },
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    checksum: String,
    state: serde_json::Value,
}

fn checksum(state: &serde_json::Value) -> Result<String, serde_json::Error> {
    // serde_json::Value keeps object keys sorted, so this byte form is stable.
    let bytes = serde_json::to_vec(state)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Snapshot files for one output location.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(CURRENT)
    }

    /// Atomically replace the current snapshot with `state`.
    pub fn save(&self, state: &FrontierState) -> Result<(), CheckpointError> {
        self.write(&encode(state)?)
    }

    /// [`save`](Self::save) for async callers. The state is serialized on the
    /// calling task; file writes and syncs run on the blocking pool.
    pub async fn save_async(&self, state: &FrontierState) -> Result<(), CheckpointError> {
        let bytes = encode(state)?;
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.write(&bytes))
            .await
            .map_err(|e| CheckpointError::Io(std::io::Error::other(e)))?
    }

    fn write(&self, bytes: &[u8]) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.dir)?;
        let temp = self.dir.join(TEMP);
        {
            let mut file = File::create(&temp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }

        let current = self.dir.join(CURRENT);
        if current.exists() {
            fs::rename(&current, self.dir.join(PREVIOUS))?;
        }
        fs::rename(&temp, &current)?;

        // Persist the renames; not supported on every platform.
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        tracing::debug!(path = %current.display(), bytes = bytes.len(), "Checkpoint saved");
        Ok(())
    }

    /// Load the newest valid snapshot.
    ///
    /// Returns `Ok(None)` when no snapshot exists or none passes verification.
    /// Corrupt files are logged and skipped, never partially applied.
    pub fn load(&self) -> Result<Option<FrontierState>, CheckpointError> {
        for name in [CURRENT, PREVIOUS] {
            let path = self.dir.join(name);
            match read_snapshot(&path) {
                Ok(Some(state)) => {
                    if name == PREVIOUS {
                        tracing::warn!(path = %path.display(), "Resuming from previous checkpoint");
                    }
                    return Ok(Some(state));
                }
                Ok(None) => {}
                Err(CheckpointError::Corrupt(reason)) => {
                    tracing::warn!(path = %path.display(), reason = %reason, "Discarding corrupt checkpoint");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Remove every snapshot file.
    pub fn discard(&self) -> Result<(), CheckpointError> {
        for name in [CURRENT, PREVIOUS, TEMP] {
            match fs::remove_file(self.dir.join(name)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn encode(state: &FrontierState) -> Result<Vec<u8>, CheckpointError> {
    let value = serde_json::to_value(state)?;
    let envelope = Envelope {
        version: FORMAT_VERSION,
        checksum: checksum(&value)?,
        state: value,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

fn read_snapshot(path: &Path) -> Result<Option<FrontierState>, CheckpointError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let envelope: Envelope =
        serde_json::from_slice(&bytes).map_err(|e| CheckpointError::Corrupt(format!("unreadable envelope: {e}")))?;
    if envelope.version != FORMAT_VERSION {
        return Err(CheckpointError::Corrupt(format!(
            "unsupported version {}",
            envelope.version
        )));
    }
    let actual = checksum(&envelope.state)?;
    if actual != envelope.checksum {
        return Err(CheckpointError::Corrupt("checksum mismatch".to_string()));
    }
    let state = serde_json::from_value(envelope.state)
        .map_err(|e| CheckpointError::Corrupt(format!("invalid state: {e}")))?;
    Ok(Some(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::state::{CrawlSettings, DomainState};
    use pretty_assertions::assert_eq;

    fn state() -> FrontierState {
        let mut s = FrontierState::new(
            "https://seed.example/feed",
            "https://seed.example",
            CrawlSettings {
                depth_limit: 2,
                expansion_threshold: 1,
            },
        );
        s.domains.insert("https://a.example".into(), DomainState::Mentioned { count: 1 });
        s.accounted.insert(42);
        s
    }

    #[test]
    fn test_missing_checkpoint_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save(&state()).unwrap();
        assert_eq!(store.load().unwrap(), Some(state()));
        assert!(!dir.path().join(TEMP).exists());
    }

    #[test]
    fn test_second_save_rotates_previous() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let first = state();
        let mut second = state();
        second.accounted.insert(43);

        store.save(&first).unwrap();
        store.save(&second).unwrap();

        assert!(dir.path().join(PREVIOUS).exists());
        assert_eq!(store.load().unwrap(), Some(second));
    }

    #[test]
    fn test_corrupt_current_falls_back_to_previous() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let first = state();
        let mut second = state();
        second.accounted.insert(43);
        store.save(&first).unwrap();
        store.save(&second).unwrap();

        // Torn write: truncate the current snapshot.
        let current = dir.path().join(CURRENT);
        let bytes = fs::read(&current).unwrap();
        fs::write(&current, &bytes[..bytes.len() / 2]).unwrap();

        assert_eq!(store.load().unwrap(), Some(first));
    }

    #[test]
    fn test_tampered_state_fails_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save(&state()).unwrap();

        let current = dir.path().join(CURRENT);
        let text = fs::read_to_string(&current).unwrap();
        fs::write(&current, text.replace("\"count\":1", "\"count\":9")).unwrap();

        assert!(matches!(read_snapshot(&current), Err(CheckpointError::Corrupt(_))));
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_async_save_matches_sync_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save_async(&state()).await.unwrap();
        assert_eq!(store.load().unwrap(), Some(state()));
        assert!(!dir.path().join(TEMP).exists());
    }

    #[test]
    fn test_discard_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save(&state()).unwrap();
        store.save(&state()).unwrap();
        store.discard().unwrap();
        assert!(store.load().unwrap().is_none());
        store.discard().unwrap();
    }
}
