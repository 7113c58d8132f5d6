//! Durable checkpoint state for the sync loop.
//!
//! The pipeline needs exactly one durable value across restarts: the
//! watermark marking the last successfully synchronized instant. It is kept
//! in a small key-value document behind the [`StateStorage`] trait so a
//! different backend (a database table, say) can be substituted without
//! touching the sync loop.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::error::SyncError;

/// Key under which the watermark is persisted.
pub const LAST_SYNC_KEY: &str = "last_sync";

/// Persistence backend for the checkpoint document.
///
/// `persist` must durably write the *entire* mapping before returning, so a
/// crash between calls never loses previously committed keys. There is a
/// single writer, so last-writer-wins is sufficient.
pub trait StateStorage {
    fn retrieve(&self) -> Result<BTreeMap<String, String>, SyncError>;
    fn persist(&self, state: &BTreeMap<String, String>) -> Result<(), SyncError>;
}

/// File-backed storage: one JSON object, read fully at startup and rewritten
/// fully on every update.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StateStorage for JsonFileStorage {
    fn retrieve(&self) -> Result<BTreeMap<String, String>, SyncError> {
        if !self.path.is_file() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn persist(&self, state: &BTreeMap<String, String>) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        // Write-then-rename so a crash mid-write leaves the previous
        // document intact instead of a truncated file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory view of the checkpoint document plus its storage handle.
///
/// `set` updates the cached mapping and persists the whole document before
/// returning; `get` never touches storage after the initial load.
pub struct State<S: StateStorage> {
    storage: S,
    current: BTreeMap<String, String>,
}

impl<S: StateStorage> State<S> {
    pub fn load(storage: S) -> Result<Self, SyncError> {
        let current = storage.retrieve()?;
        Ok(Self { storage, current })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.current.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<(), SyncError> {
        self.current.insert(key.into(), value.into());
        self.storage.persist(&self.current)
    }

    /// The watermark, or `None` when no cycle has ever committed
    /// (treated by the caller as "beginning of time").
    ///
    /// A present but unparseable value is an error rather than a silent
    /// full resync; a hand-edited state file should fail loudly.
    pub fn last_sync(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        let Some(raw) = self.get(LAST_SYNC_KEY) else {
            return Ok(None);
        };
        let parsed = DateTime::parse_from_rfc3339(raw).map_err(|source| SyncError::Watermark {
            value: raw.to_string(),
            source,
        })?;
        Ok(Some(parsed.with_timezone(&Utc)))
    }

    /// Durably advance the watermark.
    pub fn set_last_sync(&mut self, instant: DateTime<Utc>) -> Result<(), SyncError> {
        self.set(LAST_SYNC_KEY, instant.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;

    fn storage_in(dir: &TempDir) -> JsonFileStorage {
        JsonFileStorage::new(dir.path().join("state.json"))
    }

    #[test]
    fn test_missing_file_is_empty_state() {
        let dir = TempDir::new().unwrap();
        let state = State::load(storage_in(&dir)).unwrap();
        assert_eq!(state.get(LAST_SYNC_KEY), None);
        assert_eq!(state.last_sync().unwrap(), None);
    }

    #[test]
    fn test_set_persists_across_reload() {
        let dir = TempDir::new().unwrap();

        let mut state = State::load(storage_in(&dir)).unwrap();
        state.set("alpha", "1").unwrap();
        state.set("beta", "2").unwrap();

        let reloaded = State::load(storage_in(&dir)).unwrap();
        assert_eq!(reloaded.get("alpha"), Some("1"));
        assert_eq!(reloaded.get("beta"), Some("2"));
    }

    #[test]
    fn test_whole_document_rewritten_on_set() {
        let dir = TempDir::new().unwrap();

        let mut state = State::load(storage_in(&dir)).unwrap();
        state.set("alpha", "1").unwrap();

        // A second State instance writing a different key must not clobber
        // keys it happens to have loaded before the write.
        let mut other = State::load(storage_in(&dir)).unwrap();
        other.set("beta", "2").unwrap();

        let reloaded = State::load(storage_in(&dir)).unwrap();
        assert_eq!(reloaded.get("alpha"), Some("1"));
        assert_eq!(reloaded.get("beta"), Some("2"));
    }

    #[test]
    fn test_watermark_round_trip() {
        let dir = TempDir::new().unwrap();
        let instant = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let mut state = State::load(storage_in(&dir)).unwrap();
        state.set_last_sync(instant).unwrap();

        let reloaded = State::load(storage_in(&dir)).unwrap();
        assert_eq!(reloaded.last_sync().unwrap(), Some(instant));
    }

    #[test]
    fn test_garbage_watermark_is_an_error() {
        let dir = TempDir::new().unwrap();

        let mut state = State::load(storage_in(&dir)).unwrap();
        state.set(LAST_SYNC_KEY, "not a timestamp").unwrap();

        let reloaded = State::load(storage_in(&dir)).unwrap();
        let err = reloaded.last_sync().unwrap_err();
        assert!(matches!(err, SyncError::Watermark { .. }));
        assert!(!err.is_transient());
    }
}
