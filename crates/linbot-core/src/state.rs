//! Persisted toggle state and its stores.
//!
//! The document is a small JSON object:
//!
//! ```json
//! { "pluginStates": { "帮助": true }, "groupStates": { "123456": true } }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};

/// Per-command and per-room enabled flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    /// command → enabled
    #[serde(default)]
    pub plugin_states: BTreeMap<String, bool>,
    /// group id → enabled
    #[serde(default)]
    pub group_states: BTreeMap<i64, bool>,
}

/// Key-value persistence for [`PersistedState`].
pub trait StateStore: Send + Sync {
    /// Reads the stored state; a store with nothing saved yields the default.
    fn load(&self) -> StateResult<PersistedState>;

    /// Replaces the stored state.
    fn save(&self, state: &PersistedState) -> StateResult<()>;
}

// ─── JsonFileStore ───────────────────────────────────────────────────────────

/// A [`StateStore`] backed by a pretty-printed JSON file.
///
/// Writes go to `<file>.tmp` and are renamed into place. The file being
/// replaced is kept as `<file>.bak` and read back if the main file is
/// unreadable.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    fn read(path: &Path) -> StateResult<PersistedState> {
        let data = std::fs::read_to_string(path).map_err(|e| StateError::io(path, e))?;
        serde_json::from_str(&data).map_err(|source| StateError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> StateResult<PersistedState> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No state file yet, using defaults");
            return Ok(PersistedState::default());
        }

        match Self::read(&self.path) {
            Ok(state) => Ok(state),
            Err(e) => {
                let backup = self.sibling(".bak");
                if !backup.exists() {
                    return Err(e);
                }
                warn!(error = %e, backup = %backup.display(), "State file unreadable, using backup");
                Self::read(&backup)
            }
        }
    }

    fn save(&self, state: &PersistedState) -> StateResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StateError::io(parent, e))?;
        }

        let data = serde_json::to_string_pretty(state).map_err(|source| StateError::Malformed {
            path: self.path.clone(),
            source,
        })?;

        let tmp = self.sibling(".tmp");
        std::fs::write(&tmp, data).map_err(|e| StateError::io(&tmp, e))?;

        // Only a file that still parses is worth keeping as a backup.
        if Self::read(&self.path).is_ok() {
            let backup = self.sibling(".bak");
            std::fs::copy(&self.path, &backup).map_err(|e| StateError::io(&backup, e))?;
        }

        std::fs::rename(&tmp, &self.path).map_err(|e| StateError::io(&self.path, e))?;
        debug!(path = %self.path.display(), "State saved");
        Ok(())
    }
}

// ─── MemoryStore ─────────────────────────────────────────────────────────────

/// An in-memory [`StateStore`], with switchable write failures.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<PersistedState>,
    fail_writes: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from `state`.
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Makes every subsequent `save` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Copy of the stored state.
    pub fn snapshot(&self) -> PersistedState {
        self.state.lock().clone()
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> StateResult<PersistedState> {
        Ok(self.state.lock().clone())
    }

    fn save(&self, state: &PersistedState) -> StateResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StateError::Backend("write rejected".into()));
        }
        *self.state.lock() = state.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PersistedState {
        let mut state = PersistedState::default();
        state.plugin_states.insert("帮助".into(), true);
        state.plugin_states.insert("复读".into(), false);
        state.group_states.insert(123456, true);
        state
    }

    #[test]
    fn test_load_missing_returns_default() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(tmp.path().join("missing.json"));
        assert_eq!(store.load().unwrap(), PersistedState::default());
    }

    #[test]
    fn test_save_writes_camel_case_document() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(tmp.path().join("nested/config.json"));
        store.save(&sample()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["pluginStates"]["复读"], false);
        assert_eq!(raw["groupStates"]["123456"], true);
        assert_eq!(store.load().unwrap(), sample());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_backup() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        let store = JsonFileStore::new(&path);

        store.save(&sample()).unwrap();
        let mut newer = sample();
        newer.plugin_states.insert("个人信息".into(), true);
        store.save(&newer).unwrap();

        std::fs::write(&path, "{ truncated").unwrap();
        assert_eq!(store.load().unwrap(), sample());
    }

    #[test]
    fn test_corrupt_file_without_backup_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        let err = JsonFileStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StateError::Malformed { .. }));
    }

    #[test]
    fn test_memory_store_failures() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(store.save(&sample()).is_err());
        assert_eq!(store.save_count(), 0);

        store.set_fail_writes(false);
        store.save(&sample()).unwrap();
        assert_eq!(store.snapshot(), sample());
    }
}
