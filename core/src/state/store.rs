// Anti-replay state persistence

use super::{ReplayState, StateError};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Storage backend for the anti-replay counters
#[derive(Debug, Clone)]
pub enum StateStore {
    /// Nothing survives the process (tests, dry runs)
    Memory,
    /// JSON file `{"boot_count": u32, "msg_id": u32}`
    File(PathBuf),
}

impl StateStore {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// Load saved counters; `None` when nothing has been saved yet
    pub fn load(&self) -> Result<Option<ReplayState>, StateError> {
        match self {
            Self::Memory => Ok(None),
            Self::File(path) => {
                if !path.exists() {
                    return Ok(None);
                }
                let contents = fs::read(path)?;
                let state = serde_json::from_slice(&contents).map_err(|e| StateError::Corrupt {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                Ok(Some(state))
            }
        }
    }

    /// Durably replace the saved counters
    ///
    /// Writes a sibling temp file, syncs it, then renames it over the target,
    /// so a crash mid-save leaves either the old or the new state on disk.
    pub fn save(&self, state: &ReplayState) -> Result<(), StateError> {
        match self {
            Self::Memory => Ok(()),
            Self::File(path) => {
                let bytes = serde_json::to_vec(state)?;
                let tmp = temp_path(path);
                {
                    let mut file = File::create(&tmp)?;
                    file.write_all(&bytes)?;
                    file.sync_all()?;
                }
                fs::rename(&tmp, path)?;
                Ok(())
            }
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_store() {
        let store = StateStore::memory();
        store
            .save(&ReplayState {
                boot_count: 5,
                msg_id: 9,
            })
            .unwrap();

        // Memory store doesn't persist
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gs_state.json");
        let store = StateStore::file(&path);

        assert!(store.load().unwrap().is_none());

        let state = ReplayState {
            boot_count: 474,
            msg_id: 12,
        };
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));

        let json = std::fs::read_to_string(&path).unwrap();
        assert_eq!(json, r#"{"boot_count":474,"msg_id":12}"#);
        assert!(!dir.path().join("gs_state.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gs_state.json");
        std::fs::write(&path, b"{not json").unwrap();

        let result = StateStore::file(&path).load();
        assert!(matches!(result, Err(StateError::Corrupt { .. })));
    }
}
