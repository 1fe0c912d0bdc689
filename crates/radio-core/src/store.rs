use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::machine::PlaybackStatus;

/// Last persisted player state.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub station_id: String,
    #[serde(default)]
    pub status: PlaybackStatus,
    #[serde(default)]
    pub sleep_timer_running: bool,
}

/// Key-value style persistence for session state.
pub trait StateStore {
    fn save_snapshot(&mut self, snapshot: &SessionSnapshot) -> Result<(), StoreError>;

    fn load_snapshot(&self) -> SessionSnapshot;

    fn save_metadata_history(&mut self, history: &[String]) -> Result<(), StoreError>;

    fn load_metadata_history(&self) -> Vec<String>;
}

/// Stores the snapshot and the metadata history as two small JSON files.
/// Missing or unreadable files load as defaults.
pub struct JsonStateStore {
    state_file: PathBuf,
    history_file: PathBuf,
}

impl JsonStateStore {
    pub fn new(state_file: PathBuf, history_file: PathBuf) -> Self {
        Self {
            state_file,
            history_file,
        }
    }

    fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(value)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn read_json<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> T {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                debug!("state: {} not readable ({}), using default", path.display(), e);
                return T::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(e) => {
                warn!("state: {} is corrupt ({}), using default", path.display(), e);
                T::default()
            }
        }
    }
}

impl StateStore for JsonStateStore {
    fn save_snapshot(&mut self, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        Self::write_json(&self.state_file, snapshot)
    }

    fn load_snapshot(&self) -> SessionSnapshot {
        Self::read_json(&self.state_file)
    }

    fn save_metadata_history(&mut self, history: &[String]) -> Result<(), StoreError> {
        Self::write_json(&self.history_file, history)
    }

    fn load_metadata_history(&self) -> Vec<String> {
        Self::read_json(&self.history_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> JsonStateStore {
        JsonStateStore::new(
            dir.join("nested").join("state.json"),
            dir.join("nested").join("history.json"),
        )
    }

    #[test]
    fn test_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        assert_eq!(s.load_snapshot(), SessionSnapshot::default());
        assert!(s.load_metadata_history().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store(dir.path());
        let snap = SessionSnapshot {
            station_id: "nts-1".into(),
            status: PlaybackStatus::Playing,
            sleep_timer_running: true,
        };
        s.save_snapshot(&snap).unwrap();
        s.save_metadata_history(&["a".to_string(), "b".to_string()])
            .unwrap();

        let reopened = store(dir.path());
        assert_eq!(reopened.load_snapshot(), snap);
        assert_eq!(reopened.load_metadata_history(), vec!["a", "b"]);
    }

    #[test]
    fn test_corrupt_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("state.json"), "{not json").unwrap();
        assert_eq!(s.load_snapshot(), SessionSnapshot::default());
    }

    #[test]
    fn test_snapshot_without_timer_field_loads() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(
            dir.path().join("nested").join("state.json"),
            r#"{"station_id":"fip","status":"Paused"}"#,
        )
        .unwrap();
        let snap = s.load_snapshot();
        assert_eq!(snap.station_id, "fip");
        assert_eq!(snap.status, PlaybackStatus::Paused);
        assert!(!snap.sleep_timer_running);
    }
}
