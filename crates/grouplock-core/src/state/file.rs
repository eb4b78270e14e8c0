// # File Lock Store
//
// File-based implementation of LockStore with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: new state goes to a temp file, then a rename
// - Corruption detection: JSON is validated on load
// - Automatic backup: the last known good state is kept in a `.backup`
// - Recovery: load falls back to the backup if corruption is detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "saved_at": "2025-06-01T12:00:00Z",
//   "entities": {
//     "100200300": {
//       "name_lock": true,
//       "desired_name": "Team Chat",
//       "nickname_lock": true,
//       "nickname_template": "crew",
//       "desired_nicknames": {},
//       "correction_count": 0,
//       "cooldown_active": false,
//       "pending_resync": false
//     }
//   }
// }
// ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::Error;
use crate::registry::LockRecord;
use crate::traits::lock_store::{LockStore, LockStoreFactory};
use crate::types::EntityId;

/// State file format version, used for future migration if the format changes
const STATE_FILE_VERSION: &str = "1.0";

/// File-based lock store with crash recovery.
///
/// Persists the desired-state map to a JSON file with atomic
/// write-then-rename so a crash mid-write never corrupts prior state.
#[derive(Debug)]
pub struct FileLockStore {
    path: PathBuf,
}

/// Serializable state file envelope
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StateFileFormat {
    version: String,
    saved_at: chrono::DateTime<chrono::Utc>,
    entities: HashMap<EntityId, LockRecord>,
}

impl FileLockStore {
    /// Create a file lock store, creating parent directories if needed.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "failed to create state directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        Ok(Self { path })
    }

    /// Load state from a file path.
    async fn load_file(path: &Path) -> Result<HashMap<EntityId, LockRecord>, Error> {
        if !path.exists() {
            debug!("state file does not exist: {}", path.display());
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::store(format!("failed to read state file {}: {}", path.display(), e))
        })?;

        let state_file: StateFileFormat = serde_json::from_str(&content).map_err(|e| {
            Error::store(format!(
                "failed to parse state file {}: {}",
                path.display(),
                e
            ))
        })?;

        if state_file.version != STATE_FILE_VERSION {
            warn!(
                "state file version mismatch: expected {}, got {}. Attempting to load anyway.",
                STATE_FILE_VERSION, state_file.version
            );
        }

        Ok(state_file.entities)
    }

    /// Load with automatic recovery: main file, then backup, then empty.
    async fn load_with_recovery(&self) -> Result<HashMap<EntityId, LockRecord>, Error> {
        match Self::load_file(&self.path).await {
            Ok(entities) => {
                debug!("loaded state file: {} record(s)", entities.len());
                Ok(entities)
            }
            Err(e) => {
                warn!(
                    "state file unreadable: {}. Attempting recovery from backup.",
                    e
                );

                let backup = Self::backup_path(&self.path);
                if backup.exists() {
                    match Self::load_file(&backup).await {
                        Ok(entities) => {
                            info!("recovered state from backup: {} record(s)", entities.len());
                            Ok(entities)
                        }
                        Err(backup_err) => {
                            warn!(
                                "backup also unreadable: {}. Starting with empty state.",
                                backup_err
                            );
                            Ok(HashMap::new())
                        }
                    }
                } else {
                    warn!("no backup file found. Starting with empty state.");
                    Ok(HashMap::new())
                }
            }
        }
    }

    /// Write state to file atomically (temp file + rename), keeping a
    /// backup of the previous file.
    async fn write_file(&self, entities: &HashMap<EntityId, LockRecord>) -> Result<(), Error> {
        let state_file = StateFileFormat {
            version: STATE_FILE_VERSION.to_string(),
            saved_at: chrono::Utc::now(),
            entities: entities.clone(),
        };

        let json = serde_json::to_string_pretty(&state_file)
            .map_err(|e| Error::store(format!("failed to serialize state: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::store(format!(
                    "failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::store(format!(
                    "failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.flush().await.map_err(|e| {
                Error::store(format!(
                    "failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup).await {
                warn!("failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::store(format!(
                "failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl LockStore for FileLockStore {
    async fn load(&self) -> Result<HashMap<EntityId, LockRecord>, Error> {
        self.load_with_recovery().await
    }

    async fn save(&self, records: &HashMap<EntityId, LockRecord>) -> Result<(), Error> {
        self.write_file(records).await
    }
}

/// Factory for creating file lock stores
pub struct FileLockStoreFactory;

#[async_trait]
impl LockStoreFactory for FileLockStoreFactory {
    async fn create(
        &self,
        config: &crate::config::StoreConfig,
    ) -> Result<Box<dyn LockStore>, Error> {
        match config {
            crate::config::StoreConfig::File { path } => {
                Ok(Box::new(FileLockStore::new(path).await?))
            }
            _ => Err(Error::config("invalid config for file lock store")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_map(name: &str) -> HashMap<EntityId, LockRecord> {
        let mut map = HashMap::new();
        let mut record = LockRecord::default();
        record.name_lock = true;
        record.desired_name = Some(name.to_string());
        map.insert(EntityId::from("t-1"), record);
        map
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locks.json");

        let store = FileLockStore::new(&path).await.unwrap();

        // Missing file loads as empty
        assert!(store.load().await.unwrap().is_empty());

        store.save(&sample_map("Team")).await.unwrap();
        assert!(path.exists());

        // A new instance sees the persisted state
        let store2 = FileLockStore::new(&path).await.unwrap();
        let loaded = store2.load().await.unwrap();
        assert_eq!(
            loaded[&EntityId::from("t-1")].desired_name.as_deref(),
            Some("Team")
        );
    }

    #[tokio::test]
    async fn corruption_recovers_from_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locks.json");

        let store = FileLockStore::new(&path).await.unwrap();

        // Two writes so the backup holds the first state
        store.save(&sample_map("First")).await.unwrap();
        store.save(&sample_map("Second")).await.unwrap();

        let backup = FileLockStore::backup_path(&path);
        assert!(backup.exists(), "backup file should exist after second write");

        fs::write(&path, b"corrupted json data").await.unwrap();

        let recovered = store.load().await.unwrap();
        assert_eq!(
            recovered[&EntityId::from("t-1")].desired_name.as_deref(),
            Some("First"),
            "backup should contain the previous state"
        );
    }

    #[tokio::test]
    async fn rapid_saves_stay_consistent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locks.json");

        let store = FileLockStore::new(&path).await.unwrap();
        for i in 0..10 {
            store.save(&sample_map(&format!("Name {}", i))).await.unwrap();
        }

        let loaded = store.load().await.unwrap();
        assert_eq!(
            loaded[&EntityId::from("t-1")].desired_name.as_deref(),
            Some("Name 9")
        );
    }

    #[tokio::test]
    async fn transient_fields_are_not_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locks.json");

        let store = FileLockStore::new(&path).await.unwrap();

        let mut map = sample_map("Team");
        let record = map.get_mut(&EntityId::from("t-1")).unwrap();
        record
            .drift_since
            .insert(crate::types::AttributeKind::Name, tokio::time::Instant::now());
        record.fetch_failures = 2;

        store.save(&map).await.unwrap();
        let loaded = store.load().await.unwrap();
        let loaded_record = &loaded[&EntityId::from("t-1")];
        assert!(loaded_record.drift_since.is_empty());
        assert_eq!(loaded_record.fetch_failures, 0);
    }
}
