// # Memory Lock Store
//
// In-memory implementation of LockStore.
//
// ## Purpose
//
// A lock store that doesn't persist across restarts. Useful for tests and
// for ephemeral deployments where losing the watch set on restart is
// acceptable (operators re-issue their lock commands).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::registry::LockRecord;
use crate::traits::lock_store::{LockStore, LockStoreFactory};
use crate::types::EntityId;

/// In-memory lock store implementation
#[derive(Debug, Clone, Default)]
pub struct MemoryLockStore {
    inner: Arc<RwLock<HashMap<EntityId, LockRecord>>>,
}

impl MemoryLockStore {
    /// Create a new empty memory lock store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn load(&self) -> Result<HashMap<EntityId, LockRecord>, Error> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, records: &HashMap<EntityId, LockRecord>) -> Result<(), Error> {
        *self.inner.write().await = records.clone();
        Ok(())
    }
}

/// Factory for creating memory lock stores
pub struct MemoryLockStoreFactory;

#[async_trait]
impl LockStoreFactory for MemoryLockStoreFactory {
    async fn create(
        &self,
        config: &crate::config::StoreConfig,
    ) -> Result<Box<dyn LockStore>, Error> {
        match config {
            crate::config::StoreConfig::Memory => Ok(Box::new(MemoryLockStore::new())),
            _ => Err(Error::config("invalid config for memory lock store")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = MemoryLockStore::new();

        let mut map = HashMap::new();
        let mut record = LockRecord::default();
        record.name_lock = true;
        record.desired_name = Some("Team".to_string());
        map.insert(EntityId::from("t-1"), record);

        store.save(&map).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            loaded[&EntityId::from("t-1")].desired_name.as_deref(),
            Some("Team")
        );
    }
}
