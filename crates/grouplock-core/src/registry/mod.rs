//! Desired-state registry
//!
//! The [`EntityRegistry`] is the single owner of all per-entity desired
//! state. Every mutation — from the drift detector's debounce bookkeeping,
//! the breaker's counters, queue runners, or operator commands — goes
//! through its serialized `mutate`/`update` operations, which apply a
//! read-modify-write transform under one lock and then write the full map
//! through the injected [`LockStore`]. Saves reach the store in mutation
//! order; a slow save holds up the next mutation, not concurrent reads.
//!
//! Persistence failures are logged, never fatal: in-memory state stays
//! authoritative until the next successful save.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::traits::LockStore;
use crate::types::{AttributeKind, EntityId, MemberId};

/// Desired state and breaker bookkeeping for one watched entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockRecord {
    /// Whether the group's display name is enforced
    #[serde(default)]
    pub name_lock: bool,

    /// The display name to enforce while `name_lock` is set
    #[serde(default)]
    pub desired_name: Option<String>,

    /// Whether member nicknames are enforced
    #[serde(default)]
    pub nickname_lock: bool,

    /// Group-wide fallback nickname for members without a per-member entry
    #[serde(default)]
    pub nickname_template: Option<String>,

    /// Per-member desired nicknames; these win over the template
    #[serde(default)]
    pub desired_nicknames: HashMap<MemberId, String>,

    /// Consecutive corrections since the last cooldown reset
    #[serde(default)]
    pub correction_count: u32,

    /// Whether the entity's corrections are currently suspended
    #[serde(default)]
    pub cooldown_active: bool,

    /// Set while suspended when drift was observed but suppressed.
    /// True only while `cooldown_active` is true.
    #[serde(default)]
    pub pending_resync: bool,

    /// Debounce state: first-observed time of an uncorrected drift,
    /// at most one per attribute kind. Never persisted.
    #[serde(skip)]
    pub drift_since: HashMap<AttributeKind, tokio::time::Instant>,

    /// Consecutive permanent fetch failures. Never persisted.
    #[serde(skip)]
    pub fetch_failures: u32,
}

impl LockRecord {
    /// Resolve the desired nickname for a member: the per-member entry if
    /// present, otherwise the group-wide template.
    pub fn desired_nickname(&self, member: &MemberId) -> Option<&str> {
        self.desired_nicknames
            .get(member)
            .map(String::as_str)
            .or(self.nickname_template.as_deref())
    }

    /// Whether any lock is enabled for this entity.
    pub fn watches_anything(&self) -> bool {
        self.name_lock || self.nickname_lock
    }
}

/// Single-writer registry of entity identifier → desired-state record.
pub struct EntityRegistry {
    entities: RwLock<HashMap<EntityId, LockRecord>>,
    store: Box<dyn LockStore>,
    /// Held across mutate-and-save so writes reach the store in mutation
    /// order even when a save stalls. Reads bypass it entirely.
    persist_lock: Mutex<()>,
}

impl EntityRegistry {
    /// Load the registry from the given store.
    ///
    /// A missing or unreadable store yields an empty map, not an error:
    /// the agent starts watching nothing rather than refusing to start.
    pub async fn load(store: Box<dyn LockStore>) -> Self {
        let entities = match store.load().await {
            Ok(map) => {
                debug!("loaded {} lock record(s)", map.len());
                map
            }
            Err(e) => {
                warn!("failed to load lock records, starting empty: {}", e);
                HashMap::new()
            }
        };

        Self {
            entities: RwLock::new(entities),
            store,
            persist_lock: Mutex::new(()),
        }
    }

    /// Get a snapshot of one entity's record.
    pub async fn get(&self, id: &EntityId) -> Option<LockRecord> {
        self.entities.read().await.get(id).cloned()
    }

    /// All currently watched entity identifiers.
    pub async fn ids(&self) -> Vec<EntityId> {
        self.entities.read().await.keys().cloned().collect()
    }

    /// Number of watched entities.
    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }

    /// Full snapshot of the desired-state map.
    pub async fn snapshot(&self) -> HashMap<EntityId, LockRecord> {
        self.entities.read().await.clone()
    }

    /// Apply a read-modify-write transform to an entity's record,
    /// creating it if absent, then persist the full map.
    ///
    /// Returns the record as it stands after the transform.
    pub async fn mutate<F>(&self, id: &EntityId, f: F) -> LockRecord
    where
        F: FnOnce(&mut LockRecord) + Send,
    {
        let _persist = self.persist_lock.lock().await;
        let (record, snapshot) = {
            let mut entities = self.entities.write().await;
            let record = entities.entry(id.clone()).or_default();
            f(record);
            (record.clone(), entities.clone())
        };

        self.persist(&snapshot).await;
        record
    }

    /// Like [`mutate`](Self::mutate), but only for records that already
    /// exist. Returns `None` (without persisting) when the entity is not
    /// watched — the usual case for stale queued work after removal.
    pub async fn update<F>(&self, id: &EntityId, f: F) -> Option<LockRecord>
    where
        F: FnOnce(&mut LockRecord) + Send,
    {
        let _persist = self.persist_lock.lock().await;
        let result = {
            let mut entities = self.entities.write().await;
            match entities.get_mut(id) {
                Some(record) => {
                    f(record);
                    Some((record.clone(), entities.clone()))
                }
                None => None,
            }
        };

        match result {
            Some((record, snapshot)) => {
                self.persist(&snapshot).await;
                Some(record)
            }
            None => None,
        }
    }

    /// Remove an entity from the watch set and persist the removal.
    pub async fn remove(&self, id: &EntityId) -> Option<LockRecord> {
        let _persist = self.persist_lock.lock().await;
        let (removed, snapshot) = {
            let mut entities = self.entities.write().await;
            let removed = entities.remove(id);
            (removed, entities.clone())
        };

        if removed.is_some() {
            self.persist(&snapshot).await;
        }
        removed
    }

    /// Force a write of the current map (periodic backup, shutdown).
    pub async fn flush(&self) {
        let _persist = self.persist_lock.lock().await;
        let snapshot = self.snapshot().await;
        self.persist(&snapshot).await;
    }

    async fn persist(&self, snapshot: &HashMap<EntityId, LockRecord>) {
        if let Err(e) = self.store.save(snapshot).await {
            warn!("failed to persist lock records (keeping in-memory state): {}", e);
        }
    }
}
