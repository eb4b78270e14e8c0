// # Lock Store Trait
//
// Defines the interface for durable persistence of the desired-state map.
//
// ## Purpose
//
// The store only moves whole snapshots: the EntityRegistry owns all
// read-modify-write serialization and writes the full map through after
// every mutation, so a store implementation never needs per-record
// operations or its own locking discipline beyond load/save atomicity.
//
// ## Implementations
//
// - File-based: `state::FileLockStore` (atomic write-then-rename)
// - In-memory: `state::MemoryLockStore` (tests, ephemeral runs)

use async_trait::async_trait;
use std::collections::HashMap;

use crate::registry::LockRecord;
use crate::types::EntityId;

/// Trait for desired-state persistence.
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
///
/// # Failure semantics
///
/// A missing or unreadable source yields an empty map from `load`, not an
/// error: the agent starts with nothing watched rather than refusing to
/// start. `save` failures are surfaced so callers can log them, but the
/// registry treats them as non-fatal and keeps in-memory state
/// authoritative until the next successful save.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Load the persisted desired-state map.
    async fn load(&self) -> Result<HashMap<EntityId, LockRecord>, crate::Error>;

    /// Persist a full snapshot of the desired-state map.
    async fn save(&self, records: &HashMap<EntityId, LockRecord>) -> Result<(), crate::Error>;
}

/// Helper trait for constructing lock stores from configuration
#[async_trait]
pub trait LockStoreFactory: Send + Sync {
    /// Create a LockStore instance from configuration
    async fn create(
        &self,
        config: &crate::config::StoreConfig,
    ) -> Result<Box<dyn LockStore>, crate::Error>;
}
