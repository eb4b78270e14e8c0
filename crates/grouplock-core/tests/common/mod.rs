//! Test doubles and common utilities for architecture contract tests
//!
//! This module provides a scriptable gateway double that records every
//! remote call, tracks in-flight concurrency, and lets tests inject
//! change events and failures on demand.

// Not every contract test binary uses every helper here.
#![allow(dead_code)]

use grouplock_core::config::{EngineConfig, GatewayConfig, GuardConfig, StoreConfig};
use grouplock_core::traits::{
    ChangeEvent, EntityInfo, GatewayError, MemberInfo, RemoteGateway,
};
use grouplock_core::{EntityId, MemberId};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::Stream;

/// A scriptable RemoteGateway that tracks calls
///
/// Mutations are applied back to the scripted entity state, so sweeps
/// observe a closed loop: a rename the gateway accepted is what the next
/// `fetch_info` returns.
pub struct MockGateway {
    /// Scripted remote state per entity
    info: Mutex<HashMap<EntityId, EntityInfo>>,
    /// Injected fetch failures per entity
    fetch_errors: Mutex<HashMap<EntityId, GatewayError>>,
    /// Injected mutation failure with a remaining-use count
    mutation_error: Mutex<Option<(GatewayError, usize)>>,
    /// Recorded rename calls
    renames: Mutex<Vec<(EntityId, String)>>,
    /// Recorded nickname calls
    nicknames: Mutex<Vec<(EntityId, MemberId, String)>>,
    /// Call counter for fetch_info()
    fetch_count: AtomicUsize,
    /// Call counter for keepalive()
    keepalive_count: AtomicUsize,
    /// Mutations currently in flight (all entities)
    active: AtomicUsize,
    /// High-water mark of `active`
    max_active: AtomicUsize,
    /// Mutations currently in flight per entity, with high-water marks
    entity_active: Mutex<HashMap<EntityId, usize>>,
    max_entity_active: Mutex<HashMap<EntityId, usize>>,
    /// Simulated duration of each mutation call
    mutation_latency: Mutex<Duration>,
    /// Receiver handed to the engine's subscribe() (only called once)
    events: Mutex<Option<mpsc::UnboundedReceiver<ChangeEvent>>>,
}

impl MockGateway {
    /// Create a new mock gateway and a sender for injecting change events
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<ChangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let gateway = Arc::new(Self {
            info: Mutex::new(HashMap::new()),
            fetch_errors: Mutex::new(HashMap::new()),
            mutation_error: Mutex::new(None),
            renames: Mutex::new(Vec::new()),
            nicknames: Mutex::new(Vec::new()),
            fetch_count: AtomicUsize::new(0),
            keepalive_count: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            entity_active: Mutex::new(HashMap::new()),
            max_entity_active: Mutex::new(HashMap::new()),
            mutation_latency: Mutex::new(Duration::ZERO),
            events: Mutex::new(Some(rx)),
        });

        (gateway, tx)
    }

    /// Script an entity's remote state
    pub fn set_info(
        &self,
        entity: &EntityId,
        name: &str,
        members: Vec<(&str, Option<&str>)>,
    ) {
        let info = EntityInfo {
            display_name: name.to_string(),
            members: members
                .into_iter()
                .map(|(id, nickname)| MemberInfo {
                    id: MemberId::new(id),
                    nickname: nickname.map(str::to_string),
                })
                .collect(),
        };
        self.info.lock().unwrap().insert(entity.clone(), info);
    }

    /// Make every fetch_info() for this entity fail with the given error
    pub fn set_fetch_error(&self, entity: &EntityId, error: GatewayError) {
        self.fetch_errors
            .lock()
            .unwrap()
            .insert(entity.clone(), error);
    }

    /// Make the next `count` mutation calls fail with the given error
    pub fn fail_mutations(&self, error: GatewayError, count: usize) {
        *self.mutation_error.lock().unwrap() = Some((error, count));
    }

    /// Simulate each mutation call taking this long
    pub fn set_mutation_latency(&self, latency: Duration) {
        *self.mutation_latency.lock().unwrap() = latency;
    }

    pub fn rename_count(&self) -> usize {
        self.renames.lock().unwrap().len()
    }

    pub fn renames(&self) -> Vec<(EntityId, String)> {
        self.renames.lock().unwrap().clone()
    }

    pub fn nickname_count(&self) -> usize {
        self.nicknames.lock().unwrap().len()
    }

    pub fn nicknames(&self) -> Vec<(EntityId, MemberId, String)> {
        self.nicknames.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn keepalive_count(&self) -> usize {
        self.keepalive_count.load(Ordering::SeqCst)
    }

    /// Highest number of mutations ever in flight at once
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Highest number of mutations ever in flight at once for one entity
    pub fn max_active_for(&self, entity: &EntityId) -> usize {
        self.max_entity_active
            .lock()
            .unwrap()
            .get(entity)
            .copied()
            .unwrap_or(0)
    }

    fn take_injected_failure(&self) -> Option<GatewayError> {
        let mut slot = self.mutation_error.lock().unwrap();
        match slot.take() {
            Some((error, remaining)) if remaining > 1 => {
                *slot = Some((error.clone(), remaining - 1));
                Some(error)
            }
            Some((error, _)) => Some(error),
            None => None,
        }
    }

    /// Track one in-flight mutation, simulating its latency
    async fn track_mutation(&self, entity: &EntityId) -> Result<(), GatewayError> {
        let n = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(n, Ordering::SeqCst);
        {
            let mut per_entity = self.entity_active.lock().unwrap();
            let count = per_entity.entry(entity.clone()).or_insert(0);
            *count += 1;
            let mut high = self.max_entity_active.lock().unwrap();
            let mark = high.entry(entity.clone()).or_insert(0);
            *mark = (*mark).max(*count);
        }

        let latency = *self.mutation_latency.lock().unwrap();
        if latency > Duration::ZERO {
            tokio::time::sleep(latency).await;
        }

        {
            let mut per_entity = self.entity_active.lock().unwrap();
            if let Some(count) = per_entity.get_mut(entity) {
                *count -= 1;
            }
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        match self.take_injected_failure() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl RemoteGateway for MockGateway {
    async fn fetch_info(&self, entity: &EntityId) -> Result<EntityInfo, GatewayError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.fetch_errors.lock().unwrap().get(entity) {
            return Err(error.clone());
        }

        self.info
            .lock()
            .unwrap()
            .get(entity)
            .cloned()
            .ok_or(GatewayError::NotFound)
    }

    async fn rename_entity(&self, entity: &EntityId, name: &str) -> Result<(), GatewayError> {
        self.track_mutation(entity).await?;

        self.renames
            .lock()
            .unwrap()
            .push((entity.clone(), name.to_string()));

        // Close the loop: the next fetch observes the accepted name.
        if let Some(info) = self.info.lock().unwrap().get_mut(entity) {
            info.display_name = name.to_string();
        }
        Ok(())
    }

    async fn set_member_nickname(
        &self,
        entity: &EntityId,
        member: &MemberId,
        nickname: &str,
    ) -> Result<(), GatewayError> {
        self.track_mutation(entity).await?;

        self.nicknames
            .lock()
            .unwrap()
            .push((entity.clone(), member.clone(), nickname.to_string()));

        if let Some(info) = self.info.lock().unwrap().get_mut(entity) {
            if let Some(m) = info.members.iter_mut().find(|m| &m.id == member) {
                m.nickname = Some(nickname.to_string());
            }
        }
        Ok(())
    }

    async fn keepalive(&self, _entity: &EntityId) -> Result<(), GatewayError> {
        self.keepalive_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> Pin<Box<dyn Stream<Item = ChangeEvent> + Send + 'static>> {
        // Take the receiver (only called once)
        let rx = self
            .events
            .lock()
            .unwrap()
            .take()
            .expect("subscribe() can only be called once");

        Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx))
    }

    fn gateway_name(&self) -> &'static str {
        "mock"
    }
}

/// Helper to create a GuardConfig tuned for paused-time tests
///
/// Jitter is zeroed so queue pacing is deterministic; everything else
/// keeps the production shape.
pub fn test_config() -> GuardConfig {
    GuardConfig {
        gateway: GatewayConfig::Custom {
            factory: "mock".to_string(),
            config: serde_json::json!({}),
        },
        store: StoreConfig::Memory,
        engine: EngineConfig {
            name_check_interval_secs: 15,
            name_debounce_secs: 45,
            nickname_delay_min_ms: 0,
            nickname_delay_max_ms: 0,
            correction_burst_limit: 60,
            cooldown_secs: 180,
            max_concurrent_mutations: 3,
            reconcile_interval_secs: 3600,
            keepalive_interval_secs: 3600,
            backup_interval_secs: 3600,
            sweep_batch_size: 20,
            rate_limit_backoff_secs: 90,
            removal_failure_threshold: 3,
            event_channel_capacity: 256,
        },
    }
}

/// Build a memory store pre-seeded with lock records
pub async fn seed_store(
    records: Vec<(&str, grouplock_core::LockRecord)>,
) -> grouplock_core::MemoryLockStore {
    use grouplock_core::traits::LockStore;

    let store = grouplock_core::MemoryLockStore::new();
    let map: HashMap<EntityId, grouplock_core::LockRecord> = records
        .into_iter()
        .map(|(id, record)| (EntityId::new(id), record))
        .collect();
    store.save(&map).await.expect("seed save succeeds");
    store
}

/// Drain every engine event currently buffered on the receiver
pub fn drain_events(
    rx: &mut mpsc::Receiver<grouplock_core::EngineEvent>,
) -> Vec<grouplock_core::EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
