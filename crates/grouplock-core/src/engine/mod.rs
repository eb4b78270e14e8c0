//! Core guard engine
//!
//! The GuardEngine is responsible for:
//! - Detecting drift between desired and observed attributes
//! - Queueing corrections per entity, serialized and FIFO
//! - Applying corrections via RemoteGateway under a global throttle
//! - Suspending runaway entities behind a cooldown circuit-breaker
//! - Persisting lock records after every state change
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   ChangeEvent / sweep   ┌───────────────┐
//! │ RemoteGateway │────────────────────────▶│ DriftDetector │
//! └───────────────┘                         └───────┬───────┘
//!         ▲                                         │ candidate
//!         │ mutations                               ▼
//! ┌───────┴───────┐    CompletionReport    ┌─────────────────┐
//! │   QueueSet    │───────────────────────▶│ CooldownBreaker │
//! │ (per entity,  │◀───────────────────────│ (gate/suspend)  │
//! │  throttled)   │        enqueue         └─────────────────┘
//! └───────────────┘
//! ```
//!
//! ## Event Flow
//!
//! 1. Drift observed (change notification or periodic sweep)
//! 2. Name drift is debounced; nickname drift is forwarded immediately
//! 3. Breaker gate: queue the correction, or coalesce it while suspended
//! 4. Entity runner executes the task under the global throttle
//! 5. Breaker consumes the completion report, counting toward the
//!    burst limit and persisting through the registry
//! 6. Engine events emitted throughout for monitoring/logging

pub mod breaker;
pub mod detector;
pub mod queue;
pub mod throttle;

pub use breaker::CooldownBreaker;
pub use detector::DriftDetector;
pub use queue::{CompletionReport, CorrectionTask, QueueSet, TaskOutcome};
pub use throttle::GlobalThrottle;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::config::GuardConfig;
use crate::error::{Error, Result};
use crate::registry::EntityRegistry;
use crate::traits::{LockStore, RemoteGateway};
use crate::types::{AttributeKind, EntityId, MemberId};

/// Events emitted by the GuardEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started
    Started { entities: usize },

    /// Drift observed on a watched attribute
    DriftDetected {
        entity: EntityId,
        attribute: AttributeKind,
    },

    /// Drift observed while the entity is suspended; coalesced into the
    /// pending-resync flag instead of queueing work
    DriftSuppressed { entity: EntityId },

    /// A correction passed the breaker gate and entered the entity queue
    CorrectionEnqueued {
        entity: EntityId,
        task: CorrectionTask,
    },

    /// A correction was applied on the remote platform
    CorrectionApplied {
        entity: EntityId,
        task: CorrectionTask,
    },

    /// A queued correction became a no-op before execution
    CorrectionSkipped { entity: EntityId },

    /// A correction failed on the remote platform
    CorrectionFailed { entity: EntityId, error: String },

    /// Burst limit reached; entity suspended
    CooldownEntered { entity: EntityId },

    /// Suspension lifted; `resync` is true when coalesced drift is
    /// being replayed as a full nickname resync
    CooldownLifted { entity: EntityId, resync: bool },

    /// A full nickname resync finished
    ResyncCompleted { entity: EntityId, applied: usize },

    /// Entity removed from the watch set (unlocked, or permanently
    /// inaccessible)
    EntityRemoved { entity: EntityId },

    /// All queue runners paused after a rate-limit response
    ThrottlePaused { secs: u64 },

    /// Engine stopped
    Stopped { reason: String },
}

/// Cloneable sender half of the engine event channel.
///
/// Events are best-effort: when the channel is full the event is dropped
/// with a warning rather than blocking the engine.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<EngineEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, event: EngineEvent) {
        if self.tx.try_send(event).is_err() {
            warn!("event channel full, dropping event; consider increasing event_channel_capacity");
        }
    }
}

/// How desired nicknames are chosen for an entity's members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NicknamePolicy {
    /// One nickname applied to every member
    Template(String),
    /// Explicit per-member nicknames; members without an entry are left
    /// alone
    PerMember(HashMap<MemberId, String>),
}

/// Control-surface commands accepted while the engine runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start enforcing a display name. `name: None` locks to whatever
    /// the entity is currently named on the remote platform.
    EnableNameLock {
        entity: EntityId,
        name: Option<String>,
    },
    DisableNameLock { entity: EntityId },

    /// Start enforcing nicknames under the given policy. Resets the
    /// entity's breaker state and queues an initial full resync.
    EnableNicknameLock {
        entity: EntityId,
        policy: NicknamePolicy,
    },
    DisableNicknameLock { entity: EntityId },

    /// Re-submit enforcement for every enabled lock on the entity
    /// (subject to the cooldown gate).
    ResyncNow { entity: EntityId },

    /// Stop watching one attribute, or the whole entity when `kind` is
    /// `None` (the record is removed and the removal persisted).
    Unlock {
        entity: EntityId,
        kind: Option<AttributeKind>,
    },
}

/// Cloneable handle for sending commands to a running engine.
#[derive(Clone)]
pub struct CommandHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl CommandHandle {
    pub fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| Error::EngineStopped("command channel closed".to_string()))
    }
}

/// Core guard engine
///
/// Orchestrates the drift detection → gate → queue → correction flow.
/// Runs continuously until shutdown.
///
/// ## Lifecycle
///
/// 1. Create with [`GuardEngine::new()`]
/// 2. Start with [`GuardEngine::run()`]
/// 3. Engine runs until a shutdown signal is received
///
/// ## Load resistance
///
/// - **Bounded event channel**: monitoring events are dropped, never
///   buffered without limit
/// - **Batched sweeps**: the name sweep touches at most
///   `sweep_batch_size` entities per tick
/// - **Global throttle**: at most `max_concurrent_mutations` remote
///   mutations in flight across all entities
pub struct GuardEngine {
    gateway: Arc<dyn RemoteGateway>,
    registry: Arc<EntityRegistry>,
    config: GuardConfig,
    events: EventSink,
    /// Taken by the run loop on startup.
    commands: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
}

impl GuardEngine {
    /// Create a new guard engine.
    ///
    /// Loads persisted lock records through the store, then returns the
    /// engine together with the event receiver and a command handle.
    pub async fn new(
        gateway: Arc<dyn RemoteGateway>,
        store: Box<dyn LockStore>,
        config: GuardConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>, CommandHandle)> {
        config.validate()?;

        let registry = Arc::new(EntityRegistry::load(store).await);
        let (event_tx, event_rx) = mpsc::channel(config.engine.event_channel_capacity);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let engine = Self {
            gateway,
            registry,
            config,
            events: EventSink::new(event_tx),
            commands: Mutex::new(Some(command_rx)),
        };

        Ok((engine, event_rx, CommandHandle { tx: command_tx }))
    }

    /// Shared handle to the entity registry (diagnostics and tests).
    pub fn registry(&self) -> Arc<EntityRegistry> {
        Arc::clone(&self.registry)
    }

    /// Run the engine until SIGINT.
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run the engine with a controlled shutdown signal.
    ///
    /// **TESTING ONLY**: contract tests require deterministic shutdown.
    /// Production code should use `run()`, which shuts down on OS
    /// signals instead of a programmatic channel.
    pub async fn run_with_shutdown(
        &self,
        shutdown_rx: Option<oneshot::Receiver<()>>,
    ) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }

    async fn run_internal(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        let cfg = &self.config.engine;

        let mut commands = self
            .commands
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::EngineStopped("engine is already running".to_string()))?;

        self.events.emit(EngineEvent::Started {
            entities: self.registry.len().await,
        });
        let entity_count = self.registry.len().await;
        info!(
            entities = entity_count,
            gateway = self.gateway.gateway_name(),
            "guard engine started"
        );

        let throttle = Arc::new(GlobalThrottle::new(cfg.max_concurrent_mutations));
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let queues = Arc::new(QueueSet::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.gateway),
            Arc::clone(&throttle),
            completion_tx,
            cfg.nickname_delay_min_ms,
            cfg.nickname_delay_max_ms,
        ));
        let breaker = Arc::new(CooldownBreaker::new(
            Arc::clone(&self.registry),
            Arc::clone(&queues),
            Arc::clone(&throttle),
            self.events.clone(),
            cfg.correction_burst_limit,
            cfg.cooldown(),
            cfg.rate_limit_backoff(),
            cfg.removal_failure_threshold,
        ));
        tokio::spawn(Arc::clone(&breaker).run(completion_rx));

        // Suspensions persisted by a previous run resume with a fresh
        // full-duration timer, since the original deadline is unknown.
        for id in self.registry.ids().await {
            if let Some(record) = self.registry.get(&id).await {
                if record.cooldown_active {
                    info!(entity = %id, "resuming persisted cooldown");
                    breaker.schedule_resume(&id, cfg.cooldown());
                }
            }
        }

        let detector = DriftDetector::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.gateway),
            Arc::clone(&breaker),
            self.events.clone(),
            cfg.name_debounce(),
            cfg.sweep_batch_size,
        );

        let mut changes = self.gateway.subscribe();

        let start = tokio::time::Instant::now();
        let mut name_tick =
            tokio::time::interval_at(start + cfg.name_check_interval(), cfg.name_check_interval());
        let mut reconcile_tick =
            tokio::time::interval_at(start + cfg.reconcile_interval(), cfg.reconcile_interval());
        let mut keepalive_tick =
            tokio::time::interval_at(start + cfg.keepalive_interval(), cfg.keepalive_interval());
        let mut backup_tick =
            tokio::time::interval_at(start + cfg.backup_interval(), cfg.backup_interval());

        let mut shutdown_rx = shutdown_rx;

        loop {
            tokio::select! {
                Some(event) = changes.next() => {
                    detector.handle_change(event).await;
                }

                Some(command) = commands.recv() => {
                    self.handle_command(command, &breaker).await;
                }

                _ = name_tick.tick() => {
                    detector.sweep_names().await;
                }

                _ = reconcile_tick.tick() => {
                    detector.reconcile_nicknames().await;
                }

                _ = keepalive_tick.tick() => {
                    self.keepalive().await;
                }

                _ = backup_tick.tick() => {
                    debug!("periodic state flush");
                    self.registry.flush().await;
                }

                _ = Self::wait_shutdown(&mut shutdown_rx) => {
                    info!("shutdown signal received");
                    self.events.emit(EngineEvent::Stopped {
                        reason: "shutdown signal".to_string(),
                    });
                    break;
                }
            }
        }

        // Flush state before exiting
        self.registry.flush().await;
        info!("state flushed, engine stopped");

        Ok(())
    }

    async fn wait_shutdown(rx: &mut Option<oneshot::Receiver<()>>) {
        match rx {
            Some(rx) => {
                let _ = rx.await;
            }
            None => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    async fn handle_command(&self, command: Command, breaker: &Arc<CooldownBreaker>) {
        debug!(?command, "handling command");
        match command {
            Command::EnableNameLock { entity, name } => {
                let desired = match name {
                    Some(name) => name,
                    // Lock to the current remote name.
                    None => match self.gateway.fetch_info(&entity).await {
                        Ok(info) => info.display_name,
                        Err(e) => {
                            warn!(entity = %entity, "cannot enable name lock, fetch failed: {}", e);
                            return;
                        }
                    },
                };
                info!(entity = %entity, name = %desired, "name lock enabled");
                self.registry
                    .mutate(&entity, |r| {
                        r.name_lock = true;
                        r.desired_name = Some(desired);
                        r.drift_since.remove(&AttributeKind::Name);
                    })
                    .await;
            }

            Command::DisableNameLock { entity } => {
                info!(entity = %entity, "name lock disabled");
                self.registry
                    .update(&entity, |r| {
                        r.name_lock = false;
                        r.drift_since.remove(&AttributeKind::Name);
                    })
                    .await;
            }

            Command::EnableNicknameLock { entity, policy } => {
                info!(entity = %entity, "nickname lock enabled");
                self.registry
                    .mutate(&entity, |r| {
                        r.nickname_lock = true;
                        match policy {
                            NicknamePolicy::Template(template) => {
                                r.nickname_template = Some(template);
                            }
                            NicknamePolicy::PerMember(map) => {
                                r.desired_nicknames = map;
                            }
                        }
                        // A fresh lock starts with a clean breaker slate.
                        r.correction_count = 0;
                        r.cooldown_active = false;
                        r.pending_resync = false;
                    })
                    .await;
                breaker
                    .submit(&entity, CorrectionTask::ResyncNicknames)
                    .await;
            }

            Command::DisableNicknameLock { entity } => {
                info!(entity = %entity, "nickname lock disabled");
                self.registry
                    .update(&entity, |r| r.nickname_lock = false)
                    .await;
            }

            Command::ResyncNow { entity } => {
                let Some(record) = self.registry.get(&entity).await else {
                    warn!(entity = %entity, "resync requested for unwatched entity");
                    return;
                };
                if record.name_lock {
                    breaker.submit(&entity, CorrectionTask::SetName).await;
                }
                if record.nickname_lock {
                    breaker
                        .submit(&entity, CorrectionTask::ResyncNicknames)
                        .await;
                }
            }

            Command::Unlock { entity, kind } => match kind {
                Some(AttributeKind::Name) => {
                    info!(entity = %entity, "name lock disabled");
                    self.registry
                        .update(&entity, |r| {
                            r.name_lock = false;
                            r.drift_since.remove(&AttributeKind::Name);
                        })
                        .await;
                }
                Some(AttributeKind::Nickname) => {
                    info!(entity = %entity, "nickname lock disabled");
                    self.registry
                        .update(&entity, |r| r.nickname_lock = false)
                        .await;
                }
                None => {
                    info!(entity = %entity, "entity unlocked, removing from watch set");
                    self.registry.remove(&entity).await;
                    self.events.emit(EngineEvent::EntityRemoved { entity });
                }
            },
        }
    }

    /// Signal presence to the remote platform for every watched entity,
    /// keeping the session warm. Failures are logged and ignored.
    async fn keepalive(&self) {
        for id in self.registry.ids().await {
            let Some(record) = self.registry.get(&id).await else {
                continue;
            };
            if !record.watches_anything() {
                continue;
            }
            if let Err(e) = self.gateway.keepalive(&id).await {
                debug!(entity = %id, "keepalive failed: {}", e);
            }
        }
    }
}
