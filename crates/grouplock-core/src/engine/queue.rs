//! Per-entity correction queues
//!
//! Each watched entity owns one FIFO queue of corrective actions and one
//! runner task, spawned lazily on first enqueue. The runner guarantees at
//! most one in-flight mutation per entity; the [`GlobalThrottle`] bounds
//! mutations across all entities. Between actions the runner sleeps a
//! uniformly random jitter interval so the platform never sees a
//! mechanical, instantly-repeating mutation pattern.
//!
//! Actions read the entity's *current* desired state at execution time,
//! not a value captured at enqueue: a lock disabled after enqueue makes
//! the queued action a no-op.

use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::engine::throttle::GlobalThrottle;
use crate::registry::EntityRegistry;
use crate::traits::{GatewayError, RemoteGateway};
use crate::types::{EntityId, MemberId};

/// A corrective action queued for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrectionTask {
    /// Re-apply the desired display name
    SetName,
    /// Re-apply one member's desired nickname
    SetNickname { member: MemberId },
    /// Re-apply desired nicknames to every current member
    ResyncNicknames,
}

/// What happened when a task executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The remote mutation succeeded
    Applied,
    /// The task became a no-op (lock disabled, entity no longer watched)
    Skipped { reason: &'static str },
    /// A resync pass finished, applying this many nickname corrections
    Resynced { applied: usize },
    /// The remote call failed
    Failed { error: GatewayError },
}

/// Report sent to the breaker after every executed task.
#[derive(Debug, Clone)]
pub struct CompletionReport {
    pub entity: EntityId,
    pub task: CorrectionTask,
    pub outcome: TaskOutcome,
}

/// The set of per-entity queues and their runner tasks.
pub struct QueueSet {
    queues: Mutex<HashMap<EntityId, mpsc::UnboundedSender<CorrectionTask>>>,
    registry: Arc<EntityRegistry>,
    gateway: Arc<dyn RemoteGateway>,
    throttle: Arc<GlobalThrottle>,
    completions: mpsc::UnboundedSender<CompletionReport>,
    delay_min_ms: u64,
    delay_max_ms: u64,
}

impl QueueSet {
    pub fn new(
        registry: Arc<EntityRegistry>,
        gateway: Arc<dyn RemoteGateway>,
        throttle: Arc<GlobalThrottle>,
        completions: mpsc::UnboundedSender<CompletionReport>,
        delay_min_ms: u64,
        delay_max_ms: u64,
    ) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            registry,
            gateway,
            throttle,
            completions,
            delay_min_ms,
            delay_max_ms,
        }
    }

    /// Append a task to the entity's FIFO queue, spawning its runner if
    /// this is the entity's first task.
    pub async fn enqueue(self: &Arc<Self>, entity: &EntityId, task: CorrectionTask) {
        let mut queues = self.queues.lock().await;

        if let Some(tx) = queues.get(entity) {
            if tx.send(task.clone()).is_ok() {
                return;
            }
            // Runner exited (stale sender); fall through and respawn.
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(task);
        queues.insert(entity.clone(), tx);

        let this = Arc::clone(self);
        let id = entity.clone();
        tokio::spawn(async move {
            this.run_entity(id, rx).await;
        });
    }

    /// Runner loop for one entity: strictly in enqueue order, never
    /// overlapping, jittered spacing between actions.
    async fn run_entity(&self, entity: EntityId, mut rx: mpsc::UnboundedReceiver<CorrectionTask>) {
        debug!(entity = %entity, "queue runner started");

        while let Some(task) = rx.recv().await {
            let outcome = self.execute(&entity, &task).await;

            if let TaskOutcome::Failed { error } = &outcome {
                warn!(entity = %entity, task = ?task, "corrective action failed: {}", error);
            }

            // The breaker side may already be gone during shutdown.
            let _ = self.completions.send(CompletionReport {
                entity: entity.clone(),
                task,
                outcome,
            });

            tokio::time::sleep(self.jitter()).await;
        }

        debug!(entity = %entity, "queue runner stopped");
    }

    /// Execute one task against the gateway. Every failure is contained
    /// here: it becomes a report, never a runner panic or exit.
    async fn execute(&self, entity: &EntityId, task: &CorrectionTask) -> TaskOutcome {
        let Some(record) = self.registry.get(entity).await else {
            return TaskOutcome::Skipped {
                reason: "entity no longer watched",
            };
        };

        match task {
            CorrectionTask::SetName => {
                if !record.name_lock {
                    return TaskOutcome::Skipped {
                        reason: "name lock disabled",
                    };
                }
                let Some(desired) = record.desired_name else {
                    return TaskOutcome::Skipped {
                        reason: "no desired name",
                    };
                };

                let _slot = self.throttle.acquire().await;
                match self.gateway.rename_entity(entity, &desired).await {
                    Ok(()) => {
                        debug!(entity = %entity, name = %desired, "reverted display name");
                        TaskOutcome::Applied
                    }
                    Err(error) => TaskOutcome::Failed { error },
                }
            }

            CorrectionTask::SetNickname { member } => {
                if !record.nickname_lock {
                    return TaskOutcome::Skipped {
                        reason: "nickname lock disabled",
                    };
                }
                let Some(desired) = record.desired_nickname(member).map(str::to_owned) else {
                    return TaskOutcome::Skipped {
                        reason: "no desired nickname for member",
                    };
                };

                let _slot = self.throttle.acquire().await;
                match self
                    .gateway
                    .set_member_nickname(entity, member, &desired)
                    .await
                {
                    Ok(()) => {
                        debug!(entity = %entity, member = %member, "reverted nickname");
                        TaskOutcome::Applied
                    }
                    Err(error) => TaskOutcome::Failed { error },
                }
            }

            CorrectionTask::ResyncNicknames => self.resync_nicknames(entity).await,
        }
    }

    /// Re-apply desired nicknames to every current member whose observed
    /// value differs, pacing each mutation through the throttle. Desired
    /// state is re-read per member so a lock disabled mid-resync stops the
    /// pass.
    async fn resync_nicknames(&self, entity: &EntityId) -> TaskOutcome {
        let info = match self.gateway.fetch_info(entity).await {
            Ok(info) => info,
            Err(error) => return TaskOutcome::Failed { error },
        };

        let mut applied = 0usize;
        for member_info in &info.members {
            let Some(record) = self.registry.get(entity).await else {
                break;
            };
            if !record.nickname_lock {
                return TaskOutcome::Skipped {
                    reason: "nickname lock disabled",
                };
            }
            let Some(desired) = record.desired_nickname(&member_info.id).map(str::to_owned)
            else {
                continue;
            };
            if member_info.nickname.as_deref() == Some(desired.as_str()) {
                continue;
            }

            let result = {
                let _slot = self.throttle.acquire().await;
                self.gateway
                    .set_member_nickname(entity, &member_info.id, &desired)
                    .await
            };

            match result {
                Ok(()) => {
                    applied += 1;
                    debug!(entity = %entity, member = %member_info.id, "resync applied nickname");
                }
                Err(error) if matches!(error, GatewayError::RateLimited { .. }) || error.is_permanent() => {
                    // Stop the pass: the breaker reacts to the error kind.
                    return TaskOutcome::Failed { error };
                }
                Err(error) => {
                    warn!(entity = %entity, member = %member_info.id,
                          "resync nickname failed, continuing: {}", error);
                }
            }

            tokio::time::sleep(self.jitter()).await;
        }

        TaskOutcome::Resynced { applied }
    }

    fn jitter(&self) -> Duration {
        let ms = if self.delay_min_ms >= self.delay_max_ms {
            self.delay_min_ms
        } else {
            rand::thread_rng().gen_range(self.delay_min_ms..=self.delay_max_ms)
        };
        Duration::from_millis(ms)
    }
}
