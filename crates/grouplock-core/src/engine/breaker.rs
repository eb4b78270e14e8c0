//! Cooldown circuit-breaker
//!
//! Per-entity `Normal → Suspended → Normal` state machine layered over the
//! task queues. A burst of consecutive successful corrections trips the
//! entity into suspension; drift observed while suspended is coalesced
//! into the single `pending_resync` flag instead of queueing per-event
//! work, and resumption replays exactly one full nickname resync.
//!
//! The breaker is also the single consumer of completion reports, so the
//! correction counters, rate-limit backoff and inaccessibility removal all
//! funnel through one serialized path.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::queue::{CompletionReport, CorrectionTask, QueueSet, TaskOutcome};
use crate::engine::throttle::GlobalThrottle;
use crate::engine::{EngineEvent, EventSink};
use crate::registry::EntityRegistry;
use crate::traits::GatewayError;
use crate::types::EntityId;

pub struct CooldownBreaker {
    registry: Arc<EntityRegistry>,
    queues: Arc<QueueSet>,
    throttle: Arc<GlobalThrottle>,
    events: EventSink,
    burst_limit: u32,
    cooldown: Duration,
    rate_limit_backoff: Duration,
    removal_threshold: u32,
}

impl CooldownBreaker {
    pub fn new(
        registry: Arc<EntityRegistry>,
        queues: Arc<QueueSet>,
        throttle: Arc<GlobalThrottle>,
        events: EventSink,
        burst_limit: u32,
        cooldown: Duration,
        rate_limit_backoff: Duration,
        removal_threshold: u32,
    ) -> Self {
        Self {
            registry,
            queues,
            throttle,
            events,
            burst_limit,
            cooldown,
            rate_limit_backoff,
            removal_threshold,
        }
    }

    /// Gate a candidate correction: forward it to the entity's queue in
    /// `Normal` state, or coalesce it into the pending-resync flag while
    /// suspended. Repeated drift during suspension only keeps the single
    /// flag set, never queues repeated work.
    pub async fn submit(self: &Arc<Self>, entity: &EntityId, task: CorrectionTask) {
        let Some(record) = self.registry.get(entity).await else {
            debug!(entity = %entity, "dropping correction for unwatched entity");
            return;
        };

        if record.cooldown_active {
            if !record.pending_resync {
                self.registry
                    .update(entity, |r| r.pending_resync = true)
                    .await;
            }
            self.events.emit(EngineEvent::DriftSuppressed {
                entity: entity.clone(),
            });
            debug!(entity = %entity, "drift coalesced during cooldown");
            return;
        }

        self.events.emit(EngineEvent::CorrectionEnqueued {
            entity: entity.clone(),
            task: task.clone(),
        });
        self.queues.enqueue(entity, task).await;
    }

    /// Consume completion reports until every runner has stopped.
    pub async fn run(self: Arc<Self>, mut completions: mpsc::UnboundedReceiver<CompletionReport>) {
        while let Some(report) = completions.recv().await {
            self.handle(report).await;
        }
        debug!("breaker loop stopped");
    }

    async fn handle(self: &Arc<Self>, report: CompletionReport) {
        let CompletionReport {
            entity,
            task,
            outcome,
        } = report;

        match outcome {
            TaskOutcome::Applied => {
                self.events.emit(EngineEvent::CorrectionApplied {
                    entity: entity.clone(),
                    task,
                });
                self.note_success(&entity).await;
            }
            TaskOutcome::Skipped { reason } => {
                debug!(entity = %entity, reason, "corrective action skipped");
                self.events.emit(EngineEvent::CorrectionSkipped {
                    entity: entity.clone(),
                });
            }
            TaskOutcome::Resynced { applied } => {
                info!(entity = %entity, applied, "nickname resync completed");
                self.events.emit(EngineEvent::ResyncCompleted {
                    entity: entity.clone(),
                    applied,
                });
            }
            TaskOutcome::Failed { error } => {
                self.events.emit(EngineEvent::CorrectionFailed {
                    entity: entity.clone(),
                    error: error.to_string(),
                });
                self.handle_failure(&entity, error).await;
            }
        }
    }

    /// Count a successful correction, tripping the cooldown when the
    /// burst limit is reached.
    async fn note_success(self: &Arc<Self>, entity: &EntityId) {
        let mut tripped = false;
        let burst_limit = self.burst_limit;
        self.registry
            .update(entity, |r| {
                r.correction_count += 1;
                r.fetch_failures = 0;
                if !r.cooldown_active && r.correction_count >= burst_limit {
                    r.cooldown_active = true;
                    tripped = true;
                }
            })
            .await;

        if tripped {
            warn!(entity = %entity, limit = burst_limit, cooldown = ?self.cooldown,
                  "correction burst limit reached, suspending entity");
            self.events.emit(EngineEvent::CooldownEntered {
                entity: entity.clone(),
            });
            self.schedule_resume(entity, self.cooldown);
        }
    }

    /// Schedule the resumption timer for a suspended entity.
    pub fn schedule_resume(self: &Arc<Self>, entity: &EntityId, delay: Duration) {
        let this = Arc::clone(self);
        let entity = entity.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.resume(&entity).await;
        });
    }

    /// Lift a cooldown: reset the counter, and if drift was coalesced
    /// while suspended, enqueue exactly one full nickname resync.
    async fn resume(self: &Arc<Self>, entity: &EntityId) {
        let mut resync = false;
        let updated = self
            .registry
            .update(entity, |r| {
                r.cooldown_active = false;
                r.correction_count = 0;
                resync = std::mem::take(&mut r.pending_resync);
            })
            .await;

        if updated.is_none() {
            // Removed while suspended; nothing to resume.
            return;
        }

        info!(entity = %entity, resync, "cooldown lifted");
        self.events.emit(EngineEvent::CooldownLifted {
            entity: entity.clone(),
            resync,
        });

        if resync {
            self.events.emit(EngineEvent::CorrectionEnqueued {
                entity: entity.clone(),
                task: CorrectionTask::ResyncNicknames,
            });
            self.queues
                .enqueue(entity, CorrectionTask::ResyncNicknames)
                .await;
        }
    }

    async fn handle_failure(self: &Arc<Self>, entity: &EntityId, error: GatewayError) {
        match error {
            GatewayError::RateLimited { retry_after } => {
                let backoff = retry_after.unwrap_or(self.rate_limit_backoff);
                warn!(entity = %entity, ?backoff, "rate limited, pausing all queue runners");
                self.throttle.pause_for(backoff);
                self.events.emit(EngineEvent::ThrottlePaused {
                    secs: backoff.as_secs(),
                });
            }
            GatewayError::NotFound | GatewayError::Forbidden => {
                self.note_inaccessible(entity).await;
            }
            GatewayError::Transient(_) | GatewayError::Malformed(_) => {
                // Already logged at the task boundary; the drift will be
                // re-detected on a later cycle.
            }
        }
    }

    /// Count a permanent fetch/mutation failure; after the configured
    /// number of consecutive failures the entity is removed from the
    /// watch set and the removal persisted.
    pub async fn note_inaccessible(self: &Arc<Self>, entity: &EntityId) {
        let threshold = self.removal_threshold;
        let Some(record) = self
            .registry
            .update(entity, |r| r.fetch_failures += 1)
            .await
        else {
            return;
        };

        if record.fetch_failures >= threshold {
            warn!(entity = %entity, failures = record.fetch_failures,
                  "entity permanently inaccessible, removing from watch set");
            self.registry.remove(entity).await;
            self.events.emit(EngineEvent::EntityRemoved {
                entity: entity.clone(),
            });
        }
    }

    /// Reset the consecutive-failure counter after a successful fetch.
    pub async fn note_reachable(&self, entity: &EntityId) {
        if let Some(record) = self.registry.get(entity).await {
            if record.fetch_failures != 0 {
                self.registry.update(entity, |r| r.fetch_failures = 0).await;
            }
        }
    }
}
