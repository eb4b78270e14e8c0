//! Drift detection
//!
//! Two detection paths feed the breaker gate:
//!
//! - a periodic name sweep, bounded to a fixed batch per tick, with a
//!   per-entity debounce timer so a rename that is itself mid-transition
//!   (or reverted by another actor within the grace window) never triggers
//!   a correction, and
//! - event-driven nickname enforcement from the gateway's change stream,
//!   backed by a slower periodic reconciliation sweep that re-applies
//!   desired nicknames to any member whose value drifted unnoticed.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::breaker::CooldownBreaker;
use crate::engine::queue::CorrectionTask;
use crate::engine::{EngineEvent, EventSink};
use crate::registry::{EntityRegistry, LockRecord};
use crate::traits::{ChangeEvent, ChangeKind, RemoteGateway};
use crate::types::{AttributeKind, EntityId};

pub struct DriftDetector {
    registry: Arc<EntityRegistry>,
    gateway: Arc<dyn RemoteGateway>,
    breaker: Arc<CooldownBreaker>,
    events: EventSink,
    debounce: Duration,
    batch_size: usize,
}

impl DriftDetector {
    pub fn new(
        registry: Arc<EntityRegistry>,
        gateway: Arc<dyn RemoteGateway>,
        breaker: Arc<CooldownBreaker>,
        events: EventSink,
        debounce: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            registry,
            gateway,
            breaker,
            events,
            debounce,
            batch_size,
        }
    }

    /// One tick of the name-drift sweep, bounded to `batch_size` entities
    /// so tick latency stays bounded regardless of watch-set size.
    pub async fn sweep_names(&self) {
        let ids = self.registry.ids().await;
        let mut checked = 0usize;

        for id in ids {
            if checked >= self.batch_size {
                break;
            }
            let Some(record) = self.registry.get(&id).await else {
                continue;
            };
            if !record.name_lock {
                continue;
            }
            checked += 1;

            match self.gateway.fetch_info(&id).await {
                Ok(info) => {
                    self.breaker.note_reachable(&id).await;
                    self.check_name(&id, &record, &info.display_name).await;
                }
                Err(e) if e.is_permanent() => {
                    warn!(entity = %id, "name sweep fetch failed permanently: {}", e);
                    self.breaker.note_inaccessible(&id).await;
                }
                Err(e) => {
                    warn!(entity = %id, "name sweep fetch failed: {}", e);
                }
            }
        }
    }

    /// Compare an observed display name against the desired one and drive
    /// the debounce timer. Matching values clear the timer the instant
    /// they are seen; a drift that outlives the debounce delay consumes
    /// the timer and submits one correction.
    async fn check_name(&self, id: &EntityId, record: &LockRecord, observed: &str) {
        let Some(desired) = record.desired_name.as_deref() else {
            return;
        };

        if observed == desired {
            if record.drift_since.contains_key(&AttributeKind::Name) {
                debug!(entity = %id, "name drift resolved remotely, clearing timer");
                self.registry
                    .update(id, |r| {
                        r.drift_since.remove(&AttributeKind::Name);
                    })
                    .await;
            }
            return;
        }

        match record.drift_since.get(&AttributeKind::Name) {
            None => {
                info!(entity = %id, observed, desired,
                      "name drift detected, reverting after {:?}", self.debounce);
                self.registry
                    .update(id, |r| {
                        r.drift_since.insert(AttributeKind::Name, Instant::now());
                    })
                    .await;
                self.events.emit(EngineEvent::DriftDetected {
                    entity: id.clone(),
                    attribute: AttributeKind::Name,
                });
            }
            Some(first_observed) if first_observed.elapsed() >= self.debounce => {
                self.registry
                    .update(id, |r| {
                        r.drift_since.remove(&AttributeKind::Name);
                    })
                    .await;
                self.breaker.submit(id, CorrectionTask::SetName).await;
            }
            Some(_) => {
                // Still inside the grace window.
            }
        }
    }

    /// Periodic nickname reconciliation: fetch a fresh snapshot per
    /// nickname-locked entity and submit a correction for every member
    /// whose observed value differs from the desired one.
    pub async fn reconcile_nicknames(&self) {
        for id in self.registry.ids().await {
            let Some(record) = self.registry.get(&id).await else {
                continue;
            };
            if !record.nickname_lock {
                continue;
            }

            match self.gateway.fetch_info(&id).await {
                Ok(info) => {
                    self.breaker.note_reachable(&id).await;
                    for member in &info.members {
                        let Some(desired) = record.desired_nickname(&member.id) else {
                            continue;
                        };
                        if member.nickname.as_deref() != Some(desired) {
                            self.events.emit(EngineEvent::DriftDetected {
                                entity: id.clone(),
                                attribute: AttributeKind::Nickname,
                            });
                            self.breaker
                                .submit(
                                    &id,
                                    CorrectionTask::SetNickname {
                                        member: member.id.clone(),
                                    },
                                )
                                .await;
                        }
                    }
                }
                Err(e) if e.is_permanent() => {
                    warn!(entity = %id, "reconcile fetch failed permanently: {}", e);
                    self.breaker.note_inaccessible(&id).await;
                }
                Err(e) => {
                    warn!(entity = %id, "reconcile fetch failed: {}", e);
                }
            }
        }
    }

    /// React to one asynchronous change notification from the gateway.
    pub async fn handle_change(&self, event: ChangeEvent) {
        let Some(record) = self.registry.get(&event.entity).await else {
            return;
        };

        match event.kind {
            ChangeKind::NameChanged => {
                if !record.name_lock {
                    return;
                }
                // The notification starts (or advances) the same debounce
                // path the sweep uses; a missing value is caught by the
                // next sweep instead.
                if let Some(observed) = event.new_value.as_deref() {
                    self.check_name(&event.entity, &record, observed).await;
                }
            }

            ChangeKind::NicknameChanged => {
                if !record.nickname_lock {
                    return;
                }
                let Some(member) = event.member else {
                    return;
                };
                let Some(desired) = record.desired_nickname(&member) else {
                    return;
                };
                if event.new_value.as_deref() != Some(desired) {
                    self.events.emit(EngineEvent::DriftDetected {
                        entity: event.entity.clone(),
                        attribute: AttributeKind::Nickname,
                    });
                    self.breaker
                        .submit(&event.entity, CorrectionTask::SetNickname { member })
                        .await;
                }
            }

            ChangeKind::MemberJoined => {
                if !record.nickname_lock {
                    return;
                }
                let Some(member) = event.member else {
                    return;
                };
                if record.desired_nickname(&member).is_some() {
                    debug!(entity = %event.entity, member = %member,
                           "member joined, applying desired nickname");
                    self.breaker
                        .submit(&event.entity, CorrectionTask::SetNickname { member })
                        .await;
                }
            }
        }
    }
}
