//! Architectural Contract Test: Stale-Correction Cancellation
//!
//! Constraint: every queued correction re-reads the live lock state at
//! execution time. Disabling a lock while corrections are queued turns
//! the not-yet-executed ones into no-ops; it never cancels a mutation
//! already in flight.
//!
//! If this test fails, someone has made correction tasks carry a stale
//! snapshot of the lock state instead of re-reading it.

mod common;

use common::*;
use grouplock_core::traits::ChangeEvent;
use grouplock_core::{Command, EngineEvent, EntityId, GuardEngine, LockRecord, MemberId};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn disabling_lock_voids_queued_but_not_inflight_corrections() {
    let entity = EntityId::new("group-1");
    let (gateway, event_tx) = MockGateway::new();
    gateway.set_info(
        &entity,
        "Team Chat",
        vec![("u1", Some("bad")), ("u2", Some("bad"))],
    );
    // Long enough that the second correction is still queued behind the
    // first when the lock is disabled.
    gateway.set_mutation_latency(Duration::from_secs(5));

    let record = LockRecord {
        nickname_lock: true,
        desired_nicknames: [
            (MemberId::new("u1"), "alpha".to_string()),
            (MemberId::new("u2"), "bravo".to_string()),
        ]
        .into_iter()
        .collect(),
        ..Default::default()
    };
    let store = seed_store(vec![("group-1", record)]).await;

    let (engine, mut events, commands) =
        GuardEngine::new(gateway.clone(), Box::new(store), test_config())
            .await
            .expect("engine construction succeeds");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let engine_handle =
        tokio::spawn(async move { engine.run_with_shutdown(Some(shutdown_rx)).await });

    tokio::time::sleep(Duration::from_millis(10)).await;

    // Two drift notifications; the first correction starts immediately
    // and blocks on the slow mutation, the second waits in the queue.
    for member in ["u1", "u2"] {
        event_tx
            .send(ChangeEvent::nickname_changed(
                entity.clone(),
                MemberId::new(member),
                Some("bad".to_string()),
            ))
            .expect("event send succeeds");
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Lock disabled mid-flight
    commands
        .send(Command::DisableNicknameLock {
            entity: entity.clone(),
        })
        .expect("command send succeeds");

    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(
        gateway.nickname_count(),
        1,
        "the already-in-flight correction should land, the queued one should not"
    );
    assert_eq!(
        gateway.nicknames()[0],
        (entity.clone(), MemberId::new("u1"), "alpha".to_string())
    );

    let seen = drain_events(&mut events);
    assert!(
        seen.iter()
            .any(|e| matches!(e, EngineEvent::CorrectionSkipped { entity: id } if *id == entity)),
        "the voided correction was not reported as skipped: {:?}",
        seen
    );

    shutdown_tx.send(()).unwrap();
    engine_handle.await.unwrap().unwrap();
}
