//! Architectural Contract Test: Correction Serialization
//!
//! Constraints verified:
//! - Corrections for ONE entity never overlap and execute in FIFO order
//! - Corrections across ALL entities never exceed the global
//!   concurrency cap
//!
//! If this test fails, someone has let queue runners overlap within an
//! entity, reordered queued work, or bypassed the global throttle.

mod common;

use common::*;
use grouplock_core::traits::ChangeEvent;
use grouplock_core::{EntityId, GuardEngine, LockRecord, MemberId};
use std::time::Duration;

fn nickname_locked(members: Vec<(&str, &str)>) -> LockRecord {
    LockRecord {
        nickname_lock: true,
        desired_nicknames: members
            .into_iter()
            .map(|(id, nick)| (MemberId::new(id), nick.to_string()))
            .collect(),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn per_entity_corrections_are_serialized_and_fifo() {
    let entity = EntityId::new("group-1");
    let (gateway, event_tx) = MockGateway::new();
    gateway.set_info(
        &entity,
        "Team Chat",
        vec![
            ("u1", Some("x")),
            ("u2", Some("x")),
            ("u3", Some("x")),
            ("u4", Some("x")),
            ("u5", Some("x")),
        ],
    );
    gateway.set_mutation_latency(Duration::from_millis(200));

    let record = nickname_locked(vec![
        ("u1", "alpha"),
        ("u2", "bravo"),
        ("u3", "charlie"),
        ("u4", "delta"),
        ("u5", "echo"),
    ]);
    let store = seed_store(vec![("group-1", record)]).await;

    let (engine, _events, _commands) =
        GuardEngine::new(gateway.clone(), Box::new(store), test_config())
            .await
            .expect("engine construction succeeds");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let engine_handle =
        tokio::spawn(async move { engine.run_with_shutdown(Some(shutdown_rx)).await });

    tokio::time::sleep(Duration::from_millis(10)).await;

    // Five drift notifications for the same entity, in a known order
    for member in ["u1", "u2", "u3", "u4", "u5"] {
        event_tx
            .send(ChangeEvent::nickname_changed(
                entity.clone(),
                MemberId::new(member),
                Some("x".to_string()),
            ))
            .expect("event send succeeds");
    }

    // Let the queue drain (5 corrections at 200ms each, zero jitter)
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(gateway.nickname_count(), 5, "every correction applied");
    assert_eq!(
        gateway.max_active_for(&entity),
        1,
        "corrections for one entity overlapped"
    );

    let order: Vec<String> = gateway
        .nicknames()
        .into_iter()
        .map(|(_, member, _)| member.to_string())
        .collect();
    assert_eq!(
        order,
        vec!["u1", "u2", "u3", "u4", "u5"],
        "queue is not FIFO"
    );

    shutdown_tx.send(()).unwrap();
    engine_handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn global_throttle_caps_concurrent_mutations() {
    let (gateway, event_tx) = MockGateway::new();
    gateway.set_mutation_latency(Duration::from_millis(500));

    // Six independent entities, each with one immediate name correction
    // (zero debounce so the second notification fires the revert).
    let mut seeds = Vec::new();
    let ids: Vec<String> = (1..=6).map(|i| format!("group-{}", i)).collect();
    for id in &ids {
        let entity = EntityId::new(id.clone());
        gateway.set_info(&entity, "Hijacked", vec![]);
        seeds.push((
            id.as_str(),
            LockRecord {
                name_lock: true,
                desired_name: Some("Team Chat".to_string()),
                ..Default::default()
            },
        ));
    }
    let store = seed_store(seeds).await;

    let mut config = test_config();
    config.engine.name_debounce_secs = 0;

    let (engine, _events, _commands) = GuardEngine::new(gateway.clone(), Box::new(store), config)
        .await
        .expect("engine construction succeeds");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let engine_handle =
        tokio::spawn(async move { engine.run_with_shutdown(Some(shutdown_rx)).await });

    tokio::time::sleep(Duration::from_millis(10)).await;

    // First notification starts the (zero-length) drift timer, the
    // second observes it elapsed and enqueues the correction.
    for id in &ids {
        let entity = EntityId::new(id.clone());
        event_tx
            .send(ChangeEvent::name_changed(entity.clone(), None, "Hijacked"))
            .expect("event send succeeds");
        event_tx
            .send(ChangeEvent::name_changed(entity, None, "Hijacked"))
            .expect("event send succeeds");
    }

    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(gateway.rename_count(), 6, "every entity corrected");
    assert_eq!(
        gateway.max_active(),
        3,
        "expected exactly the configured cap of in-flight mutations, got {}",
        gateway.max_active()
    );

    shutdown_tx.send(()).unwrap();
    engine_handle.await.unwrap().unwrap();
}
