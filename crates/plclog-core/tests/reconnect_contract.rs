//! Contract Test: Reconnect and Backoff
//!
//! Constraints verified:
//! - A read failure ends the session and triggers backoff + reconnect
//! - Handles are resolved again after every reconnect; stale handles are
//!   never used
//! - The first record of each variable after a reconnect is a baseline
//! - Connect failures are retried without a ceiling
//! - A lost subscription is treated like a lost session

mod common;

use common::*;
use plclog_core::config::AcquisitionMode;
use plclog_core::engine::{EngineEvent, LoopState};
use plclog_core::model::Value;
use plclog_core::{AcquisitionEngine, ErrorClass, MemoryRecordSink};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn read_failure_rebuilds_session_from_scratch() {
    let transport = sorting_line();
    let sink = MemoryRecordSink::new();
    let (engine, mut events) = AcquisitionEngine::new(
        transport.as_transport(),
        Arc::new(sink.clone()),
        None,
        sorting_line_config(AcquisitionMode::Poll),
    )
    .unwrap();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { engine.run(shutdown).await }
    });

    wait_for_entries(&sink, 2).await;
    assert_eq!(transport.epoch(), 1);

    // Endpoint goes away mid-run
    transport.set_unreachable(true);
    eventually("a failed reconnect attempt", || transport.connect_calls() >= 2).await;

    // Value changed while we were away, then the endpoint comes back
    transport.set_value("ns=2;i=7", 5);
    transport.set_unreachable(false);
    wait_for_entries(&sink, 4).await;

    shutdown.cancel();
    handle.await.unwrap().unwrap();

    assert!(transport.epoch() >= 2, "handles must come from a new session");
    assert_eq!(transport.stale_reads(), 0, "no read may use a stale handle");
    assert_eq!(
        transport.disconnect_calls(),
        2,
        "one teardown per established session"
    );

    let entries = sink.entries().await;
    let sessions = sessions_in(&entries);
    assert_eq!(sessions.len(), 2);

    let c_total = changes_for(&entries, "C_TOTAL");
    assert_eq!(c_total.len(), 2);
    let after = &c_total[1];
    assert_eq!(after.session_id, sessions[1]);
    assert!(after.baseline, "no continuity across sessions");
    assert_eq!(after.previous_value, Value::Null);
    assert_eq!(after.current_value, Value::Int(5));

    // Even an unchanged variable is re-baselined
    let sensor = changes_for(&entries, "SENSOR_METAL");
    assert_eq!(sensor.len(), 2);
    assert!(sensor[1].baseline);

    // Sequence restarts per session
    let second: Vec<u64> = entries
        .iter()
        .filter(|e| e.session_id() == sessions[1])
        .map(|e| e.seq())
        .collect();
    assert_eq!(second, vec![0, 1]);

    let mut saw_read_failure = false;
    let mut saw_backoff = false;
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::SessionFailed { class, .. } if class == ErrorClass::Read => {
                saw_read_failure = true
            }
            EngineEvent::Backoff { .. } => saw_backoff = true,
            _ => {}
        }
    }
    assert!(saw_read_failure);
    assert!(saw_backoff);
}

#[tokio::test]
async fn unreachable_endpoint_is_retried_until_it_comes_up() {
    let transport = sorting_line();
    transport.set_unreachable(true);

    let sink = MemoryRecordSink::new();
    let (engine, mut events) = AcquisitionEngine::new(
        transport.as_transport(),
        Arc::new(sink.clone()),
        None,
        sorting_line_config(AcquisitionMode::Poll),
    )
    .unwrap();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { engine.run(shutdown).await }
    });

    eventually("five connect attempts", || transport.connect_calls() >= 5).await;
    assert!(sink.is_empty().await);

    transport.set_unreachable(false);
    wait_for_entries(&sink, 2).await;

    shutdown.cancel();
    handle.await.unwrap().unwrap();

    let mut states = Vec::new();
    let mut connection_failures = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::StateChanged { state } => states.push(state),
            EngineEvent::SessionFailed { class, .. } => {
                assert_eq!(class, ErrorClass::Connection);
                connection_failures += 1;
            }
            _ => {}
        }
    }
    assert!(connection_failures >= 4);
    assert_eq!(states.first(), Some(&LoopState::Connecting));
    assert!(states.contains(&LoopState::Disconnected));
    assert!(states.contains(&LoopState::Acquiring));
    assert_eq!(states.last(), Some(&LoopState::Stopped));
}

#[tokio::test]
async fn nothing_resolved_is_retried() {
    let transport = ScriptedTransport::new()
        .with_variable("ns=2;i=7", 0, plclog_core::DataKind::Int32)
        .with_unresolvable("ns=2;i=7");

    let sink = MemoryRecordSink::new();
    let (engine, _events) = AcquisitionEngine::new(
        transport.as_transport(),
        Arc::new(sink.clone()),
        None,
        test_config(&[("ns=2;i=7", "C_TOTAL")], AcquisitionMode::Poll),
    )
    .unwrap();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { engine.run(shutdown).await }
    });

    eventually("three connect attempts", || transport.connect_calls() >= 3).await;
    shutdown.cancel();
    let result = handle.await.unwrap();

    assert!(result.is_ok(), "zero resolved variables is not fatal: {:?}", result);
    assert!(sink.is_empty().await);
    assert_eq!(transport.read_calls(), 0);
}

#[tokio::test]
async fn lost_subscription_resubscribes_on_a_new_session() {
    let transport = sorting_line();
    let sink = MemoryRecordSink::new();
    let (engine, _events) = AcquisitionEngine::new(
        transport.as_transport(),
        Arc::new(sink.clone()),
        None,
        sorting_line_config(AcquisitionMode::Subscribe),
    )
    .unwrap();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { engine.run(shutdown).await }
    });

    eventually("first subscription", || transport.has_subscription()).await;
    transport.push_value("ns=2;i=7", 1);
    wait_for_entries(&sink, 1).await;

    transport.lose_subscription("BadTimeout");
    eventually("second subscription", || {
        transport.create_subscription_calls() >= 2 && transport.has_subscription()
    })
    .await;

    transport.push_value("ns=2;i=7", 2);
    wait_for_entries(&sink, 2).await;

    shutdown.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(transport.epoch(), 2);
    let c_total = changes_for(&sink.entries().await, "C_TOTAL");
    assert_eq!(c_total.len(), 2);
    assert_ne!(c_total[0].session_id, c_total[1].session_id);
    assert!(c_total[1].baseline);
}

#[tokio::test]
async fn failed_subscribe_cleans_up_and_retries() {
    let transport = sorting_line();
    transport.set_fail_subscribe(true);

    let (engine, _events) = AcquisitionEngine::new(
        transport.as_transport(),
        Arc::new(MemoryRecordSink::new()),
        None,
        sorting_line_config(AcquisitionMode::Subscribe),
    )
    .unwrap();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { engine.run(shutdown).await }
    });

    eventually("two subscription attempts", || {
        transport.create_subscription_calls() >= 2
    })
    .await;
    shutdown.cancel();
    handle.await.unwrap().unwrap();

    assert!(!transport.has_subscription());
    assert!(transport.delete_subscription_calls() >= 2);
    assert_eq!(transport.connect_calls(), transport.disconnect_calls());
}
