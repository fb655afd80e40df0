//! Test doubles and common utilities for contract tests
//!
//! The scripted transport behaves like a small endpoint: it issues
//! session-scoped handles, rejects stale ones, serves batched reads and
//! captures the subscription callback so tests can push notifications.

#![allow(dead_code)]

use plclog_core::config::{AcquisitionMode, LoggerConfig};
use plclog_core::error::Result;
use plclog_core::model::{ChangeEntry, DataKind, LogEntry, Value};
use plclog_core::traits::{
    DataValue, LiveHandle, NotificationCallback, RecordSink, Resolution, SubscriptionEvent,
    SubscriptionId, Transport,
};
use plclog_core::{Error, MemoryRecordSink, VariableDescriptor};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const ENDPOINT: &str = "opc.tcp://127.0.0.2:4840";

#[derive(Default)]
struct Inner {
    epoch: AtomicU64,
    connected: AtomicBool,
    unreachable: AtomicBool,
    fail_reads: AtomicBool,
    fail_subscribe: AtomicBool,
    /// identifier -> (value, kind), in insertion order
    variables: Mutex<Vec<(String, Value, DataKind)>>,
    unresolvable: Mutex<HashSet<String>>,
    subscription: Mutex<Option<(SubscriptionId, NotificationCallback)>>,
    next_subscription: AtomicU32,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    read_calls: AtomicUsize,
    stale_reads: AtomicUsize,
    create_subscription_calls: AtomicUsize,
    delete_subscription_calls: AtomicUsize,
    hang_resolve: AtomicBool,
    /// Extra latency for the next reads, one entry per call
    read_delays: Mutex<VecDeque<Duration>>,
    read_starts: Mutex<Vec<Instant>>,
}

/// A transport whose endpoint is scripted by the test
///
/// Clones share state, so a test keeps one handle and gives another to the
/// engine.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Inner>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or overwrite) a variable served by the endpoint
    pub fn with_variable(self, identifier: &str, value: impl Into<Value>, kind: DataKind) -> Self {
        self.set_value(identifier, value);
        {
            let mut variables = self.inner.variables.lock().unwrap();
            if let Some(entry) = variables.iter_mut().find(|(id, _, _)| id == identifier) {
                entry.2 = kind;
            }
        }
        self
    }

    /// Make `identifier` fail resolution
    pub fn with_unresolvable(self, identifier: &str) -> Self {
        self.inner
            .unresolvable
            .lock()
            .unwrap()
            .insert(identifier.to_string());
        self
    }

    pub fn set_value(&self, identifier: &str, value: impl Into<Value>) {
        let value = value.into();
        let mut variables = self.inner.variables.lock().unwrap();
        match variables.iter_mut().find(|(id, _, _)| id == identifier) {
            Some(entry) => entry.1 = value,
            None => variables.push((identifier.to_string(), value, DataKind::Unknown)),
        }
    }

    /// Change a value and push a notification for it, like the endpoint would
    pub fn push_value(&self, identifier: &str, value: impl Into<Value>) {
        let value = value.into();
        self.set_value(identifier, value.clone());

        let handle = self.handle_for(identifier);
        let subscription = self.inner.subscription.lock().unwrap().clone();
        if let (Some((_, callback)), Some(handle)) = (subscription, handle) {
            callback(SubscriptionEvent::DataChange {
                handle,
                value: DataValue {
                    value,
                    source_timestamp: None,
                    server_timestamp: None,
                },
            });
        }
    }

    /// Drop the subscription from the endpoint side
    pub fn lose_subscription(&self, reason: &str) {
        let subscription = self.inner.subscription.lock().unwrap().take();
        if let Some((_, callback)) = subscription {
            callback(SubscriptionEvent::Lost {
                reason: reason.to_string(),
            });
        }
    }

    /// Make `resolve` never return, like a half-open endpoint
    pub fn set_hang_resolve(&self, hang: bool) {
        self.inner.hang_resolve.store(hang, Ordering::SeqCst);
    }

    /// Delay the next reads, one delay per call, in order
    pub fn script_read_delays(&self, delays: &[Duration]) {
        self.inner.read_delays.lock().unwrap().extend(delays.iter().copied());
    }

    /// When each read started
    pub fn read_starts(&self) -> Vec<Instant> {
        self.inner.read_starts.lock().unwrap().clone()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.inner.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn has_subscription(&self) -> bool {
        self.inner.subscription.lock().unwrap().is_some()
    }

    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.inner.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.inner.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.inner.read_calls.load(Ordering::SeqCst)
    }

    pub fn stale_reads(&self) -> usize {
        self.inner.stale_reads.load(Ordering::SeqCst)
    }

    pub fn create_subscription_calls(&self) -> usize {
        self.inner.create_subscription_calls.load(Ordering::SeqCst)
    }

    pub fn delete_subscription_calls(&self) -> usize {
        self.inner.delete_subscription_calls.load(Ordering::SeqCst)
    }

    pub fn as_transport(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }

    fn handle_for(&self, identifier: &str) -> Option<LiveHandle> {
        let variables = self.inner.variables.lock().unwrap();
        variables
            .iter()
            .position(|(id, _, _)| id == identifier)
            .map(|index| LiveHandle::new(self.epoch(), index as u64))
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self) -> Result<()> {
        self.inner.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.unreachable.load(Ordering::SeqCst) {
            return Err(Error::connection("connection refused"));
        }
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.subscription.lock().unwrap().take();
        Ok(())
    }

    async fn resolve(&self, identifier: &str) -> Result<Resolution> {
        if self.inner.hang_resolve.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(Error::connection("not connected"));
        }
        if self.inner.unresolvable.lock().unwrap().contains(identifier) {
            return Err(Error::resolution(identifier, "BadNodeIdUnknown"));
        }

        let kind = {
            let variables = self.inner.variables.lock().unwrap();
            variables
                .iter()
                .find(|(id, _, _)| id == identifier)
                .map(|(_, _, kind)| *kind)
        };
        match (kind, self.handle_for(identifier)) {
            (Some(data_kind), Some(handle)) => Ok(Resolution { handle, data_kind }),
            _ => Err(Error::resolution(identifier, "BadNodeIdUnknown")),
        }
    }

    async fn read_values(&self, handles: &[LiveHandle]) -> Result<Vec<DataValue>> {
        self.inner.read_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.read_starts.lock().unwrap().push(Instant::now());
        let delay = self.inner.read_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !self.inner.connected.load(Ordering::SeqCst)
            || self.inner.unreachable.load(Ordering::SeqCst)
            || self.inner.fail_reads.load(Ordering::SeqCst)
        {
            return Err(Error::read("BadConnectionClosed"));
        }

        let epoch = self.epoch();
        if handles.iter().any(|h| h.epoch() != epoch) {
            self.inner.stale_reads.fetch_add(1, Ordering::SeqCst);
            return Err(Error::read("BadSessionIdInvalid"));
        }

        let variables = self.inner.variables.lock().unwrap();
        Ok(handles
            .iter()
            .map(|h| match variables.get(h.id() as usize) {
                Some((_, Value::Null, _)) | None => DataValue::bad(),
                Some((_, value, _)) => DataValue::new(value.clone()),
            })
            .collect())
    }

    async fn create_subscription(
        &self,
        _publish_interval: Duration,
        callback: NotificationCallback,
    ) -> Result<SubscriptionId> {
        self.inner
            .create_subscription_calls
            .fetch_add(1, Ordering::SeqCst);
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(Error::subscription("not connected"));
        }
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::SeqCst) + 1);
        *self.inner.subscription.lock().unwrap() = Some((id, callback));
        Ok(id)
    }

    async fn subscribe(&self, _subscription: SubscriptionId, handles: &[LiveHandle]) -> Result<()> {
        if self.inner.fail_subscribe.load(Ordering::SeqCst) {
            return Err(Error::subscription("BadTooManyMonitoredItems"));
        }
        let epoch = self.epoch();
        if handles.iter().any(|h| h.epoch() != epoch) {
            return Err(Error::subscription("BadSessionIdInvalid"));
        }
        Ok(())
    }

    async fn delete_subscription(&self, subscription: SubscriptionId) -> Result<()> {
        self.inner
            .delete_subscription_calls
            .fetch_add(1, Ordering::SeqCst);
        let mut current = self.inner.subscription.lock().unwrap();
        if matches!(current.as_ref(), Some((id, _)) if *id == subscription) {
            current.take();
        }
        Ok(())
    }

    fn endpoint(&self) -> &str {
        ENDPOINT
    }
}

/// A sink whose every append fails, like a full disk
#[derive(Default)]
pub struct FailingSink {
    close_calls: AtomicUsize,
}

impl FailingSink {
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RecordSink for FailingSink {
    async fn append(&self, _entry: &LogEntry) -> Result<()> {
        Err(Error::storage("No space left on device"))
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn records_written(&self) -> u64 {
        0
    }
}

/// The two-variable endpoint most tests use
pub fn sorting_line() -> ScriptedTransport {
    ScriptedTransport::new()
        .with_variable("ns=2;i=7", 0, DataKind::Int32)
        .with_variable("ns=2;i=2", false, DataKind::Boolean)
}

/// Fast-cycling configuration for tests
pub fn test_config(variables: &[(&str, &str)], mode: AcquisitionMode) -> LoggerConfig {
    let variables = variables
        .iter()
        .map(|(identifier, name)| VariableDescriptor::new(*identifier, *name))
        .collect();

    let mut config = LoggerConfig::new(ENDPOINT, variables, "unused.ndjson");
    config.mode = mode;
    config.interval_ms = 20;
    config.engine.backoff_ms = 50;
    config.engine.request_timeout_ms = 500;
    config.engine.snapshot_join_timeout_ms = 500;
    config
}

pub fn sorting_line_config(mode: AcquisitionMode) -> LoggerConfig {
    test_config(&[("ns=2;i=7", "C_TOTAL"), ("ns=2;i=2", "SENSOR_METAL")], mode)
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn eventually(description: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {}", description);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until the sink holds at least `count` entries
pub async fn wait_for_entries(sink: &MemoryRecordSink, count: usize) -> Vec<LogEntry> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let entries = sink.entries().await;
        if entries.len() >= count {
            return entries;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("expected {} entries, got {}: {:?}", count, entries.len(), entries);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Change entries for one display name, in log order
pub fn changes_for(entries: &[LogEntry], variable: &str) -> Vec<ChangeEntry> {
    entries
        .iter()
        .filter_map(|e| match e {
            LogEntry::Change(c) if c.variable == variable => Some(c.clone()),
            _ => None,
        })
        .collect()
}

/// Session ids in order of first appearance
pub fn sessions_in(entries: &[LogEntry]) -> Vec<uuid::Uuid> {
    let mut sessions = Vec::new();
    for entry in entries {
        if !sessions.contains(&entry.session_id()) {
            sessions.push(entry.session_id());
        }
    }
    sessions
}
