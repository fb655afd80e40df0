// # Simulated PLC Endpoint
//
// This crate provides an in-process variable-serving endpoint and a
// Transport that talks to it.
//
// ## Purpose
//
// A **stand-in endpoint** for:
// - Local runs of the daemon without a PLC
// - CI/CD testing of the engine end to end
// - Reproducing outages (unreachable endpoint, lost subscriptions)
//
// It is not a protocol implementation. It keeps the contract the engine
// relies on: session-scoped handles, batched reads in request order,
// server-side change filtering for subscriptions.
//
// ## Architecture
//
// ```text
// SimulatedEndpoint (shared "server" state)
//        ▲
//        │ one session per connect, epoch-stamped handles
//        │
// SimTransport (client, implements Transport)
// ```

use chrono::{DateTime, Utc};
use plclog_core::TransportRegistry;
use plclog_core::config::TransportConfig;
use plclog_core::model::{DataKind, Value};
use plclog_core::traits::{
    DataValue, LiveHandle, NotificationCallback, Resolution, SubscriptionEvent, SubscriptionId,
    Transport, TransportFactory,
};
use plclog_core::{Error, Result};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Namespace index used by the sorting line preset
const SORTING_LINE_NAMESPACE: u16 = 2;

/// Variables of the sorting line, by numeric node id
///
/// Ids follow the server's creation order: the process folder and its five
/// subfolders take ids 1 to 6.
const SORTING_LINE: &[(u32, &str, SimInit)] = &[
    (7, "C_TOTAL", SimInit::Int(0)),
    (8, "C_APROVADAS", SimInit::Int(0)),
    (9, "C_REJEITADAS", SimInit::Int(0)),
    (10, "Diffuse_Sensor_0", SimInit::Bool(false)),
    (11, "Diffuse_Sensor_1", SimInit::Bool(false)),
    (12, "Pusher_0_Back_Limit", SimInit::Bool(true)),
    (13, "Pusher_0_Front_Limit", SimInit::Bool(false)),
    (14, "Emergency_Stop_0", SimInit::Bool(false)),
    (15, "Start_Button_0", SimInit::Bool(false)),
    (16, "Stop_Button_0", SimInit::Bool(false)),
    (17, "Reset_Button_0", SimInit::Bool(false)),
    (18, "Belt_Conveyor_6m_0", SimInit::Bool(false)),
    (19, "Pusher_0", SimInit::Bool(false)),
    (20, "Emitter_0_Emit", SimInit::Bool(false)),
    (21, "Emitter_0_Base", SimInit::Bool(false)),
    (22, "Emitter_0_Part", SimInit::Int(0)),
    (23, "Remover_0_Remove", SimInit::Bool(false)),
    (24, "Remover_1_Remove", SimInit::Bool(false)),
    (25, "Stack_Light_0_Green", SimInit::Bool(false)),
    (26, "Stack_Light_0_Red", SimInit::Bool(false)),
    (27, "Stack_Light_0_Yellow", SimInit::Bool(false)),
    (28, "Warning_Light_0", SimInit::Bool(false)),
    (29, "Start_Button_0_Light", SimInit::Bool(false)),
    (30, "Stop_Button_0_Light", SimInit::Bool(false)),
    (31, "Reset_Button_0_Light", SimInit::Bool(false)),
    (32, "Digital_Display_0", SimInit::Int(0)),
    (33, "Digital_Display_1", SimInit::Int(0)),
    (34, "Belt_Conveyor_0_Encoder_Signal_A", SimInit::Bool(false)),
    (35, "Belt_Conveyor_0_Encoder_Signal_B", SimInit::Bool(false)),
    (36, "FACTORY_IO_Running", SimInit::Bool(true)),
    (37, "FACTORY_IO_Reset", SimInit::Bool(false)),
    (38, "FACTORY_IO_Paused", SimInit::Bool(false)),
    (39, "FACTORY_IO_Run", SimInit::Bool(true)),
    (40, "FACTORY_IO_Pause", SimInit::Bool(false)),
    (41, "FACTORY_IO_TimeScale", SimInit::Float(1.0)),
    (42, "FACTORY_IO_CameraPosition", SimInit::Float(0.0)),
];

#[derive(Clone, Copy)]
enum SimInit {
    Bool(bool),
    Int(i32),
    Float(f64),
}

impl SimInit {
    fn value(self) -> (Value, DataKind) {
        match self {
            SimInit::Bool(v) => (Value::from(v), DataKind::Boolean),
            SimInit::Int(v) => (Value::from(v), DataKind::Int32),
            SimInit::Float(v) => (Value::from(v), DataKind::Float),
        }
    }
}

/// Node identifier in the `ns=<namespace>;i=<id>` form
pub fn node_id(namespace: u16, id: u32) -> String {
    format!("ns={};i={}", namespace, id)
}

/// One variable held by the endpoint
#[derive(Debug, Clone)]
struct SimVariable {
    identifier: String,
    browse_name: String,
    value: Value,
    data_kind: DataKind,
    changed_at: DateTime<Utc>,
}

struct SimSubscription {
    epoch: u64,
    callback: NotificationCallback,
    monitored: HashSet<u64>,
}

#[derive(Default)]
struct EndpointState {
    reachable: AtomicBool,
    next_epoch: AtomicU64,
    next_subscription: AtomicU32,
    variables: Mutex<Vec<SimVariable>>,
    unresolvable: Mutex<HashSet<String>>,
    live_sessions: Mutex<HashSet<u64>>,
    subscriptions: Mutex<HashMap<u32, SimSubscription>>,
}

/// Lock a std mutex, recovering the data if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Shared, in-process endpoint state
///
/// Clones refer to the same endpoint.
#[derive(Clone)]
pub struct SimulatedEndpoint {
    state: Arc<EndpointState>,
}

impl Default for SimulatedEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEndpoint {
    /// Create an empty, reachable endpoint
    pub fn new() -> Self {
        let state = EndpointState::default();
        state.reachable.store(true, Ordering::SeqCst);
        Self {
            state: Arc::new(state),
        }
    }

    /// Endpoint preloaded with the sorting line variables (`ns=2;i=7` is `C_TOTAL`)
    pub fn sorting_line() -> Self {
        let endpoint = Self::new();
        for (id, name, init) in SORTING_LINE {
            let (value, kind) = init.value();
            endpoint.add_variable(&node_id(SORTING_LINE_NAMESPACE, *id), *name, value, kind);
        }
        endpoint
    }

    /// Add a variable, or replace an existing one with the same identifier
    pub fn add_variable(
        &self,
        identifier: &str,
        browse_name: &str,
        value: impl Into<Value>,
        data_kind: DataKind,
    ) {
        let variable = SimVariable {
            identifier: identifier.to_string(),
            browse_name: browse_name.to_string(),
            value: value.into(),
            data_kind,
            changed_at: Utc::now(),
        };

        let mut variables = lock(&self.state.variables);
        match variables.iter_mut().find(|v| v.identifier == identifier) {
            Some(existing) => *existing = variable,
            None => variables.push(variable),
        }
    }

    /// Current value of a variable
    pub fn value(&self, identifier: &str) -> Option<Value> {
        lock(&self.state.variables)
            .iter()
            .find(|v| v.identifier == identifier)
            .map(|v| v.value.clone())
    }

    /// Identifier of the variable with `browse_name`
    pub fn identifier_of(&self, browse_name: &str) -> Option<String> {
        lock(&self.state.variables)
            .iter()
            .find(|v| v.browse_name == browse_name)
            .map(|v| v.identifier.clone())
    }

    /// Write a value, notifying subscriptions when it actually changed
    ///
    /// Returns `false` for an unknown identifier.
    pub fn set_value(&self, identifier: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        let now = Utc::now();

        let (index, changed) = {
            let mut variables = lock(&self.state.variables);
            let Some(index) = variables.iter().position(|v| v.identifier == identifier) else {
                return false;
            };
            let variable = &mut variables[index];
            let changed = !variable.value.same_as(&value);
            if changed {
                variable.value = value.clone();
                variable.changed_at = now;
            }
            (index as u64, changed)
        };

        if changed {
            let data = DataValue::new(value)
                .with_source_timestamp(now)
                .with_server_timestamp(Utc::now());
            let targets: Vec<(u64, NotificationCallback)> = lock(&self.state.subscriptions)
                .values()
                .filter(|s| s.monitored.contains(&index))
                .map(|s| (s.epoch, Arc::clone(&s.callback)))
                .collect();

            // Callbacks run outside every lock
            for (epoch, callback) in targets {
                callback(SubscriptionEvent::DataChange {
                    handle: LiveHandle::new(epoch, index),
                    value: data.clone(),
                });
            }
        }
        true
    }

    /// Make `identifier` fail resolution (as if the node did not exist)
    pub fn fail_resolution(&self, identifier: &str) {
        lock(&self.state.unresolvable).insert(identifier.to_string());
    }

    /// Take the endpoint down or bring it back
    ///
    /// Going down closes every live session and drops every subscription
    /// with a `Lost` event.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
        if reachable {
            tracing::debug!("Simulated endpoint is up");
            return;
        }

        lock(&self.state.live_sessions).clear();
        let dropped: Vec<SimSubscription> = lock(&self.state.subscriptions)
            .drain()
            .map(|(_, s)| s)
            .collect();
        tracing::debug!(
            "Simulated endpoint is down; dropping {} subscriptions",
            dropped.len()
        );
        for subscription in dropped {
            (subscription.callback)(SubscriptionEvent::Lost {
                reason: "BadServerNotConnected".to_string(),
            });
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.state.reachable.load(Ordering::SeqCst)
    }

    /// Number of active subscriptions
    pub fn subscription_count(&self) -> usize {
        lock(&self.state.subscriptions).len()
    }

    /// Number of open sessions
    pub fn session_count(&self) -> usize {
        lock(&self.state.live_sessions).len()
    }

    /// Create a client for this endpoint
    pub fn transport(&self, address: impl Into<String>) -> SimTransport {
        SimTransport {
            endpoint: self.clone(),
            address: address.into(),
            epoch: Mutex::new(None),
        }
    }

    /// Keep the sorting line moving until `cancel` fires
    ///
    /// Every `period` one part passes the diffuse sensor and `C_TOTAL`
    /// increments, so a local run has something to log.
    pub async fn run_line(&self, period: Duration, cancel: CancellationToken) {
        let (Some(total), Some(sensor)) = (
            self.identifier_of("C_TOTAL"),
            self.identifier_of("Diffuse_Sensor_0"),
        ) else {
            tracing::warn!("Simulated line has no C_TOTAL/Diffuse_Sensor_0; not driving it");
            return;
        };

        let mut ticker = tokio::time::interval(period);
        let mut count: i64 = match self.value(&total) {
            Some(Value::Int(v)) => v,
            _ => 0,
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let part_present = count % 2 == 0;
            self.set_value(&sensor, part_present);
            if part_present {
                count += 1;
                self.set_value(&total, count);
            }
        }
    }

    fn open_session(&self) -> Result<u64> {
        if !self.is_reachable() {
            return Err(Error::connection("BadCommunicationError: connection refused"));
        }
        let epoch = self.state.next_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.state.live_sessions).insert(epoch);
        Ok(epoch)
    }

    fn close_session(&self, epoch: u64) {
        lock(&self.state.live_sessions).remove(&epoch);
        lock(&self.state.subscriptions).retain(|_, s| s.epoch != epoch);
    }

    fn is_live(&self, epoch: u64) -> bool {
        self.is_reachable() && lock(&self.state.live_sessions).contains(&epoch)
    }
}

/// Transport client for a [`SimulatedEndpoint`]
///
/// Each `connect` opens a new session with a new epoch. Handles carry the
/// epoch that issued them and are rejected by any later session.
pub struct SimTransport {
    endpoint: SimulatedEndpoint,
    address: String,
    epoch: Mutex<Option<u64>>,
}

impl SimTransport {
    /// Epoch of the open session, if any
    fn live_epoch(&self) -> Option<u64> {
        let epoch = (*lock(&self.epoch))?;
        self.endpoint.is_live(epoch).then_some(epoch)
    }

    /// Current values in handle order; unknown or null values read as bad
    fn current_values(&self, handles: &[LiveHandle]) -> Vec<DataValue> {
        let server_timestamp = Utc::now();
        let variables = lock(&self.endpoint.state.variables);
        handles
            .iter()
            .map(|h| match variables.get(h.id() as usize) {
                Some(v) if !v.value.is_null() => DataValue::new(v.value.clone())
                    .with_source_timestamp(v.changed_at)
                    .with_server_timestamp(server_timestamp),
                _ => DataValue::bad(),
            })
            .collect()
    }

    fn check_handles(&self, epoch: u64, handles: &[LiveHandle]) -> std::result::Result<(), String> {
        match handles.iter().find(|h| h.epoch() != epoch) {
            Some(stale) => Err(format!("BadSessionIdInvalid: stale handle {}", stale)),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Transport for SimTransport {
    async fn connect(&self) -> Result<()> {
        let epoch = self.endpoint.open_session()?;
        let previous = lock(&self.epoch).replace(epoch);
        if let Some(previous) = previous {
            self.endpoint.close_session(previous);
        }
        tracing::debug!("Simulated session {} opened for {}", epoch, self.address);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(epoch) = lock(&self.epoch).take() {
            self.endpoint.close_session(epoch);
            tracing::debug!("Simulated session {} closed", epoch);
        }
        Ok(())
    }

    async fn resolve(&self, identifier: &str) -> Result<Resolution> {
        let epoch = self
            .live_epoch()
            .ok_or_else(|| Error::connection("BadSessionClosed"))?;

        if lock(&self.endpoint.state.unresolvable).contains(identifier) {
            return Err(Error::resolution(identifier, "BadNodeIdUnknown"));
        }

        let variables = lock(&self.endpoint.state.variables);
        let index = variables
            .iter()
            .position(|v| v.identifier == identifier)
            .ok_or_else(|| Error::resolution(identifier, "BadNodeIdUnknown"))?;

        Ok(Resolution {
            handle: LiveHandle::new(epoch, index as u64),
            data_kind: variables[index].data_kind,
        })
    }

    async fn read_values(&self, handles: &[LiveHandle]) -> Result<Vec<DataValue>> {
        let epoch = self
            .live_epoch()
            .ok_or_else(|| Error::read("BadConnectionClosed"))?;
        self.check_handles(epoch, handles).map_err(Error::read)?;

        Ok(self.current_values(handles))
    }

    async fn create_subscription(
        &self,
        publish_interval: Duration,
        callback: NotificationCallback,
    ) -> Result<SubscriptionId> {
        let epoch = self
            .live_epoch()
            .ok_or_else(|| Error::subscription("BadSessionClosed"))?;

        let id = self
            .endpoint
            .state
            .next_subscription
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        lock(&self.endpoint.state.subscriptions).insert(
            id,
            SimSubscription {
                epoch,
                callback,
                monitored: HashSet::new(),
            },
        );
        tracing::debug!(
            "Simulated subscription {} created (publish interval {:?})",
            id,
            publish_interval
        );
        Ok(SubscriptionId(id))
    }

    async fn subscribe(&self, subscription: SubscriptionId, handles: &[LiveHandle]) -> Result<()> {
        let epoch = self
            .live_epoch()
            .ok_or_else(|| Error::subscription("BadSessionClosed"))?;
        self.check_handles(epoch, handles)
            .map_err(Error::subscription)?;

        let callback = {
            let mut subscriptions = lock(&self.endpoint.state.subscriptions);
            let entry = subscriptions
                .get_mut(&subscription.0)
                .filter(|s| s.epoch == epoch)
                .ok_or_else(|| {
                    Error::subscription(format!("BadSubscriptionIdInvalid: {}", subscription))
                })?;
            entry.monitored.extend(handles.iter().map(|h| h.id()));
            Arc::clone(&entry.callback)
        };

        // New monitored items report their current value once
        let initial = self.current_values(handles);
        for (handle, value) in handles.iter().zip(initial) {
            callback(SubscriptionEvent::DataChange {
                handle: *handle,
                value,
            });
        }
        Ok(())
    }

    async fn delete_subscription(&self, subscription: SubscriptionId) -> Result<()> {
        lock(&self.endpoint.state.subscriptions).remove(&subscription.0);
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.address
    }
}

/// Factory for creating simulated transports bound to one endpoint
pub struct SimTransportFactory {
    endpoint: SimulatedEndpoint,
}

impl SimTransportFactory {
    pub fn new(endpoint: SimulatedEndpoint) -> Self {
        Self { endpoint }
    }
}

impl TransportFactory for SimTransportFactory {
    fn create(&self, address: &str, config: &TransportConfig) -> Result<Arc<dyn Transport>> {
        match config {
            TransportConfig::Simulated => Ok(Arc::new(self.endpoint.transport(address))),
            _ => Err(Error::config("Invalid config for simulated transport")),
        }
    }
}

/// Register the simulated transport with a registry
pub fn register(registry: &TransportRegistry, endpoint: SimulatedEndpoint) {
    registry.register_transport("simulated", Box::new(SimTransportFactory::new(endpoint)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_factory_creation() {
        let registry = TransportRegistry::new();
        register(&registry, SimulatedEndpoint::sorting_line());

        let transport = registry
            .create_transport("opc.tcp://127.0.0.2:4840", &TransportConfig::Simulated)
            .unwrap();
        assert_eq!(transport.endpoint(), "opc.tcp://127.0.0.2:4840");
    }

    #[test]
    fn test_sorting_line_node_ids() {
        let endpoint = SimulatedEndpoint::sorting_line();
        assert_eq!(endpoint.identifier_of("C_TOTAL").as_deref(), Some("ns=2;i=7"));
        assert_eq!(endpoint.value("ns=2;i=41"), Some(Value::Float(1.0)));
    }

    #[tokio::test]
    async fn test_handles_are_session_scoped() {
        let endpoint = SimulatedEndpoint::sorting_line();
        let transport = endpoint.transport("sim");

        transport.connect().await.unwrap();
        let old = transport.resolve("ns=2;i=7").await.unwrap();
        assert_eq!(old.data_kind, DataKind::Int32);
        assert_eq!(
            transport.read_values(&[old.handle]).await.unwrap()[0].value,
            Value::Int(0)
        );

        transport.disconnect().await.unwrap();
        transport.connect().await.unwrap();

        let err = transport.read_values(&[old.handle]).await.unwrap_err();
        assert!(matches!(err, Error::Read(_)));

        let fresh = transport.resolve("ns=2;i=7").await.unwrap();
        assert_ne!(fresh.handle, old.handle);
        assert!(transport.read_values(&[fresh.handle]).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let endpoint = SimulatedEndpoint::sorting_line();
        let transport = endpoint.transport("sim");
        transport.connect().await.unwrap();
        let handle = transport.resolve("ns=2;i=7").await.unwrap().handle;

        endpoint.set_reachable(false);
        assert!(matches!(
            transport.read_values(&[handle]).await,
            Err(Error::Read(_))
        ));
        assert!(matches!(transport.connect().await, Err(Error::Connection(_))));

        endpoint.set_reachable(true);
        transport.connect().await.unwrap();
        assert_eq!(endpoint.session_count(), 1);
    }

    #[tokio::test]
    async fn test_subscription_filters_unchanged_writes() {
        let endpoint = SimulatedEndpoint::sorting_line();
        let transport = endpoint.transport("sim");
        transport.connect().await.unwrap();
        let handle = transport.resolve("ns=2;i=7").await.unwrap().handle;

        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        let subscription = transport
            .create_subscription(
                Duration::from_millis(100),
                Arc::new(move |event| {
                    if matches!(event, SubscriptionEvent::DataChange { .. }) {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .await
            .unwrap();
        transport.subscribe(subscription, &[handle]).await.unwrap();

        // Initial value
        assert_eq!(notified.load(Ordering::SeqCst), 1);

        endpoint.set_value("ns=2;i=7", 1);
        endpoint.set_value("ns=2;i=7", 1);
        endpoint.set_value("ns=2;i=8", 1);
        assert_eq!(notified.load(Ordering::SeqCst), 2);

        transport.delete_subscription(subscription).await.unwrap();
        endpoint.set_value("ns=2;i=7", 2);
        assert_eq!(notified.load(Ordering::SeqCst), 2);
    }
}
