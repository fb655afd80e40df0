// # Transport Trait
//
// Defines the client capability the engine consumes to talk to the
// variable-serving endpoint.
//
// ## Implementations
//
// - Simulated endpoint: `plclog-sim` crate
// - Future: OPC UA client bindings
//
// ## Usage
//
// ```rust,ignore
// use plclog_core::Transport;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let transport = /* Transport implementation */;
//
//     transport.connect().await?;
//     let resolved = transport.resolve("ns=2;i=7").await?;
//     let values = transport.read_values(&[resolved.handle]).await?;
//     transport.disconnect().await?;
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::model::{DataKind, Value};

/// Session-scoped reference to a resolved variable
///
/// `epoch` identifies the session that issued the handle. Transports must
/// reject handles whose epoch is not the current session's, so a stale
/// handle surfaces as an error instead of a silent stale read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LiveHandle {
    epoch: u64,
    id: u64,
}

impl LiveHandle {
    pub fn new(epoch: u64, id: u64) -> Self {
        Self { epoch, id }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for LiveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.epoch, self.id)
    }
}

/// Result of resolving one identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub handle: LiveHandle,
    pub data_kind: DataKind,
}

/// A value as returned by the endpoint, with its timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct DataValue {
    pub value: Value,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            source_timestamp: None,
            server_timestamp: None,
        }
    }

    /// A per-variable bad status inside an otherwise good response
    pub fn bad() -> Self {
        Self::new(Value::Null)
    }

    pub fn with_source_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.source_timestamp = Some(ts);
        self
    }

    pub fn with_server_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.server_timestamp = Some(ts);
        self
    }
}

/// Identifier of a server-side subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u32);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Something the endpoint pushed for a subscription
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// A monitored variable changed server-side
    DataChange {
        handle: LiveHandle,
        value: DataValue,
    },
    /// The subscription (or the session under it) is gone
    Lost { reason: String },
}

/// Callback invoked by the transport on its own dispatch context
///
/// Must not block: implementations hand the event off and return.
pub type NotificationCallback = Arc<dyn Fn(SubscriptionEvent) + Send + Sync>;

/// Trait for transport client implementations
///
/// One transport instance serves one endpoint and at most one live session
/// at a time. Every call is a single request; the engine bounds each call
/// with its own timeout.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Network I/O to its endpoint
/// - ✅ A dispatch task or thread for subscription notifications
///
/// ## Forbidden Capabilities
/// - ❌ Retry or reconnect on its own (owned by the resilience loop)
/// - ❌ Write to the durable log
/// - ❌ Accept handles issued by a previous session
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session with the endpoint
    async fn connect(&self) -> Result<(), crate::Error>;

    /// Close the current session
    ///
    /// Closing an already-closed session is not an error.
    async fn disconnect(&self) -> Result<(), crate::Error>;

    /// Resolve one identifier to a live handle for the current session
    async fn resolve(&self, identifier: &str) -> Result<Resolution, crate::Error>;

    /// Read all handles in a single batched request
    ///
    /// The response has one entry per handle, in request order. A bad
    /// status for one variable is a [`DataValue::bad`] entry, not an error.
    async fn read_values(&self, handles: &[LiveHandle]) -> Result<Vec<DataValue>, crate::Error>;

    /// Create a subscription that pushes events through `callback`
    async fn create_subscription(
        &self,
        publish_interval: Duration,
        callback: NotificationCallback,
    ) -> Result<SubscriptionId, crate::Error>;

    /// Add monitored variables to a subscription
    async fn subscribe(
        &self,
        subscription: SubscriptionId,
        handles: &[LiveHandle],
    ) -> Result<(), crate::Error>;

    /// Delete a subscription and stop its notifications
    async fn delete_subscription(&self, subscription: SubscriptionId) -> Result<(), crate::Error>;

    /// Endpoint address (for logging)
    fn endpoint(&self) -> &str;
}

/// Helper trait for constructing transports from configuration
pub trait TransportFactory: Send + Sync {
    /// Create a transport for `endpoint`
    fn create(
        &self,
        endpoint: &str,
        config: &crate::config::TransportConfig,
    ) -> Result<Arc<dyn Transport>, crate::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_handle_identity() {
        let a = LiveHandle::new(1, 7);
        let b = LiveHandle::new(2, 7);
        assert_ne!(a, b);
        assert_eq!(a.id(), b.id());
        assert_eq!(a.to_string(), "1#7");
    }

    #[test]
    fn test_bad_data_value_is_null() {
        assert!(DataValue::bad().value.is_null());
        assert_eq!(DataValue::new(5).value, Value::Int(5));
    }
}
