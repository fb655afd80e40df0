//! Core traits for the plclog system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`Transport`]: Session-based client capability for the endpoint
//! - [`AcquisitionStrategy`]: Polling or subscription acquisition
//! - [`RecordSink`]: Durable destination for log entries

pub mod acquisition;
pub mod record_sink;
pub mod transport;

pub use acquisition::{AcquisitionStrategy, Batch, BatchOrigin};
pub use record_sink::RecordSink;
pub use transport::{
    DataValue, LiveHandle, NotificationCallback, Resolution, SubscriptionEvent, SubscriptionId,
    Transport, TransportFactory,
};
