// # plclog-core
//
// Core library for resilient PLC variable acquisition and logging.
//
// ## Architecture Overview
//
// - **Transport**: Trait for the session-based client of the endpoint
// - **AcquisitionStrategy**: Polling or subscription, one instance per session
// - **ChangeDetector**: Last-known-value filter, rebuilt on every reconnect
// - **RecordSink**: Trait for the durable destination (DurableLogWriter)
// - **AcquisitionEngine**: Resilience loop that composes all of the above
// - **TransportRegistry**: Plugin-based registry for transports
//
// ## Design Principles
//
// 1. **Session-scoped state**: Everything derived from a session is torn
//    down with it and rebuilt from scratch on reconnect
// 2. **Durable before continuing**: A record is flushed before the next
//    acquisition step runs
// 3. **Classified failures**: Retry decisions dispatch on error class
// 4. **Library-First**: The daemon is a thin wrapper around this crate

pub mod acquisition;
pub mod catalog;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod log;
pub mod model;
pub mod registry;
pub mod traits;

// Re-export core types for convenience
pub use catalog::{VariableCatalog, VariableDescriptor};
pub use config::{AcquisitionMode, EngineConfig, LoggerConfig, TransportConfig};
pub use detector::ChangeDetector;
pub use engine::{AcquisitionEngine, EngineEvent, LoopState};
pub use error::{Error, ErrorClass, Result};
pub use log::{DurableLogWriter, LogReader, MemoryRecordSink, RunMetadataStore};
pub use model::{ChangeEntry, ChangeRecord, DataKind, LogEntry, SnapshotEntry, Value};
pub use registry::TransportRegistry;
pub use traits::{AcquisitionStrategy, RecordSink, Transport, TransportFactory};
