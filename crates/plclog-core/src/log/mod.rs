// # Log Storage
//
// Destinations for the entries produced by the engine.
//
// - `file`: the durable, line-delimited log and its reader
// - `memory`: an in-memory sink for tests and embedding
// - `metadata`: per-session audit records kept beside the log

pub mod file;
pub mod memory;
pub mod metadata;

pub use file::{DurableLogWriter, LogReader, Replay};
pub use memory::MemoryRecordSink;
pub use metadata::{RunMetadata, RunMetadataStore};
