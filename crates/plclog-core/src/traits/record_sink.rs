// # Record Sink Trait
//
// Defines where log entries go once the engine decides they are worth
// keeping.
//
// ## Implementations
//
// - File-based: `DurableLogWriter` (line-delimited JSON, fsync per entry)
// - In-memory: `MemoryRecordSink` (tests and embedding)

use async_trait::async_trait;

use crate::model::LogEntry;

/// Trait for record sink implementations
///
/// # Thread Safety
///
/// `append` is called concurrently from the control task and the snapshot
/// task. Implementations serialize appends so entries never interleave.
///
/// # Durability
///
/// An entry is durable once `append` returns `Ok`. Callers must not treat
/// it as written before that.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Append one entry
    ///
    /// # Returns
    ///
    /// - `Ok(())`: the entry is on stable storage
    /// - `Err(Error)`: storage failure; never swallowed by the engine
    async fn append(&self, entry: &LogEntry) -> Result<(), crate::Error>;

    /// Flush and release the sink; later appends fail
    ///
    /// Closing twice is not an error.
    async fn close(&self) -> Result<(), crate::Error>;

    /// Number of entries appended since creation
    fn records_written(&self) -> u64;
}
