// # Memory Record Sink
//
// In-memory implementation of RecordSink.
//
// ## Purpose
//
// Keeps every appended entry in a Vec. Nothing survives a restart.
//
// ## When to Use
//
// - Testing environments
// - Embedding the engine where the caller consumes entries directly

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::Error;
use crate::model::LogEntry;
use crate::traits::record_sink::RecordSink;

/// In-memory record sink
///
/// Clones share the same storage, so a test can keep one handle and give
/// the other to the engine.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordSink {
    entries: Arc<RwLock<Vec<LogEntry>>>,
    written: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl MemoryRecordSink {
    /// Create a new empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything appended so far, in order
    pub async fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().await.clone()
    }

    /// Number of entries appended so far
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check if nothing was appended
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSink for MemoryRecordSink {
    async fn append(&self, entry: &LogEntry) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::storage("Memory sink is closed"));
        }
        self.entries.write().await.push(entry.clone());
        self.written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn records_written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SnapshotEntry;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_memory_sink_basic() {
        let sink = MemoryRecordSink::new();
        assert!(sink.is_empty().await);

        let entry = LogEntry::Snapshot(SnapshotEntry::new(
            Uuid::new_v4(),
            0,
            Utc::now(),
            BTreeMap::new(),
        ));
        sink.append(&entry).await.unwrap();

        let shared = sink.clone();
        assert_eq!(shared.entries().await, vec![entry.clone()]);
        assert_eq!(sink.records_written(), 1);

        sink.close().await.unwrap();
        assert!(shared.is_closed());
        assert!(sink.append(&entry).await.is_err());
    }
}
