// # Durable Log
//
// Line-delimited JSON log with crash recovery.
//
// ## Purpose
//
// The primary output of the engine: every change record and snapshot is one
// self-contained JSON object on its own line, appended in order.
//
// ## Crash Recovery
//
// - Line-atomic writes: each entry is serialized fully in memory, then
//   written with a single write + flush + sync under a lock
// - Complete lines already on disk are trusted and never rewritten
// - A partial final line (crash mid-write) is discarded by the reader and
//   truncated away when the writer reopens the file
// - Replay is idempotent: entries are keyed by `(session_id, seq)` and a
//   repeated key is skipped
//
// ## File Format
//
// ```text
// {"kind":"change","session_id":"…","seq":0,"variable":"C_TOTAL","previous_value":null,"current_value":0,"baseline":true,…}
// {"kind":"change","session_id":"…","seq":1,"variable":"C_TOTAL","previous_value":0,"current_value":1,"baseline":false,…}
// {"kind":"snapshot","session_id":"…","seq":2,"local_timestamp":"…","values":{"C_TOTAL":1,"SENSOR_METAL":null}}
// ```

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::Error;
use crate::model::LogEntry;
use crate::traits::record_sink::RecordSink;

/// Append-only, line-delimited log on local disk
///
/// Concurrent `append` calls are serialized: the write, flush and sync of
/// one entry complete before the next entry starts.
///
/// # Example
///
/// ```rust,no_run
/// use plclog_core::log::DurableLogWriter;
/// use plclog_core::RecordSink;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let writer = DurableLogWriter::open("/var/lib/plclog/plc.ndjson").await?;
///
///     // ... append entries from the engine ...
///
///     writer.close().await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct DurableLogWriter {
    path: PathBuf,
    file: Mutex<Option<fs::File>>,
    written: AtomicU64,
}

impl DurableLogWriter {
    /// Open (or create) a log for appending
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Truncate a partial final line left by a crash
    /// 3. Open the file in append mode
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::storage(format!(
                        "Failed to create log directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        Self::repair_tail(&path).await?;

        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                Error::storage(format!("Failed to open log {}: {}", path.display(), e))
            })?;

        tracing::debug!("Opened durable log: {}", path.display());

        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
            written: AtomicU64::new(0),
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop a trailing partial line so the next append starts on a fresh line
    ///
    /// Only the tail is read: the file is scanned backwards from its end
    /// until the last newline, so reopening a large log stays cheap.
    async fn repair_tail(path: &Path) -> Result<(), Error> {
        if !path.exists() {
            return Ok(());
        }

        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await
            .map_err(|e| {
                Error::storage(format!("Failed to open log {}: {}", path.display(), e))
            })?;

        let len = file
            .metadata()
            .await
            .map_err(|e| {
                Error::storage(format!("Failed to stat log {}: {}", path.display(), e))
            })?
            .len();

        let keep = last_line_end(&mut file, len, TAIL_CHUNK)
            .await
            .map_err(|e| {
                Error::storage(format!("Failed to read log {}: {}", path.display(), e))
            })?;
        if keep == len {
            return Ok(());
        }

        tracing::warn!(
            "Log {} ends with a partial line ({} bytes); truncating to last complete entry",
            path.display(),
            len - keep
        );

        file.set_len(keep).await.map_err(|e| {
            Error::storage(format!("Failed to truncate log {}: {}", path.display(), e))
        })?;
        file.sync_all().await.map_err(|e| {
            Error::storage(format!("Failed to sync log {}: {}", path.display(), e))
        })?;

        Ok(())
    }
}

/// Bytes read per step when scanning a log tail backwards
const TAIL_CHUNK: usize = 64 * 1024;

/// Offset just past the last newline in the first `len` bytes of `file`
///
/// Returns `len` when the file ends with a newline and 0 when it has none.
async fn last_line_end(file: &mut fs::File, len: u64, chunk_size: usize) -> std::io::Result<u64> {
    let mut buf = vec![0u8; chunk_size];
    let mut end = len;

    while end > 0 {
        let start = end.saturating_sub(chunk_size as u64);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start)).await?;
        file.read_exact(chunk).await?;

        if let Some(i) = chunk.iter().rposition(|b| *b == b'\n') {
            return Ok(start + i as u64 + 1);
        }
        end = start;
    }

    Ok(0)
}

#[async_trait]
impl RecordSink for DurableLogWriter {
    async fn append(&self, entry: &LogEntry) -> Result<(), Error> {
        let mut line = serde_json::to_vec(entry)
            .map_err(|e| Error::storage(format!("Failed to serialize entry: {}", e)))?;
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        let file = guard
            .as_mut()
            .ok_or_else(|| Error::storage(format!("Log {} is closed", self.path.display())))?;

        file.write_all(&line).await.map_err(|e| {
            Error::storage(format!("Failed to write log {}: {}", self.path.display(), e))
        })?;
        file.flush().await.map_err(|e| {
            Error::storage(format!("Failed to flush log {}: {}", self.path.display(), e))
        })?;
        file.sync_data().await.map_err(|e| {
            Error::storage(format!("Failed to sync log {}: {}", self.path.display(), e))
        })?;

        self.written.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(
            "Appended entry {}/{} to {}",
            entry.session_id(),
            entry.seq(),
            self.path.display()
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        let mut guard = self.file.lock().await;
        if let Some(mut file) = guard.take() {
            file.flush().await.map_err(|e| {
                Error::storage(format!("Failed to flush log {}: {}", self.path.display(), e))
            })?;
            file.sync_all().await.map_err(|e| {
                Error::storage(format!("Failed to sync log {}: {}", self.path.display(), e))
            })?;
            tracing::debug!("Closed durable log: {}", self.path.display());
        }
        Ok(())
    }

    fn records_written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }
}

/// Result of reading a log back
#[derive(Debug, Clone, Default)]
pub struct Replay {
    /// Entries in write order, duplicates removed
    pub entries: Vec<LogEntry>,
    /// The file ended with a partial line, which was ignored
    pub truncated_tail: bool,
    /// Complete lines that did not parse
    pub invalid_lines: usize,
    /// Entries skipped because their `(session_id, seq)` was already seen
    pub duplicates_skipped: usize,
}

/// Reads a durable log back for auditing or replay
pub struct LogReader;

impl LogReader {
    /// Read every complete entry of the log at `path`
    ///
    /// Never fails on content: a partial final line is ignored, and a
    /// complete line that does not parse is counted and skipped.
    /// A missing file replays as empty.
    pub async fn replay<P: AsRef<Path>>(path: P) -> Result<Replay, Error> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("Log file does not exist: {}", path.display());
            return Ok(Replay::default());
        }

        let content = fs::read(path).await.map_err(|e| {
            Error::storage(format!("Failed to read log {}: {}", path.display(), e))
        })?;

        Ok(Self::parse(&content))
    }

    fn parse(content: &[u8]) -> Replay {
        let mut replay = Replay::default();
        let mut seen = HashSet::new();

        let mut lines: Vec<&[u8]> = content.split(|b| *b == b'\n').collect();
        // split() always yields a final segment: empty after a trailing
        // newline, otherwise the partial line
        if let Some(tail) = lines.pop() {
            replay.truncated_tail = !tail.is_empty();
        }

        for (number, line) in lines.into_iter().enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<LogEntry>(line) {
                Ok(entry) => {
                    if seen.insert(entry.replay_key()) {
                        replay.entries.push(entry);
                    } else {
                        replay.duplicates_skipped += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!("Skipping unparseable log line {}: {}", number + 1, e);
                    replay.invalid_lines += 1;
                }
            }
        }

        replay
    }
}
