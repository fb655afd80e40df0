//! Periodic full-catalog snapshots
//!
//! When enabled, each session runs one background task that writes a
//! snapshot entry per interval. The control loop stops it through a child
//! cancellation token and joins it with a bounded wait before tearing the
//! session down, so no snapshot write races a teardown.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::acquisition::read_all;
use crate::engine::session::SessionState;
use crate::error::Error;
use crate::model::{LogEntry, ResolvedHandle, SnapshotEntry};
use crate::traits::{RecordSink, Transport};

/// Handle to a running snapshot task
pub(crate) struct SnapshotTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    failures: mpsc::Receiver<Error>,
}

impl SnapshotTask {
    pub(crate) fn spawn(
        transport: Arc<dyn Transport>,
        sink: Arc<dyn RecordSink>,
        session: &SessionState,
        interval: Duration,
        request_timeout: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let (failure_tx, failures) = mpsc::channel(1);

        let worker = SnapshotWorker {
            transport,
            sink,
            handles: session.handles().to_vec(),
            session_id: session.session_id(),
            sequence: session.sequence(),
            written: session.written_counter(),
            request_timeout,
        };

        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = worker.run(interval, token).await {
                let _ = failure_tx.send(e).await;
            }
        });

        Self {
            cancel,
            handle,
            failures,
        }
    }

    /// Wait for the task to report a fatal failure
    ///
    /// Never resolves while the task is healthy.
    pub(crate) async fn failed(&mut self) -> Error {
        match self.failures.recv().await {
            Some(e) => e,
            None => std::future::pending().await,
        }
    }

    /// Signal the task to stop and wait for it, at most `join_timeout`
    pub(crate) async fn stop(self, join_timeout: Duration) {
        self.cancel.cancel();
        let mut handle = self.handle;

        match tokio::time::timeout(join_timeout, &mut handle).await {
            Ok(Ok(())) => debug!("Snapshot task stopped"),
            Ok(Err(e)) => warn!("Snapshot task ended abnormally: {}", e),
            Err(_) => {
                warn!(
                    "Snapshot task did not stop within {:?}; aborting it",
                    join_timeout
                );
                handle.abort();
            }
        }
    }
}

struct SnapshotWorker {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn RecordSink>,
    handles: Vec<ResolvedHandle>,
    session_id: Uuid,
    sequence: Arc<AtomicU64>,
    written: Arc<AtomicU64>,
    request_timeout: Duration,
}

impl SnapshotWorker {
    async fn run(self, interval: Duration, cancel: CancellationToken) -> Result<(), Error> {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let observations = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = read_all(self.transport.as_ref(), &self.handles, self.request_timeout) => result,
            };

            let observations = match observations {
                Ok(observations) => observations,
                Err(e) => {
                    // Session failures are detected by the control loop
                    warn!(session_id = %self.session_id, "Snapshot read failed: {}", e);
                    continue;
                }
            };

            let Some(first) = observations.first() else {
                continue;
            };
            let local_timestamp = first.local_timestamp;
            let values: BTreeMap<_, _> = observations
                .into_iter()
                .map(|o| (o.handle.descriptor.display_name, o.value))
                .collect();

            let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
            let entry = LogEntry::Snapshot(SnapshotEntry::new(
                self.session_id,
                seq,
                local_timestamp,
                values,
            ));
            self.sink.append(&entry).await?;
            self.written.fetch_add(1, Ordering::SeqCst);
            debug!(session_id = %self.session_id, seq, "Snapshot written");
        }
    }
}
