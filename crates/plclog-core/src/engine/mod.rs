//! Core acquisition engine
//!
//! The AcquisitionEngine is the resilience loop. It is responsible for:
//! - Opening a session and resolving the catalog (SessionManager)
//! - Driving one acquisition strategy per session (poll or subscribe)
//! - Filtering observations through a per-session ChangeDetector
//! - Appending every record to the RecordSink before acquiring more
//! - Tearing the session down and reconnecting after any retryable failure
//!
//! ## Architecture
//!
//! ```text
//!                      ┌──────────────────┐
//!                      │ AcquisitionEngine│
//!                      └──────────────────┘
//!                               │
//!         ┌─────────────────────┼──────────────────────┐
//!         │                     │                      │
//!         ▼                     ▼                      ▼
//! ┌───────────────┐   ┌───────────────────┐   ┌──────────────┐
//! │SessionManager │   │AcquisitionStrategy│   │   Events     │
//! │(connect/      │   │(poll / subscribe) │   │  (notify)    │
//! │ teardown)     │   └───────────────────┘   └──────────────┘
//! └───────────────┘             │
//!                               ▼
//!                      ┌─────────────────┐     ┌────────────┐
//!                      │ ChangeDetector  │────►│ RecordSink │
//!                      └─────────────────┘     └────────────┘
//! ```
//!
//! ## State Machine
//!
//! ```text
//! Disconnected ──► Connecting ──► Acquiring
//!      ▲               │              │
//!      └── backoff ◄───┴── failure ◄──┘
//!
//! any state ── cancellation ──► Stopped
//! ```
//!
//! Retries are unbounded. Only configuration and storage failures end the
//! loop with an error.

pub mod session;
mod snapshot;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::acquisition::build_strategy;
use crate::catalog::VariableCatalog;
use crate::config::{AcquisitionMode, LoggerConfig};
use crate::detector::ChangeDetector;
use crate::error::{ErrorClass, Result};
use crate::log::{RunMetadata, RunMetadataStore};
use crate::model::{ChangeEntry, LogEntry};
use crate::traits::{AcquisitionStrategy, BatchOrigin, RecordSink, Transport};

use session::{SessionManager, SessionState};
use snapshot::SnapshotTask;

/// Resilience loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Disconnected,
    Connecting,
    Acquiring,
    Stopped,
}

/// Events emitted by the AcquisitionEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started
    Started {
        endpoint: String,
        mode: AcquisitionMode,
        variables_count: usize,
    },

    /// Resilience loop changed state
    StateChanged { state: LoopState },

    /// Session established
    Connected {
        session_id: Uuid,
        resolved: usize,
        dropped: usize,
    },

    /// Identifier failed to resolve and is skipped for this session
    VariableDropped {
        session_id: Uuid,
        identifier: String,
    },

    /// Change records appended for one batch
    RecordsWritten { session_id: Uuid, count: usize },

    /// A poll cycle ran past its period
    CycleOverrun { elapsed: Duration, period: Duration },

    /// Session ended with a retryable failure
    SessionFailed { class: ErrorClass, error: String },

    /// Waiting before the next connect attempt
    Backoff { delay: Duration },

    /// Engine stopped
    Stopped { reason: String },
}

/// Core acquisition engine
///
/// ## Lifecycle
///
/// 1. Create with [`AcquisitionEngine::new()`]
/// 2. Start with [`AcquisitionEngine::run()`]
/// 3. The engine runs until the shutdown token is cancelled or a fatal
///    error occurs
/// 4. The sink is closed on every exit path
///
/// ## Load Resistance
///
/// Events go through a bounded channel. When it is full, events are
/// dropped with a warning and acquisition never waits on it.
pub struct AcquisitionEngine {
    /// Session setup and teardown
    sessions: SessionManager,

    /// Durable destination of every entry
    sink: Arc<dyn RecordSink>,

    /// Optional per-session audit records
    metadata: Option<RunMetadataStore>,

    mode: AcquisitionMode,
    interval: Duration,
    snapshot_interval: Option<Duration>,
    backoff: Duration,
    request_timeout: Duration,
    snapshot_join_timeout: Duration,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl AcquisitionEngine {
    /// Create a new acquisition engine
    ///
    /// # Parameters
    ///
    /// - `transport`: Transport implementation for the endpoint
    /// - `sink`: Record sink (usually a `DurableLogWriter`)
    /// - `metadata`: Optional run metadata store
    /// - `config`: Logger configuration
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver), or a configuration error. A
    /// configuration error is fatal: the loop must not be started.
    pub fn new(
        transport: Arc<dyn Transport>,
        sink: Arc<dyn RecordSink>,
        metadata: Option<RunMetadataStore>,
        config: LoggerConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;
        let catalog = VariableCatalog::new(config.variables.clone())?;

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);

        let engine = Self {
            sessions: SessionManager::new(transport, catalog, config.engine.request_timeout()),
            sink,
            metadata,
            mode: config.mode,
            interval: config.interval(),
            snapshot_interval: config.snapshot_interval(),
            backoff: config.engine.backoff(),
            request_timeout: config.engine.request_timeout(),
            snapshot_join_timeout: config.engine.snapshot_join_timeout(),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Run the engine until `shutdown` is cancelled
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown, session torn down, sink closed
    /// - `Err(Error)`: Fatal error (storage), session torn down, sink closed
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(
            "Engine started: {} variables, mode {}, endpoint {}",
            self.sessions.catalog().len(),
            self.mode,
            self.sessions.transport().endpoint()
        );
        self.emit_event(EngineEvent::Started {
            endpoint: self.sessions.transport().endpoint().to_string(),
            mode: self.mode,
            variables_count: self.sessions.catalog().len(),
        });

        let outcome = self.resilience_loop(&shutdown).await;
        let closed = self.sink.close().await;
        self.set_state(LoopState::Stopped);

        match outcome {
            Ok(()) => {
                info!("Shutdown complete, log closed");
                self.emit_event(EngineEvent::Stopped {
                    reason: "Shutdown signal".to_string(),
                });
                closed
            }
            Err(e) => {
                error!(class = %e.class(), "Engine stopped on fatal error: {}", e);
                if let Err(close_err) = closed {
                    warn!("Failed to close log after fatal error: {}", close_err);
                }
                self.emit_event(EngineEvent::Stopped {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Connect, acquire, back off, repeat
    ///
    /// Returns `Ok(())` on cancellation and `Err` only for fatal errors.
    async fn resilience_loop(&self, shutdown: &CancellationToken) -> Result<()> {
        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            self.set_state(LoopState::Connecting);
            let outcome = match self.sessions.connect_until(shutdown).await {
                Ok(Some(mut session)) => self.run_session(&mut session, shutdown).await,
                Ok(None) => return Ok(()),
                Err(e) => Err(e),
            };

            let e = match outcome {
                Ok(()) => return Ok(()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => e,
            };

            let class = e.class();
            warn!(%class, "Session failed, retrying in {:?}: {}", self.backoff, e);
            self.emit_event(EngineEvent::SessionFailed {
                class,
                error: e.to_string(),
            });
            self.set_state(LoopState::Disconnected);
            self.emit_event(EngineEvent::Backoff {
                delay: self.backoff,
            });

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received during backoff");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }
    }

    /// Run one connected session to its end and tear it down exactly once
    async fn run_session(
        &self,
        session: &mut SessionState,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        self.emit_event(EngineEvent::Connected {
            session_id: session.session_id(),
            resolved: session.handles().len(),
            dropped: session.dropped().len(),
        });
        for identifier in session.dropped() {
            self.emit_event(EngineEvent::VariableDropped {
                session_id: session.session_id(),
                identifier: identifier.clone(),
            });
        }

        let mut metadata = self.start_metadata(session).await;

        let outcome = if shutdown.is_cancelled() {
            info!(session_id = %session.session_id(), "Shutdown signal received while connecting");
            Ok(())
        } else {
            let mut strategy = build_strategy(
                self.mode,
                Arc::clone(self.sessions.transport()),
                self.interval,
                self.request_timeout,
            );
            let outcome = self.acquire(strategy.as_mut(), session, shutdown).await;
            strategy.stop(session).await;
            outcome
        };

        self.sessions.teardown(session).await;
        self.finish_metadata(metadata.as_mut(), session).await;

        outcome
    }

    async fn acquire(
        &self,
        strategy: &mut dyn AcquisitionStrategy,
        session: &mut SessionState,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        strategy.start(session).await?;
        self.set_state(LoopState::Acquiring);

        let mut snapshot = self.snapshot_interval.map(|interval| {
            SnapshotTask::spawn(
                Arc::clone(self.sessions.transport()),
                Arc::clone(&self.sink),
                session,
                interval,
                self.request_timeout,
                shutdown,
            )
        });

        let outcome = self
            .acquisition_loop(strategy, session, &mut snapshot, shutdown)
            .await;

        if let Some(task) = snapshot {
            task.stop(self.snapshot_join_timeout).await;
        }

        outcome
    }

    async fn acquisition_loop(
        &self,
        strategy: &mut dyn AcquisitionStrategy,
        session: &SessionState,
        snapshot: &mut Option<SnapshotTask>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        // Fresh per session: the first observation after a reconnect is
        // always a baseline
        let detector = ChangeDetector::new();

        loop {
            let batch = tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    return Ok(());
                }
                e = snapshot_failure(snapshot) => return Err(e),
                batch = strategy.next_batch(session) => batch?,
            };

            if let Some(elapsed) = batch.overrun {
                self.emit_event(EngineEvent::CycleOverrun {
                    elapsed,
                    period: self.interval,
                });
            }

            let mut written = 0;
            for observed in &batch.observations {
                let record = match batch.origin {
                    BatchOrigin::Poll => detector.observe(observed),
                    BatchOrigin::Push => Some(detector.record(observed)),
                };
                let Some(record) = record else {
                    continue;
                };

                let entry = LogEntry::Change(ChangeEntry::new(
                    session.session_id(),
                    session.next_seq(),
                    record,
                ));
                self.sink.append(&entry).await?;
                session.entry_written();
                written += 1;
            }

            if written > 0 {
                debug!(session_id = %session.session_id(), "Appended {} change records", written);
                self.emit_event(EngineEvent::RecordsWritten {
                    session_id: session.session_id(),
                    count: written,
                });
            }
        }
    }

    async fn start_metadata(&self, session: &SessionState) -> Option<RunMetadata> {
        let store = self.metadata.as_ref()?;
        let metadata = RunMetadata::started(
            session.session_id(),
            self.sessions.transport().endpoint(),
            self.mode,
            session
                .handles()
                .iter()
                .map(|h| h.descriptor.display_name.clone())
                .collect(),
            session.dropped().to_vec(),
            session.started_at(),
        );

        if let Err(e) = store.write(&metadata).await {
            warn!(session_id = %session.session_id(), "Failed to write run metadata: {}", e);
        }
        Some(metadata)
    }

    async fn finish_metadata(&self, metadata: Option<&mut RunMetadata>, session: &SessionState) {
        let (Some(store), Some(metadata)) = (self.metadata.as_ref(), metadata) else {
            return;
        };

        metadata.finish(Utc::now(), session.entries_written());
        if let Err(e) = store.write(metadata).await {
            warn!(session_id = %session.session_id(), "Failed to finalize run metadata: {}", e);
        }
    }

    fn set_state(&self, state: LoopState) {
        debug!("Engine state: {:?}", state);
        self.emit_event(EngineEvent::StateChanged { state });
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        // Never wait on a slow consumer; drop instead
        if let Err(mpsc::error::TrySendError::Full(_)) = self.event_tx.try_send(event) {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

/// Resolves when the snapshot task reports a fatal failure
async fn snapshot_failure(snapshot: &mut Option<SnapshotTask>) -> crate::Error {
    match snapshot {
        Some(task) => task.failed().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_event_equality() {
        let event = EngineEvent::SessionFailed {
            class: ErrorClass::Read,
            error: "Read error: session closed".to_string(),
        };
        assert_eq!(event.clone(), event);
        assert_ne!(
            EngineEvent::StateChanged {
                state: LoopState::Connecting
            },
            EngineEvent::StateChanged {
                state: LoopState::Acquiring
            }
        );
    }
}
