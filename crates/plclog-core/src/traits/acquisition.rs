// # Acquisition Strategy Trait
//
// One abstraction over the two ways values reach the engine:
//
// - Polling: the engine pulls a batched read on a fixed cadence
// - Subscription: the endpoint pushes change notifications
//
// Both feed the same ChangeDetector → RecordSink path in the engine.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::AcquisitionMode;
use crate::engine::session::SessionState;
use crate::model::ObservedValue;

/// Where a batch came from, which decides how it is filtered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOrigin {
    /// Full read of every resolved handle; filter locally
    Poll,
    /// Server-detected change; always recorded
    Push,
}

/// Observations delivered by one acquisition step
#[derive(Debug, Clone)]
pub struct Batch {
    pub origin: BatchOrigin,
    pub observations: Vec<ObservedValue>,
    /// Set when the previous poll cycle ran past its period
    pub overrun: Option<Duration>,
}

impl Batch {
    /// Batch of pushed notifications
    pub fn push(observations: Vec<ObservedValue>) -> Self {
        Self {
            origin: BatchOrigin::Push,
            observations,
            overrun: None,
        }
    }
}

/// Trait for acquisition strategies
///
/// A strategy instance lives for exactly one session: the engine builds a
/// fresh one after every reconnect.
///
/// # Cancellation
///
/// The engine races [`next_batch`](AcquisitionStrategy::next_batch) against
/// the stop signal and drops it when the signal wins, so implementations
/// must keep no partial state across an await that matters after a drop.
#[async_trait]
pub trait AcquisitionStrategy: Send {
    /// Which mode this strategy implements
    fn mode(&self) -> AcquisitionMode;

    /// Prepare acquisition for a freshly connected session
    ///
    /// # Returns
    ///
    /// - `Ok(())`: ready to deliver batches
    /// - `Err(Error)`: a retryable subscription error (or timeout)
    async fn start(&mut self, session: &mut SessionState) -> Result<(), crate::Error>;

    /// Wait for and return the next batch
    ///
    /// Errors are session-level: the engine tears the session down and
    /// reconnects. Nothing is retried here.
    async fn next_batch(&mut self, session: &SessionState) -> Result<Batch, crate::Error>;

    /// Release what `start` created; safe to call more than once
    async fn stop(&mut self, session: &mut SessionState);
}
