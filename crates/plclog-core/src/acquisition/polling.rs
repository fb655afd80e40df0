// # Polling Acquirer
//
// Reads every resolved handle in one batched request per cycle.
//
// ## Cadence
//
// Each cycle measures the time since the previous cycle started and sleeps
// for the rest of the period. A cycle that ran past its period logs an
// overrun and starts the next one immediately: no skipped cycles, no
// catch-up burst.
//
// Read failures are never retried here. They end the session.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::config::AcquisitionMode;
use crate::engine::session::SessionState;
use crate::error::Result;
use crate::traits::{AcquisitionStrategy, Batch, BatchOrigin, Transport};

/// Fixed-period batched reads
pub struct PollingAcquirer {
    transport: Arc<dyn Transport>,
    period: Duration,
    request_timeout: Duration,
    last_started: Option<Instant>,
    overruns: u64,
}

impl PollingAcquirer {
    pub fn new(transport: Arc<dyn Transport>, period: Duration, request_timeout: Duration) -> Self {
        Self {
            transport,
            period,
            request_timeout,
            last_started: None,
            overruns: 0,
        }
    }

    /// Number of cycles that ran past their period
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Wait until the next cycle is due
    ///
    /// Returns the elapsed time of the previous cycle when it overran.
    async fn pace(&mut self) -> Option<Duration> {
        let last = self.last_started?;
        let elapsed = last.elapsed();
        if elapsed >= self.period {
            self.overruns += 1;
            warn!(
                "Poll cycle overran: {:?} elapsed, period {:?}",
                elapsed, self.period
            );
            Some(elapsed)
        } else {
            tokio::time::sleep(self.period - elapsed).await;
            None
        }
    }
}

#[async_trait]
impl AcquisitionStrategy for PollingAcquirer {
    fn mode(&self) -> AcquisitionMode {
        AcquisitionMode::Poll
    }

    async fn start(&mut self, _session: &mut SessionState) -> Result<()> {
        self.last_started = None;
        Ok(())
    }

    async fn next_batch(&mut self, session: &SessionState) -> Result<Batch> {
        let overrun = self.pace().await;
        self.last_started = Some(Instant::now());

        let observations =
            super::read_all(self.transport.as_ref(), session.handles(), self.request_timeout).await?;

        Ok(Batch {
            origin: BatchOrigin::Poll,
            observations,
            overrun,
        })
    }

    async fn stop(&mut self, _session: &mut SessionState) {
        self.last_started = None;
    }
}
