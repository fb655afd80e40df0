//! Acquisition strategies
//!
//! - [`PollingAcquirer`]: batched read on a fixed period
//! - [`SubscriptionAcquirer`]: server-pushed change notifications
//!
//! The engine builds one fresh strategy per session through
//! [`build_strategy`] and drives it only through
//! [`AcquisitionStrategy`](crate::traits::AcquisitionStrategy).

pub mod polling;
pub mod subscription;

pub use polling::PollingAcquirer;
pub use subscription::SubscriptionAcquirer;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::config::AcquisitionMode;
use crate::engine::session::bounded;
use crate::error::{Error, Operation, Result};
use crate::model::{ObservedValue, ResolvedHandle};
use crate::traits::{AcquisitionStrategy, DataValue, Transport};

/// Build the strategy for `mode`
///
/// `interval` is the poll period, or the publish interval in subscription
/// mode.
pub fn build_strategy(
    mode: AcquisitionMode,
    transport: Arc<dyn Transport>,
    interval: Duration,
    request_timeout: Duration,
) -> Box<dyn AcquisitionStrategy> {
    match mode {
        AcquisitionMode::Poll => Box::new(PollingAcquirer::new(transport, interval, request_timeout)),
        AcquisitionMode::Subscribe => Box::new(SubscriptionAcquirer::new(
            transport,
            interval,
            request_timeout,
        )),
    }
}

/// One batched read of `handles`
///
/// All observations share one local timestamp.
pub(crate) async fn read_all(
    transport: &dyn Transport,
    handles: &[ResolvedHandle],
    request_timeout: Duration,
) -> Result<Vec<ObservedValue>> {
    let live: Vec<_> = handles.iter().map(|h| h.live_handle).collect();
    let values = bounded(
        Operation::Read,
        request_timeout,
        transport.read_values(&live),
    )
    .await?;
    let local_timestamp = Utc::now();

    pair_values(handles, values, local_timestamp)
}

fn pair_values(
    handles: &[ResolvedHandle],
    values: Vec<DataValue>,
    local_timestamp: DateTime<Utc>,
) -> Result<Vec<ObservedValue>> {
    if values.len() != handles.len() {
        return Err(Error::read(format!(
            "Batched read returned {} values for {} handles",
            values.len(),
            handles.len()
        )));
    }

    Ok(handles
        .iter()
        .zip(values)
        .map(|(handle, value)| ObservedValue {
            handle: handle.clone(),
            value: value.value,
            source_timestamp: value.source_timestamp,
            server_timestamp: value.server_timestamp,
            local_timestamp,
        })
        .collect())
}
