// # Subscription Acquirer
//
// Registers one subscription covering every resolved handle and hands the
// pushed notifications to the control task.
//
// ## Concurrency Boundary
//
// ```text
// transport dispatch ──callback──► unbounded channel ──next_batch──► engine
// ```
//
// The callback only sends into the channel, so it never blocks the
// transport's dispatch. Detection and durable writes happen on the control
// task when it pulls the next batch.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::config::AcquisitionMode;
use crate::engine::session::{SessionState, bounded};
use crate::error::{Error, Operation, Result};
use crate::model::ObservedValue;
use crate::traits::{
    AcquisitionStrategy, Batch, NotificationCallback, SubscriptionEvent, Transport,
};

/// Server-pushed change notifications
pub struct SubscriptionAcquirer {
    transport: Arc<dyn Transport>,
    publish_interval: Duration,
    request_timeout: Duration,
    events: Option<UnboundedReceiverStream<SubscriptionEvent>>,
}

impl SubscriptionAcquirer {
    pub fn new(
        transport: Arc<dyn Transport>,
        publish_interval: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            publish_interval,
            request_timeout,
            events: None,
        }
    }

    fn observe(session: &SessionState, event: SubscriptionEvent) -> Result<Option<ObservedValue>> {
        match event {
            SubscriptionEvent::DataChange { handle, value } => match session.lookup(&handle) {
                Some(resolved) => Ok(Some(ObservedValue {
                    handle: resolved.clone(),
                    value: value.value,
                    source_timestamp: value.source_timestamp,
                    server_timestamp: value.server_timestamp,
                    local_timestamp: Utc::now(),
                })),
                None => {
                    debug!(session_id = %session.session_id(), %handle, "Ignoring notification for unknown handle");
                    Ok(None)
                }
            },
            SubscriptionEvent::Lost { reason } => Err(Error::subscription(format!(
                "Subscription lost: {}",
                reason
            ))),
        }
    }
}

#[async_trait]
impl AcquisitionStrategy for SubscriptionAcquirer {
    fn mode(&self) -> AcquisitionMode {
        AcquisitionMode::Subscribe
    }

    async fn start(&mut self, session: &mut SessionState) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: NotificationCallback = Arc::new(move |event| {
            // Receiver gone means the session is over; nothing to deliver to
            let _ = tx.send(event);
        });

        let subscription = bounded(
            Operation::CreateSubscription,
            self.request_timeout,
            self.transport
                .create_subscription(self.publish_interval, callback),
        )
        .await
        .map_err(into_subscription_error)?;

        // Recorded before subscribing so teardown deletes it even if the
        // next step fails
        session.subscription = Some(subscription);

        let handles = session.live_handles();
        if let Err(e) = bounded(
            Operation::Subscribe,
            self.request_timeout,
            self.transport.subscribe(subscription, &handles),
        )
        .await
        {
            warn!(
                session_id = %session.session_id(),
                %subscription,
                "Failed to subscribe {} handles: {}",
                handles.len(),
                e
            );
            if let Err(delete_err) = bounded(
                Operation::DeleteSubscription,
                self.request_timeout,
                self.transport.delete_subscription(subscription),
            )
            .await
            {
                debug!(
                    session_id = %session.session_id(),
                    %subscription,
                    "Ignoring error deleting subscription: {}",
                    delete_err
                );
            }
            session.subscription = None;
            return Err(into_subscription_error(e));
        }

        info!(
            session_id = %session.session_id(),
            "Subscribed {} variables on {} (publish interval {:?})",
            handles.len(),
            subscription,
            self.publish_interval
        );
        self.events = Some(UnboundedReceiverStream::new(rx));
        Ok(())
    }

    async fn next_batch(&mut self, session: &SessionState) -> Result<Batch> {
        let events = self
            .events
            .as_mut()
            .ok_or_else(|| Error::subscription("Subscription not started"))?;

        loop {
            let event = events
                .next()
                .await
                .ok_or_else(|| Error::subscription("Notification channel closed"))?;

            if let Some(observed) = Self::observe(session, event)? {
                return Ok(Batch::push(vec![observed]));
            }
        }
    }

    async fn stop(&mut self, session: &mut SessionState) {
        self.events = None;

        if let Some(subscription) = session.subscription.take() {
            match bounded(
                Operation::DeleteSubscription,
                self.request_timeout,
                self.transport.delete_subscription(subscription),
            )
            .await
            {
                Ok(()) => debug!(
                    session_id = %session.session_id(),
                    %subscription,
                    "Deleted subscription"
                ),
                Err(e) => debug!(
                    session_id = %session.session_id(),
                    %subscription,
                    "Ignoring error deleting subscription: {}",
                    e
                ),
            }
        }
    }
}

/// Failures while registering a subscription are subscription errors
fn into_subscription_error(e: Error) -> Error {
    match e {
        Error::Subscription(_) | Error::Timeout { .. } => e,
        other => Error::subscription(other.to_string()),
    }
}
