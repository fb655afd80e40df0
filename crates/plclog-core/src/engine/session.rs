//! Session setup and teardown
//!
//! A [`SessionState`] holds everything derived from one live session with
//! the endpoint: resolved handles, the subscription, the session id and the
//! entry sequence. It is built by [`SessionManager::connect`] and torn down
//! as a whole. Nothing in it is ever patched and reused after a failure.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::VariableCatalog;
use crate::error::{Error, Operation, Result};
use crate::model::ResolvedHandle;
use crate::traits::{LiveHandle, SubscriptionId, Transport};

/// Bound one transport call by `limit`
pub(crate) async fn bounded<T, F>(operation: Operation, limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(operation, limit)),
    }
}

/// State derived from one live session
#[derive(Debug)]
pub struct SessionState {
    session_id: Uuid,
    connected: bool,
    handles: Vec<ResolvedHandle>,
    index: HashMap<LiveHandle, usize>,
    /// Active subscription, if the strategy created one
    pub subscription: Option<SubscriptionId>,
    dropped: Vec<String>,
    started_at: DateTime<Utc>,
    sequence: Arc<AtomicU64>,
    written: Arc<AtomicU64>,
}

impl SessionState {
    /// Empty, disconnected state with a fresh session id
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            connected: false,
            handles: Vec::new(),
            index: HashMap::new(),
            subscription: None,
            dropped: Vec::new(),
            started_at: Utc::now(),
            sequence: Arc::new(AtomicU64::new(0)),
            written: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Resolved handles, in catalog order
    pub fn handles(&self) -> &[ResolvedHandle] {
        &self.handles
    }

    /// Live handles, in catalog order, for batched requests
    pub fn live_handles(&self) -> Vec<LiveHandle> {
        self.handles.iter().map(|h| h.live_handle).collect()
    }

    /// Find the resolved handle behind a live handle
    ///
    /// Returns `None` for handles this session did not issue.
    pub fn lookup(&self, handle: &LiveHandle) -> Option<&ResolvedHandle> {
        self.index.get(handle).map(|i| &self.handles[*i])
    }

    /// Identifiers that failed to resolve for this session
    pub fn dropped(&self) -> &[String] {
        &self.dropped
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Next entry sequence number for this session
    pub fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Number of sequence numbers handed out so far
    pub fn entries_assigned(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Sequence counter shared with tasks that write on behalf of this session
    pub fn sequence(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.sequence)
    }

    /// Count one entry the sink accepted
    pub fn entry_written(&self) {
        self.written.fetch_add(1, Ordering::SeqCst);
    }

    /// Entries of this session the sink accepted
    ///
    /// Lower than [`entries_assigned`](Self::entries_assigned) when an
    /// append failed after its sequence number was taken.
    pub fn entries_written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }

    /// Accepted-entry counter shared with tasks that write on behalf of this session
    pub fn written_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.written)
    }

    fn insert(&mut self, handle: ResolvedHandle) {
        self.index.insert(handle.live_handle, self.handles.len());
        self.handles.push(handle);
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Opens and closes sessions against one transport
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    catalog: VariableCatalog,
    request_timeout: Duration,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        catalog: VariableCatalog,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            catalog,
            request_timeout,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn catalog(&self) -> &VariableCatalog {
        &self.catalog
    }

    /// Open a session and resolve the catalog against it
    ///
    /// A variable that fails to resolve is dropped from this session with a
    /// warning. The connect fails only when the handshake fails or nothing
    /// resolves.
    pub async fn connect(&self) -> Result<SessionState> {
        self.connect_until(&CancellationToken::new())
            .await?
            .ok_or_else(|| Error::connection("Connect abandoned"))
    }

    /// [`connect`](Self::connect), abandoned as soon as `shutdown` fires
    ///
    /// Every transport call is raced against the token, so a hanging
    /// handshake or resolve never holds up shutdown for longer than the
    /// best-effort disconnect. Returns `Ok(None)` when cancelled; whatever
    /// was opened has been torn down by then.
    pub async fn connect_until(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<Option<SessionState>> {
        let mut state = SessionState::new();

        // Counted as connected from the first byte: a handshake cut short
        // may still have opened something on the endpoint side
        state.connected = true;
        let handshake = tokio::select! {
            biased;

            _ = shutdown.cancelled() => None,
            result = bounded(Operation::Connect, self.request_timeout, self.transport.connect()) => Some(result),
        };
        match handshake {
            None => {
                info!(session_id = %state.session_id, "Shutdown signal received during handshake");
                self.teardown(&mut state).await;
                return Ok(None);
            }
            Some(Err(e)) => {
                state.connected = false;
                return Err(match e {
                    Error::Timeout { .. } | Error::Connection(_) => e,
                    other => Error::connection(other.to_string()),
                });
            }
            Some(Ok(())) => {}
        }
        debug!(
            session_id = %state.session_id,
            endpoint = self.transport.endpoint(),
            "Session opened"
        );

        for descriptor in self.catalog.iter() {
            let resolved = tokio::select! {
                biased;

                _ = shutdown.cancelled() => None,
                result = bounded(
                    Operation::Resolve,
                    self.request_timeout,
                    self.transport.resolve(&descriptor.identifier),
                ) => Some(result),
            };

            match resolved {
                None => {
                    info!(
                        session_id = %state.session_id,
                        identifier = %descriptor.identifier,
                        "Shutdown signal received while resolving"
                    );
                    self.teardown(&mut state).await;
                    return Ok(None);
                }
                Some(Ok(resolution)) => {
                    debug!(
                        session_id = %state.session_id,
                        identifier = %descriptor.identifier,
                        variable = %descriptor.display_name,
                        handle = %resolution.handle,
                        "Resolved as {:?}",
                        resolution.data_kind
                    );
                    state.insert(ResolvedHandle {
                        descriptor: descriptor.clone(),
                        live_handle: resolution.handle,
                        data_kind: resolution.data_kind,
                    });
                }
                Some(Err(e)) => {
                    warn!(
                        session_id = %state.session_id,
                        identifier = %descriptor.identifier,
                        variable = %descriptor.display_name,
                        "Failed to resolve, dropping it for this session: {}",
                        e
                    );
                    state.dropped.push(descriptor.identifier.clone());
                }
            }
        }

        if state.handles.is_empty() {
            self.teardown(&mut state).await;
            return Err(Error::NothingResolved {
                attempted: self.catalog.len(),
            });
        }

        info!(
            session_id = %state.session_id,
            endpoint = self.transport.endpoint(),
            "Connected: {} variables resolved, {} dropped",
            state.handles.len(),
            state.dropped.len()
        );
        Ok(Some(state))
    }

    /// Release everything a session holds
    ///
    /// Best effort: secondary errors are logged and swallowed. Calling this
    /// again on the same state does nothing.
    pub async fn teardown(&self, state: &mut SessionState) {
        if let Some(subscription) = state.subscription.take() {
            if let Err(e) = bounded(
                Operation::DeleteSubscription,
                self.request_timeout,
                self.transport.delete_subscription(subscription),
            )
            .await
            {
                debug!(
                    session_id = %state.session_id,
                    "Ignoring error deleting {} during teardown: {}",
                    subscription,
                    e
                );
            }
        }

        if state.connected {
            state.connected = false;
            if let Err(e) = bounded(
                Operation::Disconnect,
                self.request_timeout,
                self.transport.disconnect(),
            )
            .await
            {
                warn!(
                    session_id = %state.session_id,
                    endpoint = self.transport.endpoint(),
                    "Ignoring error during disconnect: {}",
                    e
                );
            } else {
                debug!(session_id = %state.session_id, "Session closed");
            }
        }

        state.handles.clear();
        state.index.clear();
    }
}
