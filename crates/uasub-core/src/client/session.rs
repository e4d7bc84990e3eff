// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Live sessions.
//!
//! A [`Session`] is a cheap, cloneable reference to one open connection. It
//! is created by [`ConnectionManager::connect`](super::manager::ConnectionManager::connect)
//! and stays usable until [`Session::disconnect`] is called or the server
//! channel is lost.
//!
//! # Round Trips
//!
//! Every request goes through a single wrapper that
//!
//! - fails immediately with `ConnectionClosed` once the session is closed,
//! - bounds the request with the configured request timeout,
//! - aborts the request with `ConnectionClosed` when the session closes
//!   while it is in flight.
//!
//! A timed out request is abandoned and never retried; the session stays
//! usable.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex, OnceCell};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::dispatcher::{DispatchStatsSnapshot, NotificationDispatcher};
use crate::client::handler::NotificationHandler;
use crate::client::locator::{NodeHandle, NodeLocator};
use crate::client::registry::{RegistryState, SubscriptionHandle, SubscriptionRegistry};
use crate::client::transport::{DataValue, ServerFrame, Transport, Variant};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult, OperationError, ResolutionError};
use crate::types::{BrowsePath, Endpoint, NodeId, NodeIdentifier};

// =============================================================================
// SessionState
// =============================================================================

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No connection.
    #[default]
    Disconnected,

    /// Opening the channel.
    Connecting,

    /// Connected and usable.
    Connected,

    /// Connecting failed or the channel was lost.
    Failed,
}

impl SessionState {
    /// Returns `true` if the session is usable.
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` if the last connection attempt or channel failed.
    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// SessionToken
// =============================================================================

/// Liveness token shared weakly with every handle issued by a session.
#[derive(Debug)]
pub(crate) struct SessionToken {
    id: Uuid,
    closed: AtomicBool,
}

impl SessionToken {
    pub(crate) fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the token closed. Returns `true` if it was already closed.
    fn close(&self) -> bool {
        self.closed.swap(true, Ordering::AcqRel)
    }
}

// =============================================================================
// RequestStats
// =============================================================================

#[derive(Debug, Default)]
struct RequestStats {
    requests: AtomicU64,
    timeouts: AtomicU64,
    cancelled: AtomicU64,
}

/// Request counters of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Round trips started.
    pub requests: u64,
    /// Round trips that exceeded the request timeout.
    pub timeouts: u64,
    /// Round trips aborted because the session closed.
    pub cancelled: u64,
    /// Dispatcher counters.
    pub dispatch: DispatchStatsSnapshot,
}

// =============================================================================
// Session
// =============================================================================

pub(crate) struct SessionInner<T: Transport> {
    token: Arc<SessionToken>,
    endpoint: Endpoint,
    transport: Arc<T>,
    config: Arc<ClientConfig>,
    state: RwLock<SessionState>,
    closed_tx: watch::Sender<bool>,
    teardown: OnceCell<()>,
    dispatcher: NotificationDispatcher,
    registry: Mutex<RegistryState>,
    stats: RequestStats,
    connected_at: DateTime<Utc>,
}

/// A connected session.
pub struct Session<T: Transport> {
    inner: Arc<SessionInner<T>>,
}

impl<T: Transport> Clone for Session<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> Session<T> {
    /// Wraps a freshly opened channel and starts its receiving task.
    pub(crate) fn start(
        transport: Arc<T>,
        endpoint: Endpoint,
        config: Arc<ClientConfig>,
        frames: mpsc::Receiver<ServerFrame>,
    ) -> Self {
        let (closed_tx, _) = watch::channel(false);
        let inner = Arc::new(SessionInner {
            token: Arc::new(SessionToken::new()),
            endpoint,
            transport,
            dispatcher: NotificationDispatcher::new(
                config.handler_timeout,
                config.dispatch_queue_capacity,
            ),
            config,
            state: RwLock::new(SessionState::Connected),
            closed_tx,
            teardown: OnceCell::new(),
            registry: Mutex::new(RegistryState::new()),
            stats: RequestStats::default(),
            connected_at: Utc::now(),
        });

        let weak: Weak<SessionInner<T>> = Arc::downgrade(&inner);
        inner.dispatcher.start(
            frames,
            Box::new(move |reason| {
                if let Some(inner) = weak.upgrade() {
                    Session { inner }.mark_failed(&reason);
                }
            }),
        );

        Self { inner }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the session id.
    pub fn id(&self) -> Uuid {
        self.inner.token.id()
    }

    /// Returns the endpoint this session is connected to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    /// Returns `true` until the session is disconnected or fails.
    pub fn is_open(&self) -> bool {
        !self.inner.token.is_closed()
    }

    /// Returns when the session was established.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.inner.connected_at
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns request and dispatch counters.
    pub fn stats(&self) -> SessionStats {
        let stats = &self.inner.stats;
        SessionStats {
            requests: stats.requests.load(Ordering::Relaxed),
            timeouts: stats.timeouts.load(Ordering::Relaxed),
            cancelled: stats.cancelled.load(Ordering::Relaxed),
            dispatch: self.inner.dispatcher.stats(),
        }
    }

    /// Returns the node locator of this session.
    pub fn locator(&self) -> NodeLocator<T> {
        NodeLocator::new(self.clone())
    }

    /// Returns the subscription registry of this session.
    pub fn registry(&self) -> SubscriptionRegistry<T> {
        SubscriptionRegistry::new(self.clone())
    }

    /// Returns the notification dispatcher.
    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.inner.dispatcher
    }

    pub(crate) fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub(crate) fn token(&self) -> &Arc<SessionToken> {
        &self.inner.token
    }

    pub(crate) fn registry_state(&self) -> &Mutex<RegistryState> {
        &self.inner.registry
    }

    // =========================================================================
    // Convenience
    // =========================================================================

    /// Resolves a node by namespace index and identifier.
    pub async fn resolve_by_id(
        &self,
        namespace_index: u16,
        identifier: impl Into<NodeIdentifier>,
    ) -> ClientResult<NodeHandle> {
        self.locator().resolve_by_id(namespace_index, identifier).await
    }

    /// Resolves a node by browse path from `root`.
    pub async fn resolve_by_path(&self, root: &NodeId, path: &BrowsePath) -> ClientResult<NodeHandle> {
        self.locator().resolve_by_path(root, path).await
    }

    /// Subscribes a handler to data changes of a node.
    pub async fn subscribe(
        &self,
        node: &NodeHandle,
        interval: Duration,
        handler: Arc<dyn NotificationHandler>,
    ) -> ClientResult<SubscriptionHandle> {
        self.registry().subscribe(node, interval, handler).await
    }

    /// Removes one subscription registration.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> ClientResult<()> {
        self.registry().unsubscribe(handle).await
    }

    // =========================================================================
    // Value Services
    // =========================================================================

    /// Reads the current value of a node.
    pub async fn read_value(&self, node: &NodeHandle) -> ClientResult<DataValue> {
        self.check_handle(node)?;
        let value = self
            .call("read_value", self.transport().read_value(node.node_id()))
            .await?;

        if value.status.is_bad() {
            return Err(OperationError::read_failed(node.node_id().to_string(), value.status.0).into());
        }
        Ok(value)
    }

    /// Writes the value of a node.
    pub async fn write_value(&self, node: &NodeHandle, value: impl Into<Variant>) -> ClientResult<()> {
        self.check_handle(node)?;
        let status = self
            .call(
                "write_value",
                self.transport().write_value(node.node_id(), value.into()),
            )
            .await?;

        if !status.is_good() {
            return Err(OperationError::write_failed(node.node_id().to_string(), status.0).into());
        }
        Ok(())
    }

    /// Looks up a namespace index by URI.
    pub async fn namespace_index(&self, uri: &str) -> ClientResult<u16> {
        self.call("namespace_index", self.transport().namespace_index(uri))
            .await?
            .ok_or_else(|| ResolutionError::namespace_not_found(uri).into())
    }

    // =========================================================================
    // Request Plumbing
    // =========================================================================

    /// Fails with `ConnectionClosed` if the session is closed.
    pub(crate) fn ensure_open(&self, operation: &str) -> ClientResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ClientError::connection_closed(operation))
        }
    }

    /// Fails if the handle is foreign to this session or stale.
    pub(crate) fn check_handle(&self, handle: &NodeHandle) -> ClientResult<()> {
        if handle.session_id() != self.id() {
            return Err(ResolutionError::foreign_handle(handle.node_id().to_string()).into());
        }
        if !handle.is_valid() || !self.is_open() {
            return Err(ResolutionError::stale_handle(handle.node_id().to_string()).into());
        }
        Ok(())
    }

    /// Runs one round trip under the request timeout and the closed flag.
    pub(crate) async fn call<R, Fut>(&self, operation: &str, request: Fut) -> ClientResult<R>
    where
        Fut: Future<Output = ClientResult<R>>,
    {
        self.ensure_open(operation)?;

        let stats = &self.inner.stats;
        let deadline = self.inner.config.request_timeout;
        let mut closed = self.inner.closed_tx.subscribe();
        stats.requests.fetch_add(1, Ordering::Relaxed);

        tokio::select! {
            biased;

            _ = closed.wait_for(|closed| *closed) => {
                stats.cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(operation, "Request aborted: session closed");
                Err(ClientError::connection_closed(operation))
            }

            result = tokio::time::timeout(deadline, request) => match result {
                Ok(result) => result,
                Err(_) => {
                    stats.timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        operation,
                        timeout_ms = deadline.as_millis() as u64,
                        "Request timed out"
                    );
                    Err(ClientError::request_timeout(operation, deadline))
                }
            },
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Marks the session failed after the server channel was lost.
    ///
    /// In-flight requests are aborted and handles become stale. Resources are
    /// released by a later [`disconnect`](Self::disconnect).
    pub(crate) fn mark_failed(&self, reason: &str) {
        if self.inner.token.close() {
            return;
        }
        self.inner.closed_tx.send_replace(true);
        *self.inner.state.write() = SessionState::Failed;
        error!(
            session_id = %self.id(),
            endpoint = %self.inner.endpoint,
            reason,
            "Session lost"
        );
    }

    /// Closes the session.
    ///
    /// Never fails and may be called any number of times, also concurrently.
    /// Every caller waits for the same teardown. Before returning it aborts
    /// in-flight requests and invalidates every node and subscription handle.
    /// It also stops notification delivery, deletes the server subscriptions
    /// on a best effort basis and closes the transport.
    pub async fn disconnect(&self) {
        self.inner.teardown.get_or_init(|| self.teardown()).await;
    }

    async fn teardown(&self) {
        let inner = &self.inner;
        inner.token.close();
        inner.closed_tx.send_replace(true);
        info!(session_id = %self.id(), endpoint = %inner.endpoint, "Disconnecting session");

        let subscriptions = inner.registry.lock().await.clear();
        inner.dispatcher.shutdown().await;

        let deadline = inner.config.request_timeout;
        for subscription_id in subscriptions {
            match tokio::time::timeout(deadline, inner.transport.delete_subscription(subscription_id)).await {
                Ok(Ok(())) => debug!(subscription_id, "Server subscription deleted"),
                Ok(Err(e)) => warn!(subscription_id, error = %e, "Failed to delete server subscription"),
                Err(_) => warn!(subscription_id, "Timed out deleting server subscription"),
            }
        }

        match tokio::time::timeout(deadline, inner.transport.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Transport close failed"),
            Err(_) => warn!("Timed out closing transport"),
        }

        *inner.state.write() = SessionState::Disconnected;
        info!(session_id = %self.id(), "Session disconnected");
    }
}

impl<T: Transport> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("endpoint", &self.inner.endpoint.url)
            .field("state", &self.state())
            .field("transport", &self.inner.transport.display_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state() {
        assert_eq!(SessionState::default(), SessionState::Disconnected);
        assert!(SessionState::Connected.is_connected());
        assert!(SessionState::Failed.is_failed());
        assert_eq!(SessionState::Connecting.to_string(), "Connecting");
    }

    #[test]
    fn test_token_close_once() {
        let token = SessionToken::new();
        assert!(!token.is_closed());
        assert!(!token.close());
        assert!(token.close());
        assert!(token.is_closed());
    }
}
