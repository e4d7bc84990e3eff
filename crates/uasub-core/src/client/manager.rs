// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection lifecycle.
//!
//! [`ConnectionManager`] owns at most one live [`Session`] to one endpoint.
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = ConnectionManager::new(transport, config);
//!
//! manager
//!     .with_session(endpoint, Credentials::Anonymous, |session| async move {
//!         let node = session.resolve_by_id(2, "Simulation.TYPES").await?;
//!         session.read_value(&node).await
//!     })
//!     .await?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::client::session::{Session, SessionState};
use crate::client::transport::{ServerFrame, Transport};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult, ConfigurationError, ConnectionError, TimeoutError};
use crate::types::{Credentials, Endpoint};

// =============================================================================
// ConnectionStats
// =============================================================================

#[derive(Debug, Default)]
struct ConnectionStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    disconnects: AtomicU64,
}

impl ConnectionStats {
    fn snapshot(&self) -> ConnectionStatsSnapshot {
        ConnectionStatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
        }
    }
}

/// Connection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatsSnapshot {
    /// Transport open attempts, retries included.
    pub attempts: u64,
    /// Sessions established.
    pub successes: u64,
    /// `connect` calls that failed.
    pub failures: u64,
    /// Attempts made after a retryable failure.
    pub retries: u64,
    /// Sessions disconnected through the manager.
    pub disconnects: u64,
}

impl ConnectionStatsSnapshot {
    /// Ratio of established sessions to failed `connect` calls.
    pub fn success_rate(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            1.0
        } else {
            self.successes as f64 / total as f64
        }
    }
}

// =============================================================================
// ConnectionManager
// =============================================================================

/// Owns the session to one endpoint.
pub struct ConnectionManager<T: Transport> {
    transport: Arc<T>,
    config: Arc<ClientConfig>,
    shared: Arc<ManagerShared<T>>,
}

/// Manager state shared with the session guards it hands out.
struct ManagerShared<T: Transport> {
    state: RwLock<SessionState>,
    current: Mutex<Option<Session<T>>>,
    connect_lock: tokio::sync::Mutex<()>,
    stats: ConnectionStats,
}

impl<T: Transport> ManagerShared<T> {
    /// Disconnects `target`, or the current session when `None`.
    ///
    /// Holds the connect lock for the whole teardown, so a replacement
    /// session is never cleared by an older release.
    async fn release(&self, target: Option<Session<T>>) {
        let _connecting = self.connect_lock.lock().await;

        let released = {
            let mut current = self.current.lock();
            let owned = match (&target, current.as_ref()) {
                (Some(target), Some(live)) => target.id() == live.id(),
                (Some(_), None) => false,
                (None, _) => true,
            };
            if owned {
                current.take()
            } else {
                None
            }
        };

        if let Some(session) = released.as_ref().or(target.as_ref()) {
            session.disconnect().await;
        }
        if released.is_some() {
            self.stats.disconnects.fetch_add(1, Ordering::Relaxed);
        }
        if released.is_some() || target.is_none() {
            *self.state.write() = SessionState::Disconnected;
        }
    }
}

impl<T: Transport> ConnectionManager<T> {
    /// Creates a manager over a transport.
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self::with_shared(Arc::new(transport), config)
    }

    /// Creates a manager over a shared transport.
    pub fn with_shared(transport: Arc<T>, config: ClientConfig) -> Self {
        Self {
            transport,
            config: Arc::new(config),
            shared: Arc::new(ManagerShared {
                state: RwLock::new(SessionState::Disconnected),
                current: Mutex::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
                stats: ConnectionStats::default(),
            }),
        }
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the current connection state.
    pub fn state(&self) -> SessionState {
        match self.shared.current.lock().as_ref() {
            Some(session) => session.state(),
            None => *self.shared.state.read(),
        }
    }

    /// Returns the live session, if any.
    pub fn session(&self) -> Option<Session<T>> {
        self.shared
            .current
            .lock()
            .as_ref()
            .filter(|session| session.is_open())
            .cloned()
    }

    /// Returns connection counters.
    pub fn stats(&self) -> ConnectionStatsSnapshot {
        self.shared.stats.snapshot()
    }

    // =========================================================================
    // Connect
    // =========================================================================

    /// Connects to the endpoint configured in [`ClientConfig::endpoint`].
    pub async fn connect_configured(&self) -> ClientResult<Session<T>> {
        let endpoint = self
            .config
            .endpoint
            .clone()
            .ok_or_else(|| ConfigurationError::missing_field("endpoint"))?;
        self.connect(endpoint, self.config.credentials.clone()).await
    }

    /// Opens a session.
    ///
    /// Retryable connection failures are retried according to
    /// [`ClientConfig::retry`]. Authentication, version and timeout failures
    /// are returned at once.
    #[instrument(skip(self, endpoint, credentials), fields(endpoint = %endpoint))]
    pub async fn connect(&self, endpoint: Endpoint, credentials: Credentials) -> ClientResult<Session<T>> {
        endpoint.validate()?;

        let _guard = self.shared.connect_lock.lock().await;

        let stale = {
            let mut current = self.shared.current.lock();
            match current.as_ref() {
                Some(session) if session.is_open() => {
                    return Err(ConnectionError::already_connected(session.endpoint().to_string()).into());
                }
                Some(_) => current.take(),
                None => None,
            }
        };
        if let Some(stale) = stale {
            debug!(session_id = %stale.id(), "Releasing failed session");
            stale.disconnect().await;
        }

        *self.shared.state.write() = SessionState::Connecting;

        match self.open_with_retry(&endpoint, &credentials).await {
            Ok(frames) => {
                let session = Session::start(
                    Arc::clone(&self.transport),
                    endpoint,
                    Arc::clone(&self.config),
                    frames,
                );
                *self.shared.current.lock() = Some(session.clone());
                *self.shared.state.write() = SessionState::Connected;
                self.shared.stats.successes.fetch_add(1, Ordering::Relaxed);

                info!(
                    session_id = %session.id(),
                    transport = self.transport.display_name(),
                    user = credentials.username().unwrap_or("anonymous"),
                    "Session established"
                );
                Ok(session)
            }
            Err(e) => {
                *self.shared.state.write() = SessionState::Failed;
                self.shared.stats.failures.fetch_add(1, Ordering::Relaxed);
                e.log("connect");
                Err(e)
            }
        }
    }

    async fn open_with_retry(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> ClientResult<mpsc::Receiver<ServerFrame>> {
        let retry = &self.config.retry;
        let mut attempt = 0;

        loop {
            self.shared.stats.attempts.fetch_add(1, Ordering::Relaxed);

            let error = match self.open_once(endpoint, credentials).await {
                Ok(frames) => return Ok(frames),
                Err(error) => error,
            };

            let retryable = matches!(&error, ClientError::Connection(e) if e.is_retryable());
            if !retryable || attempt >= retry.max_retries {
                return Err(error);
            }

            let delay = retry.delay_for_attempt(attempt);
            debug!(
                attempt = attempt + 1,
                max_retries = retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying connect"
            );

            self.shared.stats.retries.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn open_once(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> ClientResult<mpsc::Receiver<ServerFrame>> {
        let deadline = self.config.connect_timeout;

        match tokio::time::timeout(deadline, self.transport.open(endpoint, credentials)).await {
            Ok(Ok(frames)) => Ok(frames),
            Ok(Err(e)) => {
                self.close_quietly().await;
                Err(e)
            }
            Err(_) => {
                self.close_quietly().await;
                Err(TimeoutError::connect(endpoint.url.clone(), deadline).into())
            }
        }
    }

    async fn close_quietly(&self) {
        let deadline = self.config.request_timeout;
        match tokio::time::timeout(deadline, self.transport.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Transport close after failed open"),
            Err(_) => debug!("Timed out closing transport after failed open"),
        }
    }

    // =========================================================================
    // Disconnect
    // =========================================================================

    /// Closes the current session, if any. Never fails.
    pub async fn disconnect(&self) {
        self.shared.release(None).await;
    }

    // =========================================================================
    // Scoped Acquisition
    // =========================================================================

    /// Connects and returns a guard that disconnects when dropped.
    pub async fn scoped(&self, endpoint: Endpoint, credentials: Credentials) -> ClientResult<SessionGuard<T>> {
        let session = self.connect(endpoint, credentials).await?;
        Ok(SessionGuard::new(Arc::clone(&self.shared), session))
    }

    /// Runs `f` with a fresh session and disconnects afterwards.
    ///
    /// The session is also released when `f` fails or panics, and when the
    /// returned future is dropped before completion.
    pub async fn with_session<F, Fut, R>(
        &self,
        endpoint: Endpoint,
        credentials: Credentials,
        f: F,
    ) -> ClientResult<R>
    where
        F: FnOnce(Session<T>) -> Fut,
        Fut: Future<Output = ClientResult<R>>,
    {
        let session = self.connect(endpoint, credentials).await?;
        let guard = SessionGuard::new(Arc::clone(&self.shared), session.clone());
        let result = f(session).await;
        guard.release().await;
        result
    }
}

impl<T: Transport> fmt::Debug for ConnectionManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("transport", &self.transport.display_name())
            .field("state", &self.state())
            .field("stats", &self.shared.stats.snapshot())
            .finish()
    }
}

// =============================================================================
// SessionGuard
// =============================================================================

/// Disconnects its session when dropped.
///
/// Prefer [`release`](Self::release), which waits for the disconnect to
/// finish. On drop the disconnect is spawned onto the current runtime.
/// Either way the manager forgets the session if it is still current.
pub struct SessionGuard<T: Transport> {
    manager: Arc<ManagerShared<T>>,
    session: Session<T>,
    armed: bool,
}

impl<T: Transport> SessionGuard<T> {
    fn new(manager: Arc<ManagerShared<T>>, session: Session<T>) -> Self {
        Self {
            manager,
            session,
            armed: true,
        }
    }

    /// Returns the guarded session.
    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    /// Disconnects and waits for completion.
    pub async fn release(mut self) {
        self.manager.release(Some(self.session.clone())).await;
        self.armed = false;
    }
}

impl<T: Transport> std::ops::Deref for SessionGuard<T> {
    type Target = Session<T>;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl<T: Transport> Drop for SessionGuard<T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let manager = Arc::clone(&self.manager);
        let session = self.session.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { manager.release(Some(session)).await });
            }
            Err(_) => warn!(
                session_id = %session.id(),
                "Session guard dropped outside a runtime; session not disconnected"
            ),
        }
    }
}

impl<T: Transport> fmt::Debug for SessionGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard")
            .field("session", &self.session)
            .field("armed", &self.armed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate() {
        let empty = ConnectionStatsSnapshot::default();
        assert_eq!(empty.success_rate(), 1.0);

        let stats = ConnectionStatsSnapshot {
            successes: 3,
            failures: 1,
            ..Default::default()
        };
        assert!((stats.success_rate() - 0.75).abs() < f64::EPSILON);
    }
}
