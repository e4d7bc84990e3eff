// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Notification dispatch.
//!
//! # Architecture
//!
//! ```text
//! Transport push stream
//!        │
//!        ▼
//! ┌──────────────────┐   try_send    ┌───────────────┐    ┌─────────────────┐
//! │ receiving task   │──────────────▶│ queue (sub 1) │───▶│ worker (sub 1)  │──▶ handlers
//! │ (routes by       │               └───────────────┘    └─────────────────┘
//! │  subscription)   │──────────────▶│ queue (sub 2) │───▶│ worker (sub 2)  │──▶ handlers
//! └──────────────────┘               └───────────────┘    └─────────────────┘
//! ```
//!
//! The receiving task never awaits a handler. Each server subscription has a
//! bounded queue drained by a single worker, which preserves server delivery
//! order per subscription. When a queue is full the frame is dropped and
//! counted.
//!
//! Every handler invocation runs on its own task under the handler timeout.
//! Errors, panics and timeouts are logged with the handler name and node and
//! dispatch moves on.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn, warn_span};

use crate::client::handler::NotificationHandler;
use crate::client::notification::{DataChange, EventNotification, Notification};
use crate::client::transport::ServerFrame;
use crate::error::{ClientError, HandlerError};
use crate::types::{MonitorKind, NodeId};

// =============================================================================
// DispatchState
// =============================================================================

/// State of a delivery worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    /// Waiting for the next notification.
    #[default]
    Idle,
    /// Invoking handlers.
    Dispatching,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Dispatching => write!(f, "Dispatching"),
        }
    }
}

// =============================================================================
// DispatchStats
// =============================================================================

/// Dispatcher counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    frames_received: AtomicU64,
    dispatched: AtomicU64,
    invocations: AtomicU64,
    handler_failures: AtomicU64,
    dropped: AtomicU64,
    keep_alives: AtomicU64,
    unroutable: AtomicU64,
}

impl DispatchStats {
    /// Returns a point-in-time copy of the counters.
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            keep_alives: self.keep_alives.load(Ordering::Relaxed),
            unroutable: self.unroutable.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStatsSnapshot {
    /// Frames read from the push stream.
    pub frames_received: u64,
    /// Notifications handed to at least one handler lookup.
    pub dispatched: u64,
    /// Handler invocations.
    pub invocations: u64,
    /// Invocations that failed, panicked or timed out.
    pub handler_failures: u64,
    /// Frames dropped because a delivery queue was full.
    pub dropped: u64,
    /// Keep-alive frames.
    pub keep_alives: u64,
    /// Frames with no matching route.
    pub unroutable: u64,
}

// =============================================================================
// Routing Table
// =============================================================================

struct Registration {
    id: u64,
    handler: Arc<dyn NotificationHandler>,
}

struct MonitoredRoute {
    node: NodeId,
    kind: MonitorKind,
    registrations: Vec<Registration>,
}

struct ChannelRoute {
    queue: mpsc::Sender<ServerFrame>,
    items: HashMap<u32, MonitoredRoute>,
    dispatching: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

struct DispatcherShared {
    routes: RwLock<HashMap<u32, ChannelRoute>>,
    stats: DispatchStats,
    handler_timeout: Duration,
    queue_capacity: usize,
}

/// Called once when the push stream closes on its own.
pub(crate) type ClosedCallback = Box<dyn FnOnce(String) + Send + 'static>;

// =============================================================================
// NotificationDispatcher
// =============================================================================

/// Routes pushed notifications to registered handlers.
pub struct NotificationDispatcher {
    shared: Arc<DispatcherShared>,
    shutdown: Arc<Notify>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationDispatcher {
    /// Creates a dispatcher.
    pub fn new(handler_timeout: Duration, queue_capacity: usize) -> Self {
        Self {
            shared: Arc::new(DispatcherShared {
                routes: RwLock::new(HashMap::new()),
                stats: DispatchStats::default(),
                handler_timeout,
                queue_capacity: queue_capacity.max(1),
            }),
            shutdown: Arc::new(Notify::new()),
            receiver: Mutex::new(None),
        }
    }

    /// Spawns the receiving task for a freshly opened push stream.
    pub(crate) fn start(&self, frames: mpsc::Receiver<ServerFrame>, on_closed: ClosedCallback) {
        let task = tokio::spawn(run_receiver(
            Arc::clone(&self.shared),
            frames,
            Arc::clone(&self.shutdown),
            on_closed,
        ));
        if let Some(previous) = self.receiver.lock().replace(task) {
            previous.abort();
        }
    }

    /// Stops the receiving task and every delivery worker.
    ///
    /// Queued notifications are discarded. Handler invocations already
    /// running finish on their own tasks.
    pub(crate) async fn shutdown(&self) {
        self.shutdown.notify_one();
        let receiver = self.receiver.lock().take();
        if let Some(receiver) = receiver {
            let _ = receiver.await;
        }

        let channels: Vec<ChannelRoute> = self.shared.routes.write().drain().map(|(_, c)| c).collect();
        for channel in channels {
            channel.worker.abort();
        }
    }

    /// Opens a delivery queue and worker for a server subscription.
    pub(crate) fn open_channel(&self, subscription_id: u32) {
        let mut routes = self.shared.routes.write();
        if routes.contains_key(&subscription_id) {
            return;
        }

        let (queue, receiver) = mpsc::channel(self.shared.queue_capacity);
        let dispatching = Arc::new(AtomicBool::new(false));
        let worker = tokio::spawn(run_worker(
            Arc::clone(&self.shared),
            subscription_id,
            receiver,
            Arc::clone(&dispatching),
        ));

        routes.insert(
            subscription_id,
            ChannelRoute {
                queue,
                items: HashMap::new(),
                dispatching,
                worker,
            },
        );
        debug!(subscription_id, "Delivery channel opened");
    }

    /// Closes the delivery queue and worker of a server subscription.
    pub(crate) fn close_channel(&self, subscription_id: u32) {
        if let Some(channel) = self.shared.routes.write().remove(&subscription_id) {
            channel.worker.abort();
            debug!(subscription_id, "Delivery channel closed");
        }
    }

    /// Adds a handler registration for a monitored item.
    ///
    /// The route for `client_handle` is created on first use. Returns `false`
    /// if the channel is not open.
    pub(crate) fn register(
        &self,
        subscription_id: u32,
        client_handle: u32,
        node: &NodeId,
        kind: MonitorKind,
        registration_id: u64,
        handler: Arc<dyn NotificationHandler>,
    ) -> bool {
        let mut routes = self.shared.routes.write();
        let Some(channel) = routes.get_mut(&subscription_id) else {
            return false;
        };

        channel
            .items
            .entry(client_handle)
            .or_insert_with(|| MonitoredRoute {
                node: node.clone(),
                kind,
                registrations: Vec::new(),
            })
            .registrations
            .push(Registration {
                id: registration_id,
                handler,
            });
        true
    }

    /// Removes a handler registration.
    ///
    /// Returns the number of registrations left on the monitored item, or
    /// `None` if the registration was not found. The route is removed when
    /// the last registration leaves.
    pub(crate) fn unregister(
        &self,
        subscription_id: u32,
        client_handle: u32,
        registration_id: u64,
    ) -> Option<usize> {
        let mut routes = self.shared.routes.write();
        let channel = routes.get_mut(&subscription_id)?;
        let item = channel.items.get_mut(&client_handle)?;

        let before = item.registrations.len();
        item.registrations.retain(|r| r.id != registration_id);
        if item.registrations.len() == before {
            return None;
        }

        let remaining = item.registrations.len();
        if remaining == 0 {
            channel.items.remove(&client_handle);
        }
        Some(remaining)
    }

    /// Returns the worker state of a server subscription.
    pub fn channel_state(&self, subscription_id: u32) -> Option<DispatchState> {
        self.shared.routes.read().get(&subscription_id).map(|channel| {
            if channel.dispatching.load(Ordering::Acquire) {
                DispatchState::Dispatching
            } else {
                DispatchState::Idle
            }
        })
    }

    /// Returns the number of open delivery channels.
    pub fn channel_count(&self) -> usize {
        self.shared.routes.read().len()
    }

    /// Returns the dispatcher counters.
    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.get_mut().take() {
            receiver.abort();
        }
        for (_, channel) in self.shared.routes.write().drain() {
            channel.worker.abort();
        }
    }
}

impl fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("channels", &self.channel_count())
            .field("handler_timeout", &self.shared.handler_timeout)
            .field("queue_capacity", &self.shared.queue_capacity)
            .finish()
    }
}

// =============================================================================
// Receiving Task
// =============================================================================

#[instrument(skip_all, name = "notification_receiver")]
async fn run_receiver(
    shared: Arc<DispatcherShared>,
    mut frames: mpsc::Receiver<ServerFrame>,
    shutdown: Arc<Notify>,
    on_closed: ClosedCallback,
) {
    debug!("Notification receiver started");

    let reason = loop {
        tokio::select! {
            biased;

            _ = shutdown.notified() => {
                debug!("Notification receiver stopped");
                return;
            }

            frame = frames.recv() => match frame {
                Some(ServerFrame::ChannelClosed { reason }) => break reason,
                Some(frame) => shared.route(frame),
                None => break "push stream ended".to_string(),
            },
        }
    };

    warn!(reason = %reason, "Server channel closed");
    on_closed(reason);
}

impl DispatcherShared {
    fn route(&self, frame: ServerFrame) {
        DispatchStats::bump(&self.stats.frames_received);

        let (subscription_id, sequence_number) = match &frame {
            ServerFrame::KeepAlive {
                subscription_id,
                sequence_number,
            } => {
                DispatchStats::bump(&self.stats.keep_alives);
                trace!(subscription_id, sequence_number, "Keep-alive");
                return;
            }
            ServerFrame::DataChange {
                subscription_id,
                sequence_number,
                ..
            }
            | ServerFrame::Event {
                subscription_id,
                sequence_number,
                ..
            } => (*subscription_id, *sequence_number),
            ServerFrame::ChannelClosed { .. } => return,
        };

        let routes = self.routes.read();
        let Some(channel) = routes.get(&subscription_id) else {
            DispatchStats::bump(&self.stats.unroutable);
            debug!(subscription_id, "Notification for unknown subscription");
            return;
        };

        match channel.queue.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                DispatchStats::bump(&self.stats.dropped);
                warn!(
                    subscription_id,
                    sequence_number, "Delivery queue full, notification dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                DispatchStats::bump(&self.stats.unroutable);
            }
        }
    }

    /// Looks up the node, kind and handlers of a monitored item.
    fn targets(
        &self,
        subscription_id: u32,
        client_handle: u32,
    ) -> Option<(NodeId, MonitorKind, Vec<Arc<dyn NotificationHandler>>)> {
        let routes = self.routes.read();
        let item = routes.get(&subscription_id)?.items.get(&client_handle)?;
        Some((
            item.node.clone(),
            item.kind,
            item.registrations
                .iter()
                .map(|r| Arc::clone(&r.handler))
                .collect(),
        ))
    }

    async fn deliver(&self, subscription_id: u32, frame: ServerFrame) {
        let client_handle = match &frame {
            ServerFrame::DataChange { client_handle, .. } | ServerFrame::Event { client_handle, .. } => {
                *client_handle
            }
            _ => return,
        };

        let Some((node, kind, handlers)) = self.targets(subscription_id, client_handle) else {
            DispatchStats::bump(&self.stats.unroutable);
            debug!(subscription_id, client_handle, "Notification for unknown monitored item");
            return;
        };

        let notification = match (frame, kind) {
            (
                ServerFrame::DataChange {
                    sequence_number,
                    value,
                    ..
                },
                MonitorKind::DataChange,
            ) => Notification::DataChange(DataChange::from_frame(
                node,
                subscription_id,
                sequence_number,
                value,
            )),
            (
                ServerFrame::Event {
                    sequence_number,
                    payload,
                    ..
                },
                MonitorKind::Event,
            ) => Notification::Event(EventNotification {
                node,
                payload,
                subscription_id,
                sequence_number,
                received_at: Utc::now(),
            }),
            _ => {
                DispatchStats::bump(&self.stats.unroutable);
                debug!(subscription_id, client_handle, "Notification kind does not match monitored item");
                return;
            }
        };

        DispatchStats::bump(&self.stats.dispatched);
        for handler in handlers {
            self.invoke(handler, notification.clone()).await;
        }
    }

    async fn invoke(&self, handler: Arc<dyn NotificationHandler>, notification: Notification) {
        DispatchStats::bump(&self.stats.invocations);

        let name = handler.name().to_string();
        let node = notification.node().clone();
        let sequence_number = notification.sequence_number();

        let mut task = tokio::spawn(async move {
            match &notification {
                Notification::DataChange(change) => handler.on_data_change(change).await,
                Notification::Event(event) => handler.on_event(event).await,
            }
        });

        let outcome = match tokio::time::timeout(self.handler_timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) if join_error.is_panic() => Err(HandlerError::Panicked),
            Ok(Err(_)) => Err(HandlerError::failed("handler task cancelled")),
            Err(_) => {
                task.abort();
                Err(HandlerError::TimedOut {
                    duration: self.handler_timeout,
                })
            }
        };

        if let Err(error) = outcome {
            DispatchStats::bump(&self.stats.handler_failures);
            let span = warn_span!("handler", handler = %name, node = %node, sequence_number);
            span.in_scope(|| ClientError::handler(error).log("notification dispatch"));
        }
    }
}

// =============================================================================
// Delivery Worker
// =============================================================================

#[instrument(skip(shared, queue, dispatching), name = "delivery_worker")]
async fn run_worker(
    shared: Arc<DispatcherShared>,
    subscription_id: u32,
    mut queue: mpsc::Receiver<ServerFrame>,
    dispatching: Arc<AtomicBool>,
) {
    while let Some(frame) = queue.recv().await {
        dispatching.store(true, Ordering::Release);
        shared.deliver(subscription_id, frame).await;
        dispatching.store(false, Ordering::Release);
    }
    debug!("Delivery worker stopped");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::handler::{HandlerResult, NotificationHandler};
    use crate::client::transport::DataValue;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Collect {
        seen: parking_lot::Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl NotificationHandler for Collect {
        async fn on_data_change(&self, change: &DataChange) -> HandlerResult {
            self.seen.lock().push(change.metadata.sequence_number);
            Ok(())
        }
    }

    struct Flaky {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NotificationHandler for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn on_data_change(&self, change: &DataChange) -> HandlerResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match change.metadata.sequence_number {
                2 => Err(HandlerError::failed("boom")),
                3 => panic!("handler panic"),
                4 => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
                _ => Ok(()),
            }
        }
    }

    fn data_change(subscription_id: u32, sequence_number: u32, client_handle: u32) -> ServerFrame {
        ServerFrame::DataChange {
            subscription_id,
            sequence_number,
            client_handle,
            value: DataValue::new(sequence_number),
        }
    }

    async fn settle(dispatcher: &NotificationDispatcher, expected_dispatched: u64) {
        for _ in 0..200 {
            if dispatcher.stats().dispatched >= expected_dispatched
                && dispatcher.channel_state(1) != Some(DispatchState::Dispatching)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_routes_in_order_to_all_handlers() {
        let dispatcher = NotificationDispatcher::new(Duration::from_secs(1), 64);
        let (tx, rx) = mpsc::channel(64);
        dispatcher.start(rx, Box::new(|_| {}));
        dispatcher.open_channel(1);

        let node = NodeId::numeric(2, 10);
        let a = Arc::new(Collect::default());
        let b = Arc::new(Collect::default());
        assert!(dispatcher.register(1, 7, &node, MonitorKind::DataChange, 1, a.clone()));
        assert!(dispatcher.register(1, 7, &node, MonitorKind::DataChange, 2, b.clone()));

        for seq in 1..=20 {
            tx.send(data_change(1, seq, 7)).await.unwrap();
        }
        tx.send(ServerFrame::KeepAlive {
            subscription_id: 1,
            sequence_number: 21,
        })
        .await
        .unwrap();
        settle(&dispatcher, 20).await;

        let expected: Vec<u32> = (1..=20).collect();
        assert_eq!(*a.seen.lock(), expected);
        assert_eq!(*b.seen.lock(), expected);

        let stats = dispatcher.stats();
        assert_eq!(stats.invocations, 40);
        assert_eq!(stats.keep_alives, 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_handler_failures_are_isolated() {
        let dispatcher = NotificationDispatcher::new(Duration::from_millis(50), 64);
        let (tx, rx) = mpsc::channel(64);
        dispatcher.start(rx, Box::new(|_| {}));
        dispatcher.open_channel(1);

        let node = NodeId::numeric(2, 10);
        let flaky = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
        });
        let healthy = Arc::new(Collect::default());
        dispatcher.register(1, 7, &node, MonitorKind::DataChange, 1, flaky.clone());
        dispatcher.register(1, 7, &node, MonitorKind::DataChange, 2, healthy.clone());

        for seq in 1..=5 {
            tx.send(data_change(1, seq, 7)).await.unwrap();
        }
        settle(&dispatcher, 5).await;

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 5);
        assert_eq!(*healthy.seen.lock(), vec![1, 2, 3, 4, 5]);
        assert_eq!(dispatcher.stats().handler_failures, 3);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_unregister_and_unknown_routes() {
        let dispatcher = NotificationDispatcher::new(Duration::from_secs(1), 8);
        let node = NodeId::numeric(2, 10);
        assert!(!dispatcher.register(9, 1, &node, MonitorKind::DataChange, 1, Arc::new(Collect::default())));

        dispatcher.open_channel(1);
        dispatcher.register(1, 1, &node, MonitorKind::DataChange, 1, Arc::new(Collect::default()));
        dispatcher.register(1, 1, &node, MonitorKind::DataChange, 2, Arc::new(Collect::default()));

        assert_eq!(dispatcher.unregister(1, 1, 1), Some(1));
        assert_eq!(dispatcher.unregister(1, 1, 1), None);
        assert_eq!(dispatcher.unregister(1, 1, 2), Some(0));
        assert_eq!(dispatcher.unregister(1, 1, 2), None);

        assert_eq!(dispatcher.channel_state(1), Some(DispatchState::Idle));
        dispatcher.close_channel(1);
        assert_eq!(dispatcher.channel_state(1), None);
    }

    #[tokio::test]
    async fn test_channel_closed_invokes_callback() {
        let dispatcher = NotificationDispatcher::new(Duration::from_secs(1), 8);
        let (tx, rx) = mpsc::channel(8);
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
        dispatcher.start(
            rx,
            Box::new(move |reason| {
                let _ = closed_tx.send(reason);
            }),
        );

        tx.send(ServerFrame::ChannelClosed {
            reason: "socket reset".into(),
        })
        .await
        .unwrap();

        let reason = tokio::time::timeout(Duration::from_secs(1), closed_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, "socket reset");
    }

    #[tokio::test]
    async fn test_shutdown_does_not_report_closed() {
        let dispatcher = NotificationDispatcher::new(Duration::from_secs(1), 8);
        let (_tx, rx) = mpsc::channel(8);
        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();
        dispatcher.start(rx, Box::new(move |_| flag.store(true, Ordering::SeqCst)));
        dispatcher.open_channel(1);

        dispatcher.shutdown().await;
        assert!(!closed.load(Ordering::SeqCst));
        assert_eq!(dispatcher.channel_count(), 0);
    }
}
