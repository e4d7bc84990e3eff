// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription registry.
//!
//! # Coalescing
//!
//! Registrations are mapped onto server objects as follows:
//!
//! ```text
//! publishing interval ──▶ one server subscription
//!   (node, kind)      ──▶ one monitored item inside it
//!     handler         ──▶ one registration on that item
//! ```
//!
//! A second handler on the same node and interval shares the monitored
//! item. The monitored item is deleted when its last registration leaves,
//! and the server subscription when its last monitored item is deleted.
//!
//! Registry mutations are serialized by an async mutex. A failed
//! `subscribe` leaves nothing behind, locally or on the server.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::client::handler::NotificationHandler;
use crate::client::locator::NodeHandle;
use crate::client::session::Session;
use crate::client::transport::{MonitoredItemRequest, SubscriptionRequest, Transport};
use crate::error::{ClientResult, ResolutionError, SubscriptionError};
use crate::types::{MonitorKind, NodeId};

// =============================================================================
// Registry State
// =============================================================================

struct ItemEntry {
    client_handle: u32,
    monitored_item_id: u32,
    registrations: HashSet<u64>,
}

struct ChannelEntry {
    subscription_id: u32,
    revised_interval: Duration,
    items: HashMap<(NodeId, MonitorKind), ItemEntry>,
}

struct RegistrationEntry {
    interval: Duration,
    node: NodeId,
    kind: MonitorKind,
    active: Arc<AtomicBool>,
}

/// Per-session bookkeeping, guarded by the session's registry mutex.
pub(crate) struct RegistryState {
    channels: HashMap<Duration, ChannelEntry>,
    registrations: HashMap<u64, RegistrationEntry>,
    next_registration: u64,
    next_client_handle: u32,
}

impl RegistryState {
    pub(crate) fn new() -> Self {
        Self {
            channels: HashMap::new(),
            registrations: HashMap::new(),
            next_registration: 1,
            next_client_handle: 1,
        }
    }

    /// Deactivates every registration and returns the server subscriptions
    /// that were open.
    pub(crate) fn clear(&mut self) -> Vec<u32> {
        for entry in self.registrations.values() {
            entry.active.store(false, Ordering::Release);
        }
        self.registrations.clear();
        self.channels
            .drain()
            .map(|(_, channel)| channel.subscription_id)
            .collect()
    }

    fn allocate_registration(&mut self) -> u64 {
        let id = self.next_registration;
        self.next_registration += 1;
        id
    }

    fn allocate_client_handle(&mut self) -> u32 {
        let handle = self.next_client_handle;
        self.next_client_handle = self.next_client_handle.wrapping_add(1).max(1);
        handle
    }

    fn item_handle(&self, interval: Duration, key: &(NodeId, MonitorKind)) -> Option<u32> {
        self.channels
            .get(&interval)
            .and_then(|channel| channel.items.get(key))
            .map(|item| item.client_handle)
    }

    fn stats(&self) -> RegistryStats {
        RegistryStats {
            subscriptions: self.channels.len(),
            monitored_items: self.channels.values().map(|c| c.items.len()).sum(),
            registrations: self.registrations.len(),
        }
    }
}

/// Registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Server subscriptions.
    pub subscriptions: usize,
    /// Monitored items across all subscriptions.
    pub monitored_items: usize,
    /// Handler registrations.
    pub registrations: usize,
}

// =============================================================================
// SubscriptionHandle
// =============================================================================

/// Identifies one (node, handler) registration.
///
/// The handle stops being active when it is unsubscribed or its session
/// closes.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: u64,
    subscription_id: u32,
    node: NodeId,
    kind: MonitorKind,
    interval: Duration,
    session_id: Uuid,
    active: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    /// Registration id, unique within the session.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Server subscription carrying this registration.
    pub fn subscription_id(&self) -> u32 {
        self.subscription_id
    }

    /// The monitored node.
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// What is monitored.
    pub fn kind(&self) -> MonitorKind {
        self.kind
    }

    /// Requested sampling interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Session that issued the handle.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Returns `true` while the registration is live.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl PartialEq for SubscriptionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.session_id == other.session_id
    }
}

impl Eq for SubscriptionHandle {}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("subscription_id", &self.subscription_id)
            .field("node", &self.node.to_string())
            .field("kind", &self.kind)
            .field("interval", &self.interval)
            .field("active", &self.is_active())
            .finish()
    }
}

// =============================================================================
// SubscriptionRegistry
// =============================================================================

/// Registers handlers for node notifications on a session.
pub struct SubscriptionRegistry<T: Transport> {
    session: Session<T>,
}

impl<T: Transport> SubscriptionRegistry<T> {
    pub(crate) fn new(session: Session<T>) -> Self {
        Self { session }
    }

    /// Subscribes a handler to data changes of a variable.
    pub async fn subscribe(
        &self,
        node: &NodeHandle,
        interval: Duration,
        handler: Arc<dyn NotificationHandler>,
    ) -> ClientResult<SubscriptionHandle> {
        self.register(node, interval, MonitorKind::DataChange, handler)
            .await
    }

    /// Subscribes a handler to events of an object or view.
    pub async fn subscribe_events(
        &self,
        node: &NodeHandle,
        interval: Duration,
        handler: Arc<dyn NotificationHandler>,
    ) -> ClientResult<SubscriptionHandle> {
        self.register(node, interval, MonitorKind::Event, handler).await
    }

    #[instrument(
        skip(self, node, handler),
        fields(node = %node.node_id(), interval_ms = interval.as_millis() as u64)
    )]
    async fn register(
        &self,
        node: &NodeHandle,
        interval: Duration,
        kind: MonitorKind,
        handler: Arc<dyn NotificationHandler>,
    ) -> ClientResult<SubscriptionHandle> {
        let session = &self.session;
        let transport = session.transport();
        let settings = &session.config().subscription;

        session.check_handle(node)?;

        if !settings.accepts(interval) {
            return Err(SubscriptionError::interval_rejected(
                interval,
                format!(
                    "outside the accepted range {:?}..={:?}",
                    settings.min_interval, settings.max_interval
                ),
            )
            .into());
        }

        let node_class = match node.node_class() {
            Some(class) => class,
            None => session
                .call("subscribe", transport.node_class(node.node_id()))
                .await?
                .ok_or_else(|| ResolutionError::not_found(node.node_id().to_string()))?,
        };
        if !node_class.supports(kind) {
            return Err(SubscriptionError::not_monitorable(
                node.node_id().to_string(),
                node_class.name(),
                kind.as_str(),
            )
            .into());
        }

        let mut state = session.registry_state().lock().await;
        session.ensure_open("subscribe")?;

        // Server subscription for this interval.
        let created_channel = !state.channels.contains_key(&interval);
        if created_channel {
            if state.channels.len() >= settings.max_subscriptions {
                return Err(SubscriptionError::LimitReached {
                    max: settings.max_subscriptions,
                }
                .into());
            }

            let request = SubscriptionRequest {
                publishing_interval: interval,
                lifetime_count: settings.lifetime_count,
                keepalive_count: settings.keepalive_count,
                priority: settings.priority,
            };
            let created = session
                .call("create_subscription", transport.create_subscription(&request))
                .await?;

            session.dispatcher().open_channel(created.subscription_id);
            state.channels.insert(
                interval,
                ChannelEntry {
                    subscription_id: created.subscription_id,
                    revised_interval: created.revised_publishing_interval,
                    items: HashMap::new(),
                },
            );
            debug!(
                subscription_id = created.subscription_id,
                revised_ms = created.revised_publishing_interval.as_millis() as u64,
                "Server subscription created"
            );
        }

        let subscription_id = match state.channels.get(&interval) {
            Some(channel) => channel.subscription_id,
            None => return Err(SubscriptionError::creation_failed("subscription vanished").into()),
        };
        let key = (node.node_id().clone(), kind);
        let registration_id = state.allocate_registration();

        // Monitored item for (node, kind).
        match state.item_handle(interval, &key) {
            Some(client_handle) => {
                session.dispatcher().register(
                    subscription_id,
                    client_handle,
                    node.node_id(),
                    kind,
                    registration_id,
                    handler,
                );
            }
            None => {
                let client_handle = state.allocate_client_handle();
                session.dispatcher().register(
                    subscription_id,
                    client_handle,
                    node.node_id(),
                    kind,
                    registration_id,
                    handler,
                );

                let request = MonitoredItemRequest {
                    node_id: node.node_id().clone(),
                    kind,
                    sampling_interval: interval,
                    queue_size: settings.queue_size,
                    client_handle,
                };
                let created = session
                    .call(
                        "create_monitored_item",
                        transport.create_monitored_item(subscription_id, &request),
                    )
                    .await;

                match created {
                    Ok(monitored_item_id) => {
                        if let Some(channel) = state.channels.get_mut(&interval) {
                            channel.items.insert(
                                key.clone(),
                                ItemEntry {
                                    client_handle,
                                    monitored_item_id,
                                    registrations: HashSet::new(),
                                },
                            );
                        }
                    }
                    Err(error) => {
                        session
                            .dispatcher()
                            .unregister(subscription_id, client_handle, registration_id);
                        if created_channel {
                            state.channels.remove(&interval);
                            self.delete_server_subscription(subscription_id).await;
                        }
                        return Err(error);
                    }
                }
            }
        }

        if let Some(item) = state
            .channels
            .get_mut(&interval)
            .and_then(|channel| channel.items.get_mut(&key))
        {
            item.registrations.insert(registration_id);
        }

        let active = Arc::new(AtomicBool::new(true));
        state.registrations.insert(
            registration_id,
            RegistrationEntry {
                interval,
                node: key.0.clone(),
                kind,
                active: Arc::clone(&active),
            },
        );

        info!(
            registration_id,
            subscription_id,
            kind = %kind,
            "Subscribed"
        );

        Ok(SubscriptionHandle {
            id: registration_id,
            subscription_id,
            node: key.0,
            kind,
            interval,
            session_id: session.id(),
            active,
        })
    }

    /// Removes one (node, handler) registration.
    ///
    /// Other handlers on the same node keep receiving notifications. The
    /// local registration is removed before the server is asked to delete
    /// an emptied monitored item or subscription; a failing server call is
    /// returned but does not restore the registration.
    #[instrument(skip(self, handle), fields(registration_id = handle.id()))]
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> ClientResult<()> {
        let session = &self.session;
        session.ensure_open("unsubscribe")?;

        let mut state = session.registry_state().lock().await;
        session.ensure_open("unsubscribe")?;

        if handle.session_id != session.id() {
            return Err(SubscriptionError::UnknownHandle { id: handle.id }.into());
        }
        let Some(entry) = state.registrations.remove(&handle.id) else {
            return Err(SubscriptionError::UnknownHandle { id: handle.id }.into());
        };
        entry.active.store(false, Ordering::Release);

        let key = (entry.node, entry.kind);
        let Some(channel) = state.channels.get_mut(&entry.interval) else {
            return Ok(());
        };
        let subscription_id = channel.subscription_id;

        let Some(item) = channel.items.get_mut(&key) else {
            return Ok(());
        };
        item.registrations.remove(&handle.id);
        session
            .dispatcher()
            .unregister(subscription_id, item.client_handle, handle.id);

        if !item.registrations.is_empty() {
            debug!("Registration removed, monitored item still shared");
            return Ok(());
        }

        let monitored_item_id = item.monitored_item_id;
        channel.items.remove(&key);

        if channel.items.is_empty() {
            state.channels.remove(&entry.interval);
            session.dispatcher().close_channel(subscription_id);
            info!(subscription_id, "Last monitored item removed, deleting server subscription");
            session
                .call(
                    "delete_subscription",
                    session.transport().delete_subscription(subscription_id),
                )
                .await
        } else {
            debug!(subscription_id, monitored_item_id, "Deleting monitored item");
            session
                .call(
                    "delete_monitored_item",
                    session
                        .transport()
                        .delete_monitored_item(subscription_id, monitored_item_id),
                )
                .await
        }
    }

    /// Number of live registrations.
    pub async fn active_count(&self) -> usize {
        self.session.registry_state().lock().await.registrations.len()
    }

    /// Registry counters.
    pub async fn stats(&self) -> RegistryStats {
        self.session.registry_state().lock().await.stats()
    }

    /// Revised publishing interval granted for a requested interval.
    pub async fn revised_interval(&self, interval: Duration) -> Option<Duration> {
        self.session
            .registry_state()
            .lock()
            .await
            .channels
            .get(&interval)
            .map(|channel| channel.revised_interval)
    }

    async fn delete_server_subscription(&self, subscription_id: u32) {
        self.session.dispatcher().close_channel(subscription_id);
        let result = self
            .session
            .call(
                "delete_subscription",
                self.session.transport().delete_subscription(subscription_id),
            )
            .await;
        if let Err(e) = result {
            warn!(subscription_id, error = %e, "Failed to delete server subscription");
        }
    }
}

impl<T: Transport> fmt::Debug for SubscriptionRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("session_id", &self.session.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_deactivates_registrations() {
        let mut state = RegistryState::new();
        let active = Arc::new(AtomicBool::new(true));
        let id = state.allocate_registration();
        state.registrations.insert(
            id,
            RegistrationEntry {
                interval: Duration::from_millis(100),
                node: NodeId::numeric(2, 1),
                kind: MonitorKind::DataChange,
                active: Arc::clone(&active),
            },
        );
        state.channels.insert(
            Duration::from_millis(100),
            ChannelEntry {
                subscription_id: 42,
                revised_interval: Duration::from_millis(100),
                items: HashMap::new(),
            },
        );

        assert_eq!(state.stats().registrations, 1);
        assert_eq!(state.clear(), vec![42]);
        assert!(!active.load(Ordering::Acquire));
        assert_eq!(state.stats(), RegistryStats::default());
    }

    #[test]
    fn test_client_handles_skip_zero() {
        let mut state = RegistryState::new();
        state.next_client_handle = u32::MAX;
        assert_eq!(state.allocate_client_handle(), u32::MAX);
        assert_eq!(state.allocate_client_handle(), 1);
    }
}
