// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Shared fixtures for integration tests.
//!
//! [`MockTransport`] is an in-memory server: a small address space, values,
//! subscriptions and monitored items, plus knobs for delays and injected
//! failures. Notifications are pushed with [`MockTransport::emit_data_change`]
//! and [`MockTransport::emit_event`].

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use uasub_core::client::{
    BrowseResult, CreatedSubscription, DataChange, DataValue, EventNotification, EventPayload,
    HandlerResult, MonitoredItemRequest, NotificationHandler, ServerFrame, StatusCode,
    SubscriptionRequest, Transport, Variant,
};
use uasub_core::{
    ClientConfig, ClientError, ClientResult, ConnectionError, Credentials, Endpoint, MonitorKind,
    NodeClass, NodeId, QualifiedName, SubscriptionError,
};

// =============================================================================
// Well-Known Test Nodes
// =============================================================================

pub const ENDPOINT: &str = "opc.tcp://localhost:4840";
pub const SIMULATION_NS: &str = "urn:uasub:simulation";

pub fn simulation() -> NodeId {
    NodeId::string(2, "Simulation")
}

pub fn types_variable() -> NodeId {
    NodeId::string(2, "Simulation.TYPES")
}

pub fn counter_variable() -> NodeId {
    NodeId::numeric(2, 1001)
}

pub fn pump_object() -> NodeId {
    NodeId::string(2, "Simulation.Pump")
}

pub fn endpoint() -> Endpoint {
    Endpoint::new(ENDPOINT)
}

pub fn test_config() -> ClientConfig {
    ClientConfig::builder()
        .request_timeout(Duration::from_millis(500))
        .connect_timeout(Duration::from_millis(500))
        .handler_timeout(Duration::from_millis(200))
        .build()
        .unwrap()
}

// =============================================================================
// MockTransport
// =============================================================================

/// A failure returned by the next `open` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFailure {
    Refused,
    AuthenticationFailed,
    VersionMismatch,
}

impl OpenFailure {
    fn into_error(self) -> ClientError {
        match self {
            Self::Refused => ConnectionError::refused(ENDPOINT, "connection refused").into(),
            Self::AuthenticationFailed => {
                ConnectionError::authentication_failed(ENDPOINT, "bad user or password").into()
            }
            Self::VersionMismatch => ConnectionError::version_mismatch(ENDPOINT, 0, 1).into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockItem {
    pub subscription_id: u32,
    pub client_handle: u32,
    pub node: NodeId,
    pub kind: MonitorKind,
}

struct MockNode {
    class: NodeClass,
    children: Vec<BrowseResult>,
}

/// In-memory transport for tests.
pub struct MockTransport {
    nodes: Mutex<HashMap<NodeId, MockNode>>,
    namespaces: Mutex<HashMap<String, u16>>,
    values: Mutex<HashMap<NodeId, DataValue>>,
    read_only: Mutex<HashSet<NodeId>>,
    delays: Mutex<HashMap<&'static str, Duration>>,
    open_failures: Mutex<VecDeque<OpenFailure>>,
    rejected_interval: Mutex<Option<Duration>>,
    fail_monitored_items: AtomicBool,

    frames: Mutex<Option<mpsc::Sender<ServerFrame>>>,
    subscriptions: Mutex<HashMap<u32, Duration>>,
    items: Mutex<HashMap<u32, MockItem>>,
    deleted_subscriptions: Mutex<Vec<u32>>,
    deleted_items: Mutex<Vec<u32>>,

    next_subscription: AtomicU32,
    next_item: AtomicU32,
    sequence: AtomicU32,

    pub open_calls: AtomicU64,
    pub close_calls: AtomicU64,
    pub node_class_calls: AtomicU64,
    pub browse_calls: AtomicU64,
    pub created_items: AtomicU64,
}

impl MockTransport {
    /// Creates a transport with an empty address space apart from the
    /// standard folders.
    pub fn empty() -> Self {
        let transport = Self {
            nodes: Mutex::new(HashMap::new()),
            namespaces: Mutex::new(HashMap::new()),
            values: Mutex::new(HashMap::new()),
            read_only: Mutex::new(HashSet::new()),
            delays: Mutex::new(HashMap::new()),
            open_failures: Mutex::new(VecDeque::new()),
            rejected_interval: Mutex::new(None),
            fail_monitored_items: AtomicBool::new(false),
            frames: Mutex::new(None),
            subscriptions: Mutex::new(HashMap::new()),
            items: Mutex::new(HashMap::new()),
            deleted_subscriptions: Mutex::new(Vec::new()),
            deleted_items: Mutex::new(Vec::new()),
            next_subscription: AtomicU32::new(100),
            next_item: AtomicU32::new(500),
            sequence: AtomicU32::new(0),
            open_calls: AtomicU64::new(0),
            close_calls: AtomicU64::new(0),
            node_class_calls: AtomicU64::new(0),
            browse_calls: AtomicU64::new(0),
            created_items: AtomicU64::new(0),
        };

        for folder in [
            NodeId::ROOT_FOLDER,
            NodeId::OBJECTS_FOLDER,
            NodeId::TYPES_FOLDER,
            NodeId::VIEWS_FOLDER,
        ] {
            transport.add_node(folder, NodeClass::Object);
        }
        transport
    }

    /// Creates a transport with the simulation address space:
    ///
    /// ```text
    /// Objects
    /// └── 2:Simulation
    ///     ├── 2:TYPES     (variable, ns=2;s=Simulation.TYPES)
    ///     ├── 2:Counter   (variable, ns=2;i=1001, read only)
    ///     ├── 2:Pump      (object,   ns=2;s=Simulation.Pump)
    ///     ├── 2:Dup       (variable)
    ///     └── 2:Dup       (variable)
    /// ```
    pub fn simulation() -> Self {
        let transport = Self::empty();
        transport
            .namespaces
            .lock()
            .unwrap()
            .insert(SIMULATION_NS.to_string(), 2);

        transport.add_child(&NodeId::OBJECTS_FOLDER, simulation(), "Simulation", NodeClass::Object);
        transport.add_child(&simulation(), types_variable(), "TYPES", NodeClass::Variable);
        transport.add_child(&simulation(), counter_variable(), "Counter", NodeClass::Variable);
        transport.add_child(&simulation(), pump_object(), "Pump", NodeClass::Object);
        transport.add_child(&simulation(), NodeId::string(2, "Dup.A"), "Dup", NodeClass::Variable);
        transport.add_child(&simulation(), NodeId::string(2, "Dup.B"), "Dup", NodeClass::Variable);

        transport.set_value(&types_variable(), DataValue::new(1.5f64));
        transport.set_value(&counter_variable(), DataValue::new(0i32));
        transport.read_only.lock().unwrap().insert(counter_variable());
        transport
    }

    pub fn add_node(&self, node: NodeId, class: NodeClass) {
        self.nodes.lock().unwrap().entry(node).or_insert(MockNode {
            class,
            children: Vec::new(),
        });
    }

    pub fn add_child(&self, parent: &NodeId, child: NodeId, name: &str, class: NodeClass) {
        self.add_node(child.clone(), class);
        let mut nodes = self.nodes.lock().unwrap();
        if let Some(parent) = nodes.get_mut(parent) {
            parent.children.push(BrowseResult::new(
                child,
                QualifiedName::new(2, name),
                class,
            ));
        }
    }

    pub fn set_value(&self, node: &NodeId, value: DataValue) {
        self.values.lock().unwrap().insert(node.clone(), value);
    }

    pub fn value(&self, node: &NodeId) -> Option<DataValue> {
        self.values.lock().unwrap().get(node).cloned()
    }

    // =========================================================================
    // Knobs
    // =========================================================================

    /// Delays every call of `operation` by `delay`.
    pub fn set_delay(&self, operation: &'static str, delay: Duration) {
        self.delays.lock().unwrap().insert(operation, delay);
    }

    pub fn clear_delay(&self, operation: &'static str) {
        self.delays.lock().unwrap().remove(operation);
    }

    /// Queues failures for the next `open` calls.
    pub fn fail_next_opens(&self, failures: impl IntoIterator<Item = OpenFailure>) {
        self.open_failures.lock().unwrap().extend(failures);
    }

    /// Makes the server reject subscriptions with this publishing interval.
    pub fn reject_interval(&self, interval: Duration) {
        *self.rejected_interval.lock().unwrap() = Some(interval);
    }

    pub fn fail_monitored_items(&self, fail: bool) {
        self.fail_monitored_items.store(fail, Ordering::SeqCst);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    pub fn item_count(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn items(&self) -> Vec<MockItem> {
        self.items.lock().unwrap().values().cloned().collect()
    }

    pub fn deleted_subscriptions(&self) -> Vec<u32> {
        self.deleted_subscriptions.lock().unwrap().clone()
    }

    pub fn deleted_items(&self) -> Vec<u32> {
        self.deleted_items.lock().unwrap().clone()
    }

    // =========================================================================
    // Push Stream
    // =========================================================================

    /// Pushes a data change to every monitored item on `node`. Returns the
    /// number of frames sent.
    pub fn emit_data_change(&self, node: &NodeId, value: impl Into<Variant>) -> usize {
        let value = DataValue::new(value);
        self.emit(node, MonitorKind::DataChange, |subscription_id, sequence_number, client_handle| {
            ServerFrame::DataChange {
                subscription_id,
                sequence_number,
                client_handle,
                value: value.clone(),
            }
        })
    }

    /// Pushes an event to every event item on `node`.
    pub fn emit_event(&self, node: &NodeId, payload: EventPayload) -> usize {
        self.emit(node, MonitorKind::Event, |subscription_id, sequence_number, client_handle| {
            ServerFrame::Event {
                subscription_id,
                sequence_number,
                client_handle,
                payload: payload.clone(),
            }
        })
    }

    pub fn emit_keep_alive(&self, subscription_id: u32) {
        let sequence_number = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.send(ServerFrame::KeepAlive {
            subscription_id,
            sequence_number,
        });
    }

    /// Simulates the server dropping the channel.
    pub fn drop_channel(&self, reason: &str) {
        self.send(ServerFrame::ChannelClosed {
            reason: reason.to_string(),
        });
    }

    fn emit(
        &self,
        node: &NodeId,
        kind: MonitorKind,
        frame: impl Fn(u32, u32, u32) -> ServerFrame,
    ) -> usize {
        let mut targets: Vec<(u32, u32)> = self
            .items
            .lock()
            .unwrap()
            .values()
            .filter(|item| &item.node == node && item.kind == kind)
            .map(|item| (item.subscription_id, item.client_handle))
            .collect();
        targets.sort_unstable();

        for (subscription_id, client_handle) in &targets {
            let sequence_number = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            self.send(frame(*subscription_id, sequence_number, *client_handle));
        }
        targets.len()
    }

    fn send(&self, frame: ServerFrame) {
        if let Some(sender) = self.frames.lock().unwrap().as_ref() {
            sender.try_send(frame).expect("push stream full or closed");
        }
    }

    async fn pause(&self, operation: &'static str) {
        let delay = self.delays.lock().unwrap().get(operation).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(
        &self,
        _endpoint: &Endpoint,
        _credentials: &Credentials,
    ) -> ClientResult<mpsc::Receiver<ServerFrame>> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        self.pause("open").await;

        let failure = self.open_failures.lock().unwrap().pop_front();
        if let Some(failure) = failure {
            return Err(failure.into_error());
        }

        let (tx, rx) = mpsc::channel(4096);
        *self.frames.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn close(&self) -> ClientResult<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.frames.lock().unwrap().take();
        Ok(())
    }

    async fn namespace_index(&self, uri: &str) -> ClientResult<Option<u16>> {
        self.pause("namespace_index").await;
        Ok(self.namespaces.lock().unwrap().get(uri).copied())
    }

    async fn node_class(&self, node_id: &NodeId) -> ClientResult<Option<NodeClass>> {
        self.node_class_calls.fetch_add(1, Ordering::SeqCst);
        self.pause("node_class").await;
        Ok(self.nodes.lock().unwrap().get(node_id).map(|node| node.class))
    }

    async fn browse(&self, node_id: &NodeId) -> ClientResult<Vec<BrowseResult>> {
        self.browse_calls.fetch_add(1, Ordering::SeqCst);
        self.pause("browse").await;
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .get(node_id)
            .map(|node| node.children.clone())
            .unwrap_or_default())
    }

    async fn read_value(&self, node_id: &NodeId) -> ClientResult<DataValue> {
        self.pause("read_value").await;
        Ok(self
            .values
            .lock()
            .unwrap()
            .get(node_id)
            .cloned()
            .unwrap_or_else(|| DataValue::default().with_status(StatusCode::BAD_NODE_ID_UNKNOWN)))
    }

    async fn write_value(&self, node_id: &NodeId, value: Variant) -> ClientResult<StatusCode> {
        self.pause("write_value").await;
        if self.read_only.lock().unwrap().contains(node_id) {
            return Ok(StatusCode::BAD_NOT_WRITABLE);
        }
        let mut values = self.values.lock().unwrap();
        match values.get_mut(node_id) {
            Some(current) => {
                *current = DataValue::new(value);
                Ok(StatusCode::GOOD)
            }
            None => Ok(StatusCode::BAD_NODE_ID_UNKNOWN),
        }
    }

    async fn create_subscription(
        &self,
        request: &SubscriptionRequest,
    ) -> ClientResult<CreatedSubscription> {
        self.pause("create_subscription").await;
        if *self.rejected_interval.lock().unwrap() == Some(request.publishing_interval) {
            return Err(SubscriptionError::interval_rejected(
                request.publishing_interval,
                "revised by server",
            )
            .into());
        }

        let subscription_id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription_id, request.publishing_interval);
        Ok(CreatedSubscription {
            subscription_id,
            revised_publishing_interval: request.publishing_interval,
        })
    }

    async fn delete_subscription(&self, subscription_id: u32) -> ClientResult<()> {
        self.pause("delete_subscription").await;
        self.subscriptions.lock().unwrap().remove(&subscription_id);
        self.items
            .lock()
            .unwrap()
            .retain(|_, item| item.subscription_id != subscription_id);
        self.deleted_subscriptions.lock().unwrap().push(subscription_id);
        Ok(())
    }

    async fn create_monitored_item(
        &self,
        subscription_id: u32,
        request: &MonitoredItemRequest,
    ) -> ClientResult<u32> {
        self.pause("create_monitored_item").await;
        if self.fail_monitored_items.load(Ordering::SeqCst) {
            return Err(SubscriptionError::monitored_item_failed(
                request.node_id.to_string(),
                "BadTooManyMonitoredItems",
            )
            .into());
        }

        let monitored_item_id = self.next_item.fetch_add(1, Ordering::SeqCst);
        self.items.lock().unwrap().insert(
            monitored_item_id,
            MockItem {
                subscription_id,
                client_handle: request.client_handle,
                node: request.node_id.clone(),
                kind: request.kind,
            },
        );
        self.created_items.fetch_add(1, Ordering::SeqCst);
        Ok(monitored_item_id)
    }

    async fn delete_monitored_item(
        &self,
        _subscription_id: u32,
        monitored_item_id: u32,
    ) -> ClientResult<()> {
        self.pause("delete_monitored_item").await;
        self.items.lock().unwrap().remove(&monitored_item_id);
        self.deleted_items.lock().unwrap().push(monitored_item_id);
        Ok(())
    }

    fn display_name(&self) -> String {
        "mock".to_string()
    }
}

// =============================================================================
// Test Handlers
// =============================================================================

/// Records every notification it receives.
#[derive(Default)]
pub struct Recorder {
    name: String,
    changes: Mutex<Vec<DataChange>>,
    events: Mutex<Vec<EventNotification>>,
}

impl Recorder {
    pub fn named(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ..Default::default()
        })
    }

    pub fn changes(&self) -> Vec<DataChange> {
        self.changes.lock().unwrap().clone()
    }

    pub fn values(&self) -> Vec<Variant> {
        self.changes().into_iter().map(|change| change.value).collect()
    }

    pub fn change_count(&self) -> usize {
        self.changes.lock().unwrap().len()
    }

    pub fn events(&self) -> Vec<EventNotification> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationHandler for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_data_change(&self, change: &DataChange) -> HandlerResult {
        self.changes.lock().unwrap().push(change.clone());
        Ok(())
    }

    async fn on_event(&self, event: &EventNotification) -> HandlerResult {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
