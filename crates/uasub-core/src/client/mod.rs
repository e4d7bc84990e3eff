// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription client.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   ConnectionManager                      │
//! │            (connect / disconnect / retry)                │
//! └──────────────────────────────────────────────────────────┘
//!                             │ Session
//!              ┌──────────────┼───────────────┐
//!              ▼              ▼               ▼
//!        NodeLocator   SubscriptionRegistry   read / write
//!              │              │
//!              └──────┬───────┘
//!                     ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Transport                           │
//! └──────────────────────────────────────────────────────────┘
//!                     │ ServerFrame stream
//!                     ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                NotificationDispatcher                    │
//! │   receiving task ──▶ one delivery worker per            │
//! │                      server subscription ──▶ handlers    │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod dispatcher;
pub mod handler;
pub mod locator;
pub mod manager;
pub mod notification;
pub mod registry;
pub mod session;
pub mod transport;

pub use dispatcher::{DispatchState, DispatchStatsSnapshot, NotificationDispatcher};
pub use handler::{
    AlertHandler, ChannelHandler, FileRecordSink, FnHandler, HandlerResult, MemoryRecordSink,
    NotificationHandler, Record, RecordHandler, RecordSink,
};
pub use locator::{NodeHandle, NodeLocator};
pub use manager::{ConnectionManager, ConnectionStatsSnapshot, SessionGuard};
pub use notification::{ChangeMetadata, DataChange, EventNotification, Notification};
pub use registry::{RegistryStats, SubscriptionHandle, SubscriptionRegistry};
pub use session::{Session, SessionState, SessionStats};
pub use transport::{
    BrowseResult, CreatedSubscription, DataValue, EventPayload, MonitoredItemRequest, ServerFrame,
    StatusCode, SubscriptionRequest, Transport, Variant,
};
