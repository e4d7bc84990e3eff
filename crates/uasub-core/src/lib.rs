// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA subscription client core.
//!
//! Connection lifecycle, node addressing, a coalescing subscription registry
//! and a dispatcher delivering server-pushed data changes and events to
//! pluggable handlers. The wire protocol is reached through the
//! [`Transport`] trait and is not implemented here.
//!
//! # Features
//!
//! - One session per [`ConnectionManager`], with retry on transient failures
//! - Node resolution by id or by browse path
//! - One server subscription per publishing interval, shared monitored items
//! - Per-subscription FIFO delivery with handler failure isolation
//! - File, memory and channel handlers
//!
//! # Error Handling
//!
//! ```text
//! ClientError
//! ├── Connection       - Endpoint, network and authentication failures
//! ├── Resolution       - Unknown nodes, browse path and stale handles
//! ├── Subscription     - Unmonitorable nodes and rejected intervals
//! ├── Timeout          - Connect and request deadlines
//! ├── ConnectionClosed - Operations on a closed session
//! ├── Handler          - Handler failures (logged, never propagated)
//! ├── Operation        - Bad status on read and write
//! └── Configuration    - Invalid settings
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use uasub_core::{AlertHandler, ClientConfig, ConnectionManager, Credentials, Endpoint};
//!
//! let config = ClientConfig::builder().build()?;
//! let manager = ConnectionManager::new(transport, config);
//! let session = manager
//!     .connect(Endpoint::new("opc.tcp://localhost:4840"), Credentials::Anonymous)
//!     .await?;
//!
//! let node = session.resolve_by_id(2, "Simulation.TYPES").await?;
//! let handle = session
//!     .subscribe(&node, Duration::from_millis(100), Arc::new(AlertHandler::default()))
//!     .await?;
//!
//! session.unsubscribe(&handle).await?;
//! manager.disconnect().await;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use error::{
    ClientError, ClientResult, ConfigurationError, ConnectionClosedError, ConnectionError,
    ErrorCode, ErrorSeverity, HandlerError, OperationError, ResolutionError,
    SubscriptionError, TimeoutError,
};

pub use types::{
    BrowsePath, Credentials, Endpoint, IdentifierPath, IdentifierPathBuilder, MonitorKind,
    NodeClass, NodeId, NodeIdentifier, QualifiedName, SecurityMode, SecurityPolicy,
};

pub use config::{
    load_config, ClientConfig, ClientConfigBuilder, ConfigFormat, ConfigLoader, RetryConfig,
    RetryStrategy, SubscriptionSettings,
};

pub use logging::{init_logging, LogFormat};

pub use client::{
    AlertHandler, ChannelHandler, ConnectionManager, DataChange, DataValue, EventNotification,
    EventPayload, FileRecordSink, FnHandler, MemoryRecordSink, NodeHandle, Notification,
    NotificationHandler, Record, RecordHandler, RecordSink, ServerFrame, Session, SessionGuard,
    SessionState, StatusCode, SubscriptionHandle, Transport, Variant,
};
