// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the subscription client.
//!
//! Every public operation returns a typed error from this module rather than
//! leaving partial state behind.
//!
//! # Error Categories
//!
//! ```text
//! ClientError
//! ├── Connection        - Endpoint, network, authentication, version
//! ├── Resolution        - Node lookup by id or browse path, stale handles
//! ├── Subscription      - Monitoring support, sampling interval, limits
//! ├── Timeout           - Round trip exceeded its deadline
//! ├── ConnectionClosed  - Operation aborted by disconnect
//! ├── Handler           - A notification handler failed during dispatch
//! ├── Operation         - Read/write service failures
//! └── Configuration     - Invalid settings or config files
//! ```
//!
//! # Examples
//!
//! ```
//! use uasub_core::error::{ClientError, ConnectionError};
//!
//! let error = ClientError::connection(ConnectionError::refused(
//!     "opc.tcp://localhost:4842",
//!     "connection reset",
//! ));
//!
//! assert!(error.is_retryable());
//! assert_eq!(error.category(), "connection");
//! ```

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

// =============================================================================
// ClientError - Main Error Type
// =============================================================================

/// The main error type for client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection establishment errors.
    #[error("{0}")]
    Connection(#[from] ConnectionError),

    /// Node resolution errors.
    #[error("{0}")]
    Resolution(#[from] ResolutionError),

    /// Subscription and monitoring errors.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),

    /// Round-trip deadline exceeded.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),

    /// Operation aborted because the session was closed.
    #[error("{0}")]
    ConnectionClosed(#[from] ConnectionClosedError),

    /// Handler failure during dispatch.
    #[error("{0}")]
    Handler(#[from] HandlerError),

    /// Read/write service errors.
    #[error("{0}")]
    Operation(#[from] OperationError),

    /// Configuration errors.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),
}

impl ClientError {
    // =========================================================================
    // Factory Methods
    // =========================================================================

    /// Creates a connection error.
    #[inline]
    pub fn connection(error: ConnectionError) -> Self {
        Self::Connection(error)
    }

    /// Creates a resolution error.
    #[inline]
    pub fn resolution(error: ResolutionError) -> Self {
        Self::Resolution(error)
    }

    /// Creates a subscription error.
    #[inline]
    pub fn subscription(error: SubscriptionError) -> Self {
        Self::Subscription(error)
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(error: TimeoutError) -> Self {
        Self::Timeout(error)
    }

    /// Creates a handler error.
    #[inline]
    pub fn handler(error: HandlerError) -> Self {
        Self::Handler(error)
    }

    /// Creates an operation error.
    #[inline]
    pub fn operation(error: OperationError) -> Self {
        Self::Operation(error)
    }

    /// Creates a configuration error.
    #[inline]
    pub fn configuration(error: ConfigurationError) -> Self {
        Self::Configuration(error)
    }

    // =========================================================================
    // Convenience Factory Methods
    // =========================================================================

    /// Creates a connection closed error for the given operation.
    pub fn connection_closed(operation: impl Into<String>) -> Self {
        Self::ConnectionClosed(ConnectionClosedError::new(operation))
    }

    /// Creates a request timeout error.
    pub fn request_timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout(TimeoutError::request(operation, duration))
    }

    /// Creates a node not found error.
    pub fn node_not_found(node_id: impl Into<String>) -> Self {
        Self::Resolution(ResolutionError::not_found(node_id))
    }

    /// Creates a stale handle error.
    pub fn stale_handle(node_id: impl Into<String>) -> Self {
        Self::Resolution(ResolutionError::stale_handle(node_id))
    }

    // =========================================================================
    // Error Properties
    // =========================================================================

    /// Returns `true` if this error is retryable.
    ///
    /// The client itself only retries connection establishment; other
    /// categories report retryability for callers that layer their own policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(e) => e.is_retryable(),
            Self::Subscription(e) => e.is_retryable(),
            Self::Timeout(_) => true,
            Self::Resolution(_)
            | Self::ConnectionClosed(_)
            | Self::Handler(_)
            | Self::Operation(_)
            | Self::Configuration(_) => false,
        }
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Connection(e) => e.severity(),
            Self::Resolution(e) => e.severity(),
            Self::Subscription(_) => ErrorSeverity::Error,
            Self::Timeout(_) => ErrorSeverity::Warning,
            Self::ConnectionClosed(_) => ErrorSeverity::Info,
            Self::Handler(_) => ErrorSeverity::Warning,
            Self::Operation(_) => ErrorSeverity::Error,
            Self::Configuration(_) => ErrorSeverity::Critical,
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Resolution(_) => "resolution",
            Self::Subscription(_) => "subscription",
            Self::Timeout(_) => "timeout",
            Self::ConnectionClosed(_) => "connection_closed",
            Self::Handler(_) => "handler",
            Self::Operation(_) => "operation",
            Self::Configuration(_) => "configuration",
        }
    }

    /// Returns a unique error code for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Connection(e) => e.error_code(),
            Self::Resolution(e) => e.error_code(),
            Self::Subscription(e) => e.error_code(),
            Self::Timeout(e) => e.error_code(),
            Self::ConnectionClosed(_) => ErrorCode::new(5, 1),
            Self::Handler(e) => e.error_code(),
            Self::Operation(e) => e.error_code(),
            Self::Configuration(e) => e.error_code(),
        }
    }

    /// Returns `true` if the error was caused by a closed session.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed(_))
    }

    /// Returns `true` if the error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Logs this error with appropriate level and context.
    pub fn log(&self, context: &str) {
        let code = self.error_code();

        match self.tracing_level() {
            Level::ERROR => tracing::error!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            Level::INFO => tracing::info!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            _ => tracing::debug!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
        }
    }
}

// =============================================================================
// ConnectionError
// =============================================================================

/// Errors raised while establishing a session.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The endpoint refused or dropped the connection.
    #[error("Connection refused to '{endpoint}': {reason}")]
    Refused {
        /// Target endpoint.
        endpoint: String,
        /// Reason reported by the transport.
        reason: String,
    },

    /// The server rejected the supplied credentials.
    #[error("Authentication failed at '{endpoint}': {reason}")]
    AuthenticationFailed {
        /// Target endpoint.
        endpoint: String,
        /// Reason reported by the server.
        reason: String,
    },

    /// Client and server protocol versions are incompatible.
    #[error("Protocol version mismatch at '{endpoint}': client {client}, server {server}")]
    VersionMismatch {
        /// Target endpoint.
        endpoint: String,
        /// Client protocol version.
        client: u32,
        /// Server protocol version.
        server: u32,
    },

    /// Invalid endpoint URL.
    #[error("Invalid endpoint URL: '{url}' - {reason}")]
    InvalidEndpoint {
        /// The invalid URL.
        url: String,
        /// Reason.
        reason: String,
    },

    /// Server not responding.
    #[error("Server not responding at '{endpoint}'")]
    ServerNotResponding {
        /// Target endpoint.
        endpoint: String,
    },

    /// The manager already owns a live session.
    #[error("Already connected to '{endpoint}'")]
    AlreadyConnected {
        /// Endpoint of the live session.
        endpoint: String,
    },

    /// No session is open.
    #[error("Not connected to an OPC UA server")]
    NotConnected,

    /// Generic I/O error.
    #[error("I/O error: {message}")]
    Io {
        /// Error message.
        message: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl ConnectionError {
    /// Creates a connection refused error.
    pub fn refused(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Refused {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Creates an authentication failure.
    pub fn authentication_failed(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Creates a protocol version mismatch error.
    pub fn version_mismatch(endpoint: impl Into<String>, client: u32, server: u32) -> Self {
        Self::VersionMismatch {
            endpoint: endpoint.into(),
            client,
            server,
        }
    }

    /// Creates an invalid endpoint error.
    pub fn invalid_endpoint(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a server not responding error.
    pub fn server_not_responding(endpoint: impl Into<String>) -> Self {
        Self::ServerNotResponding {
            endpoint: endpoint.into(),
        }
    }

    /// Creates an already connected error.
    pub fn already_connected(endpoint: impl Into<String>) -> Self {
        Self::AlreadyConnected {
            endpoint: endpoint.into(),
        }
    }

    /// Creates an I/O error.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Returns `true` if this error is retryable.
    ///
    /// Authentication and version failures are permanent for a given
    /// endpoint and credential pair.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Refused { .. } | Self::ServerNotResponding { .. } => true,
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::Interrupted
            ),
            Self::AuthenticationFailed { .. }
            | Self::VersionMismatch { .. }
            | Self::InvalidEndpoint { .. }
            | Self::AlreadyConnected { .. }
            | Self::NotConnected => false,
        }
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotConnected | Self::AlreadyConnected { .. } => ErrorSeverity::Warning,
            Self::AuthenticationFailed { .. } | Self::VersionMismatch { .. } => {
                ErrorSeverity::Critical
            }
            _ => ErrorSeverity::Error,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Refused { .. } => ErrorCode::new(1, 1),
            Self::AuthenticationFailed { .. } => ErrorCode::new(1, 2),
            Self::VersionMismatch { .. } => ErrorCode::new(1, 3),
            Self::InvalidEndpoint { .. } => ErrorCode::new(1, 4),
            Self::ServerNotResponding { .. } => ErrorCode::new(1, 5),
            Self::AlreadyConnected { .. } => ErrorCode::new(1, 6),
            Self::NotConnected => ErrorCode::new(1, 7),
            Self::Io { .. } => ErrorCode::new(1, 8),
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(error: io::Error) -> Self {
        Self::Io {
            message: error.to_string(),
            source: error,
        }
    }
}

// =============================================================================
// ResolutionError
// =============================================================================

/// Errors raised while resolving a node.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// No node with this id exists.
    #[error("Node not found: {node_id}")]
    NotFound {
        /// The node id that was looked up.
        node_id: String,
    },

    /// A browse path segment had no matching child.
    #[error("Browse path segment {index} '{segment}' not found under {parent}")]
    SegmentNotFound {
        /// Zero-based index of the failing segment.
        index: usize,
        /// The segment that failed.
        segment: String,
        /// The node whose children were searched.
        parent: String,
    },

    /// A browse path segment matched more than one child.
    #[error("Browse path segment {index} '{segment}' is ambiguous ({matches} matches)")]
    Ambiguous {
        /// Zero-based index of the ambiguous segment.
        index: usize,
        /// The ambiguous segment.
        segment: String,
        /// Number of matching children.
        matches: usize,
    },

    /// The handle's session has been closed.
    #[error("Node handle {node_id} is stale: its session was closed")]
    StaleHandle {
        /// The node id of the stale handle.
        node_id: String,
    },

    /// The handle belongs to a different session.
    #[error("Node handle {node_id} belongs to another session")]
    ForeignHandle {
        /// The node id of the foreign handle.
        node_id: String,
    },

    /// The namespace URI is not in the server's namespace array.
    #[error("Namespace not found: {uri}")]
    NamespaceNotFound {
        /// The namespace URI.
        uri: String,
    },
}

impl ResolutionError {
    /// Creates a node not found error.
    pub fn not_found(node_id: impl Into<String>) -> Self {
        Self::NotFound {
            node_id: node_id.into(),
        }
    }

    /// Creates a segment not found error.
    pub fn segment_not_found(
        index: usize,
        segment: impl Into<String>,
        parent: impl Into<String>,
    ) -> Self {
        Self::SegmentNotFound {
            index,
            segment: segment.into(),
            parent: parent.into(),
        }
    }

    /// Creates an ambiguous segment error.
    pub fn ambiguous(index: usize, segment: impl Into<String>, matches: usize) -> Self {
        Self::Ambiguous {
            index,
            segment: segment.into(),
            matches,
        }
    }

    /// Creates a stale handle error.
    pub fn stale_handle(node_id: impl Into<String>) -> Self {
        Self::StaleHandle {
            node_id: node_id.into(),
        }
    }

    /// Creates a foreign handle error.
    pub fn foreign_handle(node_id: impl Into<String>) -> Self {
        Self::ForeignHandle {
            node_id: node_id.into(),
        }
    }

    /// Creates a namespace not found error.
    pub fn namespace_not_found(uri: impl Into<String>) -> Self {
        Self::NamespaceNotFound { uri: uri.into() }
    }

    /// Returns the index of the failing browse path segment, if any.
    pub fn failed_segment(&self) -> Option<usize> {
        match self {
            Self::SegmentNotFound { index, .. } | Self::Ambiguous { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::StaleHandle { .. } | Self::ForeignHandle { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::new(2, 1),
            Self::SegmentNotFound { .. } => ErrorCode::new(2, 2),
            Self::Ambiguous { .. } => ErrorCode::new(2, 3),
            Self::StaleHandle { .. } => ErrorCode::new(2, 4),
            Self::ForeignHandle { .. } => ErrorCode::new(2, 5),
            Self::NamespaceNotFound { .. } => ErrorCode::new(2, 6),
        }
    }
}

// =============================================================================
// SubscriptionError
// =============================================================================

/// Subscription and monitoring errors.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// The node cannot be monitored for the requested notification kind.
    #[error("Node {node_id} ({node_class}) does not support {kind} monitoring")]
    NotMonitorable {
        /// The node id.
        node_id: String,
        /// The node's class.
        node_class: String,
        /// The requested notification kind.
        kind: String,
    },

    /// The sampling interval was rejected.
    #[error("Sampling interval {interval:?} rejected: {reason}")]
    IntervalRejected {
        /// Requested interval.
        interval: Duration,
        /// Rejection reason.
        reason: String,
    },

    /// The server failed to create the subscription.
    #[error("Failed to create subscription: {message}")]
    CreationFailed {
        /// Error message.
        message: String,
    },

    /// The server failed to create a monitored item.
    #[error("Failed to monitor {node_id}: {message}")]
    MonitoredItemFailed {
        /// The node id.
        node_id: String,
        /// Error message.
        message: String,
    },

    /// The configured subscription limit was reached.
    #[error("Maximum subscriptions reached ({max})")]
    LimitReached {
        /// Configured maximum.
        max: usize,
    },

    /// The handle is not registered.
    #[error("Unknown subscription handle {id}")]
    UnknownHandle {
        /// Registration id.
        id: u64,
    },
}

impl SubscriptionError {
    /// Creates a not monitorable error.
    pub fn not_monitorable(
        node_id: impl Into<String>,
        node_class: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self::NotMonitorable {
            node_id: node_id.into(),
            node_class: node_class.into(),
            kind: kind.into(),
        }
    }

    /// Creates an interval rejected error.
    pub fn interval_rejected(interval: Duration, reason: impl Into<String>) -> Self {
        Self::IntervalRejected {
            interval,
            reason: reason.into(),
        }
    }

    /// Creates a creation failed error.
    pub fn creation_failed(message: impl Into<String>) -> Self {
        Self::CreationFailed {
            message: message.into(),
        }
    }

    /// Creates a monitored item failure.
    pub fn monitored_item_failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MonitoredItemFailed {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CreationFailed { .. } | Self::MonitoredItemFailed { .. }
        )
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotMonitorable { .. } => ErrorCode::new(3, 1),
            Self::IntervalRejected { .. } => ErrorCode::new(3, 2),
            Self::CreationFailed { .. } => ErrorCode::new(3, 3),
            Self::MonitoredItemFailed { .. } => ErrorCode::new(3, 4),
            Self::LimitReached { .. } => ErrorCode::new(3, 5),
            Self::UnknownHandle { .. } => ErrorCode::new(3, 6),
        }
    }
}

// =============================================================================
// TimeoutError
// =============================================================================

/// A round trip exceeded its deadline.
#[derive(Debug, Error)]
pub enum TimeoutError {
    /// Opening the channel timed out.
    #[error("Connect to '{endpoint}' timed out after {duration:?}")]
    Connect {
        /// Target endpoint.
        endpoint: String,
        /// The deadline.
        duration: Duration,
    },

    /// A request/response round trip timed out.
    #[error("Request '{operation}' timed out after {duration:?}")]
    Request {
        /// Name of the operation.
        operation: String,
        /// The deadline.
        duration: Duration,
    },
}

impl TimeoutError {
    /// Creates a connect timeout.
    pub fn connect(endpoint: impl Into<String>, duration: Duration) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            duration,
        }
    }

    /// Creates a request timeout.
    pub fn request(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Request {
            operation: operation.into(),
            duration,
        }
    }

    /// Returns the deadline that was exceeded.
    pub fn duration(&self) -> Duration {
        match self {
            Self::Connect { duration, .. } | Self::Request { duration, .. } => *duration,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Connect { .. } => ErrorCode::new(4, 1),
            Self::Request { .. } => ErrorCode::new(4, 2),
        }
    }
}

// =============================================================================
// ConnectionClosedError
// =============================================================================

/// An operation was aborted because its session was closed.
#[derive(Debug, Error)]
#[error("Operation '{operation}' aborted: connection closed")]
pub struct ConnectionClosedError {
    /// Name of the aborted operation.
    pub operation: String,
}

impl ConnectionClosedError {
    /// Creates a new connection closed error.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }
}

// =============================================================================
// HandlerError
// =============================================================================

/// A notification handler failed.
///
/// Handler errors are caught at the dispatcher boundary and logged. They are
/// never propagated to other handlers or to the receiving task.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler returned an error.
    #[error("Handler failed: {message}")]
    Failed {
        /// Error message.
        message: String,
    },

    /// The handler panicked.
    #[error("Handler panicked")]
    Panicked,

    /// The handler exceeded its time budget.
    #[error("Handler timed out after {duration:?}")]
    TimedOut {
        /// The time budget.
        duration: Duration,
    },

    /// The record sink failed.
    #[error("Record sink error: {message}")]
    Sink {
        /// Error message.
        message: String,
    },

    /// The handler's background worker is no longer running.
    #[error("Handler worker stopped")]
    WorkerStopped,
}

impl HandlerError {
    /// Creates a failed error.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Creates a sink error.
    pub fn sink(message: impl Into<String>) -> Self {
        Self::Sink {
            message: message.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Failed { .. } => ErrorCode::new(6, 1),
            Self::Panicked => ErrorCode::new(6, 2),
            Self::TimedOut { .. } => ErrorCode::new(6, 3),
            Self::Sink { .. } => ErrorCode::new(6, 4),
            Self::WorkerStopped => ErrorCode::new(6, 5),
        }
    }
}

impl From<io::Error> for HandlerError {
    fn from(error: io::Error) -> Self {
        Self::sink(error.to_string())
    }
}

// =============================================================================
// OperationError
// =============================================================================

/// Read/write service errors.
#[derive(Debug, Error)]
pub enum OperationError {
    /// Read returned a bad status.
    #[error("Read of {node_id} failed: {}", status_name(.status))]
    ReadFailed {
        /// The node id.
        node_id: String,
        /// OPC UA status code.
        status: u32,
    },

    /// Write returned a bad status.
    #[error("Write to {node_id} failed: {}", status_name(.status))]
    WriteFailed {
        /// The node id.
        node_id: String,
        /// OPC UA status code.
        status: u32,
    },

    /// The node is not writable.
    #[error("Node {node_id} is not writable")]
    NotWritable {
        /// The node id.
        node_id: String,
    },
}

fn status_name(status: &u32) -> &'static str {
    OperationError::status_code_name(*status)
}

impl OperationError {
    /// Creates a read failure.
    pub fn read_failed(node_id: impl Into<String>, status: u32) -> Self {
        Self::ReadFailed {
            node_id: node_id.into(),
            status,
        }
    }

    /// Creates a write failure, mapping `BadNotWritable` to [`Self::NotWritable`].
    pub fn write_failed(node_id: impl Into<String>, status: u32) -> Self {
        if status == 0x803B_0000 {
            return Self::NotWritable {
                node_id: node_id.into(),
            };
        }
        Self::WriteFailed {
            node_id: node_id.into(),
            status,
        }
    }

    /// Returns the symbolic name of a status code.
    pub fn status_code_name(status: u32) -> &'static str {
        match status {
            0x0000_0000 => "Good",
            0x8001_0000 => "BadUnexpectedError",
            0x8033_0000 => "BadNodeIdInvalid",
            0x8034_0000 => "BadNodeIdUnknown",
            0x8035_0000 => "BadAttributeIdInvalid",
            0x803A_0000 => "BadNotReadable",
            0x803B_0000 => "BadNotWritable",
            0x8074_0000 => "BadTypeMismatch",
            0x800A_0000 => "BadTimeout",
            0x801F_0000 => "BadUserAccessDenied",
            s if s & 0x8000_0000 != 0 => "Bad",
            s if s & 0x4000_0000 != 0 => "Uncertain",
            _ => "Good",
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::ReadFailed { .. } => ErrorCode::new(7, 1),
            Self::WriteFailed { .. } => ErrorCode::new(7, 2),
            Self::NotWritable { .. } => ErrorCode::new(7, 3),
        }
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Required field is missing.
    #[error("Missing required field: {field}")]
    MissingField {
        /// The field name.
        field: String,
    },

    /// Invalid field value.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// The field name.
        field: String,
        /// Reason.
        reason: String,
    },

    /// Invalid node id text.
    #[error("Invalid node ID '{input}': {reason}")]
    InvalidNodeId {
        /// The input text.
        input: String,
        /// Reason.
        reason: String,
    },

    /// Invalid identifier or browse path segment.
    #[error("Invalid path segment '{segment}': {reason}")]
    InvalidPathSegment {
        /// The segment text.
        segment: String,
        /// Reason.
        reason: String,
    },

    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// File path.
        path: String,
    },

    /// Configuration file could not be parsed.
    #[error("Failed to parse '{path}': {message}")]
    Parse {
        /// File path or `<string>`.
        path: String,
        /// Parser message.
        message: String,
    },

    /// Configuration file could not be read.
    #[error("Failed to read '{path}'")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl ConfigurationError {
    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid node id error.
    pub fn invalid_node_id(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNodeId {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid path segment error.
    pub fn invalid_path_segment(segment: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPathSegment {
            segment: segment.into(),
            reason: reason.into(),
        }
    }

    /// Creates a file not found error.
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates a parse error.
    pub fn parse(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an I/O error.
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::MissingField { .. } => ErrorCode::new(8, 1),
            Self::InvalidValue { .. } => ErrorCode::new(8, 2),
            Self::InvalidNodeId { .. } => ErrorCode::new(8, 3),
            Self::InvalidPathSegment { .. } => ErrorCode::new(8, 4),
            Self::FileNotFound { .. } => ErrorCode::new(8, 5),
            Self::Parse { .. } => ErrorCode::new(8, 6),
            Self::Io { .. } => ErrorCode::new(8, 7),
        }
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational - no action required.
    Info,
    /// Warning - action may be required.
    Warning,
    /// Error - action required, but recoverable.
    Error,
    /// Critical - immediate action required.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// ErrorCode
// =============================================================================

/// Structured error code for categorization.
///
/// Format: `UA-XXYY` where XX is category and YY is specific error.
///
/// Categories:
/// - 1: Connection
/// - 2: Resolution
/// - 3: Subscription
/// - 4: Timeout
/// - 5: Connection closed
/// - 6: Handler
/// - 7: Operation
/// - 8: Configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category (1-8).
    pub category: u8,
    /// Specific error within category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }

    /// Returns the full error code as a u16.
    pub fn as_u16(&self) -> u16 {
        ((self.category as u16) << 8) | (self.code as u16)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UA-{:02X}{:02X}", self.category, self.code)
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A Result type with ClientError.
pub type ClientResult<T> = Result<T, ClientError>;

// =============================================================================
// Tests
// =============================================================================
