// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transport abstraction.
//!
//! The client core never speaks the binary protocol itself. Everything that
//! crosses the wire goes through a [`Transport`]: request/response services
//! are plain async methods, and asynchronous publish traffic arrives as a
//! stream of [`ServerFrame`]s on the receiver returned by [`Transport::open`].
//!
//! Implementations must be safe to call from several tasks at once; the
//! session holds the transport behind an `Arc` and issues requests
//! concurrently.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ClientResult;
use crate::types::{Credentials, Endpoint, MonitorKind, NodeClass, NodeId, QualifiedName};

// =============================================================================
// Variant
// =============================================================================

/// A dynamically typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Variant {
    /// No value.
    #[default]
    Null,
    /// Boolean.
    Boolean(bool),
    /// 16-bit signed integer.
    Int16(i16),
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 16-bit unsigned integer.
    UInt16(u16),
    /// 32-bit unsigned integer.
    UInt32(u32),
    /// 64-bit unsigned integer.
    UInt64(u64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// String.
    String(String),
    /// UTC timestamp.
    DateTime(DateTime<Utc>),
    /// Raw bytes.
    ByteString(Vec<u8>),
    /// Array of values.
    Array(Vec<Variant>),
}

impl Variant {
    /// Returns `true` for [`Variant::Null`].
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            other => other.as_i64().map(|v| v != 0),
        }
    }

    /// Returns the value as an `i64` if it is numeric and fits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int16(v) => Some(i64::from(*v)),
            Self::Int32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            Self::UInt16(v) => Some(i64::from(*v)),
            Self::UInt32(v) => Some(i64::from(*v)),
            Self::UInt64(v) => i64::try_from(*v).ok(),
            Self::Float(v) => Some(*v as i64),
            Self::Double(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Returns the value as an `f64` if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            Self::UInt64(v) => Some(*v as f64),
            Self::Int64(v) => Some(*v as f64),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Returns the value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the name of the contained type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Boolean(_) => "Boolean",
            Self::Int16(_) => "Int16",
            Self::Int32(_) => "Int32",
            Self::Int64(_) => "Int64",
            Self::UInt16(_) => "UInt16",
            Self::UInt32(_) => "UInt32",
            Self::UInt64(_) => "UInt64",
            Self::Float(_) => "Float",
            Self::Double(_) => "Double",
            Self::String(_) => "String",
            Self::DateTime(_) => "DateTime",
            Self::ByteString(_) => "ByteString",
            Self::Array(_) => "Array",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Int16(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::UInt16(v) => write!(f, "{}", v),
            Self::UInt32(v) => write!(f, "{}", v),
            Self::UInt64(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Self::ByteString(v) => write!(f, "<{} bytes>", v.len()),
            Self::Array(v) => {
                write!(f, "[")?;
                for (i, item) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

macro_rules! variant_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Variant {
                fn from(value: $ty) -> Self {
                    Self::$variant(value.into())
                }
            }
        )*
    };
}

variant_from! {
    bool => Boolean,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float,
    f64 => Double,
    String => String,
    &str => String,
    DateTime<Utc> => DateTime,
    Vec<u8> => ByteString,
}

// =============================================================================
// StatusCode
// =============================================================================

/// A protocol status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// Good.
    pub const GOOD: Self = Self(0);
    /// The access level does not allow writing.
    pub const BAD_NOT_WRITABLE: Self = Self(0x803B_0000);
    /// The value supplied does not match the node's data type.
    pub const BAD_TYPE_MISMATCH: Self = Self(0x8074_0000);
    /// The node id refers to a node that does not exist.
    pub const BAD_NODE_ID_UNKNOWN: Self = Self(0x8034_0000);

    /// Returns `true` if the severity is good.
    #[inline]
    pub fn is_good(&self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Returns `true` if the severity is uncertain.
    #[inline]
    pub fn is_uncertain(&self) -> bool {
        self.0 & 0xC000_0000 == 0x4000_0000
    }

    /// Returns `true` if the severity is bad.
    #[inline]
    pub fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Returns a symbolic name where one is known.
    pub fn name(&self) -> &'static str {
        crate::error::OperationError::status_code_name(self.0)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08X})", self.name(), self.0)
    }
}

// =============================================================================
// DataValue / EventPayload
// =============================================================================

/// A value with its status and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DataValue {
    /// The value.
    pub value: Variant,
    /// Quality of the value.
    pub status: StatusCode,
    /// When the source produced the value.
    pub source_timestamp: Option<DateTime<Utc>>,
    /// When the server processed the value.
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    /// Creates a good value stamped with the current time.
    pub fn new(value: impl Into<Variant>) -> Self {
        let now = Utc::now();
        Self {
            value: value.into(),
            status: StatusCode::GOOD,
            source_timestamp: Some(now),
            server_timestamp: Some(now),
        }
    }

    /// Sets the status.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

/// Fields of an event notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EventPayload {
    /// Event type node.
    pub event_type: Option<NodeId>,
    /// Human readable message.
    pub message: String,
    /// Severity from 1 (low) to 1000 (high).
    pub severity: u16,
    /// When the event occurred.
    pub time: Option<DateTime<Utc>>,
    /// Additional selected fields.
    #[serde(default)]
    pub fields: BTreeMap<String, Variant>,
}

impl EventPayload {
    /// Creates an event with a message and severity.
    pub fn new(message: impl Into<String>, severity: u16) -> Self {
        Self {
            event_type: None,
            message: message.into(),
            severity,
            time: Some(Utc::now()),
            fields: BTreeMap::new(),
        }
    }

    /// Adds a field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Variant>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

// =============================================================================
// BrowseResult
// =============================================================================

/// A forward hierarchical reference returned by browse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseResult {
    /// Target node.
    pub node_id: NodeId,
    /// Browse name of the target.
    pub browse_name: QualifiedName,
    /// Display name of the target.
    pub display_name: String,
    /// Class of the target.
    pub node_class: NodeClass,
}

impl BrowseResult {
    /// Creates a browse result using the browse name as display name.
    pub fn new(node_id: NodeId, browse_name: QualifiedName, node_class: NodeClass) -> Self {
        Self {
            display_name: browse_name.name.clone(),
            node_id,
            browse_name,
            node_class,
        }
    }
}

// =============================================================================
// Subscription Requests
// =============================================================================

/// Parameters of a server subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    /// Requested publishing interval.
    pub publishing_interval: Duration,
    /// Lifetime count.
    pub lifetime_count: u32,
    /// Keep-alive count.
    pub keepalive_count: u32,
    /// Priority.
    pub priority: u8,
}

/// Result of creating a server subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedSubscription {
    /// Server assigned id.
    pub subscription_id: u32,
    /// Interval the server actually granted.
    pub revised_publishing_interval: Duration,
}

/// Parameters of a monitored item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredItemRequest {
    /// Node to monitor.
    pub node_id: NodeId,
    /// What to monitor.
    pub kind: MonitorKind,
    /// Sampling interval.
    pub sampling_interval: Duration,
    /// Server-side queue size.
    pub queue_size: u32,
    /// Client chosen handle echoed back in notifications.
    pub client_handle: u32,
}

// =============================================================================
// ServerFrame
// =============================================================================

/// Asynchronous traffic pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// A monitored value changed.
    DataChange {
        /// Owning subscription.
        subscription_id: u32,
        /// Publish sequence number.
        sequence_number: u32,
        /// Monitored item client handle.
        client_handle: u32,
        /// The new value.
        value: DataValue,
    },

    /// An event was raised.
    Event {
        /// Owning subscription.
        subscription_id: u32,
        /// Publish sequence number.
        sequence_number: u32,
        /// Monitored item client handle.
        client_handle: u32,
        /// Event fields.
        payload: EventPayload,
    },

    /// The subscription is alive but has nothing to report.
    KeepAlive {
        /// Owning subscription.
        subscription_id: u32,
        /// Publish sequence number.
        sequence_number: u32,
    },

    /// The channel was closed by the server or the network.
    ChannelClosed {
        /// Reason reported by the transport.
        reason: String,
    },
}

impl ServerFrame {
    /// Returns the subscription this frame belongs to.
    pub fn subscription_id(&self) -> Option<u32> {
        match self {
            Self::DataChange { subscription_id, .. }
            | Self::Event { subscription_id, .. }
            | Self::KeepAlive { subscription_id, .. } => Some(*subscription_id),
            Self::ChannelClosed { .. } => None,
        }
    }
}

// =============================================================================
// Transport Trait
// =============================================================================

/// Wire-level services used by the client.
///
/// Errors returned here are surfaced unchanged, except that the session
/// wraps every call with its request timeout and turns calls racing a
/// disconnect into `ConnectionClosed`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    // =========================================================================
    // Channel
    // =========================================================================

    /// Opens a secure channel and session.
    ///
    /// Returns the receiver of asynchronous server traffic. The stream ends
    /// (or yields [`ServerFrame::ChannelClosed`]) when the channel is lost.
    async fn open(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> ClientResult<mpsc::Receiver<ServerFrame>>;

    /// Closes the channel. Must tolerate being called on a closed channel.
    async fn close(&self) -> ClientResult<()>;

    // =========================================================================
    // Address Space
    // =========================================================================

    /// Looks up a namespace index by URI.
    async fn namespace_index(&self, uri: &str) -> ClientResult<Option<u16>>;

    /// Returns the class of a node, or `None` if the node does not exist.
    async fn node_class(&self, node_id: &NodeId) -> ClientResult<Option<NodeClass>>;

    /// Returns the forward hierarchical references of a node.
    async fn browse(&self, node_id: &NodeId) -> ClientResult<Vec<BrowseResult>>;

    // =========================================================================
    // Attribute Services
    // =========================================================================

    /// Reads the value attribute.
    async fn read_value(&self, node_id: &NodeId) -> ClientResult<DataValue>;

    /// Writes the value attribute.
    async fn write_value(&self, node_id: &NodeId, value: Variant) -> ClientResult<StatusCode>;

    // =========================================================================
    // Subscription Services
    // =========================================================================

    /// Creates a server subscription.
    async fn create_subscription(
        &self,
        request: &SubscriptionRequest,
    ) -> ClientResult<CreatedSubscription>;

    /// Deletes a server subscription and its monitored items.
    async fn delete_subscription(&self, subscription_id: u32) -> ClientResult<()>;

    /// Creates a monitored item and returns its server id.
    async fn create_monitored_item(
        &self,
        subscription_id: u32,
        request: &MonitoredItemRequest,
    ) -> ClientResult<u32>;

    /// Deletes a monitored item.
    async fn delete_monitored_item(
        &self,
        subscription_id: u32,
        monitored_item_id: u32,
    ) -> ClientResult<()>;

    /// Name used in log output.
    fn display_name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_conversions() {
        assert_eq!(Variant::from(42i32).as_i64(), Some(42));
        assert_eq!(Variant::from(1.5f64).as_f64(), Some(1.5));
        assert_eq!(Variant::from(0u16).as_bool(), Some(false));
        assert_eq!(Variant::from("pump").as_str(), Some("pump"));
        assert_eq!(Variant::UInt64(u64::MAX).as_i64(), None);
        assert!(Variant::default().is_null());
        assert_eq!(Variant::Double(1.0).type_name(), "Double");
    }

    #[test]
    fn test_variant_display() {
        let array = Variant::Array(vec![Variant::Int32(1), Variant::Boolean(true)]);
        assert_eq!(array.to_string(), "[1, true]");
        assert_eq!(Variant::ByteString(vec![1, 2]).to_string(), "<2 bytes>");
    }

    #[test]
    fn test_status_code_severity() {
        assert!(StatusCode::GOOD.is_good());
        assert!(StatusCode(0x4000_0000).is_uncertain());
        assert!(StatusCode::BAD_NOT_WRITABLE.is_bad());
        assert!(!StatusCode::BAD_NOT_WRITABLE.is_good());
    }

    #[test]
    fn test_server_frame_subscription_id() {
        let frame = ServerFrame::KeepAlive {
            subscription_id: 7,
            sequence_number: 1,
        };
        assert_eq!(frame.subscription_id(), Some(7));
        let closed = ServerFrame::ChannelClosed {
            reason: "eof".into(),
        };
        assert_eq!(closed.subscription_id(), None);
    }
}
