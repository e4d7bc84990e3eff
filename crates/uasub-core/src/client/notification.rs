// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Notifications delivered to handlers.

use chrono::{DateTime, Utc};

use crate::client::transport::{DataValue, EventPayload, StatusCode, Variant};
use crate::types::{MonitorKind, NodeId};

// =============================================================================
// ChangeMetadata
// =============================================================================

/// Delivery metadata attached to every data change.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeMetadata {
    /// Server subscription that produced the notification.
    pub subscription_id: u32,

    /// Publish sequence number.
    pub sequence_number: u32,

    /// Quality of the value.
    pub status: StatusCode,

    /// Source timestamp.
    pub source_timestamp: Option<DateTime<Utc>>,

    /// Server timestamp.
    pub server_timestamp: Option<DateTime<Utc>>,

    /// When the client received the frame.
    pub received_at: DateTime<Utc>,
}

// =============================================================================
// DataChange
// =============================================================================

/// A monitored value changed.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChange {
    /// The monitored node.
    pub node: NodeId,

    /// The new value.
    pub value: Variant,

    /// Delivery metadata.
    pub metadata: ChangeMetadata,
}

impl DataChange {
    pub(crate) fn from_frame(
        node: NodeId,
        subscription_id: u32,
        sequence_number: u32,
        value: DataValue,
    ) -> Self {
        Self {
            node,
            metadata: ChangeMetadata {
                subscription_id,
                sequence_number,
                status: value.status,
                source_timestamp: value.source_timestamp,
                server_timestamp: value.server_timestamp,
                received_at: Utc::now(),
            },
            value: value.value,
        }
    }

    /// Returns `true` if the value quality is good.
    #[inline]
    pub fn is_good(&self) -> bool {
        self.metadata.status.is_good()
    }
}

// =============================================================================
// EventNotification
// =============================================================================

/// An event raised by a monitored object.
#[derive(Debug, Clone, PartialEq)]
pub struct EventNotification {
    /// The monitored node.
    pub node: NodeId,

    /// Event fields.
    pub payload: EventPayload,

    /// Server subscription that produced the notification.
    pub subscription_id: u32,

    /// Publish sequence number.
    pub sequence_number: u32,

    /// When the client received the frame.
    pub received_at: DateTime<Utc>,
}

// =============================================================================
// Notification
// =============================================================================

/// Either kind of notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Data change.
    DataChange(DataChange),
    /// Event.
    Event(EventNotification),
}

impl Notification {
    /// Returns the monitored node.
    pub fn node(&self) -> &NodeId {
        match self {
            Self::DataChange(change) => &change.node,
            Self::Event(event) => &event.node,
        }
    }

    /// Returns the notification kind.
    pub fn kind(&self) -> MonitorKind {
        match self {
            Self::DataChange(_) => MonitorKind::DataChange,
            Self::Event(_) => MonitorKind::Event,
        }
    }

    /// Returns the publish sequence number.
    pub fn sequence_number(&self) -> u32 {
        match self {
            Self::DataChange(change) => change.metadata.sequence_number,
            Self::Event(event) => event.sequence_number,
        }
    }
}

impl From<DataChange> for Notification {
    fn from(change: DataChange) -> Self {
        Self::DataChange(change)
    }
}

impl From<EventNotification> for Notification {
    fn from(event: EventNotification) -> Self {
        Self::Event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_change_from_frame() {
        let node = NodeId::string(2, "Tank.Level");
        let change = DataChange::from_frame(node.clone(), 3, 17, DataValue::new(12.5f64));

        assert_eq!(change.node, node);
        assert_eq!(change.value, Variant::Double(12.5));
        assert_eq!(change.metadata.subscription_id, 3);
        assert_eq!(change.metadata.sequence_number, 17);
        assert!(change.is_good());

        let notification = Notification::from(change);
        assert_eq!(notification.kind(), MonitorKind::DataChange);
        assert_eq!(notification.node(), &node);
        assert_eq!(notification.sequence_number(), 17);
    }
}
