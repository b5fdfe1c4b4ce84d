//! Events delivered to consumers.

use super::{RoomName, StreamError, StreamSessionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event in a consumer queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental output.
    Chunk {
        /// Chunk text.
        data: String,
        /// Whether the producer marked this as its last chunk.
        is_final: bool,
        /// Position in the session, starting at zero.
        sequence: u64,
    },
    /// The producer finished successfully.
    Completed,
    /// The session owner aborted the stream.
    Cancelled {
        /// Reason given by the owner.
        reason: String,
    },
    /// The session or this consumer failed.
    Failed {
        /// Failure.
        error: StreamError,
    },
    /// A broadcast payload.
    Payload {
        /// Payload body.
        body: Value,
    },
}

impl StreamEvent {
    /// Returns whether the event ends its session for the receiving
    /// consumer.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled { .. } | Self::Failed { .. }
        )
    }
}

/// Where a delivery came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "origin", content = "id", rename_all = "snake_case")]
pub enum DeliveryOrigin {
    /// A stream session.
    Session(StreamSessionId),
    /// A broadcast to one room.
    Room(RoomName),
    /// A broadcast to every connection.
    Broadcast,
}

/// An event tagged with its origin.
///
/// A connection consumer can receive from several sessions and rooms
/// through one queue; the origin tells them apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    /// Source of the event.
    pub origin: DeliveryOrigin,
    /// The event.
    pub event: StreamEvent,
}

impl Delivery {
    /// Creates a delivery.
    #[must_use]
    pub const fn new(origin: DeliveryOrigin, event: StreamEvent) -> Self {
        Self { origin, event }
    }
}
