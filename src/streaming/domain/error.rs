//! Stream error types.

use super::{StreamSessionId, StreamState};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors constructing streaming identifiers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamDomainError {
    /// The connection identifier is empty after trimming.
    #[error("connection identifier must not be empty")]
    EmptyConnectionId,
    /// The room name is empty after trimming.
    #[error("room name must not be empty")]
    EmptyRoomName,
}

/// Failure affecting one stream session or one consumer.
///
/// A stream error terminates the affected session (or, for
/// `DroppedSlowConsumer`, the affected consumer) only.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum StreamError {
    /// The producer failed mid-stream.
    #[error("stream producer failed: {detail}")]
    ProducerFailed {
        /// Failure detail.
        detail: String,
    },
    /// The consumer fell behind and was disconnected.
    #[error("consumer dropped for falling behind")]
    DroppedSlowConsumer,
    /// The session owner aborted the stream.
    #[error("stream cancelled: {reason}")]
    Cancelled {
        /// Reason given by the owner.
        reason: String,
    },
    /// No session exists with the identifier.
    #[error("stream session {0} not found")]
    SessionNotFound(StreamSessionId),
    /// The session is not in a state that permits the operation.
    #[error("invalid stream transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: StreamState,
        /// Requested state.
        to: StreamState,
    },
}
