//! Stream session lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a stream session.
///
/// `Open` moves to `Draining` once the producer completes and to `Closed`
/// when every consumer has drained; `Open` and `Draining` move to `Errored`
/// on producer failure or cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// Chunks are flowing.
    Open,
    /// The producer completed; buffered chunks are still being delivered.
    Draining,
    /// Every consumer has drained or detached.
    Closed,
    /// The producer failed or was cancelled.
    Errored,
}

impl StreamState {
    /// Returns the canonical representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Draining => "draining",
            Self::Closed => "closed",
            Self::Errored => "errored",
        }
    }

    /// Returns whether no further chunks can be pushed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }

    /// Returns whether the lifecycle permits moving to `target`.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Open, Self::Draining | Self::Closed | Self::Errored)
                | (Self::Draining, Self::Closed | Self::Errored)
        )
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
