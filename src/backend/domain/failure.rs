//! Backend failure taxonomy.
//!
//! Adapters classify every failure as retryable or fatal. The orchestrator
//! falls back on retryable failures and aborts on fatal ones; the health
//! tracker only counts retryable failures against a backend.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failures worth retrying against another backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryableKind {
    /// The attempt did not finish before its deadline.
    Timeout,
    /// Connection reset, DNS failure and similar transient network faults.
    Transport,
    /// The backend asked the caller to slow down.
    RateLimited,
    /// The backend reported an internal error.
    ServerError,
}

impl RetryableKind {
    /// Returns the canonical representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
        }
    }
}

/// Failures no other backend can fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalKind {
    /// The request itself is malformed.
    BadRequest,
    /// Credentials were rejected.
    Authentication,
}

impl FatalKind {
    /// Returns the canonical representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Authentication => "authentication",
        }
    }
}

/// Classification of a failed attempt, as consumed by the health tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "class", content = "kind", rename_all = "snake_case")]
pub enum FailureClass {
    /// A retryable backend error.
    Retryable(RetryableKind),
    /// A fatal backend error.
    Fatal(FatalKind),
}

impl FailureClass {
    /// Returns whether the failure permits fallback.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retryable(kind) => write!(f, "retryable:{}", kind.as_str()),
            Self::Fatal(kind) => write!(f, "fatal:{}", kind.as_str()),
        }
    }
}

/// Error returned by a backend adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum BackendError {
    /// Timeout, transient network fault, rate limit or server error.
    #[error("retryable backend error ({}): {detail}", .kind.as_str())]
    Retryable {
        /// Failure kind.
        kind: RetryableKind,
        /// Human-readable detail.
        detail: String,
    },
    /// Authentication failure or malformed request.
    #[error("fatal backend error ({}): {detail}", .kind.as_str())]
    Fatal {
        /// Failure kind.
        kind: FatalKind,
        /// Human-readable detail.
        detail: String,
    },
}

impl BackendError {
    /// Builds a retryable error.
    #[must_use]
    pub fn retryable(kind: RetryableKind, detail: impl Into<String>) -> Self {
        Self::Retryable {
            kind,
            detail: detail.into(),
        }
    }

    /// Builds a fatal error.
    #[must_use]
    pub fn fatal(kind: FatalKind, detail: impl Into<String>) -> Self {
        Self::Fatal {
            kind,
            detail: detail.into(),
        }
    }

    /// Builds a timeout error.
    #[must_use]
    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::retryable(RetryableKind::Timeout, detail)
    }

    /// Returns the classification.
    #[must_use]
    pub const fn class(&self) -> FailureClass {
        match self {
            Self::Retryable { kind, .. } => FailureClass::Retryable(*kind),
            Self::Fatal { kind, .. } => FailureClass::Fatal(*kind),
        }
    }

    /// Returns the detail text.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Retryable { detail, .. } | Self::Fatal { detail, .. } => detail,
        }
    }

    /// Returns whether the error permits fallback.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }
}
