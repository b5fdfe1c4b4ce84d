//! Cache, fallback and tool policies carried by an execution context.

use crate::backend::domain::BackendName;
use crate::tool_registry::domain::SideEffectClass;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the tool executor may use the result cache for a request.
///
/// Mutating tools are never cached regardless of the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CachePolicy {
    /// Neither read from nor write to the cache.
    Bypass,
    /// Serve hits from the cache and populate it on misses.
    #[default]
    Use,
    /// Skip cache reads but store fresh results.
    Refresh,
}

impl CachePolicy {
    /// Returns whether cached results may be served.
    #[must_use]
    pub const fn reads(self) -> bool {
        matches!(self, Self::Use)
    }

    /// Returns whether fresh results may be stored.
    #[must_use]
    pub const fn writes(self) -> bool {
        matches!(self, Self::Use | Self::Refresh)
    }

    /// Returns whether results of tools in `class` are cache-eligible.
    #[must_use]
    pub const fn allows(self, class: SideEffectClass) -> bool {
        !matches!(self, Self::Bypass) && matches!(class, SideEffectClass::ReadOnly)
    }
}

/// Ordered backend preference and retry budget for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackPolicy {
    backends: Vec<BackendName>,
    max_retries: u32,
    backoff_base: Duration,
}

impl FallbackPolicy {
    /// Creates a policy over an ordered backend list.
    ///
    /// An empty list means every registered backend is a candidate.
    #[must_use]
    pub fn new(backends: impl IntoIterator<Item = BackendName>) -> Self {
        Self {
            backends: backends.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Sets the number of attempts allowed after the first.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base delay between consecutive attempts.
    #[must_use]
    pub const fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    /// Returns the ordered backend list.
    #[must_use]
    pub fn backends(&self) -> &[BackendName] {
        &self.backends
    }

    /// Returns the first backend in the list, treated as the explicit
    /// preference when the request names none.
    #[must_use]
    pub fn preferred(&self) -> Option<&BackendName> {
        self.backends.first()
    }

    /// Returns the retry budget.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the total number of attempts allowed.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Returns the delay to wait before attempt number `attempt` (1-based).
    ///
    /// The first attempt never waits; later attempts wait
    /// `backoff_base * 2^(attempt - 2)`.
    #[must_use]
    pub fn backoff_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(2).min(16);
        self.backoff_base.saturating_mul(1_u32 << exponent)
    }
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
            max_retries: 2,
            backoff_base: Duration::ZERO,
        }
    }
}

/// Caller role declared by the surrounding surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerRole {
    /// A human driving a session.
    #[default]
    Interactive,
    /// An automated client such as a batch job.
    Service,
    /// A read-only observer; never permitted to run mutating tools.
    Observer,
}

/// Which tools a request may invoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPolicy {
    enabled: bool,
    allowed_classes: Vec<SideEffectClass>,
    fail_turn_on_error: bool,
}

impl ToolPolicy {
    /// Tools enabled, read-only tools only.
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            enabled: true,
            allowed_classes: vec![SideEffectClass::ReadOnly],
            fail_turn_on_error: false,
        }
    }

    /// Tools enabled, mutating tools explicitly allowed.
    #[must_use]
    pub fn allow_mutating() -> Self {
        Self {
            enabled: true,
            allowed_classes: vec![SideEffectClass::ReadOnly, SideEffectClass::Mutating],
            fail_turn_on_error: false,
        }
    }

    /// Tools disabled entirely.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            allowed_classes: Vec::new(),
            fail_turn_on_error: false,
        }
    }

    /// Makes any single tool failure fatal to the whole turn.
    #[must_use]
    pub const fn failing_turn_on_error(mut self) -> Self {
        self.fail_turn_on_error = true;
        self
    }

    /// Returns whether tools may be invoked at all.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns whether tools of `class` may be invoked.
    ///
    /// Read-only tools only need tools to be enabled; mutating tools need an
    /// explicit allow.
    #[must_use]
    pub fn allows(&self, class: SideEffectClass) -> bool {
        if !self.enabled {
            return false;
        }
        match class {
            SideEffectClass::ReadOnly => true,
            SideEffectClass::Mutating => self.allowed_classes.contains(&class),
        }
    }

    /// Returns whether a tool failure aborts the whole turn.
    #[must_use]
    pub const fn fail_turn_on_error(&self) -> bool {
        self.fail_turn_on_error
    }
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self::read_only()
    }
}
