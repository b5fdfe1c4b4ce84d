//! Per-backend circuit state and its transition rules.

use super::FailureClass;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Availability state gating backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// No call outcome has been observed yet.
    Unknown,
    /// The last outcome was a success, or failures are below the threshold.
    Healthy,
    /// Half-open: the reopen deadline elapsed and a single probe is allowed.
    Degraded,
    /// Tripped: excluded from selection until the reopen deadline.
    Open,
}

impl CircuitState {
    /// Returns the canonical representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Open => "open",
        }
    }

    /// Returns the selection rank; lower ranks are tried first.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Unknown => 1,
            Self::Degraded => 2,
            Self::Open => 3,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds and backoff for circuit trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthPolicy {
    /// Consecutive retryable failures that trip the circuit.
    pub failure_threshold: u32,
    /// Open interval after the first trip.
    pub open_base: Duration,
    /// Upper bound on the open interval after repeated trips.
    pub open_cap: Duration,
}

impl HealthPolicy {
    /// Returns the open interval for trip number `trips` (1-based): the base
    /// doubled per repeated trip, capped.
    #[must_use]
    pub fn open_interval(&self, trips: u32) -> Duration {
        let exponent = trips.saturating_sub(1).min(20);
        self.open_base
            .saturating_mul(1_u32 << exponent)
            .min(self.open_cap)
    }
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_base: Duration::from_secs(30),
            open_cap: Duration::from_secs(300),
        }
    }
}

/// Observable effect of recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    /// The circuit state did not change.
    Unchanged,
    /// The backend became healthy (first success or successful probe).
    Recovered,
    /// The circuit tripped open until the given instant.
    Tripped {
        /// Reopen deadline.
        reopen_at: DateTime<Utc>,
    },
    /// The open interval elapsed and the backend entered the half-open state.
    HalfOpened,
}

/// Health record of a single backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthState {
    circuit: CircuitState,
    consecutive_failures: u32,
    trips: u32,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<FailureClass>,
    reopen_at: Option<DateTime<Utc>>,
}

impl HealthState {
    /// Creates an `Unknown` record.
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            circuit: CircuitState::Unknown,
            consecutive_failures: 0,
            trips: 0,
            last_success: None,
            last_error: None,
            reopen_at: None,
        }
    }

    /// Returns the stored circuit state.
    #[must_use]
    pub const fn circuit(&self) -> CircuitState {
        self.circuit
    }

    /// Returns the circuit state as seen at `now`: an `Open` circuit whose
    /// reopen deadline has elapsed reads as `Degraded`.
    #[must_use]
    pub fn circuit_at(&self, now: DateTime<Utc>) -> CircuitState {
        match self.circuit {
            CircuitState::Open if self.reopen_elapsed(now) => CircuitState::Degraded,
            state => state,
        }
    }

    /// Returns whether the backend may be selected at `now`.
    #[must_use]
    pub fn is_selectable_at(&self, now: DateTime<Utc>) -> bool {
        self.circuit_at(now) != CircuitState::Open
    }

    /// Returns the consecutive retryable failure count.
    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Returns how many times the circuit tripped since the last recovery.
    #[must_use]
    pub const fn trips(&self) -> u32 {
        self.trips
    }

    /// Returns the last successful call timestamp.
    #[must_use]
    pub const fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    /// Returns the classification of the most recent failure.
    #[must_use]
    pub const fn last_error(&self) -> Option<FailureClass> {
        self.last_error
    }

    /// Returns the reopen deadline while the circuit is open.
    #[must_use]
    pub const fn reopen_at(&self) -> Option<DateTime<Utc>> {
        self.reopen_at
    }

    /// Moves an elapsed `Open` circuit to `Degraded`.
    pub fn half_open_if_due(&mut self, now: DateTime<Utc>) -> HealthTransition {
        if self.circuit == CircuitState::Open && self.reopen_elapsed(now) {
            self.circuit = CircuitState::Degraded;
            return HealthTransition::HalfOpened;
        }
        HealthTransition::Unchanged
    }

    /// Records a successful call.
    ///
    /// A success observed while the circuit is still open (a call that began
    /// before the trip) does not close it early.
    pub fn record_success(&mut self, now: DateTime<Utc>) -> HealthTransition {
        self.last_success = Some(now);
        match self.circuit {
            CircuitState::Open => HealthTransition::Unchanged,
            CircuitState::Healthy => {
                self.consecutive_failures = 0;
                HealthTransition::Unchanged
            }
            CircuitState::Unknown | CircuitState::Degraded => {
                self.circuit = CircuitState::Healthy;
                self.consecutive_failures = 0;
                self.trips = 0;
                self.reopen_at = None;
                HealthTransition::Recovered
            }
        }
    }

    /// Records a failed call.
    ///
    /// Fatal failures are attributed to the request rather than the backend:
    /// they are remembered as the last error but never move the circuit.
    pub fn record_failure(
        &mut self,
        class: FailureClass,
        now: DateTime<Utc>,
        policy: &HealthPolicy,
    ) -> HealthTransition {
        self.last_error = Some(class);
        if !class.is_retryable() {
            return HealthTransition::Unchanged;
        }

        match self.circuit {
            CircuitState::Open => HealthTransition::Unchanged,
            CircuitState::Degraded => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.trip(now, policy)
            }
            CircuitState::Unknown | CircuitState::Healthy => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= policy.failure_threshold {
                    self.trip(now, policy)
                } else {
                    HealthTransition::Unchanged
                }
            }
        }
    }

    /// Force-closes the circuit, forgetting failure history.
    pub const fn reset(&mut self) {
        self.circuit = CircuitState::Unknown;
        self.consecutive_failures = 0;
        self.trips = 0;
        self.reopen_at = None;
    }

    fn trip(&mut self, now: DateTime<Utc>, policy: &HealthPolicy) -> HealthTransition {
        self.trips = self.trips.saturating_add(1);
        let interval = TimeDelta::from_std(policy.open_interval(self.trips))
            .unwrap_or(TimeDelta::MAX);
        let reopen_at = now
            .checked_add_signed(interval)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.circuit = CircuitState::Open;
        self.reopen_at = Some(reopen_at);
        HealthTransition::Tripped { reopen_at }
    }

    fn reopen_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.reopen_at.is_none_or(|deadline| now >= deadline)
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::unknown()
    }
}
