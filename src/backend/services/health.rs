//! Per-backend health tracking.

use crate::backend::domain::{
    BackendName, CircuitState, FailureClass, HealthPolicy, HealthState, HealthTransition,
};
use mockable::Clock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

#[derive(Debug, Default)]
struct HealthSlot {
    state: Mutex<HealthState>,
    probe_in_flight: AtomicBool,
}

impl HealthSlot {
    fn lock(&self) -> MutexGuard<'_, HealthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive right to probe a half-open backend.
///
/// Released when dropped, whatever the probe outcome.
#[derive(Debug)]
pub struct ProbePermit {
    backend: BackendName,
    slot: Arc<HealthSlot>,
}

impl ProbePermit {
    /// Returns the backend being probed.
    #[must_use]
    pub const fn backend(&self) -> &BackendName {
        &self.backend
    }
}

impl Drop for ProbePermit {
    fn drop(&mut self) {
        self.slot.probe_in_flight.store(false, Ordering::Release);
    }
}

/// Whether a backend may be called right now.
#[derive(Debug)]
pub enum Admission {
    /// The backend may be called. A half-open backend comes with the probe
    /// permit, which must be held until the outcome is recorded.
    Ready(Option<ProbePermit>),
    /// The circuit is open.
    CircuitOpen,
    /// The backend is half-open and another caller holds the probe permit.
    ProbeInFlight,
}

/// Tracks circuit state for every known backend.
///
/// Each backend has its own lock, so mutations for different backends never
/// contend, and all transitions for one backend are linearized. Queries copy
/// the state out and never perform I/O.
pub struct HealthTracker<C>
where
    C: Clock + Send + Sync,
{
    policy: HealthPolicy,
    clock: Arc<C>,
    slots: RwLock<HashMap<BackendName, Arc<HealthSlot>>>,
}

impl<C> HealthTracker<C>
where
    C: Clock + Send + Sync,
{
    /// Creates a tracker.
    #[must_use]
    pub fn new(policy: HealthPolicy, clock: Arc<C>) -> Self {
        Self {
            policy,
            clock,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the trip policy.
    #[must_use]
    pub const fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Starts tracking `backend` in the `Unknown` state. Tracking an already
    /// known backend keeps its history.
    pub fn track(&self, backend: &BackendName) {
        drop(self.slot(backend));
    }

    /// Returns a copy of the stored state of `backend`.
    #[must_use]
    pub fn state(&self, backend: &BackendName) -> HealthState {
        self.existing_slot(backend)
            .map(|slot| slot.lock().clone())
            .unwrap_or_default()
    }

    /// Returns the circuit state of `backend` as seen now.
    #[must_use]
    pub fn circuit(&self, backend: &BackendName) -> CircuitState {
        self.state(backend).circuit_at(self.clock.utc())
    }

    /// Returns a copy of every tracked state, ordered by backend name.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<BackendName, HealthState> {
        let slots: Vec<_> = self
            .read_slots()
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect();
        slots
            .into_iter()
            .map(|(name, slot)| {
                let state = slot.lock().clone();
                (name, state)
            })
            .collect()
    }

    /// Decides whether `backend` may be called now.
    ///
    /// An open circuit whose reopen deadline has elapsed moves to
    /// `Degraded`; only one caller at a time receives the probe permit for a
    /// degraded backend.
    #[must_use]
    pub fn admit(&self, backend: &BackendName) -> Admission {
        let slot = self.slot(backend);
        let now = self.clock.utc();
        let circuit = {
            let mut state = slot.lock();
            if state.half_open_if_due(now) == HealthTransition::HalfOpened {
                tracing::info!(backend = %backend, "circuit half-open, awaiting probe");
            }
            state.circuit()
        };

        match circuit {
            CircuitState::Open => Admission::CircuitOpen,
            CircuitState::Degraded => {
                if slot
                    .probe_in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    tracing::debug!(backend = %backend, "probe permit granted");
                    Admission::Ready(Some(ProbePermit {
                        backend: backend.clone(),
                        slot,
                    }))
                } else {
                    Admission::ProbeInFlight
                }
            }
            CircuitState::Unknown | CircuitState::Healthy => Admission::Ready(None),
        }
    }

    /// Records a successful call.
    pub fn record_success(&self, backend: &BackendName) {
        let slot = self.slot(backend);
        let transition = slot.lock().record_success(self.clock.utc());
        if transition == HealthTransition::Recovered {
            tracing::info!(backend = %backend, "backend healthy");
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self, backend: &BackendName, class: FailureClass) {
        let slot = self.slot(backend);
        let transition = slot
            .lock()
            .record_failure(class, self.clock.utc(), &self.policy);
        match transition {
            HealthTransition::Tripped { reopen_at } => {
                tracing::info!(backend = %backend, failure = %class, %reopen_at, "circuit opened");
            }
            _ => tracing::debug!(backend = %backend, failure = %class, "backend failure recorded"),
        }
    }

    /// Force-closes the circuit of `backend`, forgetting its failure history.
    pub fn reset(&self, backend: &BackendName) {
        if let Some(slot) = self.existing_slot(backend) {
            slot.lock().reset();
            tracing::info!(backend = %backend, "circuit reset");
        }
    }

    /// Stops tracking `backend`.
    pub fn forget(&self, backend: &BackendName) {
        self.write_slots().remove(backend);
    }

    fn existing_slot(&self, backend: &BackendName) -> Option<Arc<HealthSlot>> {
        self.read_slots().get(backend).cloned()
    }

    fn slot(&self, backend: &BackendName) -> Arc<HealthSlot> {
        if let Some(slot) = self.existing_slot(backend) {
            return slot;
        }
        Arc::clone(self.write_slots().entry(backend.clone()).or_default())
    }

    fn read_slots(&self) -> RwLockReadGuard<'_, HashMap<BackendName, Arc<HealthSlot>>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slots(&self) -> RwLockWriteGuard<'_, HashMap<BackendName, Arc<HealthSlot>>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}
