//! Bounded per-consumer delivery queue.

use crate::streaming::domain::{ConsumerId, Delivery, DeliveryOrigin, StreamError, StreamEvent};
use chrono::{DateTime, TimeDelta, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Backpressure limits of one consumer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePolicy {
    /// Deliveries the queue holds before the consumer counts as stalled.
    pub capacity: usize,
    /// Extra deliveries buffered while a stalled consumer is within grace.
    pub overflow: usize,
    /// How long a consumer may stay stalled before it is dropped.
    pub grace: Duration,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            capacity: 64,
            overflow: 64,
            grace: Duration::from_secs(2),
        }
    }
}

/// What happened to an offered delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Queued within capacity.
    Queued,
    /// Queued in the overflow allowance of a stalled consumer.
    Overflowed,
    /// The consumer was dropped; it has been sent `DroppedSlowConsumer`.
    Dropped,
    /// The consumer is closed or detached; nothing was queued.
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<Delivery>,
    stalled_since: Option<DateTime<Utc>>,
    closed: bool,
    detached: bool,
}

#[derive(Debug)]
struct Shared {
    id: ConsumerId,
    policy: QueuePolicy,
    state: Mutex<QueueState>,
    ready: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Creates a connected sink and stream pair.
#[must_use]
pub fn consumer_channel(policy: QueuePolicy) -> (ConsumerSink, ConsumerStream) {
    let shared = Arc::new(Shared {
        id: ConsumerId::new(),
        policy,
        state: Mutex::new(QueueState::default()),
        ready: Notify::new(),
    });
    (
        ConsumerSink {
            shared: Arc::clone(&shared),
        },
        ConsumerStream { shared },
    )
}

/// Producer side of a consumer queue, held by the channel manager.
///
/// Offering never blocks: a full queue marks the consumer stalled, and a
/// consumer stalled past its grace period (or past the overflow allowance)
/// is dropped with a `DroppedSlowConsumer` notice.
#[derive(Debug, Clone)]
pub struct ConsumerSink {
    shared: Arc<Shared>,
}

impl ConsumerSink {
    /// Returns the consumer identifier.
    #[must_use]
    pub fn id(&self) -> ConsumerId {
        self.shared.id
    }

    /// Offers one delivery. Terminal events bypass the capacity limit so a
    /// consumer always learns how its stream ended.
    #[must_use]
    pub fn offer(&self, delivery: Delivery, now: DateTime<Utc>) -> Offer {
        let policy = self.shared.policy;
        let mut state = self.shared.lock();
        if state.closed || state.detached {
            return Offer::Closed;
        }

        let within_capacity = state.queue.len() < policy.capacity;
        if within_capacity {
            state.stalled_since = None;
        }
        if within_capacity || delivery.event.is_terminal() {
            state.queue.push_back(delivery);
            drop(state);
            self.shared.ready.notify_one();
            return Offer::Queued;
        }

        let stalled_since = *state.stalled_since.get_or_insert(now);
        let grace = TimeDelta::from_std(policy.grace).unwrap_or(TimeDelta::MAX);
        let grace_elapsed = now.signed_duration_since(stalled_since) >= grace;
        let overflow_exhausted =
            state.queue.len() >= policy.capacity.saturating_add(policy.overflow);
        if grace_elapsed || overflow_exhausted {
            state.queue.clear();
            state.queue.push_back(Delivery::new(
                delivery.origin,
                StreamEvent::Failed {
                    error: StreamError::DroppedSlowConsumer,
                },
            ));
            state.closed = true;
            drop(state);
            self.shared.ready.notify_one();
            return Offer::Dropped;
        }

        state.queue.push_back(delivery);
        Offer::Overflowed
    }

    /// Stops accepting deliveries. Already queued deliveries stay readable.
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.ready.notify_one();
    }

    /// Returns whether deliveries are still accepted.
    #[must_use]
    pub fn is_open(&self) -> bool {
        let state = self.shared.lock();
        !state.closed && !state.detached
    }

    /// Returns whether the consumer side was dropped.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.shared.lock().detached
    }

    /// Returns the number of undelivered deliveries.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Returns the number of undelivered deliveries from `origin`.
    #[must_use]
    pub fn pending_from(&self, origin: &DeliveryOrigin) -> usize {
        self.shared
            .lock()
            .queue
            .iter()
            .filter(|delivery| &delivery.origin == origin)
            .count()
    }
}

/// Consumer side of a queue.
///
/// Dropping the stream detaches the consumer: the manager stops delivering
/// to it without affecting anyone else.
#[derive(Debug)]
pub struct ConsumerStream {
    shared: Arc<Shared>,
}

impl ConsumerStream {
    /// Returns the consumer identifier.
    #[must_use]
    pub fn id(&self) -> ConsumerId {
        self.shared.id
    }

    /// Waits for the next delivery; `None` once the queue is closed and
    /// empty.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            {
                let mut state = self.shared.lock();
                if let Some(delivery) = state.queue.pop_front() {
                    return Some(delivery);
                }
                if state.closed {
                    return None;
                }
            }
            self.shared.ready.notified().await;
        }
    }

    /// Returns the next delivery if one is queued.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.shared.lock().queue.pop_front()
    }

    /// Returns the number of queued deliveries.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Converts the queue into a `futures` stream.
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, Delivery> {
        stream::unfold(self, |mut consumer| async move {
            consumer.recv().await.map(|delivery| (delivery, consumer))
        })
        .boxed()
    }
}

impl Drop for ConsumerStream {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.detached = true;
        state.queue.clear();
    }
}
