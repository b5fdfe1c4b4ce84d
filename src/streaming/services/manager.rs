//! Stream session state machine and consumer fan-out.

use super::RoomRegistry;
use crate::streaming::{
    adapters::{ConsumerSink, ConsumerStream, Offer, QueuePolicy, consumer_channel},
    domain::{
        ConnectionId, ConsumerId, Delivery, DeliveryOrigin, RoomName, StreamError, StreamEvent,
        StreamSessionId, StreamState,
    },
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Handle on the producer feeding a session.
///
/// Cancelling the session fires the token so the producer stops.
#[derive(Debug, Clone)]
pub struct ProducerHandle {
    label: String,
    cancellation: CancellationToken,
}

impl ProducerHandle {
    /// Creates a handle around the producer's cancellation token.
    #[must_use]
    pub fn new(label: impl Into<String>, cancellation: CancellationToken) -> Self {
        Self {
            label: label.into(),
            cancellation,
        }
    }

    /// Creates a handle with a fresh token.
    #[must_use]
    pub fn detached(label: impl Into<String>) -> Self {
        Self::new(label, CancellationToken::new())
    }

    /// Returns the producer label used in logs.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the producer's cancellation token.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

#[derive(Debug)]
struct Subscription {
    sink: ConsumerSink,
    connection: Option<ConnectionId>,
}

#[derive(Debug)]
struct SessionEntry {
    state: StreamState,
    producer: ProducerHandle,
    subscriptions: Vec<Subscription>,
    next_sequence: u64,
}

impl SessionEntry {
    fn is_drained(&self, session: StreamSessionId) -> bool {
        let origin = DeliveryOrigin::Session(session);
        self.subscriptions
            .iter()
            .all(|subscription| subscription.sink.pending_from(&origin) == 0)
    }

    fn transition(&mut self, target: StreamState) -> Result<(), StreamError> {
        if !self.state.can_transition_to(target) {
            return Err(StreamError::InvalidTransition {
                from: self.state,
                to: target,
            });
        }
        self.state = target;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ManagerState {
    sessions: HashMap<StreamSessionId, SessionEntry>,
    connections: HashMap<ConnectionId, ConsumerSink>,
    rooms: RoomRegistry,
}

impl ManagerState {
    fn session_mut(&mut self, session: StreamSessionId) -> Result<&mut SessionEntry, StreamError> {
        self.sessions
            .get_mut(&session)
            .ok_or(StreamError::SessionNotFound(session))
    }

    fn drop_connections(&mut self, dropped: &[ConnectionId]) {
        for connection in dropped {
            self.connections.remove(connection);
            self.rooms.leave_all(connection);
        }
    }

    fn reap(&mut self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|session, entry| {
            if entry.state == StreamState::Draining && entry.is_drained(*session) {
                entry.state = StreamState::Closed;
            }
            !(entry.state.is_terminal() && entry.is_drained(*session))
        });
        before.saturating_sub(self.sessions.len())
    }
}

/// Multiplexes stream sessions to consumers.
///
/// Every consumer owns a bounded queue; offering to it never blocks, so one
/// slow consumer cannot stall the producer or any other consumer. Within a
/// session each consumer sees chunks in push order.
pub struct StreamChannelManager<C>
where
    C: Clock + Send + Sync,
{
    clock: Arc<C>,
    policy: QueuePolicy,
    state: Mutex<ManagerState>,
}

impl<C> StreamChannelManager<C>
where
    C: Clock + Send + Sync,
{
    /// Creates a manager whose consumer queues use `policy`.
    #[must_use]
    pub fn new(policy: QueuePolicy, clock: Arc<C>) -> Self {
        Self {
            clock,
            policy,
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Returns the queue policy applied to new consumers.
    #[must_use]
    pub const fn queue_policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Opens a session for `producer`.
    #[must_use]
    pub fn open(&self, producer: ProducerHandle) -> StreamSessionId {
        let session = StreamSessionId::new();
        let mut state = self.lock();
        state.reap();
        tracing::info!(session = %session, producer = producer.label(), "stream session opened");
        state.sessions.insert(
            session,
            SessionEntry {
                state: StreamState::Open,
                producer,
                subscriptions: Vec::new(),
                next_sequence: 0,
            },
        );
        session
    }

    /// Subscribes a dedicated consumer. The sink is closed when the session
    /// ends.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::SessionNotFound`] for an unknown session and
    /// [`StreamError::InvalidTransition`] when the session is no longer open.
    pub fn subscribe(&self, session: StreamSessionId, sink: ConsumerSink) -> Result<(), StreamError> {
        let mut state = self.lock();
        let entry = open_session(&mut state, session)?;
        tracing::debug!(session = %session, consumer = %sink.id(), "consumer subscribed");
        entry.subscriptions.push(Subscription {
            sink,
            connection: None,
        });
        Ok(())
    }

    /// Creates a dedicated consumer queue and subscribes it.
    ///
    /// # Errors
    ///
    /// See [`Self::subscribe`].
    pub fn attach(&self, session: StreamSessionId) -> Result<ConsumerStream, StreamError> {
        let (sink, stream) = consumer_channel(self.policy);
        self.subscribe(session, sink)?;
        Ok(stream)
    }

    /// Removes a consumer from a session; other consumers are unaffected.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::SessionNotFound`] for an unknown session.
    pub fn unsubscribe(
        &self,
        session: StreamSessionId,
        consumer: ConsumerId,
    ) -> Result<bool, StreamError> {
        let mut state = self.lock();
        let entry = state.session_mut(session)?;
        let before = entry.subscriptions.len();
        entry.subscriptions.retain(|subscription| {
            let keep = subscription.sink.id() != consumer;
            if !keep && subscription.connection.is_none() {
                subscription.sink.close();
            }
            keep
        });
        Ok(entry.subscriptions.len() < before)
    }

    /// Pushes a chunk to every consumer and returns how many accepted it.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::SessionNotFound`] for an unknown session and
    /// [`StreamError::InvalidTransition`] unless the session is open.
    pub fn push(&self, session: StreamSessionId, data: impl Into<String>) -> Result<usize, StreamError> {
        self.push_chunk(session, data.into(), false)
    }

    /// Pushes the last chunk and completes the session.
    ///
    /// # Errors
    ///
    /// See [`Self::push`].
    pub fn push_final(
        &self,
        session: StreamSessionId,
        data: impl Into<String>,
    ) -> Result<StreamState, StreamError> {
        self.push_chunk(session, data.into(), true)?;
        self.complete(session)
    }

    /// Marks the producer complete. Consumers receive a completion event
    /// after their buffered chunks; the session reads `Closed` once all of
    /// them have drained.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::SessionNotFound`] or
    /// [`StreamError::InvalidTransition`].
    pub fn complete(&self, session: StreamSessionId) -> Result<StreamState, StreamError> {
        let now = self.clock.utc();
        let mut state = self.lock();
        let entry = state.session_mut(session)?;
        entry.transition(StreamState::Draining)?;
        let dropped = deliver(entry, session, &StreamEvent::Completed, now);
        close_dedicated(entry);
        if entry.is_drained(session) {
            entry.state = StreamState::Closed;
        }
        let current = entry.state;
        state.drop_connections(&dropped);
        tracing::info!(session = %session, state = %current, "stream session completed");
        Ok(current)
    }

    /// Fails the session: every consumer receives `ProducerFailed`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::SessionNotFound`] or
    /// [`StreamError::InvalidTransition`].
    pub fn fail(&self, session: StreamSessionId, detail: impl Into<String>) -> Result<(), StreamError> {
        let error = StreamError::ProducerFailed {
            detail: detail.into(),
        };
        tracing::warn!(session = %session, error = %error, "stream session failed");
        self.terminate(session, &StreamEvent::Failed { error })
    }

    /// Aborts the session on behalf of its owner: the session moves to
    /// `Errored`, every consumer receives exactly one cancellation event, and
    /// the producer's token fires.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::SessionNotFound`] or
    /// [`StreamError::InvalidTransition`].
    pub fn cancel(&self, session: StreamSessionId, reason: impl Into<String>) -> Result<(), StreamError> {
        let reason = reason.into();
        tracing::info!(session = %session, reason = %reason, "stream session cancelled");
        self.terminate(session, &StreamEvent::Cancelled { reason })
    }

    /// Cancels every open or draining session.
    pub fn cancel_all(&self, reason: &str) {
        let sessions: Vec<StreamSessionId> = self
            .lock()
            .sessions
            .iter()
            .filter(|(_, entry)| !entry.state.is_terminal())
            .map(|(session, _)| *session)
            .collect();
        for session in sessions {
            if let Err(err) = self.cancel(session, reason) {
                tracing::debug!(session = %session, error = %err, "session ended before cancel");
            }
        }
    }

    /// Returns the session state.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::SessionNotFound`] for an unknown or reaped
    /// session.
    pub fn state(&self, session: StreamSessionId) -> Result<StreamState, StreamError> {
        let mut state = self.lock();
        let entry = state.session_mut(session)?;
        if entry.state == StreamState::Draining && entry.is_drained(session) {
            entry.state = StreamState::Closed;
            tracing::info!(session = %session, "stream session closed");
        }
        Ok(entry.state)
    }

    /// Returns the number of active consumers of a session.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::SessionNotFound`] for an unknown session.
    pub fn subscriber_count(&self, session: StreamSessionId) -> Result<usize, StreamError> {
        let mut state = self.lock();
        let entry = state.session_mut(session)?;
        Ok(entry
            .subscriptions
            .iter()
            .filter(|subscription| !subscription.sink.is_detached())
            .count())
    }

    /// Removes sessions that ended and whose consumers have all drained or
    /// detached. Returns how many were removed.
    #[must_use]
    pub fn reap(&self) -> usize {
        let reaped = self.lock().reap();
        if reaped > 0 {
            tracing::debug!(reaped, "stream sessions reaped");
        }
        reaped
    }

    /// Registers a connection and returns its delivery queue, replacing any
    /// previous queue of the same connection.
    #[must_use]
    pub fn connect(&self, connection: ConnectionId) -> ConsumerStream {
        let (sink, stream) = consumer_channel(self.policy);
        if let Some(previous) = self.lock().connections.insert(connection.clone(), sink) {
            previous.close();
        }
        tracing::debug!(connection = %connection, "connection registered");
        stream
    }

    /// Forgets a connection: it leaves every room and every session.
    #[must_use]
    pub fn disconnect(&self, connection: &ConnectionId) -> bool {
        let mut state = self.lock();
        let Some(sink) = state.connections.remove(connection) else {
            return false;
        };
        sink.close();
        state.rooms.leave_all(connection);
        for entry in state.sessions.values_mut() {
            entry
                .subscriptions
                .retain(|subscription| subscription.connection.as_ref() != Some(connection));
        }
        tracing::debug!(connection = %connection, "connection removed");
        true
    }

    /// Adds a connection to a room.
    #[must_use]
    pub fn join_room(&self, connection: ConnectionId, room: RoomName) -> bool {
        self.lock().rooms.join(connection, room)
    }

    /// Removes a connection from a room.
    #[must_use]
    pub fn leave_room(&self, connection: &ConnectionId, room: &RoomName) -> bool {
        self.lock().rooms.leave(connection, room)
    }

    /// Returns the members of a room.
    #[must_use]
    pub fn members_of(&self, room: &RoomName) -> BTreeSet<ConnectionId> {
        self.lock().rooms.members_of(room)
    }

    /// Subscribes a registered connection to a session.
    ///
    /// Returns `false` when the connection is unknown or already subscribed.
    ///
    /// # Errors
    ///
    /// See [`Self::subscribe`].
    pub fn subscribe_connection(
        &self,
        session: StreamSessionId,
        connection: &ConnectionId,
    ) -> Result<bool, StreamError> {
        let mut state = self.lock();
        let sink = state.connections.get(connection).cloned();
        let entry = open_session(&mut state, session)?;
        Ok(sink.is_some_and(|connection_sink| {
            add_connection(entry, connection.clone(), connection_sink)
        }))
    }

    /// Subscribes every current member of `room` to a session and returns
    /// how many new subscriptions were made.
    ///
    /// # Errors
    ///
    /// See [`Self::subscribe`].
    pub fn subscribe_room(
        &self,
        session: StreamSessionId,
        room: &RoomName,
    ) -> Result<usize, StreamError> {
        let mut state = self.lock();
        let members: Vec<(ConnectionId, ConsumerSink)> = state
            .rooms
            .members_of(room)
            .into_iter()
            .filter_map(|member| {
                let sink = state.connections.get(&member).cloned()?;
                Some((member, sink))
            })
            .collect();
        let entry = open_session(&mut state, session)?;
        let added = members
            .into_iter()
            .filter(|(member, sink)| add_connection(entry, member.clone(), sink.clone()))
            .count();
        tracing::debug!(session = %session, room = %room, added, "room subscribed to session");
        Ok(added)
    }

    /// Sends a payload to every member of `room` and returns how many
    /// accepted it.
    #[must_use]
    pub fn broadcast_to_room(&self, room: &RoomName, payload: &Value) -> usize {
        let now = self.clock.utc();
        let mut state = self.lock();
        let members = state.rooms.members_of(room);
        let targets: Vec<(ConnectionId, ConsumerSink)> = members
            .into_iter()
            .filter_map(|member| {
                let sink = state.connections.get(&member).cloned()?;
                Some((member, sink))
            })
            .collect();
        let origin = DeliveryOrigin::Room(room.clone());
        let (delivered, dropped) = offer_all(&targets, &origin, payload, now);
        state.drop_connections(&dropped);
        delivered
    }

    /// Sends a payload to every registered connection and returns how many
    /// accepted it.
    #[must_use]
    pub fn broadcast(&self, payload: &Value) -> usize {
        let now = self.clock.utc();
        let mut state = self.lock();
        let targets: Vec<(ConnectionId, ConsumerSink)> = state
            .connections
            .iter()
            .map(|(connection, sink)| (connection.clone(), sink.clone()))
            .collect();
        let (delivered, dropped) = offer_all(&targets, &DeliveryOrigin::Broadcast, payload, now);
        state.drop_connections(&dropped);
        delivered
    }

    fn push_chunk(
        &self,
        session: StreamSessionId,
        data: String,
        is_final: bool,
    ) -> Result<usize, StreamError> {
        let now = self.clock.utc();
        let mut state = self.lock();
        let entry = open_session(&mut state, session)?;
        let sequence = entry.next_sequence;
        entry.next_sequence = sequence.saturating_add(1);
        let event = StreamEvent::Chunk {
            data,
            is_final,
            sequence,
        };
        let dropped = deliver(entry, session, &event, now);
        let delivered = entry.subscriptions.len();
        state.drop_connections(&dropped);
        Ok(delivered)
    }

    fn terminate(&self, session: StreamSessionId, event: &StreamEvent) -> Result<(), StreamError> {
        let now = self.clock.utc();
        let mut state = self.lock();
        let entry = state.session_mut(session)?;
        entry.transition(StreamState::Errored)?;
        let dropped = deliver(entry, session, event, now);
        close_dedicated(entry);
        if matches!(event, StreamEvent::Cancelled { .. }) {
            entry.producer.cancellation().cancel();
        }
        state.drop_connections(&dropped);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn open_session(
    state: &mut ManagerState,
    session: StreamSessionId,
) -> Result<&mut SessionEntry, StreamError> {
    let entry = state.session_mut(session)?;
    if entry.state != StreamState::Open {
        return Err(StreamError::InvalidTransition {
            from: entry.state,
            to: StreamState::Open,
        });
    }
    Ok(entry)
}

fn add_connection(entry: &mut SessionEntry, connection: ConnectionId, sink: ConsumerSink) -> bool {
    let already = entry
        .subscriptions
        .iter()
        .any(|subscription| subscription.sink.id() == sink.id());
    if already || !sink.is_open() {
        return false;
    }
    entry.subscriptions.push(Subscription {
        sink,
        connection: Some(connection),
    });
    true
}

/// Offers `event` to every subscription, removing consumers that are gone.
/// Returns the connections whose queues were dropped.
fn deliver(
    entry: &mut SessionEntry,
    session: StreamSessionId,
    event: &StreamEvent,
    now: DateTime<Utc>,
) -> Vec<ConnectionId> {
    let mut dropped = Vec::new();
    entry.subscriptions.retain(|subscription| {
        let delivery = Delivery::new(DeliveryOrigin::Session(session), event.clone());
        match subscription.sink.offer(delivery, now) {
            Offer::Queued | Offer::Overflowed => true,
            Offer::Dropped => {
                tracing::warn!(
                    session = %session,
                    consumer = %subscription.sink.id(),
                    "slow consumer dropped"
                );
                dropped.extend(subscription.connection.clone());
                false
            }
            Offer::Closed => false,
        }
    });
    dropped
}

fn close_dedicated(entry: &SessionEntry) {
    for subscription in &entry.subscriptions {
        if subscription.connection.is_none() {
            subscription.sink.close();
        }
    }
}

fn offer_all(
    targets: &[(ConnectionId, ConsumerSink)],
    origin: &DeliveryOrigin,
    payload: &Value,
    now: DateTime<Utc>,
) -> (usize, Vec<ConnectionId>) {
    let mut delivered = 0;
    let mut dropped = Vec::new();
    for (connection, sink) in targets {
        let delivery = Delivery::new(
            origin.clone(),
            StreamEvent::Payload {
                body: payload.clone(),
            },
        );
        match sink.offer(delivery, now) {
            Offer::Queued | Offer::Overflowed => delivered += 1,
            Offer::Dropped => {
                tracing::warn!(connection = %connection, "slow connection dropped");
                dropped.push(connection.clone());
            }
            Offer::Closed => dropped.push(connection.clone()),
        }
    }
    (delivered, dropped)
}
