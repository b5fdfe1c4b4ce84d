//! Room membership bookkeeping.

use crate::streaming::domain::{ConnectionId, RoomName};
use std::collections::{BTreeSet, HashMap};

/// Named sets of connections.
///
/// Pure bookkeeping with no I/O; the channel manager consults it for
/// broadcast fan-out. Empty rooms are dropped on the last leave.
#[derive(Debug, Clone, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomName, BTreeSet<ConnectionId>>,
}

impl RoomRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `connection` to `room`; returns `false` if it was already a
    /// member.
    pub fn join(&mut self, connection: ConnectionId, room: RoomName) -> bool {
        self.rooms.entry(room).or_default().insert(connection)
    }

    /// Removes `connection` from `room`; returns `false` if it was not a
    /// member.
    pub fn leave(&mut self, connection: &ConnectionId, room: &RoomName) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(connection);
        if members.is_empty() {
            self.rooms.remove(room);
        }
        removed
    }

    /// Removes `connection` from every room it joined and returns how many
    /// rooms it left.
    pub fn leave_all(&mut self, connection: &ConnectionId) -> usize {
        let mut left = 0;
        self.rooms.retain(|_, members| {
            if members.remove(connection) {
                left += 1;
            }
            !members.is_empty()
        });
        left
    }

    /// Returns the members of `room`.
    #[must_use]
    pub fn members_of(&self, room: &RoomName) -> BTreeSet<ConnectionId> {
        self.rooms.get(room).cloned().unwrap_or_default()
    }

    /// Returns the rooms `connection` belongs to, in name order.
    #[must_use]
    pub fn rooms_of(&self, connection: &ConnectionId) -> Vec<RoomName> {
        let mut rooms: Vec<RoomName> = self
            .rooms
            .iter()
            .filter(|(_, members)| members.contains(connection))
            .map(|(room, _)| room.clone())
            .collect();
        rooms.sort();
        rooms
    }

    /// Returns the number of non-empty rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Returns whether no room has members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
