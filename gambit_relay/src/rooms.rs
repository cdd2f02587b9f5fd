// Broadcast room membership.
//
// A room is a named set of connections; session IDs are used as room names
// so a move or lifecycle event reaches exactly the sockets that subscribed to
// that session. Membership is purely a transport concern: the coordinator
// never looks at it, and a player reconnecting on a new socket simply
// subscribes again.

use std::collections::{BTreeMap, BTreeSet};

use gambit_protocol::types::ConnectionId;

#[derive(Default)]
pub struct Rooms {
    members: BTreeMap<String, BTreeSet<ConnectionId>>,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `conn` to `room`. Returns false if it was already a member.
    pub fn join(&mut self, room: &str, conn: ConnectionId) -> bool {
        self.members.entry(room.to_owned()).or_default().insert(conn)
    }

    /// Remove `conn` from `room`, dropping the room once it is empty.
    pub fn leave(&mut self, room: &str, conn: ConnectionId) -> bool {
        let Some(set) = self.members.get_mut(room) else {
            return false;
        };
        let removed = set.remove(&conn);
        if set.is_empty() {
            self.members.remove(room);
        }
        removed
    }

    /// Remove `conn` from every room. Returns how many rooms it was in.
    pub fn drop_connection(&mut self, conn: ConnectionId) -> usize {
        let mut count = 0;
        self.members.retain(|_, set| {
            if set.remove(&conn) {
                count += 1;
            }
            !set.is_empty()
        });
        count
    }

    /// Members of `room` other than `exclude`, in ID order.
    pub fn recipients(&self, room: &str, exclude: Option<ConnectionId>) -> Vec<ConnectionId> {
        self.members
            .get(room)
            .map(|set| {
                set.iter()
                    .copied()
                    .filter(|conn| Some(*conn) != exclude)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.members.len()
    }
}
