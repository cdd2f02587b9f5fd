// Connection hub for the relay.
//
// `Hub` is the state the server's main loop drives. It owns the
// `Coordinator` (matchmaking and sessions), the broadcast `Rooms`, and the
// write half of every connected socket. All mutation happens through methods
// called from that single thread, so there is no internal locking.
//
// Routing of client events:
// - `RequestSession` / `QueryStatus` -> answered to the sending connection.
// - `CheckSessionReady`              -> broadcast to the session room.
// - `LeaveSession`                   -> broadcast to the room on success only.
// - `SubmitMove`                     -> recorded, then sent to every room
//                                       member except the sender.
// - `Subscribe` / `Unsubscribe`      -> room membership only.
//
// Writes are fire-and-forget: an error on one socket is logged and the
// connection's reader thread will notice the broken pipe and report the
// disconnect.

use std::collections::BTreeMap;
use std::io::BufWriter;
use std::net::{Shutdown, TcpStream};
use std::time::{Duration, Instant};

use gambit_protocol::framing::send_frame;
use gambit_protocol::message::{ClientMessage, ServerMessage};
use gambit_protocol::types::{ClientKey, ConnectionId, SessionId};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::coordinator::{Coordinator, CoordinatorStats};
use crate::rooms::Rooms;

pub struct Hub {
    coordinator: Coordinator,
    rooms: Rooms,
    connections: BTreeMap<ConnectionId, BufWriter<TcpStream>>,
    next_connection_id: u32,
}

/// Snapshot served by the diagnostics endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    #[serde(flatten)]
    pub sessions: CoordinatorStats,
    pub connections: usize,
    pub rooms: usize,
}

impl Hub {
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator,
            rooms: Rooms::new(),
            connections: BTreeMap::new(),
            next_connection_id: 0,
        }
    }

    /// Register the write half of a new socket and assign it an ID. The
    /// caller tags the connection's reader thread with the returned ID.
    ///
    /// IDs are never reused. Once the counter is exhausted the socket is shut
    /// down and `None` is returned.
    pub fn add_connection(&mut self, stream: TcpStream) -> Option<ConnectionId> {
        let peer = stream.peer_addr().ok();
        let Some(next) = self.next_connection_id.checked_add(1) else {
            warn!(?peer, "connection IDs exhausted, refusing client");
            let _ = stream.shutdown(Shutdown::Both);
            return None;
        };
        let conn = ConnectionId(self.next_connection_id);
        self.next_connection_id = next;
        self.connections.insert(conn, BufWriter::new(stream));
        info!(%conn, ?peer, "client connected");
        Some(conn)
    }

    /// Forget a socket and its room memberships. Session bindings are kept,
    /// so the player can resume from a new connection.
    pub fn remove_connection(&mut self, conn: ConnectionId) {
        if let Some(writer) = self.connections.remove(&conn) {
            let _ = writer.get_ref().shutdown(Shutdown::Both);
            let rooms = self.rooms.drop_connection(conn);
            info!(%conn, rooms, "client disconnected");
        }
    }

    /// Shut every socket down so reader threads see EOF and exit.
    pub fn close_all(&mut self) {
        let conns: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for conn in conns {
            self.remove_connection(conn);
        }
    }

    pub fn handle_message(&mut self, conn: ConnectionId, message: ClientMessage) {
        match message {
            ClientMessage::Subscribe { room } => {
                self.rooms.join(&room, conn);
                debug!(%conn, %room, "subscribed");
            }
            ClientMessage::Unsubscribe { room } => {
                self.rooms.leave(&room, conn);
                debug!(%conn, %room, "unsubscribed");
            }
            ClientMessage::RequestSession { client_key } => {
                let descriptor = self.coordinator.request_session(&client_key);
                self.send_to(conn, &ServerMessage::SessionAssigned(descriptor));
            }
            ClientMessage::CheckSessionReady { session_id } => {
                let ready = self.coordinator.is_session_ready(&session_id);
                self.broadcast(&session_id, &ServerMessage::SessionReady { ready }, None);
            }
            ClientMessage::LeaveSession {
                client_key,
                session_id,
            } => match self.coordinator.leave_session(&client_key, &session_id) {
                Ok(()) => {
                    let msg = ServerMessage::SessionLeft {
                        left: true,
                        session_id: session_id.clone(),
                    };
                    self.broadcast(&session_id, &msg, None);
                }
                Err(e) => debug!(%conn, error = %e, "leave refused"),
            },
            ClientMessage::SubmitMove {
                session_id,
                mv,
                promotion,
                fen,
            } => match self.coordinator.record_move(&session_id, mv.clone(), fen) {
                Ok(()) => {
                    let msg = ServerMessage::MoveRelayed { mv, promotion };
                    self.broadcast(&session_id, &msg, Some(conn));
                }
                Err(e) => debug!(%conn, error = %e, "move ignored"),
            },
            ClientMessage::QueryStatus { client_key } => {
                let active = self.has_ongoing_session(&client_key);
                self.send_to(conn, &ServerMessage::Status { active });
            }
            ClientMessage::Goodbye => {
                // Handled by the reader loop.
            }
        }
    }

    pub fn has_ongoing_session(&self, key: &ClientKey) -> bool {
        self.coordinator.has_ongoing_session(key)
    }

    /// Tear down sessions idle for `ttl` and tell their rooms.
    pub fn sweep(&mut self, now: Instant, ttl: Duration) {
        for session_id in self.coordinator.evict_idle(now, ttl) {
            let msg = ServerMessage::SessionLeft {
                left: true,
                session_id: session_id.clone(),
            };
            self.broadcast(&session_id, &msg, None);
        }
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            sessions: self.coordinator.stats(),
            connections: self.connections.len(),
            rooms: self.rooms.room_count(),
        }
    }

    fn send_to(&mut self, conn: ConnectionId, msg: &ServerMessage) {
        let Some(writer) = self.connections.get_mut(&conn) else {
            return;
        };
        if let Err(e) = send_frame(writer, msg) {
            warn!(%conn, error = %e, "write failed");
        }
    }

    fn broadcast(&mut self, room: &SessionId, msg: &ServerMessage, exclude: Option<ConnectionId>) {
        for conn in self.rooms.recipients(room.as_str(), exclude) {
            self.send_to(conn, msg);
        }
    }
}
