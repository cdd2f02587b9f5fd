// Protocol messages for client-relay communication.
//
// Two enums define the full protocol vocabulary:
// - `ClientMessage`: sent by game clients to the relay.
// - `ServerMessage`: sent by the relay to game clients.
//
// `SessionDescriptor` is the matchmaking answer: which session the client
// belongs to, which color it plays, and (when resuming) the move history and
// last position so the client can rebuild its board.
//
// Moves and positions are opaque strings. The relay records and forwards
// them but never checks legality; that is the clients' concern.

use serde::{Deserialize, Serialize};

use crate::types::{ClientKey, Color, SessionId};

/// Messages sent by a client to the relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Join a broadcast room (normally a session ID).
    Subscribe { room: String },
    /// Leave a broadcast room.
    Unsubscribe { room: String },
    /// Ask to be paired, or to resume an in-progress session.
    RequestSession { client_key: ClientKey },
    /// Ask whether the second participant has arrived. Answered to the room.
    CheckSessionReady { session_id: SessionId },
    /// Tear down an activated session. Refused for queued or unknown IDs.
    LeaveSession {
        client_key: ClientKey,
        session_id: SessionId,
    },
    /// A move, recorded and then relayed to the other room member.
    SubmitMove {
        session_id: SessionId,
        #[serde(rename = "move")]
        mv: String,
        promotion: Option<String>,
        fen: String,
    },
    /// Does this key currently own an active session?
    QueryStatus { client_key: ClientKey },
    /// Closing the connection gracefully.
    Goodbye,
}

/// Messages sent by the relay to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Matchmaking answer, sent to the requesting connection only.
    SessionAssigned(SessionDescriptor),
    /// Whether the session has both participants.
    SessionReady { ready: bool },
    /// The session was torn down.
    SessionLeft { left: bool, session_id: SessionId },
    /// Opponent's move.
    MoveRelayed {
        #[serde(rename = "move")]
        mv: String,
        promotion: Option<String>,
    },
    /// Answer to `QueryStatus`.
    Status { active: bool },
}

/// A client's view of the session it was placed in.
///
/// `created` is the creation time in milliseconds since the Unix epoch.
/// `history` and `fen` are only present when resuming an activated session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub id: SessionId,
    pub created: Option<u64>,
    pub color_allocated: Color,
    pub client_key: ClientKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fen: Option<String>,
}
