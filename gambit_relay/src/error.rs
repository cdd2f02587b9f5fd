// Error types for the relay.
//
// `RelayError` covers requests the coordinator refuses. None of them are
// fatal: the hub logs them at debug level and the client gets no reply,
// since late or duplicated events are normal on a best-effort relay.
// `StartError` covers failures binding the listeners at startup.

use gambit_protocol::types::{ClientKey, SessionId};

/// A client request the coordinator refused. State is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// The session ID names neither an active session nor a queue entry.
    #[error("no session {0}")]
    StaleSession(SessionId),
    /// The key is not bound to the session it tried to leave.
    #[error("{key} is not a participant of session {session_id}")]
    NotParticipant {
        key: ClientKey,
        session_id: SessionId,
    },
}

/// Failure starting the relay.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("failed to bind relay listener: {0}")]
    Bind(#[from] std::io::Error),
    #[error("failed to start status endpoint: {0}")]
    Status(String),
}
