// gambit_protocol — wire protocol for the Gambit pairing relay.
//
// Defines the message types, framing, and serialization shared by the relay
// (`gambit_relay`) and game clients talking to it over TCP.
//
// Module overview:
// - `types.rs`:    ID newtypes (`ClientKey`, `SessionId`, `ConnectionId`)
//                  and the `Color` a participant plays.
// - `message.rs`:  `ClientMessage` / `ServerMessage` enums plus the
//                  `SessionDescriptor` returned by matchmaking.
// - `framing.rs`:  4-byte big-endian length prefix + JSON payload over any
//                  `Read`/`Write` stream, with typed send/recv helpers.
//
// Design decisions:
// - **JSON payloads.** Messages are tiny and human-readable JSON keeps the
//   protocol easy to drive from non-Rust clients.
// - **Moves are opaque strings.** The relay never interprets moves or
//   positions, so the protocol has no dependency on any game rules.
// - **No async runtime.** Framing works on `std::io` streams.

pub mod framing;
pub mod message;
pub mod types;

pub use framing::{FrameError, MAX_MESSAGE_SIZE, read_message, recv_frame, send_frame, write_message};
pub use message::{ClientMessage, ServerMessage, SessionDescriptor};
pub use types::{ClientKey, Color, ConnectionId, SessionId};

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use serde_json::json;

    use super::*;

    #[test]
    fn submit_move_uses_move_field_name() {
        let msg = ClientMessage::SubmitMove {
            session_id: "s1".into(),
            mv: "e2e4".into(),
            promotion: None,
            fen: "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["SubmitMove"]["move"], "e2e4");
        assert_eq!(value["SubmitMove"]["session_id"], "s1");
        assert!(value["SubmitMove"].get("mv").is_none());
    }

    #[test]
    fn relayed_move_shape() {
        let msg = ServerMessage::MoveRelayed {
            mv: "e7e8".into(),
            promotion: Some("q".into()),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "MoveRelayed": { "move": "e7e8", "promotion": "q" } })
        );
    }

    #[test]
    fn colors_encode_as_single_letters() {
        assert_eq!(serde_json::to_value(Color::White).unwrap(), json!("w"));
        assert_eq!(serde_json::to_value(Color::Black).unwrap(), json!("b"));
        assert_eq!(Color::White.opposite(), Color::Black);
        assert_eq!(Color::Black.opposite(), Color::White);
    }

    #[test]
    fn fresh_descriptor_omits_history_and_fen() {
        let descriptor = SessionDescriptor {
            id: "abc123".into(),
            created: Some(1_700_000_000_000),
            color_allocated: Color::White,
            client_key: "p1".into(),
            history: None,
            fen: None,
        };
        let value = serde_json::to_value(ServerMessage::SessionAssigned(descriptor)).unwrap();
        assert_eq!(
            value,
            json!({ "SessionAssigned": {
                "id": "abc123",
                "created": 1_700_000_000_000u64,
                "color_allocated": "w",
                "client_key": "p1"
            }})
        );
    }

    #[test]
    fn resumed_descriptor_survives_the_wire() {
        let descriptor = SessionDescriptor {
            id: "abc123".into(),
            created: Some(5),
            color_allocated: Color::Black,
            client_key: "p2".into(),
            history: Some(vec!["e4".into(), "e5".into()]),
            fen: Some("fen-after-e5".into()),
        };
        let mut wire = Vec::new();
        send_frame(&mut wire, &ServerMessage::SessionAssigned(descriptor.clone())).unwrap();
        let back: ServerMessage = recv_frame(&mut Cursor::new(wire)).unwrap();
        assert_eq!(back, ServerMessage::SessionAssigned(descriptor));
    }

    #[test]
    fn client_messages_parse_from_handwritten_json() {
        let raw = r#"{"LeaveSession":{"client_key":"p1","session_id":"s9"}}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            msg,
            ClientMessage::LeaveSession {
                client_key: ClientKey("p1".into()),
                session_id: SessionId("s9".into()),
            }
        );

        let goodbye: ClientMessage = serde_json::from_str(r#""Goodbye""#).unwrap();
        assert_eq!(goodbye, ClientMessage::Goodbye);
    }
}
