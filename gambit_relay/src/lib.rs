// gambit_relay — matchmaking and move relay for two-player games.
//
// The relay pairs anonymous players into two-seat sessions, forwards moves
// between the pair in real time, and lets a player who dropped resume the
// same session by presenting the same client key. It never validates moves;
// clients own the game rules.
//
// Module overview:
// - `coordinator.rs`: Waiting queue, session registry and resume index, plus
//                     the pairing algorithm. Pure state, no I/O.
// - `rooms.rs`:       Broadcast room membership (room name -> connections).
// - `hub.rs`:         Owns the coordinator, rooms and client write halves;
//                     routes each client message and writes the replies.
// - `server.rs`:      TCP listener, reader threads (one per client) and the
//                     single-threaded main loop that drives the `Hub`.
// - `status.rs`:      Optional HTTP probe (`/gamestatus/{key}`, `/stats`).
// - `client.rs`:      `NetClient`, a blocking-socket client with a reader
//                     thread, used by the integration tests.
// - `error.rs`:       `RelayError` (refused requests) and `StartError`.
//
// Dependencies: `gambit_protocol` for message types and framing.
//
// The relay runs as a standalone binary (`main.rs`) or embedded through
// `start_relay`.

pub mod client;
pub mod coordinator;
pub mod error;
pub mod hub;
pub mod rooms;
pub mod server;
mod status;

pub use coordinator::Coordinator;
pub use error::{RelayError, StartError};
pub use server::{RelayConfig, RelayHandle, start_relay};
