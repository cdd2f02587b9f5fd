// TCP client for talking to the relay.
//
// Architecture mirrors the server side:
// - `connect()` opens the socket on the calling thread and spawns a
//   background reader thread.
// - The reader thread calls `recv_frame()` in a loop and pushes each
//   `ServerMessage` into an `mpsc` channel.
// - The caller keeps a `BufWriter<TcpStream>` for sending; every send is a
//   single small frame, flushed synchronously.
// - `poll()` drains the inbox without blocking; `recv_timeout()` waits for
//   the next message.
//
// It has no game logic and is what the integration tests drive, but any
// Rust front end can use it as-is.

use std::io::{BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use gambit_protocol::framing::{FrameError, recv_frame, send_frame};
use gambit_protocol::message::{ClientMessage, ServerMessage};
use gambit_protocol::types::{ClientKey, SessionId};

/// TCP client for relay communication.
pub struct NetClient {
    writer: BufWriter<TcpStream>,
    inbox: Receiver<ServerMessage>,
    _reader_thread: JoinHandle<()>,
}

impl NetClient {
    /// Connect to a relay and start the background reader.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, FrameError> {
        let stream = TcpStream::connect(addr)?;
        let reader = BufReader::new(stream.try_clone()?);
        let (tx, rx) = mpsc::channel();
        let reader_thread = thread::spawn(move || reader_loop(reader, tx));
        Ok(Self {
            writer: BufWriter::new(stream),
            inbox: rx,
            _reader_thread: reader_thread,
        })
    }

    pub fn subscribe(&mut self, room: &str) -> Result<(), FrameError> {
        self.send(&ClientMessage::Subscribe { room: room.into() })
    }

    pub fn unsubscribe(&mut self, room: &str) -> Result<(), FrameError> {
        self.send(&ClientMessage::Unsubscribe { room: room.into() })
    }

    pub fn request_session(&mut self, key: &ClientKey) -> Result<(), FrameError> {
        self.send(&ClientMessage::RequestSession {
            client_key: key.clone(),
        })
    }

    pub fn check_session_ready(&mut self, session_id: &SessionId) -> Result<(), FrameError> {
        self.send(&ClientMessage::CheckSessionReady {
            session_id: session_id.clone(),
        })
    }

    pub fn leave_session(
        &mut self,
        key: &ClientKey,
        session_id: &SessionId,
    ) -> Result<(), FrameError> {
        self.send(&ClientMessage::LeaveSession {
            client_key: key.clone(),
            session_id: session_id.clone(),
        })
    }

    pub fn submit_move(
        &mut self,
        session_id: &SessionId,
        mv: &str,
        promotion: Option<&str>,
        fen: &str,
    ) -> Result<(), FrameError> {
        self.send(&ClientMessage::SubmitMove {
            session_id: session_id.clone(),
            mv: mv.into(),
            promotion: promotion.map(String::from),
            fen: fen.into(),
        })
    }

    pub fn query_status(&mut self, key: &ClientKey) -> Result<(), FrameError> {
        self.send(&ClientMessage::QueryStatus {
            client_key: key.clone(),
        })
    }

    /// Send Goodbye; the relay closes the connection.
    pub fn disconnect(&mut self) {
        let _ = self.send(&ClientMessage::Goodbye);
    }

    /// Drain all queued server messages (non-blocking).
    pub fn poll(&self) -> Vec<ServerMessage> {
        self.inbox.try_iter().collect()
    }

    /// Wait up to `timeout` for the next server message.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ServerMessage> {
        self.inbox.recv_timeout(timeout).ok()
    }

    fn send(&mut self, msg: &ClientMessage) -> Result<(), FrameError> {
        send_frame(&mut self.writer, msg)
    }
}

/// Reader thread: read frames until the socket closes, push to the inbox.
fn reader_loop(mut reader: BufReader<TcpStream>, tx: mpsc::Sender<ServerMessage>) {
    while let Ok(msg) = recv_frame::<_, ServerMessage>(&mut reader) {
        if tx.send(msg).is_err() {
            break; // Owner dropped the client.
        }
    }
}
