// TCP server and main event loop for the relay.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Listener thread** (`TcpListener::accept()` loop): accepts connections
//   and sends `InternalEvent::NewConnection` to the main thread.
// - **Reader threads** (one per client): call `recv_frame()` in a loop and
//   forward each `ClientMessage` as `InternalEvent::MessageFrom`. On EOF,
//   error, or `Goodbye` they send `InternalEvent::Disconnected`.
// - **Status thread** (optional, see `status.rs`): answers HTTP probes by
//   sending a query event carrying a reply channel.
// - **Main thread**: owns the `Hub` (and with it the `Coordinator`),
//   receives events from the channel and dispatches them one at a time. This
//   is the single synchronization point for matchmaking: two requests can
//   never interleave. `recv_timeout` doubles as the idle-session sweep timer.
//
// The main thread is the only writer to client sockets. Reader threads only
// read.
//
// Shutdown: `RelayHandle::stop` clears `keep_running`; the main loop exits,
// shuts every client socket down, and the reader threads fall out on EOF.

use std::io::BufReader;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use gambit_protocol::framing::recv_frame;
use gambit_protocol::message::ClientMessage;
use gambit_protocol::types::{ClientKey, ConnectionId};
use tracing::{debug, info, warn};

use crate::coordinator::Coordinator;
use crate::error::StartError;
use crate::hub::{Hub, RelayStats};
use crate::status::spawn_status_server;

/// Events sent from listener/reader/status threads to the main thread.
pub(crate) enum InternalEvent {
    NewConnection {
        stream: TcpStream,
    },
    MessageFrom {
        conn: ConnectionId,
        message: ClientMessage,
    },
    Disconnected {
        conn: ConnectionId,
    },
    StatusQuery {
        client_key: ClientKey,
        reply: Sender<bool>,
    },
    StatsQuery {
        reply: Sender<RelayStats>,
    },
}

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    threads: Vec<thread::JoinHandle<()>>,
    addr: SocketAddr,
    status_addr: Option<SocketAddr>,
}

impl RelayHandle {
    /// Address the relay accepts game clients on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Address of the HTTP status endpoint, if one was started.
    pub fn status_addr(&self) -> Option<SocketAddr> {
        self.status_addr
    }

    /// Signal the relay to stop and wait for it to shut down.
    pub fn stop(self) {
        self.keep_running.store(false, Ordering::SeqCst);
        self.join();
    }

    /// Block until the relay exits.
    pub fn join(self) {
        for handle in self.threads {
            let _ = handle.join();
        }
    }
}

/// Configuration for starting a relay server.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// Port for the HTTP status probe; `None` disables it.
    pub status_port: Option<u16>,
    /// Tear down sessions (and queue entries) idle this long. `None` keeps
    /// them until an explicit leave.
    pub session_ttl: Option<Duration>,
    pub sweep_interval: Duration,
    /// Fixed seed for session IDs (tests); entropy when `None`.
    pub seed: Option<u64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3001,
            status_port: None,
            session_ttl: None,
            sweep_interval: Duration::from_secs(1),
            seed: None,
        }
    }
}

/// Start the relay on background threads. Port 0 for either listener lets
/// the OS pick; the handle reports the bound addresses.
pub fn start_relay(config: RelayConfig) -> Result<RelayHandle, StartError> {
    let listener = TcpListener::bind((config.host.as_str(), config.port))?;
    let addr = listener.local_addr()?;
    let keep_running = Arc::new(AtomicBool::new(true));
    let (tx, rx) = mpsc::channel();
    let mut threads = Vec::new();

    let status_addr = match config.status_port {
        Some(port) => {
            let (handle, bound) = spawn_status_server(
                (config.host.as_str(), port),
                tx.clone(),
                keep_running.clone(),
            )?;
            threads.push(handle);
            bound
        }
        None => None,
    };

    let keep_running_main = keep_running.clone();
    threads.push(thread::spawn(move || {
        run_relay(listener, config, tx, rx, keep_running_main);
    }));

    info!(%addr, ?status_addr, "relay started");
    Ok(RelayHandle {
        keep_running,
        threads,
        addr,
        status_addr,
    })
}

/// Main relay loop. Runs until `keep_running` is set to false.
fn run_relay(
    listener: TcpListener,
    config: RelayConfig,
    tx: Sender<InternalEvent>,
    rx: Receiver<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    let coordinator = match config.seed {
        Some(seed) => Coordinator::with_seed(seed),
        None => Coordinator::new(),
    };
    let mut hub = Hub::new(coordinator);

    // Non-blocking accept so the listener thread can notice shutdown.
    listener.set_nonblocking(true).ok();

    let keep_running_listener = keep_running.clone();
    let tx_listener = tx.clone();
    thread::spawn(move || {
        while keep_running_listener.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    stream.set_nonblocking(false).ok();
                    let _ = tx_listener.send(InternalEvent::NewConnection { stream });
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(20));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed, listener stopping");
                    break;
                }
            }
        }
    });

    let mut last_sweep = Instant::now();
    while keep_running.load(Ordering::SeqCst) {
        match rx.recv_timeout(config.sweep_interval) {
            Ok(event) => {
                handle_event(&mut hub, event, &tx, &keep_running);
                // Drain any additional events that arrived during handling.
                while let Ok(event) = rx.try_recv() {
                    handle_event(&mut hub, event, &tx, &keep_running);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        if let Some(ttl) = config.session_ttl {
            if last_sweep.elapsed() >= config.sweep_interval {
                hub.sweep(Instant::now(), ttl);
                last_sweep = Instant::now();
            }
        }
    }

    hub.close_all();
    info!("relay stopped");
}

/// Dispatch a single event to the hub.
fn handle_event(
    hub: &mut Hub,
    event: InternalEvent,
    tx: &Sender<InternalEvent>,
    keep_running: &Arc<AtomicBool>,
) {
    match event {
        InternalEvent::NewConnection { stream } => {
            handle_new_connection(hub, stream, tx, keep_running);
        }
        InternalEvent::MessageFrom { conn, message } => {
            hub.handle_message(conn, message);
        }
        InternalEvent::Disconnected { conn } => {
            hub.remove_connection(conn);
        }
        InternalEvent::StatusQuery { client_key, reply } => {
            let _ = reply.send(hub.has_ongoing_session(&client_key));
        }
        InternalEvent::StatsQuery { reply } => {
            let _ = reply.send(hub.stats());
        }
    }
}

/// Register a new socket with the hub and spawn its reader thread.
fn handle_new_connection(
    hub: &mut Hub,
    stream: TcpStream,
    tx: &Sender<InternalEvent>,
    keep_running: &Arc<AtomicBool>,
) {
    let write_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "could not clone client stream, dropping");
            return;
        }
    };
    let Some(conn) = hub.add_connection(write_stream) else {
        return;
    };

    let reader = BufReader::new(stream);
    let tx_reader = tx.clone();
    let keep_running_reader = keep_running.clone();
    thread::spawn(move || {
        reader_loop(reader, conn, tx_reader, keep_running_reader);
    });
}

/// Reader loop for a single client. Runs in its own thread.
fn reader_loop(
    mut reader: BufReader<TcpStream>,
    conn: ConnectionId,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    while keep_running.load(Ordering::SeqCst) {
        match recv_frame::<_, ClientMessage>(&mut reader) {
            Ok(ClientMessage::Goodbye) => break,
            Ok(message) => {
                if tx.send(InternalEvent::MessageFrom { conn, message }).is_err() {
                    return;
                }
            }
            Err(e) => {
                if !e.is_eof() {
                    debug!(%conn, error = %e, "dropping connection");
                }
                break;
            }
        }
    }
    let _ = tx.send(InternalEvent::Disconnected { conn });
}
