// CLI entry point for the Gambit relay.
//
// Starts a standalone relay that game clients connect to over TCP, plus an
// optional HTTP status probe. See `server.rs` for the threading model and
// `coordinator.rs` for matchmaking.
//
// Logging goes through `tracing`; set `RUST_LOG` (default `info`) to tune it,
// e.g. `RUST_LOG=gambit_relay=debug` to see refused leaves and stale moves.
//
// SIGINT/SIGTERM set a flag through `signal-hook`; the main thread then stops
// the relay, which closes every client socket before exiting.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::Parser;
use gambit_relay::server::{RelayConfig, start_relay};
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Pairs players into two-seat game sessions and relays their moves.
#[derive(Parser, Debug)]
#[command(name = "gambit-relay", version, about)]
struct Cli {
    /// Interface to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Relay listen port.
    #[arg(long, env = "PORT", default_value_t = 3001)]
    port: u16,

    /// Serve the HTTP status probe on this port.
    #[arg(long)]
    status_port: Option<u16>,

    /// Tear down sessions idle for this many seconds (default: never).
    #[arg(long, value_name = "SECS")]
    session_ttl: Option<u64>,

    /// How often to look for idle sessions, in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    sweep_interval: u64,
}

impl From<Cli> for RelayConfig {
    fn from(cli: Cli) -> Self {
        Self {
            host: cli.host,
            port: cli.port,
            status_port: cli.status_port,
            session_ttl: cli.session_ttl.map(Duration::from_secs),
            sweep_interval: Duration::from_millis(cli.sweep_interval.max(1)),
            seed: None,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RelayConfig::from(Cli::parse());

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&shutdown)) {
            error!("failed to install signal handler: {e}");
            return ExitCode::FAILURE;
        }
    }

    let handle = match start_relay(config) {
        Ok(handle) => handle,
        Err(e) => {
            error!("failed to start relay: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(addr = %handle.addr(), "listening");
    if let Some(status) = handle.status_addr() {
        info!(%status, "status probe at http://{status}/gamestatus/<client_key>");
    }

    info!("press Ctrl+C to stop");

    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down");
    handle.stop();
    ExitCode::SUCCESS
}
