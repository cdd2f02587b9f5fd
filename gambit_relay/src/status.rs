// HTTP status probe for the relay.
//
// A small `tiny_http` server on its own thread, for clients that want a
// synchronous answer (e.g. on page load) without opening a relay connection:
//
//   GET /gamestatus/{client_key}  -> {"status": true|false}
//                                    (key is percent-decoded)
//   GET /stats                    -> RelayStats as JSON
//
// The thread never touches relay state. Each request is turned into an
// `InternalEvent` carrying a one-shot reply channel and answered by the
// main loop between other events, so the probe sees the same serialized
// view as the socket clients.

use std::io::Cursor;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use gambit_protocol::types::ClientKey;
use percent_encoding::percent_decode_str;
use serde_json::{Value, json};
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, warn};

use crate::error::StartError;
use crate::server::InternalEvent;

/// How often the accept loop checks for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a request waits for the main loop to answer.
const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) fn spawn_status_server<A: ToSocketAddrs>(
    addr: A,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) -> Result<(JoinHandle<()>, Option<SocketAddr>), StartError> {
    let server = Server::http(addr).map_err(|e| StartError::Status(e.to_string()))?;
    let bound = server.server_addr().to_ip();
    let handle = thread::spawn(move || serve(&server, &tx, &keep_running));
    Ok((handle, bound))
}

fn serve(server: &Server, tx: &Sender<InternalEvent>, keep_running: &AtomicBool) {
    while keep_running.load(Ordering::SeqCst) {
        match server.recv_timeout(POLL_INTERVAL) {
            Ok(Some(request)) => handle_request(request, tx),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "status endpoint stopped");
                break;
            }
        }
    }
}

fn handle_request(request: Request, tx: &Sender<InternalEvent>) {
    let response = route(request.method(), request.url(), tx);
    if let Err(e) = request.respond(response) {
        debug!(error = %e, "status response not delivered");
    }
}

fn route(method: &Method, url: &str, tx: &Sender<InternalEvent>) -> Response<Cursor<Vec<u8>>> {
    if *method != Method::Get {
        return json_response(405, json!({ "error": "method not allowed" }));
    }
    let path = url.split('?').next().unwrap_or(url);

    if let Some(key) = path.strip_prefix("/gamestatus/") {
        if key.is_empty() {
            return json_response(404, json!({ "error": "missing client key" }));
        }
        let Ok(key) = percent_decode_str(key).decode_utf8() else {
            return json_response(400, json!({ "error": "client key is not valid UTF-8" }));
        };
        let client_key = ClientKey(key.into_owned());
        return match ask(tx, |reply| InternalEvent::StatusQuery { client_key, reply }) {
            Some(active) => json_response(200, json!({ "status": active })),
            None => unavailable(),
        };
    }

    if path == "/stats" {
        return match ask(tx, |reply| InternalEvent::StatsQuery { reply }) {
            Some(stats) => match serde_json::to_value(stats) {
                Ok(body) => json_response(200, body),
                Err(_) => unavailable(),
            },
            None => unavailable(),
        };
    }

    json_response(404, json!({ "error": "not found" }))
}

/// Send a query to the main loop and wait for its answer.
fn ask<T>(
    tx: &Sender<InternalEvent>,
    make_event: impl FnOnce(Sender<T>) -> InternalEvent,
) -> Option<T> {
    let (reply_tx, reply_rx) = mpsc::channel();
    tx.send(make_event(reply_tx)).ok()?;
    reply_rx.recv_timeout(QUERY_TIMEOUT).ok()
}

fn unavailable() -> Response<Cursor<Vec<u8>>> {
    json_response(503, json!({ "error": "relay unavailable" }))
}

fn json_response(status: u16, body: Value) -> Response<Cursor<Vec<u8>>> {
    let mut response = Response::from_string(body.to_string()).with_status_code(status);
    for raw in [
        "Content-Type: application/json",
        "Access-Control-Allow-Origin: *",
    ] {
        if let Ok(header) = raw.parse::<Header>() {
            response.add_header(header);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    /// Answer one status query with whether the key matches `known`.
    fn answer_once(known: &'static str) -> Sender<InternalEvent> {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            if let Ok(InternalEvent::StatusQuery { client_key, reply }) = rx.recv() {
                let _ = reply.send(client_key.0 == known);
            }
        });
        tx
    }

    fn body(response: Response<Cursor<Vec<u8>>>) -> String {
        let mut out = String::new();
        response.into_reader().read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn status_key_is_percent_decoded() {
        let tx = answer_once("player one");
        let response = route(&Method::Get, "/gamestatus/player%20one", &tx);
        assert_eq!(response.status_code().0, 200);
        assert_eq!(body(response), r#"{"status":true}"#);
    }

    #[test]
    fn undecodable_key_is_rejected() {
        let (tx, _rx) = mpsc::channel();
        let response = route(&Method::Get, "/gamestatus/%FF%FE", &tx);
        assert_eq!(response.status_code().0, 400);
    }

    #[test]
    fn only_get_is_allowed() {
        let (tx, _rx) = mpsc::channel();
        let response = route(&Method::Post, "/gamestatus/p1", &tx);
        assert_eq!(response.status_code().0, 405);
    }
}
