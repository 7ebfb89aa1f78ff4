//! Slot status daemon entrypoint.
//!
//! A small, single-writer service that owns the slot table. Clients connect
//! over a Unix socket and send one newline-terminated JSON request; the
//! daemon validates it, hands it to the reconciliation store, and replies
//! with one newline-terminated JSON response.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use chrono::Utc;
use slot_status_core::{SlotStore, UpdateOutcome, UpdateRequest};
use slot_status_protocol::{
    parse_mapping, parse_update, ErrorInfo, Method, Request, Response, MAX_REQUEST_BYTES,
    PROTOCOL_VERSION,
};

mod config;
mod state;

use config::DaemonConfig;
use state::SharedState;

const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

fn main() {
    init_logging();

    let base_dir = match config::base_dir() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon base directory");
            std::process::exit(1);
        }
    };

    let daemon_config = match config::load_config(&config::default_config_path(&base_dir)) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load daemon config; using defaults");
            DaemonConfig::default()
        }
    };

    let socket_path = daemon_config.socket_path(&base_dir);
    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "Slot status daemon started");

    let state_path = daemon_config.state_path(&base_dir);
    let shared_state = Arc::new(SharedState::new(SlotStore::open(&state_path)));

    if let Some(ttl_secs) = daemon_config.compacting_ttl_secs {
        info!(
            ttl_secs,
            interval_secs = daemon_config.reaper_interval_secs,
            "Compacting TTL policy enabled"
        );
        spawn_compacting_reaper(
            Arc::clone(&shared_state),
            Duration::from_secs(ttl_secs),
            Duration::from_secs(daemon_config.reaper_interval_secs.max(1)),
        );
    }

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&shared_state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn spawn_compacting_reaper(state: Arc<SharedState>, ttl: Duration, interval: Duration) {
    thread::spawn(move || loop {
        thread::sleep(interval);
        let demoted = state.expire_compacting(ttl, Utc::now().timestamp_millis());
        if !demoted.is_empty() {
            info!(slots = ?demoted, "Expired stale compacting slots");
        }
    });
}

fn init_logging() {
    let debug_enabled = env::var("SLOT_STATUS_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<SharedState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, &state);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => {
            if buffer[index + 1..].iter().any(|b| !b.is_ascii_whitespace()) {
                warn!("Extra bytes detected after newline; ignoring trailing data");
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: &SharedState) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => Response::ok(
            request.id,
            serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "bound_sessions": state.bound_count(),
                "pending_updates": state.pending_count(),
            }),
        ),
        Method::GetSlots => match serde_json::to_value(state.slots_snapshot()) {
            Ok(value) => Response::ok(request.id, value),
            Err(err) => Response::error(
                request.id,
                "serialization_error",
                format!("Failed to serialize slots: {}", err),
            ),
        },
        Method::Update => handle_update(request, state),
        Method::Mapping => handle_mapping(request, state),
    }
}

fn handle_update(request: Request, state: &SharedState) -> Response {
    let params = match request.params {
        Some(params) => params,
        None => return Response::error(request.id, "invalid_params", "update payload is required"),
    };

    let params = match parse_update(params) {
        Ok(params) => params,
        Err(err) => return Response::error_with_info(request.id, err),
    };

    info!(
        slot = ?params.slot,
        session_id = ?params.session_id,
        fallback_slot = ?params.fallback_slot,
        state = params.state.as_str(),
        ts = ?params.ts,
        "Received update"
    );

    let update = match UpdateRequest::try_from(params) {
        Ok(update) => update,
        Err(err) => return Response::error(request.id, "invalid_params", err.to_string()),
    };

    let outcome = state.apply_update(update);
    Response::ok(
        request.id,
        serde_json::json!({
            "accepted": true,
            "outcome": outcome.as_str(),
            "applied": matches!(outcome, UpdateOutcome::Applied(_)),
            "slot": outcome.slot().map(|slot| slot.get()),
        }),
    )
}

fn handle_mapping(request: Request, state: &SharedState) -> Response {
    let params = match request.params {
        Some(params) => params,
        None => {
            return Response::error(request.id, "invalid_params", "mapping payload is required")
        }
    };

    let mapping = match parse_mapping(params) {
        Ok(mapping) => mapping,
        Err(err) => return Response::error_with_info(request.id, err),
    };

    for session_id in &mapping.dropped {
        warn!(session_id = %session_id, "Dropping unusable mapping entry");
    }

    info!(entries = mapping.entries.len(), "Received session mapping");
    let affected: Vec<u8> = state
        .apply_mapping(mapping.entries)
        .into_iter()
        .map(|slot| slot.get())
        .collect();

    Response::ok(
        request.id,
        serde_json::json!({
            "accepted": true,
            "affected": affected,
            "dropped": mapping.dropped.len(),
        }),
    )
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(method: Method, params: Option<serde_json::Value>) -> Request {
        Request {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: Some("req-1".to_string()),
            params,
        }
    }

    fn state() -> SharedState {
        SharedState::new(SlotStore::new_in_memory())
    }

    #[test]
    fn rejects_protocol_mismatch() {
        let mut req = request(Method::GetHealth, None);
        req.protocol_version = 99;
        let response = handle_request(req, &state());
        assert!(!response.ok);
        assert_eq!(response.error.unwrap().code, "protocol_mismatch");
    }

    #[test]
    fn update_reports_outcome_and_slot() {
        let state = state();
        let response = handle_request(
            request(Method::Update, Some(json!({"slot": 3, "state": "done", "ts": 5}))),
            &state,
        );
        assert!(response.ok);
        let data = response.data.unwrap();
        assert_eq!(data["outcome"], "applied");
        assert_eq!(data["slot"], 3);

        let response = handle_request(
            request(Method::Update, Some(json!({"slot": 3, "state": "idle", "ts": 6}))),
            &state,
        );
        assert_eq!(response.data.unwrap()["outcome"], "terminal_guard");
    }

    #[test]
    fn update_validation_failure_carries_reason() {
        let response = handle_request(
            request(Method::Update, Some(json!({"slot": 12, "state": "idle"}))),
            &state(),
        );
        assert!(!response.ok);
        let error = response.error.unwrap();
        assert_eq!(error.code, "invalid_slot");
        assert!(error.message.contains("slot"));
    }

    #[test]
    fn update_without_params_is_rejected() {
        let response = handle_request(request(Method::Update, None), &state());
        assert_eq!(response.error.unwrap().code, "invalid_params");
    }

    #[test]
    fn mapping_replays_buffered_update_and_reports_drops() {
        let state = state();
        let response = handle_request(
            request(
                Method::Update,
                Some(json!({"session_id": "sess-a", "state": "thinking", "ts": 100})),
            ),
            &state,
        );
        assert_eq!(response.data.unwrap()["outcome"], "buffered");

        let response = handle_request(
            request(Method::Mapping, Some(json!({"sess-a": 3, "sess-b": 11, "sess-c": "x"}))),
            &state,
        );
        assert!(response.ok);
        assert_eq!(response.data.unwrap()["dropped"], 1);

        let slots = handle_request(request(Method::GetSlots, None), &state)
            .data
            .unwrap();
        assert_eq!(slots["3"]["state"], "thinking");
        assert_eq!(slots["3"]["ts"], 100);
    }
}
