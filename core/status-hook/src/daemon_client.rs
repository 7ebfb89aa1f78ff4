//! Client for the slot-status daemon socket.
//!
//! One request per connection, newline-delimited JSON both ways. Transport
//! failures are retried once after a short delay; error responses from the
//! daemon are returned as-is.

use chrono::Utc;
use serde_json::Value;
use slot_status_protocol::{Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION};
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

const SOCKET_ENV: &str = "SLOT_STATUS_SOCKET";
const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_MS: u64 = 600;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The daemon could not be reached or its reply was unreadable.
    #[error("{0}")]
    Transport(String),
    /// The daemon answered with an error response.
    #[error("{code}: {message}")]
    Daemon { code: String, message: String },
}

/// Sends `method` and returns the response's `data` payload.
pub fn call(method: Method, params: Option<Value>) -> Result<Value, ClientError> {
    let request_id = make_request_id(method);
    let build = || Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some(request_id.clone()),
        params: params.clone(),
    };

    let response = match send_request(build()) {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(error = %err, method = ?method, "Failed to reach daemon; retrying once");
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
            send_request(build()).map_err(|retry_err| {
                tracing::warn!(error = %retry_err, method = ?method, "Retry failed");
                ClientError::Transport(retry_err)
            })?
        }
    };

    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        let (code, message) = response
            .error
            .map(|err| (err.code, err.message))
            .unwrap_or_else(|| ("unknown".to_string(), "Unknown daemon error".to_string()));
        Err(ClientError::Daemon { code, message })
    }
}

fn socket_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".slot-status").join(SOCKET_NAME))
}

fn send_request(request: Request) -> Result<Response, String> {
    let socket = socket_path()?;
    let mut stream = UnixStream::connect(&socket)
        .map_err(|err| format!("Failed to connect to daemon socket: {}", err))?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    serde_json::to_writer(&mut stream, &request)
        .map_err(|err| format!("Failed to write request: {}", err))?;
    stream
        .write_all(b"\n")
        .map_err(|err| format!("Failed to flush request: {}", err))?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err("Response exceeded maximum size".to_string());
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err("Timed out waiting for daemon response".to_string());
            }
            Err(err) => return Err(format!("Failed to read response: {}", err)),
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err("Daemon response was empty".to_string());
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| format!("Failed to parse response JSON: {}", err))
}

fn make_request_id(method: Method) -> String {
    let method = serde_json::to_value(method)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| "request".to_string());
    format!(
        "hook-{}-{}-{}",
        method,
        std::process::id(),
        Utc::now().timestamp_millis()
    )
}
