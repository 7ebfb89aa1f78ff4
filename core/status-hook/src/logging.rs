//! File logging for the hook.
//!
//! Stdout carries command output, so logs go to a daily rolling file under
//! `~/.slot-status/logs`. If that directory cannot be created, logging is
//! disabled rather than failing the command.

use std::env;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_DIR_ENV: &str = "SLOT_STATUS_LOG_DIR";
const DEBUG_ENV: &str = "SLOT_STATUS_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "hook.log";

/// Installs the global subscriber. Keep the guard alive until exit so
/// buffered lines are flushed.
pub fn init() -> Option<WorkerGuard> {
    let dir = log_dir()?;
    if let Err(err) = fs_err::create_dir_all(&dir) {
        eprintln!("slot-status-hook: logging disabled: {}", err);
        return None;
    }

    let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .ok()?;

    Some(guard)
}

fn log_dir() -> Option<PathBuf> {
    if let Ok(dir) = env::var(LOG_DIR_ENV) {
        return Some(PathBuf::from(dir));
    }
    dirs::home_dir().map(|home| home.join(".slot-status").join("logs"))
}

fn filter() -> EnvFilter {
    if debug_enabled(env::var(DEBUG_ENV).ok().as_deref()) {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn debug_enabled(value: Option<&str>) -> bool {
    matches!(value, Some("1" | "true" | "TRUE" | "yes" | "YES"))
}
