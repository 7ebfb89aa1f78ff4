//! slot-status-hook: reports session status and tab mappings to the daemon.
//!
//! Called from agent hooks (`update`) and from the terminal integration that
//! tracks tab order (`mapping`). Command output is JSON on stdout; diagnostics
//! go to the log file.
//!
//! ## Subcommands
//!
//! - `update`: Report a status change for a slot or a session
//! - `mapping`: Replace the session→slot mapping
//! - `slots`: Print the daemon's slot table

mod daemon_client;
mod logging;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use slot_status_protocol::{Method, SlotState, UpdateParams};

use daemon_client::ClientError;

#[derive(Parser)]
#[command(name = "slot-status-hook")]
#[command(about = "Slot status reporter")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report a status change
    Update {
        /// idle, thinking, permission, compacting, done, error or offline
        #[arg(long, value_parser = parse_state)]
        state: SlotState,

        /// Target slot number (1-8)
        #[arg(long, conflicts_with = "session_id")]
        slot: Option<i64>,

        /// Session identity; resolved to a slot by the daemon
        #[arg(long, required_unless_present = "slot")]
        session_id: Option<String>,

        /// Slot to use while the session has no mapping yet
        #[arg(long, requires = "session_id")]
        fallback_slot: Option<i64>,

        /// Event time in epoch milliseconds (defaults to now)
        #[arg(long)]
        ts: Option<i64>,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        detail: Option<String>,

        #[arg(long)]
        prompt: Option<String>,
    },

    /// Replace the session→slot mapping (no entries clears it)
    Mapping {
        #[arg(value_name = "SESSION_ID=SLOT")]
        entries: Vec<String>,
    },

    /// Print the slot table
    Slots,
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Update {
            state,
            slot,
            session_id,
            fallback_slot,
            ts,
            project,
            detail,
            prompt,
        } => {
            let params = UpdateParams {
                slot,
                session_id,
                fallback_slot,
                state,
                ts: Some(ts.unwrap_or_else(|| Utc::now().timestamp_millis())),
                project,
                detail,
                prompt,
            };
            run_update(params)
        }
        Commands::Mapping { entries } => run_mapping(&entries),
        Commands::Slots => run_slots(),
    };

    match result {
        Ok(data) => println!("{}", data),
        Err(err) => {
            tracing::error!(error = %err, "slot-status-hook failed");
            eprintln!("slot-status-hook: {}", err);
            std::process::exit(1);
        }
    }
}

fn run_update(params: UpdateParams) -> Result<Value, String> {
    params
        .validate()
        .map_err(|err| format!("{}: {}", err.code, err.message))?;
    tracing::debug!(
        slot = ?params.slot,
        session_id = ?params.session_id,
        state = params.state.as_str(),
        ts = ?params.ts,
        "Sending update"
    );
    let payload = serde_json::to_value(&params)
        .map_err(|err| format!("Failed to serialize update: {}", err))?;
    send(Method::Update, Some(payload))
}

fn run_mapping(args: &[String]) -> Result<Value, String> {
    let mapping = parse_mapping_args(args)?;
    tracing::debug!(entries = mapping.len(), "Sending mapping");
    send(Method::Mapping, Some(Value::Object(mapping)))
}

fn run_slots() -> Result<Value, String> {
    send(Method::GetSlots, None)
}

fn send(method: Method, params: Option<Value>) -> Result<Value, String> {
    daemon_client::call(method, params).map_err(|err| match err {
        ClientError::Transport(message) => format!("daemon unreachable: {}", message),
        daemon @ ClientError::Daemon { .. } => daemon.to_string(),
    })
}

fn parse_state(value: &str) -> Result<SlotState, String> {
    SlotState::parse(value).ok_or_else(|| format!("unknown state '{}'", value))
}

/// Parses `SESSION_ID=SLOT` arguments into the mapping payload.
///
/// Splits on the last `=` so identities may contain one. A repeated identity
/// keeps its last slot.
fn parse_mapping_args(args: &[String]) -> Result<Map<String, Value>, String> {
    let mut mapping = Map::new();
    for arg in args {
        let (session_id, slot) = arg
            .rsplit_once('=')
            .ok_or_else(|| format!("expected SESSION_ID=SLOT, got '{}'", arg))?;
        if session_id.is_empty() {
            return Err(format!("missing session id in '{}'", arg));
        }
        let slot: i64 = slot
            .trim()
            .parse()
            .map_err(|_| format!("slot in '{}' is not an integer", arg))?;
        mapping.insert(session_id.to_string(), Value::from(slot));
    }
    Ok(mapping)
}
