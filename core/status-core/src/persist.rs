//! Durable slot table.
//!
//! # File Format
//!
//! ```json
//! {
//!   "1": { "state": "done", "ts": 1717000000000, "project": "api", "prompt": "..." },
//!   "2": { "state": "offline", "ts": 0 }
//! }
//! ```
//!
//! `detail` is never written; it is transient by definition.
//!
//! # Restore Rules
//!
//! - `thinking`, `permission`, `compacting` come back as `idle`: the session is
//!   presumably alive, but the sub-state predates the restart.
//! - `offline` entries are skipped (the slot starts at its default).
//! - `idle`, `done`, `error` restore verbatim.
//! - Missing, empty, or corrupt files yield an all-default table.
//!
//! # Atomic Writes
//!
//! Uses temp file + rename so a crash mid-write never leaves a torn file.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use fs_err as fs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use slot_status_protocol::SlotState;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Result, SlotError};
use crate::slot::{default_table, Slot, SlotTable, SlotValue};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PersistedSlot {
    state: SlotState,
    ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
}

impl From<&SlotValue> for PersistedSlot {
    fn from(value: &SlotValue) -> Self {
        PersistedSlot {
            state: value.state,
            ts: value.timestamp,
            project: value.project.clone(),
            prompt: value.prompt.clone(),
        }
    }
}

/// Applies the restore-time downgrade. `None` means "start at default".
fn restore(record: PersistedSlot) -> Option<SlotValue> {
    let state = match record.state {
        SlotState::Offline => return None,
        state if state.is_in_progress() => SlotState::Idle,
        state => state,
    };
    Some(SlotValue {
        state,
        timestamp: record.ts,
        project: record.project,
        detail: None,
        prompt: record.prompt,
    })
}

/// Loads the slot table from `path`. Never fails; problems are logged and
/// the affected slots (or the whole table) start at default.
pub fn load_slots(path: &Path) -> SlotTable {
    let mut table = default_table();

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return table,
        Err(err) => {
            warn!(error = %err, path = %path.display(), "Failed to read slot state file; starting cold");
            return table;
        }
    };

    if content.trim().is_empty() {
        return table;
    }

    let entries: BTreeMap<String, Value> = match serde_json::from_str(&content) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(error = %err, path = %path.display(), "Failed to parse slot state file; starting cold");
            return table;
        }
    };

    for (key, raw) in entries {
        let slot = match key.trim().parse::<i64>().ok().and_then(Slot::new) {
            Some(slot) => slot,
            None => {
                debug!(key = %key, "Ignoring persisted entry with invalid slot key");
                continue;
            }
        };
        let record: PersistedSlot = match serde_json::from_value(raw) {
            Ok(record) => record,
            Err(err) => {
                debug!(slot = %slot, error = %err, "Ignoring malformed persisted slot");
                continue;
            }
        };
        if let Some(value) = restore(record) {
            table[slot.index()] = value;
        }
    }

    table
}

/// Writes the whole table to `path`, creating the parent directory if needed.
pub fn save_slots(path: &Path, slots: &SlotTable) -> Result<()> {
    let records: BTreeMap<String, PersistedSlot> = Slot::all()
        .map(|slot| (slot.to_string(), PersistedSlot::from(&slots[slot.index()])))
        .collect();

    let content = serde_json::to_string_pretty(&records).map_err(|source| SlotError::Json {
        context: "serialize slot table".to_string(),
        source,
    })?;

    let parent_dir = path
        .parent()
        .ok_or_else(|| SlotError::NoParent(path.to_path_buf()))?;
    fs::create_dir_all(parent_dir).map_err(|source| SlotError::Io {
        context: format!("create {}", parent_dir.display()),
        source,
    })?;

    let mut temp_file = NamedTempFile::new_in(parent_dir).map_err(|source| SlotError::Io {
        context: "create temp state file".to_string(),
        source,
    })?;
    temp_file
        .write_all(content.as_bytes())
        .map_err(|source| SlotError::Io {
            context: "write temp state file".to_string(),
            source,
        })?;
    temp_file.flush().map_err(|source| SlotError::Io {
        context: "flush temp state file".to_string(),
        source,
    })?;
    temp_file.persist(path).map_err(|err| SlotError::Io {
        context: format!("replace {}", path.display()),
        source: err.error,
    })?;

    Ok(())
}
