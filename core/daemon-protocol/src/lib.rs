//! IPC protocol types and validation for slot-status-daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to construct valid requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_SESSION_ID_LEN: usize = 64;
pub const SLOT_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    Update,
    Mapping,
    GetSlots,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Display state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Idle,
    Thinking,
    Permission,
    Compacting,
    Done,
    Error,
    Offline,
}

impl SlotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotState::Idle => "idle",
            SlotState::Thinking => "thinking",
            SlotState::Permission => "permission",
            SlotState::Compacting => "compacting",
            SlotState::Done => "done",
            SlotState::Error => "error",
            SlotState::Offline => "offline",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "idle" => Some(SlotState::Idle),
            "thinking" => Some(SlotState::Thinking),
            "permission" => Some(SlotState::Permission),
            "compacting" => Some(SlotState::Compacting),
            "done" => Some(SlotState::Done),
            "error" => Some(SlotState::Error),
            "offline" => Some(SlotState::Offline),
            _ => None,
        }
    }

    /// States that describe work in flight rather than a resting outcome.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            SlotState::Thinking | SlotState::Permission | SlotState::Compacting
        )
    }
}

/// Status update as it arrives on the wire.
///
/// Slot numbers are kept as raw integers so that out-of-range values are
/// reported by [`UpdateParams::validate`] with a reason instead of failing
/// deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_slot: Option<i64>,
    pub state: SlotState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl UpdateParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        match (&self.slot, &self.session_id) {
            (None, None) => {
                return Err(ErrorInfo::new(
                    "missing_target",
                    "one of slot or session_id is required",
                ))
            }
            (Some(_), Some(_)) => {
                return Err(ErrorInfo::new(
                    "conflicting_target",
                    "slot and session_id are mutually exclusive",
                ))
            }
            (Some(slot), None) => {
                require_slot(*slot, "slot")?;
                if self.fallback_slot.is_some() {
                    return Err(ErrorInfo::new(
                        "conflicting_target",
                        "fallback_slot requires session_id",
                    ));
                }
            }
            (None, Some(session_id)) => {
                validate_session_id(session_id)?;
                if let Some(fallback) = self.fallback_slot {
                    require_slot(fallback, "fallback_slot")?;
                }
            }
        }

        if let Some(ts) = self.ts {
            if ts < 0 {
                return Err(ErrorInfo::new(
                    "invalid_timestamp",
                    "ts must be a non-negative epoch milliseconds value",
                ));
            }
        }

        Ok(())
    }
}

pub fn parse_update(params: Value) -> Result<UpdateParams, ErrorInfo> {
    let update: UpdateParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("update payload is invalid: {}", err),
        )
    })?;
    update.validate()?;
    Ok(update)
}

/// One session→slot binding from a mapping event.
///
/// The slot is not range-checked here; the resolver drops out-of-range
/// entries individually.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub session_id: String,
    pub slot: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingParams {
    pub entries: Vec<MappingEntry>,
    /// Keys dropped because the identity or its value was unusable.
    pub dropped: Vec<String>,
}

/// Parses a mapping event: a JSON object from session identity to slot number.
///
/// A non-object payload is rejected as a whole; bad entries are not.
pub fn parse_mapping(params: Value) -> Result<MappingParams, ErrorInfo> {
    let object = match params {
        Value::Object(object) => object,
        _ => {
            return Err(ErrorInfo::new(
                "invalid_params",
                "mapping payload must be an object of session_id to slot",
            ))
        }
    };

    let mut parsed = MappingParams::default();
    for (session_id, value) in object {
        match value.as_i64() {
            Some(slot) if validate_session_id(&session_id).is_ok() => {
                parsed.entries.push(MappingEntry { session_id, slot });
            }
            _ => parsed.dropped.push(session_id),
        }
    }
    Ok(parsed)
}

pub fn validate_session_id(session_id: &str) -> Result<(), ErrorInfo> {
    if session_id.trim().is_empty() {
        return Err(ErrorInfo::new(
            "invalid_session_id",
            "session_id must not be empty",
        ));
    }
    if session_id.chars().count() > MAX_SESSION_ID_LEN {
        return Err(ErrorInfo::new(
            "invalid_session_id",
            format!(
                "session_id must be {} characters or fewer",
                MAX_SESSION_ID_LEN
            ),
        ));
    }
    Ok(())
}

fn require_slot(slot: i64, field: &str) -> Result<(), ErrorInfo> {
    if (1..=SLOT_COUNT as i64).contains(&slot) {
        Ok(())
    } else {
        Err(ErrorInfo::new(
            "invalid_slot",
            format!("{} must be between 1 and {}", field, SLOT_COUNT),
        ))
    }
}
