//! Error types for slot-status-core operations.
//!
//! Most of the reconciliation path is infallible by contract: stale updates,
//! unresolved identities and persistence failures are outcomes, not errors.
//! What remains is boundary conversion and disk I/O.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    // ─────────────────────────────────────────────────────────────────────
    // Boundary Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Slot out of range (expected 1-8): {0}")]
    InvalidSlot(i64),

    #[error("Invalid update request: {0}")]
    InvalidRequest(String),

    // ─────────────────────────────────────────────────────────────────────
    // Persistence Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("State file path has no parent directory: {0}")]
    NoParent(PathBuf),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, SlotError>;
