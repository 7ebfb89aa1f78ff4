//! Decides whether an incoming update replaces a slot's current value.
//!
//! Only two rules can reject: ordering and the `done → idle` guard. Every
//! other pair, self-transitions included, is accepted.
//!
//! ```text
//! offline → idle → thinking → {idle, done, error, offline}
//! thinking ↔ permission
//! thinking → compacting → idle
//! done → {thinking, offline}      (done → idle is refused)
//! any → offline
//! ```

use slot_status_protocol::SlotState;

use crate::request::UpdateRequest;
use crate::slot::SlotValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Older than the value already shown.
    Stale,
    /// `done` is sticky against `idle`.
    TerminalGuard,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::Stale => "stale",
            Rejection::TerminalGuard => "terminal_guard",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Accept(SlotValue),
    Reject(Rejection),
}

pub fn transition(current: &SlotValue, incoming: &UpdateRequest, now_ms: i64) -> Transition {
    let timestamp = incoming.ts.unwrap_or(now_ms);

    if timestamp < current.timestamp {
        return Transition::Reject(Rejection::Stale);
    }

    if current.state == SlotState::Done && incoming.state == SlotState::Idle {
        return Transition::Reject(Rejection::TerminalGuard);
    }

    Transition::Accept(SlotValue {
        state: incoming.state,
        timestamp,
        project: incoming.project.clone().or_else(|| current.project.clone()),
        detail: incoming.detail.clone(),
        prompt: incoming.prompt.clone().or_else(|| current.prompt.clone()),
    })
}
