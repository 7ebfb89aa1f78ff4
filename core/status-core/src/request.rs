//! Validated update requests as the core consumes them.

use slot_status_protocol::{SlotState, UpdateParams};

use crate::error::SlotError;
use crate::slot::Slot;

/// Where an update is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotTarget {
    /// The producer knows the slot number.
    Slot(Slot),
    /// The producer only knows its session identity, and optionally a guess.
    Session {
        session_id: String,
        fallback_slot: Option<Slot>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub target: SlotTarget,
    pub state: SlotState,
    /// Epoch milliseconds. Absent means "now" at the time it is applied.
    pub ts: Option<i64>,
    pub project: Option<String>,
    pub detail: Option<String>,
    pub prompt: Option<String>,
}

impl UpdateRequest {
    pub fn for_slot(slot: Slot, state: SlotState) -> Self {
        Self::new(SlotTarget::Slot(slot), state)
    }

    pub fn for_session(session_id: impl Into<String>, state: SlotState) -> Self {
        Self::new(
            SlotTarget::Session {
                session_id: session_id.into(),
                fallback_slot: None,
            },
            state,
        )
    }

    fn new(target: SlotTarget, state: SlotState) -> Self {
        UpdateRequest {
            target,
            state,
            ts: None,
            project: None,
            detail: None,
            prompt: None,
        }
    }

    /// Sets the fallback guess. Has no effect on slot-addressed requests.
    pub fn with_fallback(mut self, slot: Slot) -> Self {
        if let SlotTarget::Session { fallback_slot, .. } = &mut self.target {
            *fallback_slot = Some(slot);
        }
        self
    }

    pub fn at(mut self, ts: i64) -> Self {
        self.ts = Some(ts);
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        match &self.target {
            SlotTarget::Session { session_id, .. } => Some(session_id),
            SlotTarget::Slot(_) => None,
        }
    }
}

impl TryFrom<UpdateParams> for UpdateRequest {
    type Error = SlotError;

    fn try_from(params: UpdateParams) -> Result<Self, Self::Error> {
        params
            .validate()
            .map_err(|err| SlotError::InvalidRequest(err.message))?;

        let target = match (params.slot, params.session_id) {
            (Some(slot), _) => SlotTarget::Slot(Slot::try_from(slot)?),
            (None, Some(session_id)) => SlotTarget::Session {
                session_id,
                fallback_slot: params.fallback_slot.map(Slot::try_from).transpose()?,
            },
            (None, None) => {
                return Err(SlotError::InvalidRequest(
                    "one of slot or session_id is required".to_string(),
                ))
            }
        };

        Ok(UpdateRequest {
            target,
            state: params.state,
            ts: params.ts,
            project: params.project,
            detail: params.detail,
            prompt: params.prompt,
        })
    }
}
