//! Slot identity and the value each slot displays.

use serde::{Deserialize, Serialize};
use std::fmt;

use slot_status_protocol::{SlotState, SLOT_COUNT};

/// One of the fixed display positions, numbered 1 through 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Slot(u8);

impl Slot {
    pub fn new(number: i64) -> Option<Self> {
        if (1..=SLOT_COUNT as i64).contains(&number) {
            Some(Slot(number as u8))
        } else {
            None
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Zero-based position in the slot table.
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }

    pub fn all() -> impl Iterator<Item = Slot> {
        (1..=SLOT_COUNT as u8).map(Slot)
    }
}

impl TryFrom<i64> for Slot {
    type Error = crate::SlotError;

    fn try_from(number: i64) -> Result<Self, Self::Error> {
        Slot::new(number).ok_or(crate::SlotError::InvalidSlot(number))
    }
}

impl From<Slot> for u8 {
    fn from(slot: Slot) -> u8 {
        slot.0
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current display value of a slot.
///
/// `project` and `prompt` carry forward across updates; `detail` only lives
/// as long as the update that supplied it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotValue {
    pub state: SlotState,
    #[serde(rename = "ts")]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl SlotValue {
    pub fn offline() -> Self {
        SlotValue {
            state: SlotState::Offline,
            timestamp: 0,
            project: None,
            detail: None,
            prompt: None,
        }
    }

    pub fn is_offline_default(&self) -> bool {
        *self == SlotValue::offline()
    }
}

impl Default for SlotValue {
    fn default() -> Self {
        SlotValue::offline()
    }
}

/// The canonical table, indexed by [`Slot::index`].
pub type SlotTable = [SlotValue; SLOT_COUNT];

pub fn default_table() -> SlotTable {
    std::array::from_fn(|_| SlotValue::offline())
}
