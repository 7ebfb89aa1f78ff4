//! # slot-status-core
//!
//! Reconciles two independent event streams into one state per display slot:
//!
//! - **Status updates** from the CLI hook, addressed by slot number or by
//!   session identity.
//! - **Mapping events** from the session-tracking daemon, declaring which
//!   identity occupies which slot.
//!
//! ```text
//! hook ──update──┐
//!                ├─→ SlotStore ─→ transition ─→ persist ─→ listeners
//! tracker ─map───┘      │
//!                 IdentityResolver (+ pending buffer)
//! ```
//!
//! ## Design Principles
//!
//! - **Synchronous**: no async runtime; every call runs to completion.
//! - **Not thread-safe**: callers provide their own synchronization.
//! - **Graceful degradation**: unresolved identities are buffered, stale
//!   updates dropped, persistence failures logged. None of these are errors.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use slot_status_core::{SlotStore, UpdateRequest, Slot, SlotState};
//!
//! let mut store = SlotStore::open(&path);
//! store.subscribe(|slot, value| println!("{slot}: {:?}", value.state));
//! store.apply_update(UpdateRequest::for_slot(Slot::new(1).unwrap(), SlotState::Thinking));
//! ```

pub mod error;
pub mod notify;
pub mod persist;
pub mod request;
pub mod resolver;
pub mod slot;
pub mod store;
pub mod transition;

pub use error::{Result, SlotError};
pub use notify::{Listener, ListenerId, Notifier};
pub use persist::{load_slots, save_slots};
pub use request::{SlotTarget, UpdateRequest};
pub use resolver::{Bindings, IdentityResolver, ReconcilePlan};
pub use slot::{default_table, Slot, SlotTable, SlotValue};
pub use store::{SlotStore, UpdateOutcome};
pub use transition::{transition, Rejection, Transition};

pub use slot_status_protocol::{MappingEntry, SlotState, SLOT_COUNT};
