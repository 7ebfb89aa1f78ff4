//! The reconciliation store: single owner of the slot table.
//!
//! Every mutation follows the same sequence: decide, apply, persist,
//! notify. Persistence is best-effort; a failed write is logged and the
//! in-memory table stays authoritative.
//!
//! # Update Resolution
//!
//! 1. Explicit `slot` wins, even if the identity is also bound.
//! 2. A bound `session_id` resolves through the [`IdentityResolver`].
//! 3. An unbound `session_id` with a `fallback_slot` lands there provisionally,
//!    unless another identity holds that slot by binding or by its own guess.
//!    Moving to a new guess clears the identity's previous one.
//! 4. Otherwise the update waits in the pending buffer.
//!
//! Not thread-safe; the daemon wraps it in a `Mutex`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use slot_status_protocol::MappingEntry;
use tracing::{debug, info, warn};

use crate::notify::{ListenerId, Notifier};
use crate::persist::{load_slots, save_slots};
use crate::request::{SlotTarget, UpdateRequest};
use crate::resolver::{Bindings, IdentityResolver};
use crate::slot::{default_table, Slot, SlotTable, SlotValue};
use crate::transition::{transition, Rejection, Transition};

type Clock = Box<dyn Fn() -> i64 + Send>;

/// What happened to an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied(Slot),
    Rejected(Slot, Rejection),
    /// Identity unresolved; held until a mapping binds it.
    Buffered,
}

impl UpdateOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateOutcome::Applied(_) => "applied",
            UpdateOutcome::Rejected(_, rejection) => rejection.as_str(),
            UpdateOutcome::Buffered => "buffered",
        }
    }

    pub fn slot(&self) -> Option<Slot> {
        match self {
            UpdateOutcome::Applied(slot) | UpdateOutcome::Rejected(slot, _) => Some(*slot),
            UpdateOutcome::Buffered => None,
        }
    }
}

pub struct SlotStore {
    slots: SlotTable,
    resolver: IdentityResolver,
    notifier: Notifier,
    state_path: Option<PathBuf>,
    clock: Clock,
}

impl SlotStore {
    pub fn new_in_memory() -> Self {
        SlotStore {
            slots: default_table(),
            resolver: IdentityResolver::new(),
            notifier: Notifier::new(),
            state_path: None,
            clock: Box::new(|| Utc::now().timestamp_millis()),
        }
    }

    /// Restores from `state_path` (with restore-time downgrade) and persists
    /// every later mutation there.
    pub fn open(state_path: &Path) -> Self {
        let slots = load_slots(state_path);
        let restored = slots.iter().filter(|v| !v.is_offline_default()).count();
        info!(path = %state_path.display(), restored, "Slot table loaded");

        SlotStore {
            slots,
            state_path: Some(state_path.to_path_buf()),
            ..SlotStore::new_in_memory()
        }
    }

    /// Replaces the wall clock used for updates that carry no timestamp.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> i64 + Send + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    pub fn apply_update(&mut self, request: UpdateRequest) -> UpdateOutcome {
        let target = match &request.target {
            SlotTarget::Slot(slot) => Some((*slot, false)),
            SlotTarget::Session {
                session_id,
                fallback_slot,
            } => match self.resolver.resolve(session_id) {
                Some(slot) => Some((slot, false)),
                None => (*fallback_slot)
                    .filter(|slot| !self.resolver.is_held_by_other(*slot, session_id))
                    .map(|slot| (slot, true)),
            },
        };

        let Some((slot, provisional)) = target else {
            debug!(
                session_id = ?request.session_id(),
                state = request.state.as_str(),
                "Buffering update for unmapped session"
            );
            self.resolver.buffer(request);
            return UpdateOutcome::Buffered;
        };

        let now = (self.clock)();
        match transition(&self.slots[slot.index()], &request, now) {
            Transition::Accept(value) => {
                let mut changed = BTreeSet::from([slot]);
                if provisional {
                    if let Some(session_id) = request.session_id() {
                        debug!(
                            session_id = %session_id,
                            slot = %slot,
                            "Applying update to fallback slot"
                        );
                        let vacated = self
                            .resolver
                            .record_provisional(session_id, slot)
                            .filter(|old| !self.resolver.is_held_by_other(*old, session_id));
                        if let Some(old) = vacated {
                            debug!(
                                session_id = %session_id,
                                slot = %old,
                                "Clearing superseded fallback slot"
                            );
                            self.slots[old.index()] = SlotValue::offline();
                            changed.insert(old);
                        }
                    }
                }
                self.slots[slot.index()] = value;
                self.persist();
                for changed_slot in changed {
                    self.notifier.notify(changed_slot, &self.slots[changed_slot.index()]);
                }
                UpdateOutcome::Applied(slot)
            }
            Transition::Reject(rejection) => {
                debug!(
                    slot = %slot,
                    state = request.state.as_str(),
                    ts = ?request.ts,
                    current_ts = self.slots[slot.index()].timestamp,
                    reason = rejection.as_str(),
                    "Update rejected"
                );
                UpdateOutcome::Rejected(slot, rejection)
            }
        }
    }

    /// Replaces the identity↔slot bindings and returns the slots whose value
    /// changed as a direct result (moves and resets).
    ///
    /// All writes land before the single persist and before any listener
    /// runs. Buffered updates for newly bound identities replay afterwards
    /// through [`SlotStore::apply_update`].
    pub fn apply_mapping<I>(&mut self, entries: I) -> BTreeSet<Slot>
    where
        I: IntoIterator<Item = MappingEntry>,
    {
        let plan = self.resolver.plan(entries, &self.slots);

        for entry in &plan.dropped {
            warn!(
                session_id = %entry.session_id,
                slot = entry.slot,
                "Dropping mapping entry with out-of-range slot"
            );
        }

        let affected = plan.affected.clone();
        for (slot, value) in &plan.writes {
            self.slots[slot.index()] = value.clone();
        }
        let bound = plan.bindings().len();
        if plan.bindings().is_empty() {
            debug!("Mapping is empty; every bound slot is released");
        }
        let replay = self.resolver.commit(plan);

        info!(
            bound,
            affected = affected.len(),
            replay = replay.len(),
            "Session mapping applied"
        );

        if !affected.is_empty() {
            self.persist();
            for slot in &affected {
                self.notifier.notify(*slot, &self.slots[slot.index()]);
            }
        }

        for request in replay {
            self.apply_update(request);
        }

        affected
    }

    pub fn read(&self, slot: Slot) -> &SlotValue {
        &self.slots[slot.index()]
    }

    pub fn read_all(&self) -> &SlotTable {
        &self.slots
    }

    /// The table keyed by slot number, for serialization.
    pub fn snapshot(&self) -> BTreeMap<Slot, SlotValue> {
        Slot::all()
            .map(|slot| (slot, self.slots[slot.index()].clone()))
            .collect()
    }

    pub fn bindings(&self) -> &Bindings {
        self.resolver.bindings()
    }

    pub fn pending_count(&self) -> usize {
        self.resolver.pending_count()
    }

    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(Slot, &SlotValue) + Send + 'static,
    {
        self.notifier.subscribe(Box::new(listener))
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.notifier.unsubscribe(id)
    }

    fn persist(&self) {
        let Some(path) = self.state_path.as_deref() else {
            return;
        };
        if let Err(err) = save_slots(path, &self.slots) {
            warn!(error = %err, path = %path.display(), "Failed to persist slot table");
        }
    }
}
