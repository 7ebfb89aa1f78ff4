//! Session identity → slot resolution.
//!
//! The session-tracking daemon periodically declares the full set of
//! identity↔slot bindings. Each declaration replaces the previous one
//! wholesale; the resolver works out which slots that affects:
//!
//! - **Move**: identity bound before and after, to a different slot. Its value
//!   follows it, and the old slot is reset unless someone else now owns it.
//! - **Removal**: identity no longer bound (tab closed). Its slot is reset
//!   unless someone else now owns it.
//! - **Provisional placement**: an update that was applied to a caller's
//!   `fallback_slot` guess. If the mapping later binds that identity to a
//!   different slot, the value is relocated like a move.
//!
//! Updates naming an identity with no binding and no usable guess wait in a
//! pending buffer (one per identity, newest wins) until a mapping binds it.
//!
//! Planning is pure: [`IdentityResolver::plan`] reads the current table and
//! returns every write at once so the store can apply them as a single batch.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use slot_status_protocol::MappingEntry;

use crate::request::UpdateRequest;
use crate::slot::{Slot, SlotTable, SlotValue};

/// One-to-one identity↔slot relation with lookups in both directions.
///
/// Only ever built whole from a mapping event; never patched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    by_session: HashMap<String, Slot>,
    by_slot: BTreeMap<Slot, String>,
}

impl Bindings {
    /// Builds bindings from raw entries, returning the ones dropped for an
    /// out-of-range slot.
    ///
    /// If two identities claim the same slot, the later entry wins.
    pub fn from_entries<I>(entries: I) -> (Self, Vec<MappingEntry>)
    where
        I: IntoIterator<Item = MappingEntry>,
    {
        let mut bindings = Bindings::default();
        let mut dropped = Vec::new();

        for entry in entries {
            let slot = match Slot::new(entry.slot) {
                Some(slot) => slot,
                None => {
                    dropped.push(entry);
                    continue;
                }
            };

            if let Some(previous_owner) = bindings.by_slot.remove(&slot) {
                bindings.by_session.remove(&previous_owner);
            }
            if let Some(previous_slot) = bindings.by_session.remove(&entry.session_id) {
                bindings.by_slot.remove(&previous_slot);
            }
            bindings.by_slot.insert(slot, entry.session_id.clone());
            bindings.by_session.insert(entry.session_id, slot);
        }

        (bindings, dropped)
    }

    pub fn slot_for(&self, session_id: &str) -> Option<Slot> {
        self.by_session.get(session_id).copied()
    }

    pub fn session_for(&self, slot: Slot) -> Option<&str> {
        self.by_slot.get(&slot).map(String::as_str)
    }

    pub fn is_claimed(&self, slot: Slot) -> bool {
        self.by_slot.contains_key(&slot)
    }

    pub fn len(&self) -> usize {
        self.by_slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_slot.is_empty()
    }
}

/// Everything a mapping event changes, computed before anything is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Slot writes to apply as one batch.
    pub writes: BTreeMap<Slot, SlotValue>,
    /// Slots to notify once the batch is applied.
    pub affected: BTreeSet<Slot>,
    /// Entries discarded for an out-of-range slot.
    pub dropped: Vec<MappingEntry>,
    bindings: Bindings,
}

impl ReconcilePlan {
    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }
}

#[derive(Debug, Default)]
pub struct IdentityResolver {
    bindings: Bindings,
    provisional: HashMap<String, Slot>,
    pending: HashMap<String, UpdateRequest>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, session_id: &str) -> Option<Slot> {
        self.bindings.slot_for(session_id)
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Holds an update until a mapping binds its identity. Replaces any
    /// update already waiting for the same identity.
    ///
    /// Slot-addressed requests are never buffered.
    pub fn buffer(&mut self, request: UpdateRequest) -> bool {
        match request.session_id() {
            Some(session_id) => {
                let session_id = session_id.to_string();
                self.pending.insert(session_id, request);
                true
            }
            None => false,
        }
    }

    /// Records that an unbound identity's update was applied to a guessed slot.
    ///
    /// A newer placement supersedes any update still waiting for that identity.
    /// Returns the identity's previous guess when it named a different slot;
    /// the caller owns clearing it.
    pub fn record_provisional(&mut self, session_id: &str, slot: Slot) -> Option<Slot> {
        self.pending.remove(session_id);
        self.provisional
            .insert(session_id.to_string(), slot)
            .filter(|previous| *previous != slot)
    }

    /// True if an identity other than `session_id` owns `slot`, either by
    /// binding or by a provisional placement.
    pub fn is_held_by_other(&self, slot: Slot, session_id: &str) -> bool {
        if let Some(owner) = self.bindings.session_for(slot) {
            return owner != session_id;
        }
        self.provisional
            .iter()
            .any(|(holder, guess)| *guess == slot && holder != session_id)
    }

    pub fn provisional_slot(&self, session_id: &str) -> Option<Slot> {
        self.provisional.get(session_id).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, session_id: &str) -> bool {
        self.pending.contains_key(session_id)
    }

    /// Computes the effect of replacing the current bindings with `entries`.
    pub fn plan<I>(&self, entries: I, slots: &SlotTable) -> ReconcilePlan
    where
        I: IntoIterator<Item = MappingEntry>,
    {
        let (next, dropped) = Bindings::from_entries(entries);

        let mut moves: Vec<(Slot, Slot)> = Vec::new();
        let mut resets: BTreeSet<Slot> = BTreeSet::new();
        let mut affected: BTreeSet<Slot> = BTreeSet::new();

        for (session_id, &old_slot) in &self.bindings.by_session {
            match next.slot_for(session_id) {
                Some(new_slot) if new_slot == old_slot => {}
                Some(new_slot) => {
                    moves.push((old_slot, new_slot));
                    affected.insert(old_slot);
                    affected.insert(new_slot);
                    if !next.is_claimed(old_slot) {
                        resets.insert(old_slot);
                    }
                }
                None => {
                    if !next.is_claimed(old_slot) {
                        resets.insert(old_slot);
                        affected.insert(old_slot);
                    }
                }
            }
        }

        for (session_id, &guess) in &self.provisional {
            if self.bindings.slot_for(session_id).is_some() {
                continue;
            }
            match next.slot_for(session_id) {
                Some(new_slot) if new_slot != guess => {
                    moves.push((guess, new_slot));
                    affected.insert(guess);
                    affected.insert(new_slot);
                    if !next.is_claimed(guess) {
                        resets.insert(guess);
                    }
                }
                _ => {}
            }
        }

        let mut writes = BTreeMap::new();
        for slot in resets {
            writes.insert(slot, SlotValue::offline());
        }
        // Read from the pre-mapping table so swaps see each other's old value.
        for (from, to) in moves {
            writes.insert(to, slots[from.index()].clone());
        }

        ReconcilePlan {
            writes,
            affected,
            dropped,
            bindings: next,
        }
    }

    /// Installs the planned bindings and hands back buffered updates whose
    /// identity is now bound, in slot order.
    pub fn commit(&mut self, plan: ReconcilePlan) -> Vec<UpdateRequest> {
        self.bindings = plan.bindings;

        let bindings = &self.bindings;
        self.provisional.retain(|session_id, guess| {
            bindings.slot_for(session_id).is_none() && !bindings.is_claimed(*guess)
        });

        let ready: Vec<String> = self
            .pending
            .keys()
            .filter(|session_id| self.bindings.slot_for(session_id).is_some())
            .cloned()
            .collect();

        let mut replay: Vec<(Slot, UpdateRequest)> = ready
            .into_iter()
            .filter_map(|session_id| {
                let slot = self.bindings.slot_for(&session_id)?;
                self.pending.remove(&session_id).map(|request| (slot, request))
            })
            .collect();
        replay.sort_by_key(|(slot, _)| *slot);
        replay.into_iter().map(|(_, request)| request).collect()
    }
}
