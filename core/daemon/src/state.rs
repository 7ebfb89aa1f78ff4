//! Shared daemon state.
//!
//! The core store is single-threaded by contract. Connections are handled on
//! their own threads, so every operation takes the store lock for its full
//! duration; requests therefore apply strictly one after another.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use slot_status_core::{
    MappingEntry, Slot, SlotState, SlotStore, SlotValue, UpdateOutcome, UpdateRequest,
};

pub struct SharedState {
    store: Mutex<SlotStore>,
}

impl SharedState {
    pub fn new(mut store: SlotStore) -> Self {
        store.subscribe(|slot, value| {
            tracing::info!(
                slot = %slot,
                state = value.state.as_str(),
                ts = value.timestamp,
                project = ?value.project,
                detail = ?value.detail,
                "Slot changed"
            );
        });
        Self {
            store: Mutex::new(store),
        }
    }

    pub fn apply_update(&self, request: UpdateRequest) -> UpdateOutcome {
        self.lock_store().apply_update(request)
    }

    pub fn apply_mapping(&self, entries: Vec<MappingEntry>) -> BTreeSet<Slot> {
        self.lock_store().apply_mapping(entries)
    }

    pub fn slots_snapshot(&self) -> BTreeMap<Slot, SlotValue> {
        self.lock_store().snapshot()
    }

    pub fn pending_count(&self) -> usize {
        self.lock_store().pending_count()
    }

    pub fn bound_count(&self) -> usize {
        self.lock_store().bindings().len()
    }

    /// Demotes slots that have sat in `compacting` for longer than `ttl`.
    ///
    /// Goes through the ordinary update path, so ordering and notification
    /// rules apply as for any other update.
    pub fn expire_compacting(&self, ttl: Duration, now_ms: i64) -> Vec<Slot> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let mut store = self.lock_store();

        let expired: Vec<Slot> = Slot::all()
            .filter(|slot| {
                let value = store.read(*slot);
                value.state == SlotState::Compacting
                    && now_ms.saturating_sub(value.timestamp) > ttl_ms
            })
            .collect();

        let mut demoted = Vec::new();
        for slot in expired {
            let request = UpdateRequest::for_slot(slot, SlotState::Idle).at(now_ms);
            if let UpdateOutcome::Applied(slot) = store.apply_update(request) {
                demoted.push(slot);
            }
        }
        demoted
    }

    fn lock_store(&self) -> MutexGuard<'_, SlotStore> {
        match self.store.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Slot store lock poisoned; continuing with inner state");
                poisoned.into_inner()
            }
        }
    }
}
