//! Synchronous change notification.
//!
//! Listeners run inline, in registration order, after a mutation has been
//! applied and persisted. They observe values; they never mutate the store.

use crate::slot::{Slot, SlotValue};

pub type Listener = Box<dyn FnMut(Slot, &SlotValue) + Send>;

/// Handle returned by [`Notifier::subscribe`]; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct Notifier {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener)>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Returns false if the handle was already removed.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    pub fn notify(&mut self, slot: Slot, value: &SlotValue) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(slot, value);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
