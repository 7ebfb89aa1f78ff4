//! End-to-end reconciliation behavior through the public store API.

use std::sync::{Arc, Mutex};

use slot_status_core::{
    MappingEntry, Slot, SlotState, SlotStore, SlotValue, UpdateOutcome, UpdateRequest,
};

fn slot(n: i64) -> Slot {
    Slot::new(n).unwrap()
}

fn mapping(entries: &[(&str, i64)]) -> Vec<MappingEntry> {
    entries
        .iter()
        .map(|(session_id, slot)| MappingEntry {
            session_id: session_id.to_string(),
            slot: *slot,
        })
        .collect()
}

fn store() -> SlotStore {
    SlotStore::new_in_memory().with_clock(|| 50_000)
}

type Seen = Arc<Mutex<Vec<(u8, SlotValue)>>>;

fn observe(store: &mut SlotStore) -> Seen {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    store.subscribe(move |slot, value| sink.lock().unwrap().push((slot.get(), value.clone())));
    seen
}

#[test]
fn done_is_not_overwritten_by_idle() {
    let mut store = store();
    store.apply_update(UpdateRequest::for_slot(slot(1), SlotState::Done).at(100));
    let outcome = store.apply_update(UpdateRequest::for_slot(slot(1), SlotState::Idle).at(200));

    assert!(matches!(outcome, UpdateOutcome::Rejected(..)));
    let value = store.read(slot(1));
    assert_eq!(value.state, SlotState::Done);
    assert_eq!(value.timestamp, 100);
}

#[test]
fn done_clears_through_thinking_then_accepts_idle() {
    let mut store = store();
    store.apply_update(UpdateRequest::for_slot(slot(1), SlotState::Done).at(100));
    store.apply_update(UpdateRequest::for_slot(slot(1), SlotState::Thinking).at(150));
    store.apply_update(UpdateRequest::for_slot(slot(1), SlotState::Idle).at(200));
    assert_eq!(store.read(slot(1)).state, SlotState::Idle);
}

#[test]
fn session_value_follows_its_identity_to_a_new_slot() {
    let mut store = store();
    store.apply_mapping(mapping(&[("sess-a", 1)]));
    store.apply_update(UpdateRequest::for_session("sess-a", SlotState::Thinking).at(100));
    store.apply_mapping(mapping(&[("sess-a", 3)]));

    let moved = store.read(slot(3));
    assert_eq!(moved.state, SlotState::Thinking);
    assert_eq!(moved.timestamp, 100);
    assert!(store.read(slot(1)).is_offline_default());
}

#[test]
fn unknown_session_waits_for_its_mapping() {
    let mut store = store();
    let seen = observe(&mut store);

    let outcome =
        store.apply_update(UpdateRequest::for_session("unknown", SlotState::Thinking).at(100));
    assert_eq!(outcome, UpdateOutcome::Buffered);
    assert!(store.read_all().iter().all(SlotValue::is_offline_default));
    assert!(seen.lock().unwrap().is_empty());

    store.apply_mapping(mapping(&[("unknown", 3)]));

    let value = store.read(slot(3));
    assert_eq!(value.state, SlotState::Thinking);
    assert_eq!(value.timestamp, 100);
    assert_eq!(store.pending_count(), 0);
    assert_eq!(seen.lock().unwrap().last().map(|(n, _)| *n), Some(3));
}

#[test]
fn detail_is_cleared_when_omitted() {
    let mut store = store();
    store.apply_update(
        UpdateRequest::for_slot(slot(1), SlotState::Thinking)
            .with_detail("Bash")
            .at(100),
    );
    assert_eq!(store.read(slot(1)).detail.as_deref(), Some("Bash"));

    store.apply_update(UpdateRequest::for_slot(slot(1), SlotState::Thinking).at(200));
    assert_eq!(store.read(slot(1)).detail, None);
}

#[test]
fn project_and_prompt_stick_until_overwritten() {
    let mut store = store();
    store.apply_update(
        UpdateRequest::for_slot(slot(2), SlotState::Thinking)
            .with_project("api")
            .with_prompt("add caching")
            .at(1),
    );
    for ts in 2..6 {
        store.apply_update(UpdateRequest::for_slot(slot(2), SlotState::Permission).at(ts));
    }
    store.apply_update(
        UpdateRequest::for_slot(slot(2), SlotState::Done)
            .with_prompt("write tests")
            .at(7),
    );

    let value = store.read(slot(2));
    assert_eq!(value.project.as_deref(), Some("api"));
    assert_eq!(value.prompt.as_deref(), Some("write tests"));
}

#[test]
fn stale_update_changes_nothing_and_is_silent() {
    let mut store = store();
    store.apply_update(UpdateRequest::for_slot(slot(4), SlotState::Thinking).at(500));
    let seen = observe(&mut store);
    let before = store.read(slot(4)).clone();

    store.apply_update(
        UpdateRequest::for_slot(slot(4), SlotState::Error)
            .with_project("late")
            .at(499),
    );

    assert_eq!(store.read(slot(4)), &before);
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn closed_session_resets_its_slot() {
    let mut store = store();
    store.apply_mapping(mapping(&[("sess-a", 1), ("sess-b", 2)]));
    store.apply_update(UpdateRequest::for_session("sess-a", SlotState::Done).at(10));
    store.apply_update(UpdateRequest::for_session("sess-b", SlotState::Thinking).at(10));

    let affected = store.apply_mapping(mapping(&[("sess-b", 2)]));

    assert_eq!(affected.into_iter().collect::<Vec<_>>(), vec![slot(1)]);
    assert!(store.read(slot(1)).is_offline_default());
    assert_eq!(store.read(slot(2)).state, SlotState::Thinking);
}

#[test]
fn tab_reorder_swaps_values_without_torn_notifications() {
    let mut store = store();
    store.apply_mapping(mapping(&[("sess-a", 1), ("sess-b", 2)]));
    store.apply_update(UpdateRequest::for_session("sess-a", SlotState::Thinking).at(10));
    store.apply_update(UpdateRequest::for_session("sess-b", SlotState::Permission).at(20));
    let seen = observe(&mut store);

    store.apply_mapping(mapping(&[("sess-a", 2), ("sess-b", 1)]));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, 1);
    assert_eq!(seen[0].1.state, SlotState::Permission);
    assert_eq!(seen[1].0, 2);
    assert_eq!(seen[1].1.state, SlotState::Thinking);
    // No observer ever saw an offline reset for either slot.
    assert!(seen.iter().all(|(_, value)| value.state != SlotState::Offline));
}

#[test]
fn out_of_range_mapping_entries_are_dropped_not_fatal() {
    let mut store = store();
    store.apply_mapping(mapping(&[("sess-a", 0), ("sess-b", 2), ("sess-c", 9)]));

    assert_eq!(store.bindings().len(), 1);
    assert_eq!(store.bindings().session_for(slot(2)), Some("sess-b"));
}

#[test]
fn fallback_guess_is_relocated_once_mapping_arrives() {
    let mut store = store();
    store.apply_update(
        UpdateRequest::for_session("sess-a", SlotState::Thinking)
            .with_fallback(slot(1))
            .at(10),
    );
    assert_eq!(store.read(slot(1)).state, SlotState::Thinking);

    store.apply_mapping(mapping(&[("sess-a", 5)]));

    assert!(store.read(slot(1)).is_offline_default());
    assert_eq!(store.read(slot(5)).state, SlotState::Thinking);

    store.apply_update(UpdateRequest::for_session("sess-a", SlotState::Done).at(20));
    assert_eq!(store.read(slot(5)).state, SlotState::Done);
}

#[test]
fn fallback_never_clobbers_a_mapped_session() {
    let mut store = store();
    store.apply_mapping(mapping(&[("owner", 2)]));
    store.apply_update(UpdateRequest::for_session("owner", SlotState::Thinking).at(10));

    let outcome = store.apply_update(
        UpdateRequest::for_session("guesser", SlotState::Error)
            .with_fallback(slot(2))
            .at(20),
    );

    assert_eq!(outcome, UpdateOutcome::Buffered);
    assert_eq!(store.read(slot(2)).state, SlotState::Thinking);

    store.apply_mapping(mapping(&[("owner", 2), ("guesser", 6)]));
    assert_eq!(store.read(slot(6)).state, SlotState::Error);
}

#[test]
fn buffered_updates_are_last_write_wins() {
    let mut store = store();
    store.apply_update(UpdateRequest::for_session("late", SlotState::Thinking).at(10));
    store.apply_update(
        UpdateRequest::for_session("late", SlotState::Permission)
            .with_detail("Edit")
            .at(20),
    );

    store.apply_mapping(mapping(&[("late", 7)]));

    let value = store.read(slot(7));
    assert_eq!(value.state, SlotState::Permission);
    assert_eq!(value.detail.as_deref(), Some("Edit"));
}

#[test]
fn second_guess_at_an_occupied_fallback_slot_waits_for_its_mapping() {
    let mut store = store();
    store.apply_update(
        UpdateRequest::for_session("p", SlotState::Thinking)
            .with_fallback(slot(2))
            .with_project("p-proj")
            .at(10),
    );
    let outcome = store.apply_update(
        UpdateRequest::for_session("q", SlotState::Done)
            .with_fallback(slot(2))
            .with_project("q-proj")
            .at(20),
    );

    assert_eq!(outcome, UpdateOutcome::Buffered);
    assert_eq!(store.read(slot(2)).project.as_deref(), Some("p-proj"));

    store.apply_mapping(mapping(&[("p", 5)]));
    let p = store.read(slot(5));
    assert_eq!(p.state, SlotState::Thinking);
    assert_eq!(p.timestamp, 10);
    assert_eq!(p.project.as_deref(), Some("p-proj"));
    assert!(store.read(slot(2)).is_offline_default());

    store.apply_mapping(mapping(&[("p", 5), ("q", 6)]));
    let q = store.read(slot(6));
    assert_eq!(q.state, SlotState::Done);
    assert_eq!(q.timestamp, 20);
    assert_eq!(q.project.as_deref(), Some("q-proj"));
    assert_eq!(store.read(slot(5)).project.as_deref(), Some("p-proj"));
}

#[test]
fn moving_to_a_new_fallback_slot_clears_the_old_guess() {
    let mut store = store();
    let seen = observe(&mut store);
    store.apply_update(
        UpdateRequest::for_session("p", SlotState::Thinking)
            .with_fallback(slot(2))
            .at(10),
    );
    store.apply_update(
        UpdateRequest::for_session("p", SlotState::Done)
            .with_fallback(slot(3))
            .at(20),
    );

    assert!(store.read(slot(2)).is_offline_default());
    assert_eq!(store.read(slot(3)).state, SlotState::Done);
    {
        let seen = seen.lock().unwrap();
        let last_two: Vec<_> = seen[seen.len() - 2..]
            .iter()
            .map(|(n, value)| (*n, value.state))
            .collect();
        assert_eq!(last_two, vec![(2, SlotState::Offline), (3, SlotState::Done)]);
    }

    store.apply_mapping(mapping(&[("p", 5)]));

    assert!(store.read(slot(2)).is_offline_default());
    assert!(store.read(slot(3)).is_offline_default());
    assert_eq!(store.read(slot(5)).state, SlotState::Done);
}

#[test]
fn old_fallback_slot_claimed_by_a_binding_is_left_alone() {
    let mut store = store();
    store.apply_update(
        UpdateRequest::for_session("p", SlotState::Thinking)
            .with_fallback(slot(2))
            .at(10),
    );
    store.apply_mapping(mapping(&[("owner", 2)]));
    store.apply_update(UpdateRequest::for_session("owner", SlotState::Permission).at(15));

    store.apply_update(
        UpdateRequest::for_session("p", SlotState::Done)
            .with_fallback(slot(4))
            .at(20),
    );

    assert_eq!(store.read(slot(2)).state, SlotState::Permission);
    assert_eq!(store.read(slot(4)).state, SlotState::Done);
}
