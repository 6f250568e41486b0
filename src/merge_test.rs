use super::*;
use crate::model::variant_id;

fn node(turn_id: &str, turn_index: usize, variant_index: u32, preview: &str, discovered: bool, ts: i64) -> Variant {
    Variant {
        variant_id: variant_id(turn_id, variant_index),
        turn_id: turn_id.to_owned(),
        turn_index,
        variant_index,
        role: Role::Assistant,
        preview: preview.to_owned(),
        text_hash: discovered.then(|| crate::hash::text_hash(preview)),
        is_active: false,
        is_discovered: discovered,
        timestamp: ts,
    }
}

fn active(mut v: Variant) -> Variant {
    v.is_active = true;
    v
}

fn observed(entries: &[(usize, &str, u32, u32)]) -> BTreeMap<usize, ObservedTurn> {
    entries
        .iter()
        .map(|(index, id, total, active)| {
            (*index, ObservedTurn { turn_id: (*id).to_owned(), total: *total, active: *active })
        })
        .collect()
}

// =============================================================================
// prefer / combine
// =============================================================================

#[test]
fn discovered_beats_undiscovered_regardless_of_age() {
    let old_real = node("t", 0, 2, "Real content here", true, 1);
    let new_placeholder = node("t", 0, 2, "2", false, 99);
    assert_eq!(prefer(&new_placeholder, &old_real).preview, "Real content here");
    assert_eq!(prefer(&old_real, &new_placeholder).preview, "Real content here");
}

#[test]
fn real_preview_beats_placeholder_when_discovery_ties() {
    let placeholder = node("t", 0, 2, "2", false, 50);
    let text = node("t", 0, 2, "Guessed text", false, 10);
    assert_eq!(prefer(&placeholder, &text).preview, "Guessed text");
}

#[test]
fn newer_wins_when_everything_else_ties() {
    let older = node("t", 0, 1, "First wording", true, 10);
    let newer = node("t", 0, 1, "Second wording", true, 20);
    assert_eq!(prefer(&older, &newer).preview, "Second wording");
    assert_eq!(prefer(&newer, &older).preview, "Second wording");
}

#[test]
fn combine_keeps_primary_identity_and_discovery_is_monotonic() {
    let live = active(node("live", 0, 2, "2", false, 100));
    let stored = node("stored", 0, 2, "Stored text", true, 5);
    let merged = combine(&live, &stored);
    assert_eq!(merged.variant_id, "live_v2");
    assert!(merged.is_active);
    assert!(merged.is_discovered);
    assert_eq!(merged.preview, "Stored text");
    assert_eq!(merged.text_hash, stored.text_hash);
    assert_eq!(merged.timestamp, 100);
}

// =============================================================================
// consolidate
// =============================================================================

#[test]
fn stored_discovery_survives_live_placeholder() {
    let live = vec![active(node("t0", 0, 1, "Answer one", true, 200)), node("t0", 0, 2, "2", false, 200)];
    let stored = vec![node("t0", 0, 1, "Answer one", true, 100), node("t0", 0, 2, "Answer two", true, 100)];
    let ids = HashSet::from(["t0".to_owned()]);
    let merged = consolidate(live, stored, &observed(&[(0, "t0", 2, 1)]), &ids, true);

    assert_eq!(merged.len(), 2);
    assert!(merged[0].is_active);
    assert!(!merged[1].is_active);
    assert!(merged[1].is_discovered);
    assert_eq!(merged[1].preview, "Answer two");
}

#[test]
fn slot_pairing_reconciles_changed_turn_ids() {
    let live = vec![active(node("turn-0-new", 0, 1, "Hi", true, 200))];
    let stored = vec![node("turn-0-old", 0, 1, "Hi there friend", true, 100)];
    let merged = consolidate(live, stored, &BTreeMap::new(), &HashSet::new(), false);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].variant_id, "turn-0-new_v1");
}

#[test]
fn new_turn_guard_drops_unverified_placeholders() {
    let live = vec![
        active(node("t0", 0, 1, "Known", true, 10)),
        node("t0", 0, 2, "2", false, 10),
        active(node("t1", 1, 1, "Fresh", true, 10)),
        node("t1", 1, 2, "2", false, 10),
    ];
    let stored = vec![node("t0", 0, 1, "Known", true, 5)];
    let ids = HashSet::from(["t0".to_owned()]);
    let merged = consolidate(live, stored, &BTreeMap::new(), &ids, true);
    let kept: Vec<&str> = merged.iter().map(|n| n.variant_id.as_str()).collect();
    assert_eq!(kept, vec!["t0_v1", "t0_v2", "t1_v1"]);
}

#[test]
fn observed_total_trims_stale_variants_and_sets_active() {
    let live = vec![node("t0", 0, 1, "One", true, 10), active(node("t0", 0, 2, "Two", true, 10))];
    let stored = vec![active(node("t0", 0, 1, "One", true, 5)), node("t0", 0, 3, "Three", true, 5)];
    let merged = consolidate(live, stored, &observed(&[(0, "t0", 2, 2)]), &HashSet::new(), false);
    assert_eq!(merged.len(), 2);
    assert!(!merged[0].is_active);
    assert!(merged[1].is_active);
}

#[test]
fn unobserved_turn_keeps_single_newest_active() {
    let stored = vec![active(node("t5", 5, 1, "Older", true, 10)), active(node("t5", 5, 2, "Newer", true, 20))];
    let merged = consolidate(Vec::new(), stored, &BTreeMap::new(), &HashSet::new(), false);
    let actives: Vec<u32> = merged.iter().filter(|n| n.is_active).map(|n| n.variant_index).collect();
    assert_eq!(actives, vec![2]);
}

#[test]
fn output_is_sorted_by_slot() {
    let stored = vec![node("b", 1, 2, "x1234", true, 1), node("a", 0, 1, "y1234", true, 1), node("b", 1, 1, "z1234", true, 1)];
    let merged = consolidate(Vec::new(), stored, &BTreeMap::new(), &HashSet::new(), false);
    let slots: Vec<(usize, u32)> = merged.iter().map(Variant::slot).collect();
    assert_eq!(slots, vec![(0, 1), (1, 1), (1, 2)]);
}

#[test]
fn consolidate_is_idempotent() {
    let live = vec![active(node("t0", 0, 1, "Answer one", true, 200)), node("t0", 0, 2, "2", false, 200)];
    let stored = vec![node("t0", 0, 2, "Answer two", true, 100)];
    let obs = observed(&[(0, "t0", 2, 1)]);
    let ids = HashSet::from(["t0".to_owned()]);
    let once = consolidate(live, stored.clone(), &obs, &ids, true);
    let twice = consolidate(once.clone(), stored, &obs, &ids, true);
    assert_eq!(once, twice);
}
