//! Precedence rules for consolidating duplicate variants.
//!
//! Two candidates describe the same variant when they share a `variantId`,
//! or, failing that, a `(turnIndex, variantIndex)` slot. The slot pairing is
//! what reconciles synthesized turn identifiers across page loads.
//!
//! Content precedence, first difference wins:
//! 1. discovered over undiscovered;
//! 2. real preview over placeholder;
//! 3. newer timestamp over older.
//!
//! Identity, position and `isActive` come from the live candidate when one
//! side is live; `isDiscovered` is the OR of both sides.

#[cfg(test)]
#[path = "merge_test.rs"]
mod merge_test;

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::model::{Role, TurnId, Variant};

/// What the most recent rescan reported for one turn position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedTurn {
    pub turn_id: TurnId,
    pub total: u32,
    pub active: u32,
}

/// The candidate whose content should survive. Ties keep `a`.
#[must_use]
pub fn prefer<'a>(a: &'a Variant, b: &'a Variant) -> &'a Variant {
    if a.is_discovered != b.is_discovered {
        return if a.is_discovered { a } else { b };
    }
    if a.is_placeholder() != b.is_placeholder() {
        return if a.is_placeholder() { b } else { a };
    }
    if b.timestamp > a.timestamp { b } else { a }
}

/// Merge `secondary` into `primary`, keeping the primary's identity.
#[must_use]
pub fn combine(primary: &Variant, secondary: &Variant) -> Variant {
    let content = prefer(primary, secondary);
    Variant {
        variant_id: primary.variant_id.clone(),
        turn_id: primary.turn_id.clone(),
        turn_index: primary.turn_index,
        variant_index: primary.variant_index,
        role: if primary.role == Role::Unknown { secondary.role } else { primary.role },
        preview: content.preview.clone(),
        text_hash: content.text_hash.clone(),
        is_active: primary.is_active,
        is_discovered: primary.is_discovered || secondary.is_discovered,
        timestamp: primary.timestamp.max(secondary.timestamp),
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    node: Variant,
    live: bool,
}

fn absorb(existing: Candidate, incoming: Candidate) -> Candidate {
    let node = match (existing.live, incoming.live) {
        (true, false) => combine(&existing.node, &incoming.node),
        (false, true) => combine(&incoming.node, &existing.node),
        _ => {
            let winner = prefer(&existing.node, &incoming.node);
            if std::ptr::eq(winner, &existing.node) {
                combine(&existing.node, &incoming.node)
            } else {
                combine(&incoming.node, &existing.node)
            }
        }
    };
    Candidate { node, live: existing.live || incoming.live }
}

/// Union live and stored variants into one consistent, sorted set.
///
/// * Duplicates collapse by `variantId`, then by slot.
/// * With `guard_new_turns`, a live turn whose `turnId` is missing from
///   `stored_turn_ids` only admits active or discovered variants.
/// * Observed turns lose variants beyond their reported total and take
///   `isActive` from the observed counter.
/// * Turns absent from the current view keep at most one active variant.
#[must_use]
pub fn consolidate(
    live: Vec<Variant>,
    stored: Vec<Variant>,
    observed: &BTreeMap<usize, ObservedTurn>,
    stored_turn_ids: &HashSet<TurnId>,
    guard_new_turns: bool,
) -> Vec<Variant> {
    let mut by_id: Vec<Candidate> = Vec::new();
    let mut index_of: HashMap<String, usize> = HashMap::new();
    let incoming = live
        .into_iter()
        .map(|node| Candidate { node, live: true })
        .chain(stored.into_iter().map(|node| Candidate { node, live: false }));
    for candidate in incoming {
        if let Some(&at) = index_of.get(&candidate.node.variant_id) {
            let existing = by_id[at].clone();
            by_id[at] = absorb(existing, candidate);
        } else {
            index_of.insert(candidate.node.variant_id.clone(), by_id.len());
            by_id.push(candidate);
        }
    }

    let mut by_slot: BTreeMap<(usize, u32), Candidate> = BTreeMap::new();
    for candidate in by_id {
        let slot = candidate.node.slot();
        let merged = match by_slot.remove(&slot) {
            Some(existing) => absorb(existing, candidate),
            None => candidate,
        };
        by_slot.insert(slot, merged);
    }

    let mut nodes: Vec<Variant> = by_slot
        .into_values()
        .filter(|c| {
            let unverified = guard_new_turns
                && c.live
                && !stored_turn_ids.contains(&c.node.turn_id)
                && !(c.node.is_active || c.node.is_discovered);
            !unverified
        })
        .map(|c| c.node)
        .filter_map(|mut node| match observed.get(&node.turn_index) {
            Some(turn) if node.variant_index > turn.total => None,
            Some(turn) => {
                node.is_active = node.variant_index == turn.active;
                Some(node)
            }
            None => Some(node),
        })
        .collect();

    settle_unobserved_actives(&mut nodes, observed);
    nodes
}

/// For turns the current view does not report, keep only the most recently
/// observed active flag.
fn settle_unobserved_actives(nodes: &mut [Variant], observed: &BTreeMap<usize, ObservedTurn>) {
    let mut keep: HashMap<usize, (i64, u32)> = HashMap::new();
    for node in nodes.iter().filter(|n| n.is_active && !observed.contains_key(&n.turn_index)) {
        let entry = keep.entry(node.turn_index).or_insert((node.timestamp, node.variant_index));
        if node.timestamp > entry.0 {
            *entry = (node.timestamp, node.variant_index);
        }
    }
    for node in nodes.iter_mut().filter(|n| n.is_active && !observed.contains_key(&n.turn_index)) {
        if keep.get(&node.turn_index).is_some_and(|(_, vi)| *vi != node.variant_index) {
            node.is_active = false;
        }
    }
}
