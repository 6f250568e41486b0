//! BranchDetector: DOM snapshot in, branch records out.
//!
//! A turn yields a record only when its counter parses as a valid `c/t` with
//! `t >= 2` and at least one prev/next control is present. The displayed
//! variant is recorded as discovered with its live preview; every other index
//! is a placeholder whose preview is the bare index.
//!
//! Detection is a pure function of the document and `now`, so two calls on an
//! unchanged page with the same timestamp return identical records.

#[cfg(test)]
#[path = "detector_test.rs"]
mod detector_test;

use crate::dom::{Document, DomProbe};
use crate::hash::text_hash;
use crate::model::{BranchRecord, Variant, variant_id};

#[derive(Debug, Clone, Default)]
pub struct BranchDetector {
    probe: DomProbe,
}

impl BranchDetector {
    #[must_use]
    pub fn new(probe: DomProbe) -> Self {
        Self { probe }
    }

    /// One record per branch-point turn, in turn order. `turns[i]` has
    /// `turn_index == i`.
    pub fn detect<D: Document>(&self, doc: &D, turns: &[D::Element], now: i64) -> Vec<BranchRecord> {
        turns
            .iter()
            .enumerate()
            .filter_map(|(index, turn)| self.detect_turn(doc, turn, index, now))
            .collect()
    }

    /// Record for a single turn element at `index`, if it is a branch point.
    pub fn detect_turn<D: Document>(&self, doc: &D, turn: &D::Element, index: usize, now: i64) -> Option<BranchRecord> {
        let counter = self.probe.read_variant_counter(doc, turn)?;
        let turn_id = self.probe.turn_id_for(doc, turn, index);
        if !self.probe.read_controls(doc, turn).any() {
            log::warn!(
                "turn {index} (`{turn_id}`) shows counter {}/{} without prev/next controls; skipping",
                counter.current,
                counter.total
            );
            return None;
        }

        let role = self.probe.classify_role(doc, turn);
        let preview = self.probe.extract_preview(doc, turn);
        let hash = text_hash(&preview);

        let variants = (1..=counter.total)
            .map(|variant_index| {
                let active = variant_index == counter.current;
                Variant {
                    variant_id: variant_id(&turn_id, variant_index),
                    turn_id: turn_id.clone(),
                    turn_index: index,
                    variant_index,
                    role,
                    preview: if active { preview.clone() } else { variant_index.to_string() },
                    text_hash: active.then(|| hash.clone()),
                    is_active: active,
                    is_discovered: active,
                    timestamp: now,
                }
            })
            .collect();

        Some(BranchRecord {
            active_variant_id: variant_id(&turn_id, counter.current),
            turn_id,
            turn_index: index,
            current_variant: counter.current,
            total_variants: counter.total,
            role,
            variants,
            timestamp: now,
        })
    }
}
