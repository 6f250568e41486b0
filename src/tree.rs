//! TreeBuilder: the authoritative variant tree.
//!
//! SYSTEM CONTEXT
//! ==============
//! Every tree mutation goes through this type. Components observe the result
//! through two emitters: `tree_updated` after every committed mutation and
//! `path_changed` when the chain of active variants changes. A rescan is a
//! single commit, so listeners see one consistent state per rescan.
//!
//! DESIGN
//! ======
//! Nodes live in an arena keyed by variant id; parent and child links are
//! ids, never references. Links are recomputed on every commit by the
//! chaining rule: the first turn group hangs off the synthetic root, and each
//! later group hangs off the active variant of the group before it (or that
//! group's lowest variant when none is active). The tree is always shaped
//! like the conversation the host currently shows.
//!
//! State lives behind a `RefCell`; each public method finishes its borrow
//! before emitting, so listeners may call back into the builder.

#[cfg(test)]
#[path = "tree_test.rs"]
mod tree_test;

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::events::EventEmitter;
use crate::merge::{self, ObservedTurn};
use crate::model::{BranchRecord, Role, Turn, Variant, VariantId};
use crate::persistence::{LeanNode, LeanTree};

/// Identifier of the synthetic root in path and parent listings.
pub const ROOT_ID: &str = "ROOT";

/// Active path before and after a commit, root-child first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathChange {
    pub new_path: Vec<VariantId>,
    pub old_path: Vec<VariantId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeStats {
    pub node_count: usize,
    pub discovered_count: usize,
    pub branch_points: usize,
    pub max_depth: usize,
}

#[derive(Debug, Default)]
struct TreeInner {
    nodes: HashMap<VariantId, Variant>,
    /// Node ids sorted by `(turn_index, variant_index)`.
    order: Vec<VariantId>,
    observed: BTreeMap<usize, ObservedTurn>,
    parents: HashMap<VariantId, VariantId>,
    children: HashMap<VariantId, Vec<VariantId>>,
    root_children: Vec<VariantId>,
    active_path: Vec<VariantId>,
}

impl TreeInner {
    fn replace(&mut self, nodes: Vec<Variant>) {
        self.nodes = nodes.into_iter().map(|n| (n.variant_id.clone(), n)).collect();
        self.rechain();
    }

    fn sorted(&self) -> Vec<Variant> {
        self.order.iter().filter_map(|id| self.nodes.get(id).cloned()).collect()
    }

    fn rechain(&mut self) {
        let mut order: Vec<&Variant> = self.nodes.values().collect();
        order.sort_by_key(|n| n.slot());
        self.order = order.iter().map(|n| n.variant_id.clone()).collect();

        let mut groups: BTreeMap<usize, Vec<&Variant>> = BTreeMap::new();
        for node in order {
            groups.entry(node.turn_index).or_default().push(node);
        }

        let mut parents = HashMap::new();
        let mut children: HashMap<VariantId, Vec<VariantId>> = HashMap::new();
        let mut root_children = Vec::new();
        let mut anchor: Option<VariantId> = None;
        for group in groups.values() {
            let ids: Vec<VariantId> = group.iter().map(|n| n.variant_id.clone()).collect();
            match &anchor {
                None => root_children.clone_from(&ids),
                Some(parent) => {
                    for id in &ids {
                        parents.insert(id.clone(), parent.clone());
                    }
                    children.insert(parent.clone(), ids.clone());
                }
            }
            anchor = group
                .iter()
                .find(|n| n.is_active)
                .or_else(|| group.first())
                .map(|n| n.variant_id.clone());
        }

        self.parents = parents;
        self.children = children;
        self.root_children = root_children;
    }

    fn compute_active_path(&self) -> Vec<VariantId> {
        let mut path = Vec::new();
        let mut cohort = &self.root_children;
        while let Some(active) = cohort.iter().find(|id| self.nodes.get(*id).is_some_and(|n| n.is_active)) {
            path.push(active.clone());
            match self.children.get(active) {
                Some(next) => cohort = next,
                None => break,
            }
        }
        path
    }

    fn export(&self) -> LeanTree {
        let nodes: Vec<LeanNode> = self
            .sorted()
            .iter()
            .map(|n| {
                LeanNode::from_variant(
                    n,
                    self.parents.get(&n.variant_id).cloned(),
                    self.children.get(&n.variant_id).cloned().unwrap_or_default(),
                )
            })
            .collect();
        LeanTree { node_count: nodes.len(), root_children: self.root_children.clone(), nodes }
    }
}

pub struct TreeBuilder {
    inner: RefCell<TreeInner>,
    pub tree_updated: EventEmitter<LeanTree>,
    pub path_changed: EventEmitter<PathChange>,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TreeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeBuilder").field("nodes", &self.len()).finish_non_exhaustive()
    }
}

impl TreeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RefCell::new(TreeInner::default()),
            tree_updated: EventEmitter::new("tree_updated"),
            path_changed: EventEmitter::new("path_changed"),
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Insert a variant, or merge it into the existing node with the same id
    /// or slot. An active insert deactivates the rest of its turn.
    pub fn add_node(&self, variant: Variant) {
        {
            let mut inner = self.inner.borrow_mut();
            let existing = inner.sorted();
            let mut merged =
                merge::consolidate(vec![variant.clone()], existing, &BTreeMap::new(), &HashSet::new(), false);
            if variant.is_active {
                for node in merged.iter_mut().filter(|n| n.turn_index == variant.turn_index) {
                    node.is_active = node.variant_index == variant.variant_index;
                }
            }
            inner.replace(merged);
        }
        self.commit();
    }

    /// Ingest one rescan. Detected variants are live; everything already in
    /// the tree is carried forward and consolidated under the merge rules.
    pub fn build_from_detections(&self, records: &[BranchRecord]) {
        {
            let mut inner = self.inner.borrow_mut();
            let observed: BTreeMap<usize, ObservedTurn> = records
                .iter()
                .map(|r| {
                    let turn = ObservedTurn {
                        turn_id: r.turn_id.clone(),
                        total: r.total_variants,
                        active: r.current_variant,
                    };
                    (r.turn_index, turn)
                })
                .collect();
            let live: Vec<Variant> = records.iter().flat_map(|r| r.variants.iter().cloned()).collect();
            let previous = inner.sorted();
            let merged = merge::consolidate(live, previous, &observed, &HashSet::new(), false);
            inner.observed = observed;
            inner.replace(merged);
            log::debug!("built tree from {} branch records: {} nodes", records.len(), inner.nodes.len());
        }
        self.commit();
    }

    /// Union a stored snapshot with the current tree. Turns the snapshot has
    /// never seen only keep active or discovered variants.
    pub fn merge_stored(&self, stored: &LeanTree) {
        {
            let mut inner = self.inner.borrow_mut();
            let stored_variants = stored.variants();
            let stored_turn_ids: HashSet<String> = stored_variants.iter().map(|v| v.turn_id.clone()).collect();
            let live = inner.sorted();
            let merged = merge::consolidate(
                live,
                stored_variants,
                &inner.observed,
                &stored_turn_ids,
                !stored.is_empty(),
            );
            inner.replace(merged);
            log::debug!("merged {} stored nodes: {} nodes", stored.nodes.len(), inner.nodes.len());
        }
        self.commit();
    }

    /// Replace the tree with a snapshot.
    pub fn import_data(&self, snapshot: &LeanTree) {
        {
            let mut inner = self.inner.borrow_mut();
            let nodes = merge::consolidate(Vec::new(), snapshot.variants(), &BTreeMap::new(), &HashSet::new(), false);
            inner.observed.clear();
            inner.replace(nodes);
        }
        self.commit();
    }

    /// Drop every node. Fires both notifications.
    pub fn clear(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.observed.clear();
            inner.replace(Vec::new());
        }
        self.commit();
    }

    fn commit(&self) {
        let (tree, change) = {
            let mut inner = self.inner.borrow_mut();
            let new_path = inner.compute_active_path();
            let change = (new_path != inner.active_path).then(|| PathChange {
                new_path: new_path.clone(),
                old_path: std::mem::replace(&mut inner.active_path, new_path),
            });
            (inner.export(), change)
        };
        self.tree_updated.emit(&tree);
        if let Some(change) = change {
            self.path_changed.emit(&change);
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    #[must_use]
    pub fn export_lean(&self) -> LeanTree {
        self.inner.borrow().export()
    }

    /// The persistable flat representation; same shape as [`Self::export_lean`].
    #[must_use]
    pub fn get_state(&self) -> LeanTree {
        self.export_lean()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().nodes.is_empty()
    }

    #[must_use]
    pub fn node(&self, variant_id: &str) -> Option<Variant> {
        self.inner.borrow().nodes.get(variant_id).cloned()
    }

    /// All nodes ordered by turn, then variant.
    #[must_use]
    pub fn nodes(&self) -> Vec<Variant> {
        self.inner.borrow().sorted()
    }

    #[must_use]
    pub fn parent_of(&self, variant_id: &str) -> Option<VariantId> {
        let inner = self.inner.borrow();
        if !inner.nodes.contains_key(variant_id) {
            return None;
        }
        Some(inner.parents.get(variant_id).cloned().unwrap_or_else(|| ROOT_ID.to_owned()))
    }

    #[must_use]
    pub fn children_of(&self, variant_id: &str) -> Vec<VariantId> {
        let inner = self.inner.borrow();
        if variant_id == ROOT_ID {
            return inner.root_children.clone();
        }
        inner.children.get(variant_id).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn root_children(&self) -> Vec<VariantId> {
        self.inner.borrow().root_children.clone()
    }

    /// Ids from the first turn down to `variant_id`, inclusive. Empty for an
    /// unknown id.
    #[must_use]
    pub fn find_path_to_node(&self, variant_id: &str) -> Vec<VariantId> {
        let inner = self.inner.borrow();
        if !inner.nodes.contains_key(variant_id) {
            return Vec::new();
        }
        let mut path = vec![variant_id.to_owned()];
        let mut cursor = variant_id;
        while let Some(parent) = inner.parents.get(cursor) {
            path.push(parent.clone());
            cursor = parent.as_str();
        }
        path.reverse();
        path
    }

    /// The chain of active variants from the first turn.
    #[must_use]
    pub fn active_path(&self) -> Vec<VariantId> {
        self.inner.borrow().active_path.clone()
    }

    /// Other variants sharing `variant_id`'s parent.
    #[must_use]
    pub fn siblings_of(&self, variant_id: &str) -> Vec<VariantId> {
        let Some(parent) = self.parent_of(variant_id) else {
            return Vec::new();
        };
        self.children_of(&parent).into_iter().filter(|id| id != variant_id).collect()
    }

    /// Turns with more than one known variant.
    #[must_use]
    pub fn branch_points(&self) -> Vec<Turn> {
        let inner = self.inner.borrow();
        let mut groups: BTreeMap<usize, Vec<&Variant>> = BTreeMap::new();
        for id in &inner.order {
            if let Some(node) = inner.nodes.get(id) {
                groups.entry(node.turn_index).or_default().push(node);
            }
        }
        groups
            .into_iter()
            .filter_map(|(turn_index, group)| {
                let observed = inner.observed.get(&turn_index);
                let total = observed.map_or(u32::try_from(group.len()).unwrap_or(u32::MAX), |o| o.total);
                if total < 2 {
                    return None;
                }
                let active = group.iter().find(|n| n.is_active);
                let lead = active.or(group.first())?;
                let role = group.iter().map(|n| n.role).find(|r| *r != Role::Unknown).unwrap_or_default();
                Some(Turn {
                    turn_index,
                    turn_id: lead.turn_id.clone(),
                    role,
                    total_variants: total,
                    active_variant_index: active.map_or(0, |n| n.variant_index),
                })
            })
            .collect()
    }

    #[must_use]
    pub fn stats(&self) -> TreeStats {
        let branch_points = self.branch_points().len();
        let inner = self.inner.borrow();
        let mut max_depth = 0;
        let mut stack: Vec<(&VariantId, usize)> = inner.root_children.iter().map(|id| (id, 1)).collect();
        while let Some((id, depth)) = stack.pop() {
            max_depth = max_depth.max(depth);
            if let Some(children) = inner.children.get(id) {
                stack.extend(children.iter().map(|c| (c, depth + 1)));
            }
        }
        TreeStats {
            node_count: inner.nodes.len(),
            discovered_count: inner.nodes.values().filter(|n| n.is_discovered).count(),
            branch_points,
            max_depth,
        }
    }
}
