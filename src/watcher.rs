//! MutationWatcher: raw document mutations to ordered semantic events.
//!
//! SYSTEM CONTEXT
//! ==============
//! The browser adapter forwards each `MutationObserver` batch to
//! [`MutationWatcher::handle_mutations`] and arms a timer for
//! [`MutationWatcher::next_deadline`], calling [`MutationWatcher::poll`]
//! when it fires. Tests do the same with a manual clock.
//!
//! DESIGN
//! ======
//! Each record is classified as a new turn, removed turn, counter change,
//! control-state change, content change, or irrelevant. Counter and control
//! changes are checked against the last known counter of their turn right
//! away, so `VariantChanged` is emitted for the batch before anything
//! structural. Rescans are throttled: inside the throttle window the rescan
//! is deferred behind a debounce that every later batch pushes out. Content
//! changes alone only ever schedule a deferred refresh.
//!
//! TRADE-OFFS
//! ==========
//! Turn identifiers are cached per rescan rather than recomputed per record,
//! so a synthesized identifier (which hashes turn text) stays stable until
//! the next rescan even while the host swaps the message body.

#[cfg(test)]
#[path = "watcher_test.rs"]
mod watcher_test;

use std::collections::HashMap;

use crate::config::WatcherConfig;
use crate::dom::probe::is_counter_text;
use crate::dom::{Document, DomProbe, MutationKind, MutationRecord, VariantCounter};
use crate::error::CoreError;
use crate::model::TurnId;
use crate::scheduler::{Debounce, Throttle};

/// Attributes the browser observer subscribes to.
pub const ATTRIBUTE_FILTER: [&str; 4] = ["class", "data-testid", "aria-label", "disabled"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationClass {
    NewTurn,
    RemovedTurn,
    CounterChange,
    ControlState,
    ContentChange,
    Irrelevant,
}

/// How the turn list changed across a rescan.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnDelta<E> {
    /// Existing turns unchanged, `added` appended at the end.
    Append { added: Vec<E> },
    /// Turns removed, replaced or reordered.
    Rebuild,
    /// Same turns; their contents or counters changed.
    Refresh,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<E> {
    VariantChanged {
        turn_id: TurnId,
        turn_element: E,
        previous: Option<VariantCounter>,
        current: VariantCounter,
    },
    NewBranch(Vec<E>),
    TurnsChanged { turns: Vec<E>, delta: TurnDelta<E> },
}

#[derive(Debug)]
pub struct MutationWatcher<E> {
    container: Option<E>,
    turns: Vec<E>,
    turn_ids: Vec<TurnId>,
    counters: HashMap<TurnId, VariantCounter>,
    debounce: Debounce,
    throttle: Throttle,
}

impl<E: Clone + PartialEq> MutationWatcher<E> {
    #[must_use]
    pub fn new(config: &WatcherConfig) -> Self {
        Self {
            container: None,
            turns: Vec::new(),
            turn_ids: Vec::new(),
            counters: HashMap::new(),
            debounce: Debounce::new(config.batch_delay_ms),
            throttle: Throttle::new(config.throttle_ms),
        }
    }

    /// Locate the conversation container. Nothing is observed without one.
    ///
    /// # Errors
    ///
    /// [`CoreError::NoContainer`] when no candidate matches; the caller may
    /// retry later.
    pub fn attach<D>(&mut self, doc: &D, probe: &DomProbe) -> Result<E, CoreError>
    where
        D: Document<Element = E>,
    {
        let Some(container) = probe.find_container(doc) else {
            log::warn!("conversation container not found; not observing");
            return Err(CoreError::NoContainer);
        };
        self.container = Some(container.clone());
        Ok(container)
    }

    /// Forget everything, including the container.
    pub fn reset(&mut self) {
        self.container = None;
        self.turns.clear();
        self.turn_ids.clear();
        self.counters.clear();
        self.debounce.cancel();
        self.throttle.reset();
    }

    #[must_use]
    pub fn container(&self) -> Option<&E> {
        self.container.as_ref()
    }

    #[must_use]
    pub fn turns(&self) -> &[E] {
        &self.turns
    }

    #[must_use]
    pub fn known_counter(&self, turn_id: &str) -> Option<VariantCounter> {
        self.counters.get(turn_id).copied()
    }

    /// When the deferred rescan is due, if one is pending.
    #[must_use]
    pub fn next_deadline(&self) -> Option<i64> {
        self.debounce.deadline()
    }

    // =========================================================================
    // Rescan
    // =========================================================================

    /// Re-read the turn list and counter state, pruning vanished turns.
    pub fn rescan<D>(&mut self, doc: &D, probe: &DomProbe, now: i64) -> Vec<E>
    where
        D: Document<Element = E>,
    {
        let container_gone = self.container.as_ref().is_some_and(|c| !doc.is_connected(c));
        if self.container.is_none() || container_gone {
            self.container = probe.find_container(doc);
        }

        let turns = probe.find_turns(doc, self.container.as_ref());
        let turn_ids: Vec<TurnId> = turns
            .iter()
            .enumerate()
            .map(|(index, el)| probe.turn_id_for(doc, el, index))
            .collect();

        let mut counters = HashMap::with_capacity(turns.len());
        for (el, id) in turns.iter().zip(&turn_ids) {
            if let Some(counter) = probe.read_variant_counter(doc, el) {
                counters.insert(id.clone(), counter);
            }
        }
        let pruned = self.counters.keys().filter(|id| !turn_ids.contains(*id)).count();
        if pruned > 0 {
            log::debug!("pruned counter state for {pruned} vanished turns");
        }

        self.counters = counters;
        self.turns.clone_from(&turns);
        self.turn_ids = turn_ids;
        self.throttle.record(now);
        self.debounce.cancel();
        turns
    }

    fn rescan_event<D>(&mut self, doc: &D, probe: &DomProbe, now: i64) -> WatchEvent<E>
    where
        D: Document<Element = E>,
    {
        let before = self.turns.clone();
        let turns = self.rescan(doc, probe, now);
        let delta = if turns == before {
            TurnDelta::Refresh
        } else if turns.len() > before.len() && turns.starts_with(&before) {
            TurnDelta::Append { added: turns[before.len()..].to_vec() }
        } else {
            TurnDelta::Rebuild
        };
        WatchEvent::TurnsChanged { turns, delta }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    pub fn classify<D>(&self, doc: &D, probe: &DomProbe, record: &MutationRecord<E>) -> MutationClass
    where
        D: Document<Element = E>,
    {
        let in_turn = probe.enclosing_turn(doc, &record.target, &self.turns).is_some();
        match &record.kind {
            MutationKind::ChildList { added, removed } => {
                let lost_turn = removed.iter().any(|el| self.turns.contains(el))
                    || self.turns.iter().any(|t| !doc.is_connected(t));
                if lost_turn {
                    MutationClass::RemovedTurn
                } else if added.iter().any(|el| self.is_turn_like(doc, probe, el)) {
                    MutationClass::NewTurn
                } else if !in_turn {
                    MutationClass::Irrelevant
                } else if is_counter_text(&doc.text_content(&record.target)) {
                    MutationClass::CounterChange
                } else {
                    MutationClass::ContentChange
                }
            }
            MutationKind::Attributes { name } => {
                if !ATTRIBUTE_FILTER.contains(&name.as_str()) {
                    MutationClass::Irrelevant
                } else if self.is_control(doc, probe, &record.target) {
                    MutationClass::ControlState
                } else if name == "data-testid" && self.is_turn_like(doc, probe, &record.target) {
                    MutationClass::NewTurn
                } else if in_turn {
                    MutationClass::ContentChange
                } else {
                    MutationClass::Irrelevant
                }
            }
            MutationKind::CharacterData => {
                if !in_turn {
                    MutationClass::Irrelevant
                } else if is_counter_text(&doc.text_content(&record.target)) {
                    MutationClass::CounterChange
                } else {
                    MutationClass::ContentChange
                }
            }
        }
    }

    /// Process one observer batch. Events come back in emission order:
    /// variant changes, then new branches, then the structural rescan.
    pub fn handle_mutations<D>(
        &mut self,
        doc: &D,
        probe: &DomProbe,
        records: &[MutationRecord<E>],
        now: i64,
    ) -> Vec<WatchEvent<E>>
    where
        D: Document<Element = E>,
    {
        let mut touched: Vec<usize> = Vec::new();
        let mut new_branch: Vec<E> = Vec::new();
        let mut needs_rescan = false;
        let mut content_only = false;

        for record in records {
            match self.classify(doc, probe, record) {
                MutationClass::NewTurn => {
                    needs_rescan = true;
                    if let MutationKind::ChildList { added, .. } = &record.kind {
                        for el in added {
                            if probe.counter_element(doc, el).is_some() && !new_branch.contains(el) {
                                new_branch.push(el.clone());
                            }
                        }
                    }
                }
                MutationClass::RemovedTurn => needs_rescan = true,
                MutationClass::CounterChange | MutationClass::ControlState => {
                    needs_rescan = true;
                    if let Some(index) = probe.enclosing_turn(doc, &record.target, &self.turns) {
                        if !touched.contains(&index) {
                            touched.push(index);
                        }
                    }
                }
                MutationClass::ContentChange => content_only = true,
                MutationClass::Irrelevant => {}
            }
        }

        let mut events: Vec<WatchEvent<E>> = touched
            .into_iter()
            .filter_map(|index| self.check_variant(doc, probe, index))
            .collect();
        if !new_branch.is_empty() {
            events.push(WatchEvent::NewBranch(new_branch));
        }

        if needs_rescan && self.throttle.ready(now) {
            events.push(self.rescan_event(doc, probe, now));
        } else if needs_rescan || content_only {
            self.debounce.schedule(now);
        }
        events
    }

    /// Run the deferred rescan if its debounce deadline has passed.
    pub fn poll<D>(&mut self, doc: &D, probe: &DomProbe, now: i64) -> Vec<WatchEvent<E>>
    where
        D: Document<Element = E>,
    {
        if self.debounce.take_due(now) {
            vec![self.rescan_event(doc, probe, now)]
        } else {
            Vec::new()
        }
    }

    fn check_variant<D>(&mut self, doc: &D, probe: &DomProbe, index: usize) -> Option<WatchEvent<E>>
    where
        D: Document<Element = E>,
    {
        let turn = self.turns.get(index)?.clone();
        let turn_id = self.turn_ids.get(index)?.clone();
        let current = probe.read_variant_counter(doc, &turn)?;
        let previous = self.counters.insert(turn_id.clone(), current);
        if previous == Some(current) {
            return None;
        }
        log::debug!("variant changed on `{turn_id}`: {previous:?} -> {}/{}", current.current, current.total);
        Some(WatchEvent::VariantChanged { turn_id, turn_element: turn, previous, current })
    }

    fn is_turn_like<D>(&self, doc: &D, probe: &DomProbe, el: &E) -> bool
    where
        D: Document<Element = E>,
    {
        let policy = probe.policy();
        policy.turns.iter().any(|s| doc.matches(el, s) || !doc.select_all(Some(el), s).is_empty())
            || probe.counter_element(doc, el).is_some()
    }

    fn is_control<D>(&self, doc: &D, probe: &DomProbe, el: &E) -> bool
    where
        D: Document<Element = E>,
    {
        let policy = probe.policy();
        policy.prev_control.iter().chain(&policy.next_control).any(|s| doc.matches(el, s))
    }
}
