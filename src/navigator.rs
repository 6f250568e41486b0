//! Navigator: drive the host's prev/next controls to reach a variant.
//!
//! SYSTEM CONTEXT
//! ==============
//! The host offers no API, only buttons and a counter. A request resolves
//! the turn element for a variant, plans the click sequence, clicks with a
//! delay between presses, and polls the counter after each press until it
//! shows the expected index. When the sequence ends (fully or partially) the
//! navigator waits for the host to settle and fires `rescan_requested`.
//!
//! CONCURRENCY
//! ===========
//! Requests pass through a [`SerialQueue`]: at most one is clicking, later
//! ones wait in arrival order. [`Navigator::cancel`] flags only the request
//! currently running; it stops before its next click and never undoes clicks
//! already made.
//!
//! ERROR HANDLING
//! ==============
//! Failures carry the [`CoreError`] kind plus the clicks already dispatched,
//! so a partial move is reportable. A disabled control mid-sequence is
//! `end-of-range`; a counter that never moves after every retry is
//! `navigation-timeout`.

#[cfg(test)]
#[path = "navigator_test.rs"]
mod navigator_test;

use std::cell::RefCell;
use std::rc::Rc;

use uuid::Uuid;

use crate::clock::{Clock, Timer};
use crate::config::NavigatorConfig;
use crate::dom::probe::is_synthesized_turn_id;
use crate::dom::{Direction, Document, DomProbe, VariantCounter};
use crate::error::CoreError;
use crate::events::EventEmitter;
use crate::model::{Variant, VariantId};
use crate::scheduler::{CancelToken, SerialQueue};
use crate::tree::TreeBuilder;

/// Outcome of a successful request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationReport {
    pub request_id: Uuid,
    pub variant_id: VariantId,
    pub turn_index: usize,
    pub from_index: u32,
    pub to_index: u32,
    /// Clicks dispatched, retries included.
    pub clicks: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} ({clicks} clicks made)")]
pub struct NavigationError {
    pub kind: CoreError,
    pub clicks: u32,
}

impl NavigationError {
    fn new(kind: CoreError, clicks: u32) -> Self {
        Self { kind, clicks }
    }
}

pub type NavigationResult = Result<NavigationReport, NavigationError>;

/// Direction and number of presses to move from `current` to `target`.
/// Without wrap the direct route is always used; with wrap the shorter of
/// the two routes wins, ties going to the direct one.
#[must_use]
pub fn plan_clicks(current: u32, target: u32, total: u32, allow_wrap: bool) -> (Direction, u32) {
    if target == current {
        return (Direction::Next, 0);
    }
    let (direct_dir, direct, wrapped_dir, wrapped) = if target > current {
        (Direction::Next, target - current, Direction::Prev, current + total - target)
    } else {
        (Direction::Prev, current - target, Direction::Next, total - current + target)
    };
    if allow_wrap && wrapped < direct {
        (wrapped_dir, wrapped)
    } else {
        (direct_dir, direct)
    }
}

/// Counter value after one press in `direction`, wrapping at the ends.
#[must_use]
pub fn step_index(current: u32, direction: Direction, total: u32) -> u32 {
    match direction {
        Direction::Next if current >= total => 1,
        Direction::Next => current + 1,
        Direction::Prev if current <= 1 => total,
        Direction::Prev => current - 1,
    }
}

fn log_outcome(request_id: Uuid, variant_id: &str, result: &NavigationResult) {
    match result {
        Ok(report) => log::info!(
            "navigation {request_id} to `{variant_id}`: {} -> {} in {} clicks",
            report.from_index,
            report.to_index,
            report.clicks
        ),
        Err(err) => log::warn!("navigation {request_id} to `{variant_id}` failed: {err}"),
    }
}

#[derive(Debug, Clone, Copy)]
enum Goal {
    Index(u32),
    Step(Direction),
}

/// One click of a multi-click plan.
#[derive(Debug, Clone, Copy)]
struct Press {
    direction: Direction,
    /// Counter reading the click starts from.
    from: VariantCounter,
    /// Whether the click delay applies.
    follows_another: bool,
}

pub struct Navigator<D: Document> {
    doc: Rc<D>,
    probe: DomProbe,
    tree: Rc<TreeBuilder>,
    timer: Rc<dyn Timer>,
    clock: Rc<dyn Clock>,
    config: NavigatorConfig,
    queue: SerialQueue,
    in_flight: RefCell<Option<CancelToken>>,
    /// Fired after clicks have been made and the settle delay has passed.
    pub rescan_requested: EventEmitter<()>,
}

impl<D: Document> std::fmt::Debug for Navigator<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Navigator")
            .field("config", &self.config)
            .field("pending", &self.queue.pending())
            .finish_non_exhaustive()
    }
}

impl<D: Document> Navigator<D> {
    pub fn new(
        doc: Rc<D>,
        probe: DomProbe,
        tree: Rc<TreeBuilder>,
        timer: Rc<dyn Timer>,
        clock: Rc<dyn Clock>,
        config: NavigatorConfig,
    ) -> Self {
        Self {
            doc,
            probe,
            tree,
            timer,
            clock,
            config,
            queue: SerialQueue::new(),
            in_flight: RefCell::new(None),
            rescan_requested: EventEmitter::new("rescan_requested"),
        }
    }

    /// Requests waiting or running.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    /// Stop the running request before its next click. Returns whether a
    /// request was running.
    pub fn cancel(&self) -> bool {
        match self.in_flight.borrow().as_ref() {
            Some(token) => {
                token.cancel();
                log::info!("navigation cancelled");
                true
            }
            None => false,
        }
    }

    /// Move the turn holding `variant_id` to variant `target` (1-based).
    ///
    /// # Errors
    ///
    /// See [`NavigationError`]; `clicks` counts presses already made.
    pub async fn navigate_to_variant(&self, variant_id: &str, target: u32) -> NavigationResult {
        self.run_single(variant_id, Goal::Index(target)).await
    }

    /// One press on the turn holding `variant_id`.
    ///
    /// # Errors
    ///
    /// `end-of-range` with zero clicks when already at the endpoint and
    /// wrapping is disabled.
    pub async fn step(&self, variant_id: &str, direction: Direction) -> NavigationResult {
        self.run_single(variant_id, Goal::Step(direction)).await
    }

    /// Make `variant_id` visible by switching every turn on its path, from
    /// the first turn down, to the variant the path requires.
    ///
    /// # Errors
    ///
    /// As for [`Navigator::navigate_to_variant`]; `clicks` is the total
    /// across all turns driven so far.
    pub async fn navigate_to_node(&self, variant_id: &str) -> NavigationResult {
        let _permit = self.queue.enter().await;
        let token = self.begin();
        let request_id = Uuid::new_v4();
        let result = self.drive_path(request_id, variant_id, &token).await;
        self.end();
        log_outcome(request_id, variant_id, &result);
        result
    }

    async fn run_single(&self, variant_id: &str, goal: Goal) -> NavigationResult {
        let _permit = self.queue.enter().await;
        let token = self.begin();
        let request_id = Uuid::new_v4();
        let result = match self.tree.node(variant_id) {
            Some(node) => self.drive_turn(request_id, &node, goal, &token).await,
            None => Err(NavigationError::new(CoreError::UnknownVariant(variant_id.to_owned()), 0)),
        };
        self.end();
        log_outcome(request_id, variant_id, &result);
        result
    }

    fn begin(&self) -> CancelToken {
        let token = CancelToken::new();
        *self.in_flight.borrow_mut() = Some(token.clone());
        token
    }

    fn end(&self) {
        self.in_flight.borrow_mut().take();
    }

    async fn drive_path(&self, request_id: Uuid, variant_id: &str, token: &CancelToken) -> NavigationResult {
        let path = self.tree.find_path_to_node(variant_id);
        if path.is_empty() {
            return Err(NavigationError::new(CoreError::UnknownVariant(variant_id.to_owned()), 0));
        }
        let mut total_clicks = 0;
        let mut last = None;
        for id in &path {
            let Some(node) = self.tree.node(id) else {
                return Err(NavigationError::new(CoreError::UnknownVariant(id.clone()), total_clicks));
            };
            match self.drive_turn(request_id, &node, Goal::Index(node.variant_index), token).await {
                Ok(report) => {
                    total_clicks += report.clicks;
                    last = Some(report);
                }
                Err(err) => return Err(NavigationError::new(err.kind, total_clicks + err.clicks)),
            }
        }
        match last {
            Some(report) => Ok(NavigationReport { variant_id: variant_id.to_owned(), clicks: total_clicks, ..report }),
            None => Err(NavigationError::new(CoreError::UnknownVariant(variant_id.to_owned()), total_clicks)),
        }
    }

    async fn drive_turn(&self, request_id: Uuid, node: &Variant, goal: Goal, token: &CancelToken) -> NavigationResult {
        let stale = || NavigationError::new(CoreError::StaleTarget { turn_id: node.turn_id.clone() }, 0);
        let mut turn = self.resolve_turn(node).ok_or_else(stale)?;
        let counter = self.probe.read_variant_counter(&*self.doc, &turn).ok_or_else(stale)?;

        let target = match goal {
            Goal::Index(target) => target,
            Goal::Step(direction) => {
                let wraps = match direction {
                    Direction::Next => counter.current >= counter.total,
                    Direction::Prev => counter.current <= 1,
                };
                if wraps && !self.config.allow_wrap {
                    0
                } else {
                    step_index(counter.current, direction, counter.total)
                }
            }
        };
        let report = |clicks| NavigationReport {
            request_id,
            variant_id: node.variant_id.clone(),
            turn_index: node.turn_index,
            from_index: counter.current,
            to_index: target,
            clicks,
        };

        if target == counter.current {
            return Ok(report(0));
        }
        if target == 0 || target > counter.total {
            return Err(NavigationError::new(CoreError::EndOfRange { turn_id: node.turn_id.clone() }, 0));
        }

        let (direction, presses) = plan_clicks(counter.current, target, counter.total, self.config.allow_wrap);
        let mut clicks = 0;
        let mut current = counter.current;
        for press in 0..presses {
            let step = Press {
                direction,
                from: VariantCounter { current, total: counter.total },
                follows_another: press > 0,
            };
            let outcome = self.press(node, &mut turn, step, token, &mut clicks).await;
            if let Err(kind) = outcome {
                self.finish(clicks).await;
                return Err(NavigationError::new(kind, clicks));
            }
            current = step_index(current, direction, counter.total);
        }
        self.finish(clicks).await;
        Ok(report(clicks))
    }

    async fn press(
        &self,
        node: &Variant,
        turn: &mut D::Element,
        step: Press,
        token: &CancelToken,
        clicks: &mut u32,
    ) -> Result<(), CoreError> {
        let Press { direction, from, follows_another } = step;
        let turn_id = || node.turn_id.clone();
        if token.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        if follows_another {
            self.timer.sleep(self.config.click_delay_ms).await;
            if token.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
        }
        self.refresh_turn(node, turn)?;

        let expected = step_index(from.current, direction, from.total);
        let max_attempts = self.config.max_retries + 1;
        for attempt in 0..max_attempts {
            if attempt > 0 {
                let backoff = self.config.retry_backoff_ms.saturating_mul(u64::from(attempt));
                self.timer.sleep(backoff).await;
                self.refresh_turn(node, turn)?;
                if self.counter_is(turn, expected) {
                    return Ok(());
                }
                if token.is_cancelled() {
                    return Err(CoreError::Cancelled);
                }
                log::debug!("counter on `{}` still not at {expected}; retry {attempt}", node.turn_id);
            }

            let controls = self.probe.read_controls(&*self.doc, turn);
            let Some(control) = controls.get(direction) else {
                let at_end = match direction {
                    Direction::Next => from.current >= from.total,
                    Direction::Prev => from.current <= 1,
                };
                return Err(if at_end {
                    CoreError::EndOfRange { turn_id: turn_id() }
                } else {
                    CoreError::NoControl { turn_id: turn_id(), direction }
                });
            };
            if self.doc.is_disabled(control) {
                return Err(CoreError::EndOfRange { turn_id: turn_id() });
            }

            self.doc.click(control);
            *clicks += 1;
            if self.await_counter(node, turn, expected).await? {
                return Ok(());
            }
        }
        Err(CoreError::NavigationTimeout { turn_id: turn_id(), attempts: max_attempts })
    }

    /// Poll the counter until it reads `expected` or the validation window
    /// closes.
    async fn await_counter(&self, node: &Variant, turn: &mut D::Element, expected: u32) -> Result<bool, CoreError> {
        let deadline = self.clock.now_ms().saturating_add(i64::try_from(self.config.validation_timeout_ms).unwrap_or(i64::MAX));
        loop {
            self.refresh_turn(node, turn)?;
            if self.counter_is(turn, expected) {
                return Ok(true);
            }
            if self.clock.now_ms() >= deadline {
                return Ok(false);
            }
            self.timer.sleep(self.config.poll_interval_ms).await;
        }
    }

    async fn finish(&self, clicks: u32) {
        if clicks == 0 {
            return;
        }
        self.timer.sleep(self.config.settle_ms).await;
        self.rescan_requested.emit(&());
    }

    fn counter_is(&self, turn: &D::Element, expected: u32) -> bool {
        self.probe
            .read_variant_counter(&*self.doc, turn)
            .is_some_and(|c| c.current == expected)
    }

    /// Swap in the re-rendered element if the host replaced the turn.
    fn refresh_turn(&self, node: &Variant, turn: &mut D::Element) -> Result<(), CoreError> {
        if self.doc.is_connected(turn) {
            return Ok(());
        }
        match self.resolve_turn(node) {
            Some(fresh) => {
                *turn = fresh;
                Ok(())
            }
            None => Err(CoreError::StaleTarget { turn_id: node.turn_id.clone() }),
        }
    }

    /// The live element for a node's turn. Host identifiers must match
    /// exactly; synthesized ones fall back to the turn position because they
    /// hash content that changes with the displayed variant.
    fn resolve_turn(&self, node: &Variant) -> Option<D::Element> {
        let doc = &*self.doc;
        let container = self.probe.find_container(doc);
        let turns = self.probe.find_turns(doc, container.as_ref());
        let by_id = turns
            .iter()
            .enumerate()
            .find(|(index, el)| self.probe.turn_id_for(doc, el, *index) == node.turn_id)
            .map(|(_, el)| el.clone());
        if by_id.is_some() || !is_synthesized_turn_id(&node.turn_id) {
            return by_id;
        }
        turns.get(node.turn_index).cloned()
    }
}
