//! ExtensionCore: the container that owns and wires every component.
//!
//! SYSTEM CONTEXT
//! ==============
//! The browser adapter builds one `ExtensionCore` per page with its
//! `Document`, key-value store, clock and timer, then calls [`start`] with
//! the current URL. Mutation batches go to [`handle_mutations`]; when
//! [`next_deadline`] returns a time, the adapter arms a timer and calls
//! [`poll`]. UI collaborators subscribe to `tree().tree_updated` and
//! `tree().path_changed` and request navigation through the async methods.
//!
//! WIRING
//! ======
//! ```text
//! MutationWatcher -> DomProbe rescan -> BranchDetector -> TreeBuilder
//!                                                          |  tree_updated
//!                                                          v
//!                                                     Persistence (save)
//! Navigator --clicks--> host page
//!     \--rescan_requested--> Pipeline::rescan
//! ```
//! Listeners hold weak references so the core can be dropped with
//! subscriptions still attached.
//!
//! ERROR HANDLING
//! ==============
//! Only `no-container` fails [`start`]. `no-turns` leaves the core idle until
//! the next mutation. Save failures are logged by the emitter.
//!
//! [`start`]: ExtensionCore::start
//! [`handle_mutations`]: ExtensionCore::handle_mutations
//! [`next_deadline`]: ExtensionCore::next_deadline
//! [`poll`]: ExtensionCore::poll

#[cfg(test)]
#[path = "core_test.rs"]
mod core_test;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use crate::clock::{Clock, Timer};
use crate::config::CoreConfig;
use crate::detector::BranchDetector;
use crate::dom::{Direction, Document, DomProbe, MutationRecord};
use crate::error::CoreError;
use crate::navigator::{NavigationResult, Navigator};
use crate::persistence::{KeyValueStore, LeanTree, Persistence, StorageStats, VariantCustomization};
use crate::route::conversation_id_from_url;
use crate::tree::{TreeBuilder, TreeStats};
use crate::watcher::{MutationWatcher, WatchEvent};

/// Rescan path shared by the core and the navigator's rescan listener.
struct Pipeline<D: Document> {
    doc: Rc<D>,
    probe: DomProbe,
    detector: BranchDetector,
    watcher: RefCell<MutationWatcher<D::Element>>,
    tree: Rc<TreeBuilder>,
    clock: Rc<dyn Clock>,
}

impl<D: Document> Pipeline<D> {
    fn attach(&self) -> Result<(), CoreError> {
        self.watcher.borrow_mut().attach(&*self.doc, &self.probe).map(|_| ())
    }

    fn reset(&self) {
        self.watcher.borrow_mut().reset();
    }

    /// Full pass over the current turns. Returns the number of branch points.
    fn rescan(&self) -> Result<usize, CoreError> {
        let turns = self.watcher.borrow_mut().rescan(&*self.doc, &self.probe, self.clock.now_ms());
        self.ingest(&turns)
    }

    fn ingest(&self, turns: &[D::Element]) -> Result<usize, CoreError> {
        if turns.is_empty() {
            log::info!("no turns on the page; idle until the next mutation");
            return Err(CoreError::NoTurns);
        }
        let records = self.detector.detect(&*self.doc, turns, self.clock.now_ms());
        log::debug!("rescan: {} turns, {} branch points", turns.len(), records.len());
        self.tree.build_from_detections(&records);
        Ok(records.len())
    }

    fn handle_mutations(&self, records: &[MutationRecord<D::Element>]) -> Vec<WatchEvent<D::Element>> {
        let events =
            self.watcher
                .borrow_mut()
                .handle_mutations(&*self.doc, &self.probe, records, self.clock.now_ms());
        self.apply(&events);
        events
    }

    fn poll(&self) -> Vec<WatchEvent<D::Element>> {
        let events = self.watcher.borrow_mut().poll(&*self.doc, &self.probe, self.clock.now_ms());
        self.apply(&events);
        events
    }

    fn apply(&self, events: &[WatchEvent<D::Element>]) {
        for event in events {
            match event {
                WatchEvent::VariantChanged { turn_id, previous, current, .. } => {
                    log::debug!(
                        "turn `{turn_id}` now shows {}/{} (was {:?})",
                        current.current,
                        current.total,
                        previous.map(|p| p.current)
                    );
                }
                WatchEvent::NewBranch(turns) => log::debug!("{} new branch turns appeared", turns.len()),
                WatchEvent::TurnsChanged { turns, .. } => {
                    if let Err(err) = self.ingest(turns) {
                        log::debug!("rescan skipped: {err}");
                    }
                }
            }
        }
    }

    fn next_deadline(&self) -> Option<i64> {
        self.watcher.borrow().next_deadline()
    }

    fn container(&self) -> Option<D::Element> {
        self.watcher.borrow().container().cloned()
    }
}

pub struct ExtensionCore<D: Document, S: KeyValueStore> {
    config: CoreConfig,
    pipeline: Rc<Pipeline<D>>,
    tree: Rc<TreeBuilder>,
    persistence: Rc<Persistence<S>>,
    navigator: Navigator<D>,
    conversation: Rc<RefCell<Option<String>>>,
}

impl<D: Document, S: KeyValueStore> std::fmt::Debug for ExtensionCore<D, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionCore")
            .field("conversation", &self.conversation.borrow())
            .field("tree", &self.tree)
            .finish_non_exhaustive()
    }
}

impl<D, S> ExtensionCore<D, S>
where
    D: Document + 'static,
    S: KeyValueStore + 'static,
{
    pub fn new(doc: Rc<D>, store: S, clock: Rc<dyn Clock>, timer: Rc<dyn Timer>, config: CoreConfig) -> Self {
        let probe = DomProbe::new(config.selectors.clone());
        let tree = Rc::new(TreeBuilder::new());
        let persistence = Rc::new(Persistence::new(store, config.persistence.clone(), Rc::clone(&clock)));
        let pipeline = Rc::new(Pipeline {
            doc: Rc::clone(&doc),
            probe: probe.clone(),
            detector: BranchDetector::new(probe.clone()),
            watcher: RefCell::new(MutationWatcher::new(&config.watcher)),
            tree: Rc::clone(&tree),
            clock: Rc::clone(&clock),
        });
        let navigator = Navigator::new(doc, probe, Rc::clone(&tree), timer, clock, config.navigator.clone());
        let conversation = Rc::new(RefCell::new(None::<String>));

        let weak_store: Weak<Persistence<S>> = Rc::downgrade(&persistence);
        let current = Rc::clone(&conversation);
        tree.tree_updated.subscribe(move |state: &LeanTree| {
            let (Some(persistence), Some(id)) = (weak_store.upgrade(), current.borrow().clone()) else {
                return Ok(());
            };
            if state.is_empty() {
                return Ok(());
            }
            persistence.save_tree(&id, state).map_err(Into::into)
        });

        let weak_pipeline: Weak<Pipeline<D>> = Rc::downgrade(&pipeline);
        navigator.rescan_requested.subscribe(move |_: &()| {
            let Some(pipeline) = weak_pipeline.upgrade() else {
                return Ok(());
            };
            match pipeline.rescan() {
                Ok(_) | Err(CoreError::NoTurns) => Ok(()),
                Err(err) => Err(err.into()),
            }
        });

        Self { config, pipeline, tree, persistence, navigator, conversation }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Attach to the page at `url`: find the container, rescan, and merge the
    /// stored snapshot for the conversation in the URL, if any.
    ///
    /// # Errors
    ///
    /// [`CoreError::NoContainer`] when the page has no conversation
    /// container yet; the caller may retry with backoff.
    pub fn start(&self, url: &str) -> Result<(), CoreError> {
        let id = conversation_id_from_url(url);
        if id.is_none() {
            log::info!("no conversation id in `{url}`; tree will not be persisted");
        }
        self.pipeline.attach()?;
        // Only an attached page owns the id; a failed attach must leave the
        // next switch free to retry, and must not persist over stored data.
        *self.conversation.borrow_mut() = id.clone();

        let pruned = self.persistence.prune_stale();
        if !pruned.is_empty() {
            log::info!("pruned {} stale records", pruned.len());
        }
        let stored = id.as_deref().and_then(|id| self.persistence.load_tree(id));

        match self.pipeline.rescan() {
            Ok(_) | Err(CoreError::NoTurns) => {}
            Err(err) => return Err(err),
        }
        if let Some(stored) = stored {
            self.tree.merge_stored(&stored);
        }
        log::info!("started on `{}` with {} nodes", id.as_deref().unwrap_or("-"), self.tree.len());
        Ok(())
    }

    /// Follow a host route change: the current tree is already saved, so
    /// reset and start over for the new URL.
    ///
    /// # Errors
    ///
    /// As for [`ExtensionCore::start`].
    pub fn switch_conversation(&self, url: &str) -> Result<(), CoreError> {
        let next = conversation_id_from_url(url);
        if next == *self.conversation.borrow() {
            return Ok(());
        }
        self.navigator.cancel();
        *self.conversation.borrow_mut() = None;
        self.pipeline.reset();
        self.tree.clear();
        self.start(url)
    }

    /// Forget the current conversation, stored records included.
    pub fn clear_conversation(&self) {
        if let Some(id) = self.conversation.borrow().as_deref() {
            self.persistence.clear(id);
        }
        self.tree.clear();
    }

    // =========================================================================
    // Observation
    // =========================================================================

    pub fn handle_mutations(&self, records: &[MutationRecord<D::Element>]) -> Vec<WatchEvent<D::Element>> {
        self.pipeline.handle_mutations(records)
    }

    /// Run a deferred rescan if it is due.
    pub fn poll(&self) -> Vec<WatchEvent<D::Element>> {
        self.pipeline.poll()
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<i64> {
        self.pipeline.next_deadline()
    }

    /// The element the adapter should observe, once attached.
    #[must_use]
    pub fn container(&self) -> Option<D::Element> {
        self.pipeline.container()
    }

    /// Rescan now, bypassing the throttle.
    ///
    /// # Errors
    ///
    /// [`CoreError::NoTurns`] when the page shows no turns.
    pub fn rescan(&self) -> Result<usize, CoreError> {
        self.pipeline.rescan()
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// # Errors
    ///
    /// See [`Navigator::navigate_to_variant`].
    pub async fn navigate_to_variant(&self, variant_id: &str, target: u32) -> NavigationResult {
        self.navigator.navigate_to_variant(variant_id, target).await
    }

    /// # Errors
    ///
    /// See [`Navigator::navigate_to_node`].
    pub async fn navigate_to_node(&self, variant_id: &str) -> NavigationResult {
        self.navigator.navigate_to_node(variant_id).await
    }

    /// # Errors
    ///
    /// See [`Navigator::step`].
    pub async fn step(&self, variant_id: &str, direction: Direction) -> NavigationResult {
        self.navigator.step(variant_id, direction).await
    }

    pub fn cancel_navigation(&self) -> bool {
        self.navigator.cancel()
    }

    // =========================================================================
    // Data
    // =========================================================================

    #[must_use]
    pub fn export_lean(&self) -> LeanTree {
        self.tree.export_lean()
    }

    pub fn import_data(&self, snapshot: &LeanTree) {
        self.tree.import_data(snapshot);
    }

    /// Name or colour a variant for the current conversation.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownVariant`] when the tree has no such node, or a
    /// storage error from the write.
    pub fn set_customization(&self, variant_id: &str, customization: VariantCustomization) -> Result<(), CoreError> {
        if self.tree.node(variant_id).is_none() {
            return Err(CoreError::UnknownVariant(variant_id.to_owned()));
        }
        let Some(id) = self.conversation.borrow().clone() else {
            return Ok(());
        };
        let mut all = self.persistence.load_customizations(&id);
        all.insert(variant_id.to_owned(), customization);
        self.persistence.save_customizations(&id, &all)
    }

    #[must_use]
    pub fn customizations(&self) -> BTreeMap<String, VariantCustomization> {
        match self.conversation.borrow().as_deref() {
            Some(id) => self.persistence.load_customizations(id),
            None => BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> TreeStats {
        self.tree.stats()
    }

    #[must_use]
    pub fn storage_stats(&self) -> StorageStats {
        self.persistence.stats()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[must_use]
    pub fn tree(&self) -> &TreeBuilder {
        &self.tree
    }

    #[must_use]
    pub fn persistence(&self) -> &Persistence<S> {
        &self.persistence
    }

    #[must_use]
    pub fn conversation_id(&self) -> Option<String> {
        self.conversation.borrow().clone()
    }

    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }
}
