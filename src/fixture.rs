//! In-memory host page, manual clock and instant timer for tests.
//!
//! `FakeHost` renders the markup shape the default selector policy expects:
//!
//! ```text
//! html > body > main
//!   article[data-testid="conversation-turn-N"]
//!     div[data-message-author-role]
//!       div.markdown  "variant text"
//!     div.flex                      (only for branch points)
//!       button[aria-label="Previous response"]
//!       span.tabular-nums  "c/t"
//!       button[aria-label="Next response"]
//! ```
//!
//! Clicking a control advances the counter, swaps the message text, toggles
//! `disabled` on the endpoint buttons, and queues the mutation records a
//! browser would report.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::future::LocalBoxFuture;

use crate::clock::{Clock, Timer};
use crate::dom::{ChildNode, Document, MutationKind, MutationRecord, Rect, Selector};
use crate::model::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone)]
enum Child {
    El(NodeId),
    Text(String),
}

#[derive(Debug, Clone)]
struct FakeNode {
    tag: String,
    attrs: BTreeMap<String, String>,
    children: Vec<Child>,
    parent: Option<NodeId>,
    rect: Option<Rect>,
}

#[derive(Debug, Clone)]
pub struct FakeTurn {
    pub root: NodeId,
    pub content: NodeId,
    pub counter: Option<NodeId>,
    pub prev: Option<NodeId>,
    pub next: Option<NodeId>,
    texts: Vec<String>,
    active: u32,
}

#[derive(Debug, Default)]
struct HostInner {
    nodes: Vec<FakeNode>,
    turns: Vec<FakeTurn>,
    records: Vec<MutationRecord<NodeId>>,
    host_managed: Vec<NodeId>,
}

#[derive(Debug)]
pub struct FakeHost {
    inner: RefCell<HostInner>,
    pub html: NodeId,
    pub body: NodeId,
    pub main: NodeId,
    frozen: Cell<bool>,
    clicks: Cell<usize>,
}

impl FakeHost {
    pub fn new() -> Self {
        let host = Self {
            inner: RefCell::new(HostInner::default()),
            html: NodeId(0),
            body: NodeId(1),
            main: NodeId(2),
            frozen: Cell::new(false),
            clicks: Cell::new(0),
        };
        let html = host.create("html", &[], None);
        let body = host.create("body", &[], Some(html));
        host.create("main", &[], Some(body));
        host.set_rect(host.main, Some(Rect::new(0.0, 0.0, 800.0, 600.0)));
        host
    }

    /// A page with no `main` region at all.
    pub fn without_container() -> Self {
        let host = Self::new();
        host.detach(host.main);
        host
    }

    pub fn create(&self, tag: &str, attrs: &[(&str, &str)], parent: Option<NodeId>) -> NodeId {
        let mut inner = self.inner.borrow_mut();
        let id = NodeId(inner.nodes.len());
        inner.nodes.push(FakeNode {
            tag: tag.to_owned(),
            attrs: attrs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect(),
            children: Vec::new(),
            parent,
            rect: None,
        });
        if let Some(parent) = parent {
            inner.nodes[parent.0].children.push(Child::El(id));
        }
        id
    }

    pub fn push_text(&self, el: NodeId, text: &str) {
        self.inner.borrow_mut().nodes[el.0].children.push(Child::Text(text.to_owned()));
    }

    pub fn set_rect(&self, el: NodeId, rect: Option<Rect>) {
        self.inner.borrow_mut().nodes[el.0].rect = rect;
    }

    pub fn set_attr(&self, el: NodeId, name: &str, value: &str) {
        self.inner.borrow_mut().nodes[el.0].attrs.insert(name.to_owned(), value.to_owned());
    }

    pub fn remove_attr(&self, el: NodeId, name: &str) {
        self.inner.borrow_mut().nodes[el.0].attrs.remove(name);
    }

    pub fn mark_host_managed(&self, el: NodeId) {
        self.inner.borrow_mut().host_managed.push(el);
    }

    // =========================================================================
    // Turns
    // =========================================================================

    /// Render a turn with one text per variant; `active` is 1-based.
    pub fn add_turn(&self, role: Role, texts: &[&str], active: u32) -> usize {
        let index = self.inner.borrow().turns.len();
        let testid = format!("conversation-turn-{index}");
        let root = self.create("article", &[("data-testid", testid.as_str())], Some(self.main));
        self.set_rect(root, Some(Rect::new(0.0, 0.0, 700.0, 80.0)));
        let role_div = self.create("div", &[("data-message-author-role", role.as_str())], Some(root));
        let content = self.create("div", &[("class", "markdown prose")], Some(role_div));
        let texts: Vec<String> = texts.iter().map(|t| (*t).to_owned()).collect();
        let active = active.clamp(1, u32::try_from(texts.len()).unwrap_or(1).max(1));
        if let Some(text) = texts.get(active as usize - 1) {
            self.push_text(content, text);
        }

        let mut turn = FakeTurn { root, content, counter: None, prev: None, next: None, texts, active };
        if turn.texts.len() > 1 {
            let bar = self.create("div", &[("class", "flex items-center")], Some(root));
            let prev = self.create("button", &[("aria-label", "Previous response")], Some(bar));
            self.push_text(prev, "<");
            let counter = self.create("span", &[("class", "px-1 tabular-nums")], Some(bar));
            let next = self.create("button", &[("aria-label", "Next response")], Some(bar));
            self.push_text(next, ">");
            turn.prev = Some(prev);
            turn.next = Some(next);
            turn.counter = Some(counter);
        }
        self.inner.borrow_mut().turns.push(turn);
        self.render_counter(index);
        index
    }

    /// `add_turn` after the page is live: queues the `childList` record.
    pub fn append_turn(&self, role: Role, texts: &[&str], active: u32) -> usize {
        let index = self.add_turn(role, texts, active);
        let root = self.turn(index).root;
        self.push_record(MutationKind::ChildList { added: vec![root], removed: Vec::new() }, self.main);
        index
    }

    pub fn turn(&self, index: usize) -> FakeTurn {
        self.inner.borrow().turns[index].clone()
    }

    pub fn active(&self, index: usize) -> u32 {
        self.inner.borrow().turns[index].active
    }

    pub fn counter_text(&self, index: usize) -> Option<String> {
        let counter = self.turn(index).counter?;
        Some(self.text_content(&counter))
    }

    /// Overwrite the counter text without touching the active variant.
    pub fn set_counter_text(&self, index: usize, text: &str) {
        if let Some(counter) = self.turn(index).counter {
            self.inner.borrow_mut().nodes[counter.0].children = vec![Child::Text(text.to_owned())];
        }
    }

    /// Drop both buttons of a turn, leaving the counter in place.
    pub fn strip_controls(&self, index: usize) {
        let turn = self.turn(index);
        for button in [turn.prev, turn.next].into_iter().flatten() {
            self.detach(button);
        }
        let mut inner = self.inner.borrow_mut();
        inner.turns[index].prev = None;
        inner.turns[index].next = None;
    }

    /// Remove a turn from the document, as a host re-render would.
    pub fn detach_turn(&self, index: usize) {
        let root = self.turn(index).root;
        self.detach(root);
        self.push_record(MutationKind::ChildList { added: Vec::new(), removed: vec![root] }, self.main);
    }

    fn detach(&self, el: NodeId) {
        let mut inner = self.inner.borrow_mut();
        if let Some(parent) = inner.nodes[el.0].parent.take() {
            inner.nodes[parent.0].children.retain(|c| !matches!(c, Child::El(id) if *id == el));
        }
    }

    /// While frozen, clicks are counted but the page never reacts.
    pub fn freeze(&self, frozen: bool) {
        self.frozen.set(frozen);
    }

    pub fn clicks(&self) -> usize {
        self.clicks.get()
    }

    pub fn take_records(&self) -> Vec<MutationRecord<NodeId>> {
        std::mem::take(&mut self.inner.borrow_mut().records)
    }

    fn push_record(&self, kind: MutationKind<NodeId>, target: NodeId) {
        self.inner.borrow_mut().records.push(MutationRecord { kind, target });
    }

    fn render_counter(&self, index: usize) {
        let turn = self.turn(index);
        let total = turn.texts.len();
        let (Some(counter), true) = (turn.counter, total > 1) else {
            return;
        };
        self.inner.borrow_mut().nodes[counter.0].children = vec![Child::Text(format!("{}/{total}", turn.active))];
        for (button, disabled) in [(turn.prev, turn.active <= 1), (turn.next, turn.active as usize >= total)] {
            if let Some(button) = button {
                if disabled {
                    self.set_attr(button, "disabled", "");
                } else {
                    self.remove_attr(button, "disabled");
                }
            }
        }
    }

    fn step(&self, index: usize, forward: bool) {
        let turn = self.turn(index);
        let total = turn.texts.len() as u32;
        let active = if forward { turn.active + 1 } else { turn.active - 1 };
        if active == 0 || active > total {
            return;
        }
        {
            let mut inner = self.inner.borrow_mut();
            inner.turns[index].active = active;
            let text = turn.texts[active as usize - 1].clone();
            inner.nodes[turn.content.0].children = vec![Child::Text(text)];
        }
        self.render_counter(index);
        if let Some(counter) = turn.counter {
            self.push_record(MutationKind::CharacterData, counter);
        }
        self.push_record(MutationKind::ChildList { added: Vec::new(), removed: Vec::new() }, turn.content);
        for button in [turn.prev, turn.next].into_iter().flatten() {
            self.push_record(MutationKind::Attributes { name: "disabled".to_owned() }, button);
        }
    }

    fn walk(&self, el: NodeId, selector: &Selector, out: &mut Vec<NodeId>) {
        let children = self.children(&el);
        for child in children {
            if self.matches(&child, selector) {
                out.push(child);
            }
            self.walk(child, selector, out);
        }
    }
}

impl Document for FakeHost {
    type Element = NodeId;

    fn select_all(&self, scope: Option<&NodeId>, selector: &Selector) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.walk(scope.copied().unwrap_or(self.html), selector, &mut out);
        out
    }

    fn attribute(&self, element: &NodeId, name: &str) -> Option<String> {
        self.inner.borrow().nodes[element.0].attrs.get(name).cloned()
    }

    fn tag_name(&self, element: &NodeId) -> String {
        self.inner.borrow().nodes[element.0].tag.clone()
    }

    fn text_content(&self, element: &NodeId) -> String {
        self.child_nodes(element)
            .into_iter()
            .map(|child| match child {
                ChildNode::Text(text) => text,
                ChildNode::Element(el) => self.text_content(&el),
            })
            .collect()
    }

    fn child_nodes(&self, element: &NodeId) -> Vec<ChildNode<NodeId>> {
        self.inner.borrow().nodes[element.0]
            .children
            .iter()
            .map(|child| match child {
                Child::El(id) => ChildNode::Element(*id),
                Child::Text(text) => ChildNode::Text(text.clone()),
            })
            .collect()
    }

    fn parent(&self, element: &NodeId) -> Option<NodeId> {
        self.inner.borrow().nodes[element.0].parent
    }

    fn bounding_box(&self, element: &NodeId) -> Option<Rect> {
        self.inner.borrow().nodes[element.0].rect
    }

    fn is_connected(&self, element: &NodeId) -> bool {
        let mut cursor = *element;
        while let Some(parent) = self.parent(&cursor) {
            cursor = parent;
        }
        cursor == self.html
    }

    fn click(&self, element: &NodeId) {
        self.clicks.set(self.clicks.get() + 1);
        if self.frozen.get() || !self.is_connected(element) || self.is_disabled(element) {
            return;
        }
        let found = self.inner.borrow().turns.iter().enumerate().find_map(|(i, t)| {
            if t.next == Some(*element) {
                Some((i, true))
            } else if t.prev == Some(*element) {
                Some((i, false))
            } else {
                None
            }
        });
        if let Some((index, forward)) = found {
            self.step(index, forward);
        }
    }

    fn is_host_managed(&self, element: &NodeId) -> bool {
        let managed = self.inner.borrow().host_managed.clone();
        let mut cursor = Some(*element);
        while let Some(el) = cursor {
            if managed.contains(&el) {
                return true;
            }
            cursor = self.parent(&el);
        }
        false
    }
}

// =============================================================================
// Time
// =============================================================================

#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<i64>,
}

impl ManualClock {
    pub fn at(now: i64) -> Rc<Self> {
        Rc::new(Self { now: Cell::new(now) })
    }

    pub fn advance(&self, ms: i64) {
        self.now.set(self.now.get() + ms);
    }

    pub fn set(&self, now: i64) {
        self.now.set(now);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.get()
    }
}

/// Sleeps complete immediately after advancing the shared clock and yielding
/// once, so concurrently joined futures get a turn.
#[derive(Debug, Clone)]
pub struct InstantTimer {
    clock: Rc<ManualClock>,
    slept: Rc<Cell<u64>>,
}

impl InstantTimer {
    pub fn new(clock: Rc<ManualClock>) -> Rc<Self> {
        Rc::new(Self { clock, slept: Rc::new(Cell::new(0)) })
    }

    pub fn total_slept(&self) -> u64 {
        self.slept.get()
    }
}

impl Timer for InstantTimer {
    fn sleep(&self, ms: u64) -> LocalBoxFuture<'static, ()> {
        self.clock.advance(i64::try_from(ms).unwrap_or(i64::MAX));
        self.slept.set(self.slept.get() + ms);
        Box::pin(YieldOnce(false))
    }
}

struct YieldOnce(bool);

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0 {
            Poll::Ready(())
        } else {
            self.0 = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Two-turn conversation from the end-to-end scenarios: assistant turns at
/// indices 0 and 1, each with two variants, active 1 and 2 respectively.
pub fn two_branch_host() -> FakeHost {
    let host = FakeHost::new();
    host.add_turn(Role::Assistant, &["First answer to the question", "Second answer, regenerated"], 1);
    host.add_turn(Role::Assistant, &["Follow-up reply one", "Follow-up reply two"], 2);
    host
}
