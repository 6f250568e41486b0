//! The document seam and everything that reads the host page.
//!
//! SYSTEM CONTEXT
//! ==============
//! The core never sees a browser. It reads the page through [`Document`],
//! whose element handle is opaque (`web_sys::Element` in the extension, an
//! arena index in tests). Queries take typed [`Selector`]s so the cascades
//! in [`SelectorPolicy`] stay data, not string soup, and can be matched
//! structurally without a CSS engine.
//!
//! WRITES
//! ======
//! [`Document::click`] is the only mutation the core performs on the host.

pub mod probe;
pub mod selector;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use probe::DomProbe;
pub use selector::{Selector, SelectorPolicy};

/// Axis-aligned bounding box in CSS pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    #[must_use]
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }
}

/// A child of an element, in document order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildNode<E> {
    Element(E),
    Text(String),
}

/// Which host control to press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Prev,
    Next,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prev => f.write_str("previous"),
            Self::Next => f.write_str("next"),
        }
    }
}

/// Parsed `current/total` variant counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantCounter {
    pub current: u32,
    pub total: u32,
}

/// The prev/next buttons of a turn. Either may be absent at an endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Controls<E> {
    pub prev: Option<E>,
    pub next: Option<E>,
}

impl<E> Controls<E> {
    #[must_use]
    pub fn any(&self) -> bool {
        self.prev.is_some() || self.next.is_some()
    }

    #[must_use]
    pub fn get(&self, direction: Direction) -> Option<&E> {
        match direction {
            Direction::Prev => self.prev.as_ref(),
            Direction::Next => self.next.as_ref(),
        }
    }
}

/// What a mutation record touched.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationKind<E> {
    ChildList { added: Vec<E>, removed: Vec<E> },
    Attributes { name: String },
    CharacterData,
}

/// One observed document mutation. `target` is the nearest element; text
/// node changes are reported against their parent element.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord<E> {
    pub kind: MutationKind<E>,
    pub target: E,
}

/// Read access to the host page plus synthetic clicks.
pub trait Document {
    type Element: Clone + PartialEq + fmt::Debug;

    /// All descendants of `scope` (the whole document when `None`) matching
    /// `selector`, in document order. `scope` itself is never included.
    fn select_all(&self, scope: Option<&Self::Element>, selector: &Selector) -> Vec<Self::Element>;

    fn attribute(&self, element: &Self::Element, name: &str) -> Option<String>;

    /// Lowercase tag name.
    fn tag_name(&self, element: &Self::Element) -> String;

    fn text_content(&self, element: &Self::Element) -> String;

    fn child_nodes(&self, element: &Self::Element) -> Vec<ChildNode<Self::Element>>;

    fn parent(&self, element: &Self::Element) -> Option<Self::Element>;

    fn bounding_box(&self, element: &Self::Element) -> Option<Rect>;

    fn is_connected(&self, element: &Self::Element) -> bool;

    fn click(&self, element: &Self::Element);

    fn class_name(&self, element: &Self::Element) -> String {
        self.attribute(element, "class").unwrap_or_default()
    }

    fn is_disabled(&self, element: &Self::Element) -> bool {
        self.attribute(element, "disabled").is_some()
            || self
                .attribute(element, "aria-disabled")
                .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Whether the element sits under a root the host framework re-renders.
    /// UI collaborators must not mutate such elements.
    fn is_host_managed(&self, _element: &Self::Element) -> bool {
        false
    }

    fn children(&self, element: &Self::Element) -> Vec<Self::Element> {
        self.child_nodes(element)
            .into_iter()
            .filter_map(|node| match node {
                ChildNode::Element(el) => Some(el),
                ChildNode::Text(_) => None,
            })
            .collect()
    }

    /// Whether `selector` matches `element` itself.
    fn matches(&self, element: &Self::Element, selector: &Selector) -> bool {
        let tag = self.tag_name(element);
        selector.matches(&tag, |name| self.attribute(element, name))
    }
}
