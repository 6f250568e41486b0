//! DomProbe: the consistent "what is on screen right now" view.
//!
//! DESIGN
//! ======
//! Every lookup walks an ordered cascade from [`SelectorPolicy`] and fails
//! softly with `None` or an empty list. Turn discovery has a second line of
//! defence: when no turn selector matches, the probe finds variant counters
//! and walks upward to the nearest element that looks like a message.
//!
//! Turn identifiers prefer host attributes. Without one, the identifier is
//! synthesized from the turn index, a hash of the leading text, and a hash of
//! the element's structural path, so it is deterministic for an unchanged
//! element across rescans.

#[cfg(test)]
#[path = "probe_test.rs"]
mod probe_test;

use std::sync::LazyLock;

use regex::Regex;

use super::{ChildNode, Controls, Document, Rect, Selector, SelectorPolicy, VariantCounter};
use crate::hash::short_hash;
use crate::model::{NO_CONTENT_PREVIEW, Role, TurnId};

/// Longest preview returned by [`DomProbe::extract_preview`], in characters.
pub const PREVIEW_MAX_CHARS: usize = 120;
/// Leading characters of turn text hashed into a synthesized identifier.
const ID_TEXT_CHARS: usize = 100;
const SYNTHETIC_PREFIX: &str = "turn-";
/// Largest variant total a counter may report. Anything above is page
/// noise, and each variant becomes a tree node.
pub const MAX_VARIANTS: u32 = 256;

#[derive(Debug, Clone, Default)]
pub struct DomProbe {
    policy: SelectorPolicy,
}

impl DomProbe {
    #[must_use]
    pub fn new(policy: SelectorPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &SelectorPolicy {
        &self.policy
    }

    // =========================================================================
    // Structure
    // =========================================================================

    /// First container candidate whose box looks like a main content region.
    pub fn find_container<D: Document>(&self, doc: &D) -> Option<D::Element> {
        self.policy.container.iter().find_map(|selector| {
            doc.select_all(None, selector).into_iter().find(|el| {
                fits(
                    doc.bounding_box(el),
                    self.policy.min_container_width,
                    self.policy.min_container_height,
                )
            })
        })
    }

    /// Turn elements inside `scope` (the whole document when `None`), in
    /// document order.
    pub fn find_turns<D: Document>(&self, doc: &D, scope: Option<&D::Element>) -> Vec<D::Element> {
        for selector in &self.policy.turns {
            let found = doc.select_all(scope, selector);
            if !found.is_empty() {
                return found;
            }
        }
        self.turns_from_counters(doc, scope)
    }

    fn turns_from_counters<D: Document>(&self, doc: &D, scope: Option<&D::Element>) -> Vec<D::Element> {
        let counters = self
            .policy
            .counter
            .iter()
            .map(|selector| {
                doc.select_all(scope, selector)
                    .into_iter()
                    .filter(|el| is_counter_text(&doc.text_content(el)))
                    .collect::<Vec<_>>()
            })
            .find(|found| !found.is_empty())
            .unwrap_or_default();

        let mut turns: Vec<D::Element> = Vec::new();
        for counter in counters {
            let mut cursor = doc.parent(&counter);
            while let Some(el) = cursor {
                if scope.is_some_and(|s| *s == el) {
                    break;
                }
                if self.is_plausible_turn(doc, &el) {
                    if !turns.contains(&el) {
                        turns.push(el);
                    }
                    break;
                }
                cursor = doc.parent(&el);
            }
        }
        turns
    }

    fn is_plausible_turn<D: Document>(&self, doc: &D, el: &D::Element) -> bool {
        let class = doc.class_name(el);
        let marked = self.policy.message_classes.iter().any(|c| class.contains(c.as_str()))
            || self.policy.message_attributes.iter().any(|a| doc.attribute(el, a).is_some());
        if !marked {
            return false;
        }
        let has_content = self
            .policy
            .message_content
            .iter()
            .any(|selector| !doc.select_all(Some(el), selector).is_empty());
        has_content && fits(doc.bounding_box(el), self.policy.min_turn_width, self.policy.min_turn_height)
    }

    /// Index into `turns` of the turn containing `el` (or equal to it).
    pub fn enclosing_turn<D: Document>(&self, doc: &D, el: &D::Element, turns: &[D::Element]) -> Option<usize> {
        let mut cursor = Some(el.clone());
        while let Some(node) = cursor {
            if let Some(index) = turns.iter().position(|t| *t == node) {
                return Some(index);
            }
            cursor = doc.parent(&node);
        }
        None
    }

    // =========================================================================
    // Counter & controls
    // =========================================================================

    /// The element inside `turn` whose text has the `c/t` shape.
    pub fn counter_element<D: Document>(&self, doc: &D, turn: &D::Element) -> Option<D::Element> {
        self.policy.counter.iter().find_map(|selector| {
            doc.select_all(Some(turn), selector)
                .into_iter()
                .find(|el| is_counter_text(&doc.text_content(el)))
        })
    }

    /// Validated counter of a turn. `None` for absent, malformed, `1/1`, or
    /// out-of-range counters.
    pub fn read_variant_counter<D: Document>(&self, doc: &D, turn: &D::Element) -> Option<VariantCounter> {
        self.counter_element(doc, turn)
            .and_then(|el| parse_counter(&doc.text_content(&el)))
    }

    pub fn read_controls<D: Document>(&self, doc: &D, turn: &D::Element) -> Controls<D::Element> {
        Controls {
            prev: first_match(doc, turn, &self.policy.prev_control),
            next: first_match(doc, turn, &self.policy.next_control),
        }
    }

    // =========================================================================
    // Content
    // =========================================================================

    pub fn classify_role<D: Document>(&self, doc: &D, turn: &D::Element) -> Role {
        let role_attr = &self.policy.role_attribute;
        let declared = doc.attribute(turn, role_attr).or_else(|| {
            doc.select_all(Some(turn), &Selector::has_attr(role_attr))
                .first()
                .and_then(|el| doc.attribute(el, role_attr))
        });
        if let Some(value) = declared {
            let role = Role::parse(&value);
            if role != Role::Unknown {
                return role;
            }
        }

        if let Some(label) = doc.attribute(turn, "aria-label") {
            let label = label.to_lowercase();
            if label.contains("user") {
                return Role::User;
            }
            if label.contains("assistant") || self.policy.product_names.iter().any(|p| label.contains(p.as_str())) {
                return Role::Assistant;
            }
        }

        if self.read_controls(doc, turn).any() {
            return Role::Assistant;
        }
        if first_match(doc, turn, &self.policy.edit_control).is_some() {
            return Role::User;
        }

        let mut classes = doc.class_name(turn).to_lowercase();
        if let Some(parent) = doc.parent(turn) {
            classes.push(' ');
            classes.push_str(&doc.class_name(&parent).to_lowercase());
        }
        if classes.contains("user") {
            Role::User
        } else if ["assistant", "bot", "agent"].iter().any(|k| classes.contains(k)) {
            Role::Assistant
        } else {
            Role::Unknown
        }
    }

    /// Readable text of a turn without button labels or the counter,
    /// whitespace-collapsed and capped at [`PREVIEW_MAX_CHARS`].
    pub fn extract_preview<D: Document>(&self, doc: &D, turn: &D::Element) -> String {
        let root = first_match(doc, turn, &self.policy.message_content).unwrap_or_else(|| turn.clone());
        let mut raw = String::new();
        collect_text(doc, &root, &mut raw);
        let collapsed = collapse_whitespace(&raw);
        if collapsed.is_empty() {
            return NO_CONTENT_PREVIEW.to_owned();
        }
        truncate_preview(&collapsed)
    }

    // =========================================================================
    // Identity
    // =========================================================================

    pub fn turn_id_for<D: Document>(&self, doc: &D, turn: &D::Element, index: usize) -> TurnId {
        let attrs = &self.policy.stable_id_attributes;
        let own = attrs.iter().find_map(|a| non_empty(doc.attribute(turn, a)));
        let nested = || {
            attrs.iter().find_map(|a| {
                doc.select_all(Some(turn), &Selector::has_attr(a))
                    .first()
                    .and_then(|el| non_empty(doc.attribute(el, a)))
            })
        };
        if let Some(id) = own.or_else(nested) {
            return id;
        }

        let text: String = doc.text_content(turn).trim().chars().take(ID_TEXT_CHARS).collect();
        let path = dom_path(doc, turn);
        format!("{SYNTHETIC_PREFIX}{index}-{}-{}", short_hash(&text), short_hash(&path))
    }

    /// Elements owned by the host framework's render roots must not be
    /// decorated by UI collaborators.
    pub fn is_safe_to_decorate<D: Document>(&self, doc: &D, el: &D::Element) -> bool {
        doc.is_connected(el) && !doc.is_host_managed(el)
    }
}

/// Whether an identifier was synthesized rather than read from the host.
#[must_use]
pub fn is_synthesized_turn_id(id: &str) -> bool {
    let Some(rest) = id.strip_prefix(SYNTHETIC_PREFIX) else {
        return false;
    };
    let parts: Vec<&str> = rest.split('-').collect();
    let [index, text, path] = parts.as_slice() else {
        return false;
    };
    let is_hex = |s: &str| s.len() == 8 && s.chars().all(|c| c.is_ascii_hexdigit());
    !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) && is_hex(text) && is_hex(path)
}

static COUNTER_TEXT: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^([0-9]+)/([0-9]+)$"));

/// The `(current, total)` digit runs of counter-shaped text.
fn counter_parts(text: &str) -> Option<(&str, &str)> {
    let re = match &*COUNTER_TEXT {
        Ok(re) => re,
        Err(err) => {
            log::error!("counter pattern failed to compile: {err}");
            return None;
        }
    };
    let caps = re.captures(text.trim())?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

/// Shape check for counter text: digits, a slash, digits.
#[must_use]
pub fn is_counter_text(text: &str) -> bool {
    counter_parts(text).is_some()
}

/// Parse and validate `c/t`: `1 <= c <= t` and `2 <= t <= MAX_VARIANTS`.
#[must_use]
pub fn parse_counter(text: &str) -> Option<VariantCounter> {
    let (current, total) = counter_parts(text)?;
    let (Ok(current), Ok(total)) = (current.parse::<u32>(), total.parse::<u32>()) else {
        return None;
    };
    if current == 0 || current > total || total < 2 {
        return None;
    }
    if total > MAX_VARIANTS {
        log::warn!("ignoring counter `{}`: more than {MAX_VARIANTS} variants", text.trim());
        return None;
    }
    Some(VariantCounter { current, total })
}

fn fits(rect: Option<Rect>, min_width: f64, min_height: f64) -> bool {
    rect.is_none_or(|r| r.width >= min_width && r.height >= min_height)
}

fn first_match<D: Document>(doc: &D, scope: &D::Element, cascade: &[Selector]) -> Option<D::Element> {
    cascade
        .iter()
        .find_map(|selector| doc.select_all(Some(scope), selector).into_iter().next())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn collect_text<D: Document>(doc: &D, el: &D::Element, out: &mut String) {
    for child in doc.child_nodes(el) {
        match child {
            ChildNode::Text(text) => {
                out.push_str(&text);
                out.push(' ');
            }
            ChildNode::Element(child) => {
                if doc.tag_name(&child) == "button" || is_counter_text(&doc.text_content(&child)) {
                    continue;
                }
                collect_text(doc, &child, out);
            }
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_MAX_CHARS {
        return text.to_owned();
    }
    let mut out: String = text.chars().take(PREVIEW_MAX_CHARS - 3).collect();
    out.push_str("...");
    out
}

fn dom_path<D: Document>(doc: &D, el: &D::Element) -> String {
    let mut segments = Vec::new();
    let mut cursor = el.clone();
    while let Some(parent) = doc.parent(&cursor) {
        let index = doc.children(&parent).iter().position(|c| *c == cursor).unwrap_or(0);
        segments.push(format!("{}:{index}", doc.tag_name(&cursor)));
        cursor = parent;
    }
    segments.push(doc.tag_name(&cursor));
    segments.reverse();
    segments.join(">")
}
