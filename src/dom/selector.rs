//! Typed selectors and the ordered selector cascades for the host page.
//!
//! DESIGN
//! ======
//! Host markup churns, so every lookup is an ordered list of selectors tried
//! in priority order. The lists live in [`SelectorPolicy`], which loads from
//! JSON, so a markup change is a config change. [`Selector`] renders to CSS
//! for the browser and matches structurally for in-memory documents.

#[cfg(test)]
#[path = "selector_test.rs"]
mod selector_test;

use serde::{Deserialize, Serialize};

/// A single compound selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Selector {
    /// `tag`
    Tag { name: String },
    /// `[name]`
    HasAttr { name: String },
    /// `[name="value"]`
    AttrEquals { name: String, value: String },
    /// `[name^="prefix"]`
    AttrPrefix { name: String, prefix: String },
    /// `.name`
    Class { name: String },
    /// `[class*="fragment"]`
    ClassContains { fragment: String },
    /// Every part must match the same element.
    All { parts: Vec<Selector> },
}

impl Selector {
    #[must_use]
    pub fn tag(name: &str) -> Self {
        Self::Tag { name: name.to_owned() }
    }

    #[must_use]
    pub fn has_attr(name: &str) -> Self {
        Self::HasAttr { name: name.to_owned() }
    }

    #[must_use]
    pub fn attr_equals(name: &str, value: &str) -> Self {
        Self::AttrEquals { name: name.to_owned(), value: value.to_owned() }
    }

    #[must_use]
    pub fn attr_prefix(name: &str, prefix: &str) -> Self {
        Self::AttrPrefix { name: name.to_owned(), prefix: prefix.to_owned() }
    }

    #[must_use]
    pub fn class(name: &str) -> Self {
        Self::Class { name: name.to_owned() }
    }

    #[must_use]
    pub fn class_contains(fragment: &str) -> Self {
        Self::ClassContains { fragment: fragment.to_owned() }
    }

    #[must_use]
    pub fn all(parts: Vec<Selector>) -> Self {
        Self::All { parts }
    }

    /// Render as a CSS selector string. Tag parts of a compound come first.
    #[must_use]
    pub fn to_css(&self) -> String {
        match self {
            Self::Tag { name } => name.clone(),
            Self::HasAttr { name } => format!("[{name}]"),
            Self::AttrEquals { name, value } => format!("[{name}=\"{}\"]", escape_css(value)),
            Self::AttrPrefix { name, prefix } => format!("[{name}^=\"{}\"]", escape_css(prefix)),
            Self::Class { name } => format!(".{}", escape_class(name)),
            Self::ClassContains { fragment } => format!("[class*=\"{}\"]", escape_css(fragment)),
            Self::All { parts } => {
                let (tags, rest): (Vec<&Selector>, Vec<&Selector>) =
                    parts.iter().partition(|p| matches!(p, Self::Tag { .. }));
                tags.into_iter()
                    .chain(rest)
                    .map(Selector::to_css)
                    .collect::<String>()
            }
        }
    }

    /// Structural match against an element's tag and attributes.
    pub fn matches<F>(&self, tag: &str, attr: F) -> bool
    where
        F: Fn(&str) -> Option<String>,
    {
        self.matches_with(tag, &attr)
    }

    fn matches_with(&self, tag: &str, attr: &dyn Fn(&str) -> Option<String>) -> bool {
        match self {
            Self::Tag { name } => tag.eq_ignore_ascii_case(name),
            Self::HasAttr { name } => attr(name).is_some(),
            Self::AttrEquals { name, value } => attr(name).is_some_and(|v| v == *value),
            Self::AttrPrefix { name, prefix } => attr(name).is_some_and(|v| v.starts_with(prefix.as_str())),
            Self::Class { name } => attr("class").is_some_and(|v| v.split_whitespace().any(|c| c == name)),
            Self::ClassContains { fragment } => attr("class").is_some_and(|v| v.contains(fragment.as_str())),
            Self::All { parts } => parts.iter().all(|p| p.matches_with(tag, attr)),
        }
    }
}

fn escape_css(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn escape_class(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

/// Ordered selector cascades and heuristics describing the host markup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorPolicy {
    /// Candidates for the scrolling conversation region.
    pub container: Vec<Selector>,
    /// Candidates for turn elements; the first non-empty match wins.
    pub turns: Vec<Selector>,
    /// Candidates for the `c/t` counter inside a turn.
    pub counter: Vec<Selector>,
    pub prev_control: Vec<Selector>,
    pub next_control: Vec<Selector>,
    pub edit_control: Vec<Selector>,
    /// Where the readable message body lives inside a turn.
    pub message_content: Vec<Selector>,
    /// Attribute carrying the author role.
    pub role_attribute: String,
    /// Host-provided identifier attributes, in priority order.
    pub stable_id_attributes: Vec<String>,
    /// Assistant product names recognised in aria-labels.
    pub product_names: Vec<String>,
    /// Class fragments that mark a plausible message container.
    pub message_classes: Vec<String>,
    /// Attributes that mark a plausible message container.
    pub message_attributes: Vec<String>,
    /// Minimum container box for the main content region.
    pub min_container_width: f64,
    pub min_container_height: f64,
    /// Minimum box for a plausible turn found by the fallback walk.
    pub min_turn_width: f64,
    pub min_turn_height: f64,
}

impl Default for SelectorPolicy {
    fn default() -> Self {
        let button = |label: &str| {
            vec![Selector::all(vec![Selector::tag("button"), Selector::attr_equals("aria-label", label)])]
        };
        Self {
            container: vec![
                Selector::tag("main"),
                Selector::attr_equals("role", "main"),
                Selector::all(vec![Selector::tag("div"), Selector::class_contains("conversation")]),
            ],
            turns: vec![
                Selector::attr_prefix("data-testid", "conversation-turn-"),
                Selector::all(vec![Selector::tag("article"), Selector::has_attr("data-turn")]),
                Selector::tag("article"),
                Selector::has_attr("data-message-author-role"),
            ],
            counter: vec![
                Selector::class_contains("tabular-nums"),
                Selector::tag("span"),
                Selector::tag("div"),
            ],
            prev_control: button("Previous response"),
            next_control: button("Next response"),
            edit_control: button("Edit message"),
            message_content: vec![
                Selector::class_contains("markdown"),
                Selector::class_contains("whitespace-pre-wrap"),
                Selector::has_attr("data-message-author-role"),
            ],
            role_attribute: "data-message-author-role".to_owned(),
            stable_id_attributes: vec!["data-message-id".to_owned(), "data-testid".to_owned(), "id".to_owned()],
            product_names: vec!["chatgpt".to_owned(), "claude".to_owned(), "gemini".to_owned()],
            message_classes: vec!["message".to_owned(), "conversation-turn".to_owned(), "group".to_owned()],
            message_attributes: vec!["data-message-author-role".to_owned(), "data-message-id".to_owned()],
            min_container_width: 300.0,
            min_container_height: 200.0,
            min_turn_width: 100.0,
            min_turn_height: 20.0,
        }
    }
}
