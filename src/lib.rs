//! Conversation-tree discovery, merging and navigation for a host chat UI.
//!
//! The host page renders one path through a branching conversation and lets
//! the user flip between regenerations of a turn with "Previous response" /
//! "Next response" buttons and a `c/t` counter. This crate watches that page
//! through an abstract [`dom::Document`], reconstructs the variant tree it
//! has seen so far, persists it per conversation, and drives the host's own
//! controls to jump between variants.
//!
//! Nothing here touches a real browser. The `extension` crate supplies
//! `web-sys` implementations of the seams ([`dom::Document`],
//! [`persistence::KeyValueStore`], [`clock::Clock`], [`clock::Timer`]).
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`dom`] | Document seam, typed selectors, and [`dom::DomProbe`] |
//! | [`detector`] | Turns on screen into [`model::BranchRecord`]s |
//! | [`watcher`] | Mutation classification, throttled rescans, variant-change events |
//! | [`tree`] | The authoritative variant tree ([`tree::TreeBuilder`]) |
//! | [`merge`] | Precedence rules for consolidating duplicate variants |
//! | [`persistence`] | Keyed conversation records, compression, quota eviction |
//! | [`navigator`] | Click plans against prev/next controls, serialized requests |
//! | [`core`] | [`core::ExtensionCore`], the container wiring everything together |
//! | [`scheduler`] | Debounce/throttle operators and the serial navigation queue |
//! | [`events`] | Typed observer with listener error isolation |
//! | [`config`] | [`config::CoreConfig`] and its defaults |
//! | [`route`] | Conversation identifier extraction from host URLs |

pub mod clock;
pub mod config;
pub mod core;
pub mod detector;
pub mod dom;
pub mod error;
pub mod events;
pub mod hash;
pub mod merge;
pub mod model;
pub mod navigator;
pub mod persistence;
pub mod route;
pub mod scheduler;
pub mod tree;
pub mod watcher;

#[cfg(test)]
mod fixture;

pub use crate::core::ExtensionCore;
pub use crate::error::CoreError;
