//! Browser adapter for the branchscope core.
//!
//! SYSTEM CONTEXT
//! ==============
//! The content script loads this crate as WASM and calls [`start`] once the
//! host page is up. With the `hydrate` feature the adapter implements the
//! core's seams on `web-sys` (DOM, `localStorage`, `Date.now`, `setTimeout`),
//! feeds a real `MutationObserver` into the core, and exposes navigation as
//! promises. Without the feature every export is an inert no-op so the
//! workspace builds and tests natively.
//!
//! Every export answers with a JSON [`bridge::Outcome`] (or a snapshot), so
//! nothing throws across the JS boundary.

pub mod bridge;

#[cfg(feature = "hydrate")]
mod local_store;
#[cfg(feature = "hydrate")]
mod runtime;
#[cfg(feature = "hydrate")]
mod web_dom;

#[cfg(feature = "hydrate")]
pub use runtime::{clear, export_lean, navigate_to_node, navigate_to_variant, start};

#[cfg(not(feature = "hydrate"))]
pub use inert::{clear, export_lean, navigate_to_node, navigate_to_variant, start};

#[cfg(not(feature = "hydrate"))]
mod inert {
    use crate::bridge::Outcome;

    pub fn start(_config_json: Option<String>) -> String {
        Outcome::inactive().to_json()
    }

    pub fn navigate_to_variant(_variant_id: String, _target: u32) -> String {
        Outcome::inactive().to_json()
    }

    pub fn navigate_to_node(_variant_id: String) -> String {
        Outcome::inactive().to_json()
    }

    pub fn export_lean() -> String {
        "null".to_owned()
    }

    pub fn clear() -> bool {
        false
    }
}
