//! Page runtime: one core per tab, a `MutationObserver`, and the exports.
//!
//! SYSTEM CONTEXT
//! ==============
//! [`start`] builds an `ExtensionCore` over the live document and
//! `localStorage`, starts it on the current URL and observes the
//! conversation container. Each observer batch is converted to core
//! mutation records; when the core reports a pending deadline a timer is
//! armed to poll it. Timers carry a generation number so a newer arm
//! supersedes an older one without dropping a running callback.
//!
//! The host is a single-page app. Each batch first checks the URL and
//! follows a conversation switch, re-observing if the container changed.

use std::cell::RefCell;
use std::rc::Rc;

use branchscope::clock::{Clock, Timer};
use branchscope::config::CoreConfig;
use branchscope::dom::{MutationKind, MutationRecord};
use branchscope::persistence::StoreError;
use branchscope::watcher::ATTRIBUTE_FILTER;
use branchscope::{CoreError, ExtensionCore};
use futures::future::LocalBoxFuture;
use gloo_timers::future::TimeoutFuture;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{Element, MutationObserver, MutationObserverInit};

use crate::bridge::Outcome;
use crate::local_store::LocalStore;
use crate::web_dom::{WebDocument, elements};

type Core = ExtensionCore<WebDocument, LocalStore>;
type MutationCallback = Closure<dyn FnMut(js_sys::Array, MutationObserver)>;

struct BrowserClock;

impl Clock for BrowserClock {
    #[allow(clippy::cast_possible_truncation)]
    fn now_ms(&self) -> i64 {
        js_sys::Date::now() as i64
    }
}

struct BrowserTimer;

impl Timer for BrowserTimer {
    fn sleep(&self, ms: u64) -> LocalBoxFuture<'static, ()> {
        Box::pin(TimeoutFuture::new(u32::try_from(ms).unwrap_or(u32::MAX)))
    }
}

struct Runtime {
    core: Rc<Core>,
    observer: MutationObserver,
    observed: Element,
    _on_mutations: MutationCallback,
    poll_generation: u64,
}

thread_local! {
    static RUNTIME: RefCell<Option<Runtime>> = const { RefCell::new(None) };
}

fn current_core() -> Option<Rc<Core>> {
    RUNTIME.with(|rt| rt.borrow().as_ref().map(|r| Rc::clone(&r.core)))
}

fn init_logging() {
    console_error_panic_hook::set_once();
    if let Err(err) = console_log::init_with_level(log::Level::Info) {
        log::debug!("logger already installed: {err}");
    }
}

// =============================================================================
// Exports
// =============================================================================

/// Start on the current page. `config_json` overrides [`CoreConfig`]
/// defaults. Answers with an outcome whose `retry` flag tells the harness to
/// try again later (the container has not rendered yet).
#[wasm_bindgen]
pub fn start(config_json: Option<String>) -> String {
    init_logging();
    match boot(config_json.as_deref()) {
        Ok(()) => Outcome::success().to_json(),
        Err(err) => {
            log::warn!("start failed: {err}");
            Outcome::failure(&err).to_json()
        }
    }
}

/// Resolves to a JSON outcome; never rejects.
#[wasm_bindgen]
pub fn navigate_to_variant(variant_id: String, target: u32) -> js_sys::Promise {
    let Some(core) = current_core() else {
        return resolved(&Outcome::inactive());
    };
    wasm_bindgen_futures::future_to_promise(async move {
        let result = core.navigate_to_variant(&variant_id, target).await;
        Ok(JsValue::from_str(&Outcome::from_navigation(&result).to_json()))
    })
}

/// Resolves to a JSON outcome; never rejects.
#[wasm_bindgen]
pub fn navigate_to_node(variant_id: String) -> js_sys::Promise {
    let Some(core) = current_core() else {
        return resolved(&Outcome::inactive());
    };
    wasm_bindgen_futures::future_to_promise(async move {
        let result = core.navigate_to_node(&variant_id).await;
        Ok(JsValue::from_str(&Outcome::from_navigation(&result).to_json()))
    })
}

/// The lean snapshot as JSON, or `null` before [`start`].
#[wasm_bindgen]
pub fn export_lean() -> String {
    let Some(core) = current_core() else {
        return "null".to_owned();
    };
    match serde_json::to_string(&core.export_lean()) {
        Ok(json) => json,
        Err(err) => {
            log::warn!("export failed: {err}");
            "null".to_owned()
        }
    }
}

/// Forget the current conversation. Returns whether a core was running.
#[wasm_bindgen]
pub fn clear() -> bool {
    match current_core() {
        Some(core) => {
            core.clear_conversation();
            true
        }
        None => false,
    }
}

fn resolved(outcome: &Outcome) -> js_sys::Promise {
    js_sys::Promise::resolve(&JsValue::from_str(&outcome.to_json()))
}

// =============================================================================
// Boot
// =============================================================================

fn boot(config_json: Option<&str>) -> Result<(), CoreError> {
    stop();
    let config = match config_json {
        Some(json) => CoreConfig::from_json(json)?,
        None => CoreConfig::default(),
    };
    let window = web_sys::window().ok_or(CoreError::NoContainer)?;
    let document = window.document().ok_or(CoreError::NoContainer)?;
    let store = LocalStore::from_window().map_err(|err| match err {
        StoreError::Unavailable(reason) => CoreError::StorageUnavailable(reason),
        StoreError::Quota => CoreError::StorageUnavailable("quota exceeded".to_owned()),
    })?;
    let url = current_url();

    let core = Rc::new(ExtensionCore::new(
        Rc::new(WebDocument::new(document)),
        store,
        Rc::new(BrowserClock),
        Rc::new(BrowserTimer),
        config,
    ));
    core.start(&url)?;
    let container = core.container().ok_or(CoreError::NoContainer)?;

    let on_mutations: MutationCallback = Closure::new(|records: js_sys::Array, _observer: MutationObserver| {
        on_batch(&records);
    });
    let observer = MutationObserver::new(on_mutations.as_ref().unchecked_ref()).map_err(|err| {
        log::error!("MutationObserver unavailable: {err:?}");
        CoreError::NoContainer
    })?;
    observe(&observer, &container)?;

    RUNTIME.with(|rt| {
        *rt.borrow_mut() = Some(Runtime {
            core,
            observer,
            observed: container,
            _on_mutations: on_mutations,
            poll_generation: 0,
        });
    });
    Ok(())
}

fn stop() {
    RUNTIME.with(|rt| {
        if let Some(runtime) = rt.borrow_mut().take() {
            runtime.observer.disconnect();
            runtime.core.cancel_navigation();
        }
    });
}

fn observe(observer: &MutationObserver, container: &Element) -> Result<(), CoreError> {
    let init = MutationObserverInit::new();
    init.set_child_list(true);
    init.set_subtree(true);
    init.set_character_data(true);
    init.set_attributes(true);
    let filter: js_sys::Array = ATTRIBUTE_FILTER.iter().map(|name| JsValue::from_str(name)).collect();
    init.set_attribute_filter(&JsValue::from(filter));
    observer.observe_with_options(container, &init).map_err(|err| {
        log::error!("observe failed: {err:?}");
        CoreError::NoContainer
    })
}

fn current_url() -> String {
    web_sys::window()
        .and_then(|w| w.location().href().ok())
        .unwrap_or_default()
}

// =============================================================================
// Observation
// =============================================================================

fn on_batch(records: &js_sys::Array) {
    let Some(core) = current_core() else {
        return;
    };
    follow_route(&core);
    let records: Vec<MutationRecord<Element>> = records
        .iter()
        .filter_map(|value| value.dyn_into::<web_sys::MutationRecord>().ok())
        .filter_map(|record| convert(&record))
        .collect();
    if !records.is_empty() {
        core.handle_mutations(&records);
    }
    arm_poll();
}

fn follow_route(core: &Core) {
    if let Err(err) = core.switch_conversation(&current_url()) {
        log::warn!("conversation switch failed: {err}");
        return;
    }
    let Some(container) = core.container() else {
        return;
    };
    RUNTIME.with(|rt| {
        let mut rt = rt.borrow_mut();
        let Some(runtime) = rt.as_mut() else {
            return;
        };
        if runtime.observed == container {
            return;
        }
        runtime.observer.disconnect();
        if observe(&runtime.observer, &container).is_ok() {
            runtime.observed = container;
        }
    });
}

fn convert(record: &web_sys::MutationRecord) -> Option<MutationRecord<Element>> {
    let node = record.target()?;
    let target = match node.dyn_into::<Element>() {
        Ok(el) => el,
        Err(node) => node.parent_element()?,
    };
    let kind = match record.type_().as_str() {
        "childList" => MutationKind::ChildList {
            added: elements(&record.added_nodes()),
            removed: elements(&record.removed_nodes()),
        },
        "attributes" => MutationKind::Attributes { name: record.attribute_name()? },
        "characterData" => MutationKind::CharacterData,
        _ => return None,
    };
    Some(MutationRecord { kind, target })
}

/// Schedule a poll at the core's next deadline, superseding any earlier arm.
fn arm_poll() {
    let armed = RUNTIME.with(|rt| {
        let mut rt = rt.borrow_mut();
        let runtime = rt.as_mut()?;
        runtime.poll_generation += 1;
        Some((Rc::clone(&runtime.core), runtime.poll_generation))
    });
    let Some((core, generation)) = armed else {
        return;
    };
    let Some(deadline) = core.next_deadline() else {
        return;
    };
    let delay = u32::try_from(deadline.saturating_sub(BrowserClock.now_ms()).max(0)).unwrap_or(u32::MAX);
    wasm_bindgen_futures::spawn_local(async move {
        TimeoutFuture::new(delay).await;
        let current = RUNTIME.with(|rt| rt.borrow().as_ref().is_some_and(|r| r.poll_generation == generation));
        if current {
            core.poll();
            arm_poll();
        }
    });
}
