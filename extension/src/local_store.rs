//! `KeyValueStore` over `window.localStorage`.

use branchscope::persistence::{KeyValueStore, StoreError};
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{DomException, Storage};

#[derive(Debug, Clone)]
pub struct LocalStore {
    storage: Storage,
}

impl LocalStore {
    /// The window's `localStorage`, if the page allows it.
    pub fn from_window() -> Result<Self, StoreError> {
        let window = web_sys::window().ok_or_else(|| StoreError::Unavailable("no window".to_owned()))?;
        match window.local_storage() {
            Ok(Some(storage)) => Ok(Self { storage }),
            Ok(None) => Err(StoreError::Unavailable("localStorage disabled".to_owned())),
            Err(err) => Err(StoreError::Unavailable(format!("{err:?}"))),
        }
    }
}

fn classify(err: &JsValue) -> StoreError {
    match err.dyn_ref::<DomException>() {
        Some(dom) if dom.name() == "QuotaExceededError" => StoreError::Quota,
        Some(dom) => StoreError::Unavailable(dom.message()),
        None => StoreError::Unavailable(format!("{err:?}")),
    }
}

impl KeyValueStore for LocalStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.storage.get_item(key) {
            Ok(value) => value,
            Err(err) => {
                log::warn!("localStorage read of `{key}` failed: {err:?}");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.storage.set_item(key, value).map_err(|err| classify(&err))
    }

    fn remove(&self, key: &str) {
        if let Err(err) = self.storage.remove_item(key) {
            log::warn!("localStorage remove of `{key}` failed: {err:?}");
        }
    }

    fn keys(&self) -> Vec<String> {
        let len = self.storage.length().unwrap_or(0);
        (0..len).filter_map(|i| self.storage.key(i).unwrap_or(None)).collect()
    }
}
