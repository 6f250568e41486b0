//! The key-value seam and an in-memory implementation.

use std::cell::RefCell;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("storage quota exceeded")]
    Quota,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// String-keyed storage such as `window.localStorage`.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;

    /// # Errors
    ///
    /// [`StoreError::Quota`] when the backend refuses the write for size.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str);

    fn keys(&self) -> Vec<String>;
}

/// `BTreeMap`-backed store with an optional byte capacity.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RefCell<BTreeMap<String, String>>,
    capacity: Option<usize>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse writes that would push keys plus values past `bytes`.
    #[must_use]
    pub fn with_capacity(bytes: usize) -> Self {
        Self { entries: RefCell::default(), capacity: Some(bytes) }
    }

    #[must_use]
    pub fn from_map(entries: BTreeMap<String, String>) -> Self {
        Self { entries: RefCell::new(entries), capacity: None }
    }

    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.borrow().clone()
    }

    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.entries.borrow().iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if let Some(capacity) = self.capacity {
            let replaced = self.entries.borrow().get(key).map_or(0, |v| key.len() + v.len());
            if self.used_bytes() - replaced + key.len() + value.len() > capacity {
                return Err(StoreError::Quota);
            }
        }
        self.entries.borrow_mut().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.entries.borrow_mut().remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for std::rc::Rc<S> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) {
        (**self).remove(key);
    }

    fn keys(&self) -> Vec<String> {
        (**self).keys()
    }
}
