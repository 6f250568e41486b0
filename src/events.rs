//! Typed observer with add/remove semantics and listener error isolation.
//!
//! DESIGN
//! ======
//! Listeners are snapshotted before dispatch, so a listener may subscribe or
//! unsubscribe (itself included) while an event is being emitted. A listener
//! that returns an error is logged and skipped; later listeners still run.

#[cfg(test)]
#[path = "events_test.rs"]
mod events_test;

use std::cell::{Cell, RefCell};
use std::error::Error;
use std::rc::Rc;

/// Error type listeners may return.
pub type ListenerError = Box<dyn Error>;

type Listener<T> = Rc<dyn Fn(&T) -> Result<(), ListenerError>>;

/// Handle returned by [`EventEmitter::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct EventEmitter<T> {
    name: &'static str,
    next_id: Cell<u64>,
    listeners: RefCell<Vec<(ListenerId, Listener<T>)>>,
}

impl<T> EventEmitter<T> {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self { name, next_id: Cell::new(0), listeners: RefCell::new(Vec::new()) }
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) -> Result<(), ListenerError> + 'static,
    {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    /// Returns whether a listener was removed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Dispatch to every listener; returns how many succeeded.
    pub fn emit(&self, event: &T) -> usize {
        let snapshot: Vec<(ListenerId, Listener<T>)> = self.listeners.borrow().clone();
        let mut delivered = 0;
        for (id, listener) in snapshot {
            match listener(event) {
                Ok(()) => delivered += 1,
                Err(err) => log::warn!("{} listener {} failed: {err}", self.name, id.0),
            }
        }
        delivered
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.borrow().is_empty()
    }
}

impl<T> std::fmt::Debug for EventEmitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("name", &self.name)
            .field("listeners", &self.len())
            .finish()
    }
}
