//! Debounce/throttle operators and the serial navigation executor.
//!
//! SYSTEM CONTEXT
//! ==============
//! There is one task queue. [`Debounce`] and [`Throttle`] are pure
//! timestamp arithmetic: the owner asks "is it due?" with the current time
//! and arms a host timer for [`Debounce::deadline`]. [`SerialQueue`] keeps
//! a ticket line with one waker per entrant, so each job starts only after
//! the previous job's permit is dropped, even when an entrant in between
//! gives up its place.

#[cfg(test)]
#[path = "scheduler_test.rs"]
mod scheduler_test;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// Trailing-edge debounce: each `schedule` pushes the deadline out.
#[derive(Debug, Clone)]
pub struct Debounce {
    delay_ms: i64,
    deadline: Option<i64>,
}

impl Debounce {
    #[must_use]
    pub fn new(delay_ms: u64) -> Self {
        Self { delay_ms: i64::try_from(delay_ms).unwrap_or(i64::MAX), deadline: None }
    }

    pub fn schedule(&mut self, now: i64) {
        self.deadline = Some(now.saturating_add(self.delay_ms));
    }

    #[must_use]
    pub fn deadline(&self) -> Option<i64> {
        self.deadline
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    #[must_use]
    pub fn due(&self, now: i64) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    /// Clear and return `true` if the deadline has passed.
    pub fn take_due(&mut self, now: i64) -> bool {
        if self.due(now) {
            self.deadline = None;
            true
        } else {
            false
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

/// Minimum spacing between runs.
#[derive(Debug, Clone)]
pub struct Throttle {
    window_ms: i64,
    last: Option<i64>,
}

impl Throttle {
    #[must_use]
    pub fn new(window_ms: u64) -> Self {
        Self { window_ms: i64::try_from(window_ms).unwrap_or(i64::MAX), last: None }
    }

    #[must_use]
    pub fn ready(&self, now: i64) -> bool {
        self.last.is_none_or(|last| now.saturating_sub(last) >= self.window_ms)
    }

    pub fn record(&mut self, now: i64) {
        self.last = Some(now);
    }

    #[must_use]
    pub fn last(&self) -> Option<i64> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Shared cancellation flag for one in-flight job.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Rc<Cell<bool>>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.set(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }
}

/// FIFO serial executor. Jobs hold a [`SerialPermit`] while they run.
#[derive(Debug, Default)]
pub struct SerialQueue {
    state: Rc<RefCell<QueueState>>,
}

#[derive(Debug, Default)]
struct QueueState {
    next_ticket: u64,
    running: bool,
    /// Entrants in arrival order with the waker of their last poll.
    waiting: VecDeque<(u64, Option<Waker>)>,
}

impl QueueState {
    /// Waker of the next entrant, when nothing is running.
    fn head_waker(&mut self) -> Option<Waker> {
        if self.running {
            return None;
        }
        self.waiting.front_mut().and_then(|(_, waker)| waker.take())
    }
}

/// A place in line; resolves to the permit. Dropping it before it resolves
/// leaves the line without releasing anyone ahead of their turn.
#[derive(Debug)]
pub struct SerialEntry {
    state: Rc<RefCell<QueueState>>,
    ticket: u64,
    admitted: bool,
}

impl Future for SerialEntry {
    type Output = SerialPermit;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<SerialPermit> {
        let state = Rc::clone(&self.state);
        let mut inner = state.borrow_mut();
        let ticket = self.ticket;
        let at_head = inner.waiting.front().is_some_and(|(t, _)| *t == ticket);
        if at_head && !inner.running {
            inner.waiting.pop_front();
            inner.running = true;
            self.admitted = true;
            return Poll::Ready(SerialPermit { state: Rc::clone(&self.state) });
        }
        if let Some((_, waker)) = inner.waiting.iter_mut().find(|(t, _)| *t == ticket) {
            *waker = Some(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl Drop for SerialEntry {
    fn drop(&mut self) {
        if self.admitted {
            return;
        }
        let ticket = self.ticket;
        let next = {
            let mut inner = self.state.borrow_mut();
            inner.waiting.retain(|(t, _)| *t != ticket);
            inner.head_waker()
        };
        if let Some(waker) = next {
            waker.wake();
        }
    }
}

/// Admits the next queued job when dropped.
#[derive(Debug)]
pub struct SerialPermit {
    state: Rc<RefCell<QueueState>>,
}

impl Drop for SerialPermit {
    fn drop(&mut self) {
        let next = {
            let mut inner = self.state.borrow_mut();
            inner.running = false;
            inner.head_waker()
        };
        if let Some(waker) = next {
            waker.wake();
        }
    }
}

impl SerialQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a place in line. The entry resolves once every earlier entrant
    /// has either finished with its permit or given up its place.
    pub fn enter(&self) -> SerialEntry {
        let mut inner = self.state.borrow_mut();
        let ticket = inner.next_ticket;
        inner.next_ticket += 1;
        inner.waiting.push_back((ticket, None));
        SerialEntry { state: Rc::clone(&self.state), ticket, admitted: false }
    }

    /// Jobs waiting or running.
    #[must_use]
    pub fn pending(&self) -> usize {
        let inner = self.state.borrow();
        inner.waiting.len() + usize::from(inner.running)
    }
}
