//! Time seams: a millisecond clock and an async sleep.
//!
//! SYSTEM CONTEXT
//! ==============
//! Everything runs on the host's single UI task queue. Components never read
//! wall time directly; they go through [`Clock`] so tests can drive them with
//! a manual clock, and they suspend only through [`Timer`].

use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::LocalBoxFuture;

/// Source of "now" in milliseconds since the Unix epoch.
pub trait Clock {
    fn now_ms(&self) -> i64;
}

/// Cooperative sleep on the host task queue.
pub trait Timer {
    fn sleep(&self, ms: u64) -> LocalBoxFuture<'static, ()>;
}

/// Wall clock for native tools. Browser builds supply their own.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
            return 0;
        };
        i64::try_from(duration.as_millis()).unwrap_or(0)
    }
}
