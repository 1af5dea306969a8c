//! Single-slot rendezvous between a producer thread and a blocked consumer.
//!
//! A [`Mailbox`] holds at most one item. Posting never blocks: when the slot
//! is already occupied, the newer item replaces the older one and the displaced
//! item is logged as dropped. Taking blocks for a bounded time.
//!
//! The control node link uses two of these: one for the "program ready" marker
//! and one for command answers. The expiration timer uses one as its cancel flag.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::warn;

/// Single-slot buffer, newest item wins.
pub struct Mailbox<T> {
    name: &'static str,
    slot: Mutex<Option<T>>,
    filled: Condvar,
}

impl<T: fmt::Debug> Mailbox<T> {
    /// Create an empty mailbox. `name` is used in the "queue full" log line.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(None),
            filled: Condvar::new(),
        }
    }

    /// Store `item`, waking a blocked [`take`](Self::take).
    ///
    /// Returns the item that was displaced, if the slot was occupied.
    pub fn post(&self, item: T) -> Option<T> {
        let mut slot = self.slot.lock();
        let displaced = slot.replace(item);
        if let Some(old) = &displaced {
            warn!(mailbox = self.name, dropped = ?old, "{} queue full", self.name);
        }
        self.filled.notify_one();
        displaced
    }

    /// Wait up to `timeout` for an item and remove it from the slot.
    pub fn take(&self, timeout: Duration) -> Option<T> {
        // an overflowing deadline means waiting forever
        let deadline = Instant::now().checked_add(timeout);
        let mut slot = self.slot.lock();
        loop {
            if let Some(item) = slot.take() {
                return Some(item);
            }
            match deadline {
                Some(deadline) => {
                    if self.filled.wait_until(&mut slot, deadline).timed_out() {
                        return slot.take();
                    }
                }
                None => self.filled.wait(&mut slot),
            }
        }
    }

    /// Remove and return the pending item without waiting.
    pub fn clear(&self) -> Option<T> {
        self.slot.lock().take()
    }

    /// True when an item is waiting in the slot.
    pub fn is_full(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl<T> fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox").field("name", &self.name).finish()
    }
}
