//! One-shot experiment expiration timer.

use crate::sync::Mailbox;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Runs a callback on its own thread after a delay unless cancelled first.
///
/// The callback returns false when it could not do its job yet; it is then
/// called again every `retry` until it returns true or the timer is
/// cancelled. Cancelling never joins the thread: the callback may be the one
/// dropping the timer.
pub struct ExpirationTimer {
    cancelled: Arc<Mailbox<()>>,
}

impl ExpirationTimer {
    /// Start the countdown.
    pub fn arm<F>(timeout: Duration, retry: Duration, mut on_expire: F) -> io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let cancelled = Arc::new(Mailbox::new("timer cancel"));
        let flag = cancelled.clone();
        thread::Builder::new()
            .name("exp-timer".to_string())
            .spawn(move || {
                if flag.take(timeout).is_some() {
                    debug!("expiration timer cancelled");
                    return;
                }
                debug!(?timeout, "expiration timer fired");
                while !on_expire() {
                    if flag.take(retry).is_some() {
                        debug!("expiration timer cancelled while retrying");
                        return;
                    }
                }
            })?;
        Ok(Self { cancelled })
    }

    /// Prevent the callback from running, or from being retried.
    pub fn cancel(&self) {
        if !self.cancelled.is_full() {
            self.cancelled.post(());
        }
    }
}

impl Drop for ExpirationTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
