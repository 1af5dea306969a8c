//! Thread coordination primitives shared by the link, the supervisor and the
//! orchestrator.

pub mod mailbox;
pub mod try_lock;

pub use mailbox::Mailbox;
pub use try_lock::{LockGuard, NonBlockingLock};
