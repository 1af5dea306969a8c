//! Non-blocking reentrant lock.
//!
//! Callers never queue behind each other: if another thread holds the lock,
//! [`NonBlockingLock::try_enter`] fails immediately with [`GatewayError::Busy`].
//! The owning thread may re-enter freely.

use crate::error::{AppResult, GatewayError};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::{RefCell, RefMut};

/// Reentrant try-lock around a value mutated in place.
pub struct NonBlockingLock<T> {
    inner: ReentrantMutex<RefCell<T>>,
}

/// Held lock. Use [`LockGuard::state`] to reach the protected value.
pub struct LockGuard<'a, T> {
    guard: ReentrantMutexGuard<'a, RefCell<T>>,
    operation: &'static str,
}

impl<T> NonBlockingLock<T> {
    /// Wrap `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: ReentrantMutex::new(RefCell::new(value)),
        }
    }

    /// Acquire the lock or fail with `Busy` naming `operation`.
    pub fn try_enter(&self, operation: &'static str) -> AppResult<LockGuard<'_, T>> {
        self.inner
            .try_lock()
            .map(|guard| LockGuard { guard, operation })
            .ok_or_else(|| GatewayError::Busy(operation.to_string()))
    }
}

impl<'a, T> LockGuard<'a, T> {
    /// Mutable access to the protected value.
    ///
    /// A nested re-entry on the same thread that is still borrowing the value
    /// reports `Busy` instead of panicking.
    pub fn state(&self) -> AppResult<RefMut<'_, T>> {
        self.guard
            .try_borrow_mut()
            .map_err(|_| GatewayError::Busy(self.operation.to_string()))
    }
}
