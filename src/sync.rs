//! Opt-in thread-safety. Nothing in [`crate::arena`] or [`crate::pool`] is
//! `Sync` on its own — the navigation pointers give no such guarantee —
//! so the process-wide allocator instance wraps its core in a mutex here
//! rather than sprinkling atomics through the block code.

use std::sync::Mutex;

/// A poison-recovering mutex. A panic while holding the lock (e.g. an
/// assertion inside a test build) should not permanently wedge every
/// subsequent allocation, so `lock` recovers the guard from a poisoned
/// mutex rather than propagating the panic.
pub(crate) struct Locked<T> {
  inner: Mutex<T>,
}

impl<T> Locked<T> {
  pub(crate) const fn new(value: T) -> Self {
    Self { inner: Mutex::new(value) }
  }

  pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, T> {
    match self.inner.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }
}
