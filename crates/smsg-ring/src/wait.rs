//! Futex-style wait/notify shims used by the protocol layer.
//!
//! The endpoint parks suspended senders and the close path drains busy pins
//! through these helpers rather than spinning. Backed by the `atomic-wait`
//! crate (futex where available).

use std::sync::atomic::AtomicU32;

/// Blocks the current thread while `atomic` still holds `expected`.
///
/// Wakeups may be spurious; callers re-check their predicate in a loop.
#[inline]
pub fn wait_u32(atomic: &AtomicU32, expected: u32) {
    atomic_wait::wait(atomic, expected);
}

/// Wakes at most one thread parked on `atomic`.
#[inline]
pub fn wake_one(atomic: &AtomicU32) {
    atomic_wait::wake_one(atomic as *const AtomicU32);
}

/// Wakes every thread parked on `atomic`.
#[inline]
pub fn wake_all(atomic: &AtomicU32) {
    atomic_wait::wake_all(atomic as *const AtomicU32);
}
