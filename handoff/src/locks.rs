//! Locks related utilities.
//!
//! This module contains four spinning locks. They are peers: pick one per
//! protected resource.
//!
//! ## Modules
//!
//! - `naive` : A compare-and-swap spinlock. No fairness.
//! - `ticket` : A FIFO ticket lock with a single-word `try_lock`.
//! - `mcs` : The Mellor-Crummey and Scott queue lock, with caller-provided nodes.
//! - `gta` : An array-based queue lock with one pre-allocated slot per participant.
//!
//! ## Back-off Strategy
//!
//! Every lock is generic over a `BackOff` strategy, which decides what a thread
//! does while it cannot make progress.
//!
//! - `Spin` only hints the processor (`pause`, `yield`).
//! - `Event` parks waiting cores with `wfe` and wakes them with `sev` on
//!   targets that support it, and behaves like `Spin` elsewhere.
//!
//! Waking up is never a correctness signal: lock code always re-checks its
//! condition after `wait_event` returns.

pub mod gta;
pub mod mcs;
pub mod naive;
pub mod ticket;

/// A trait that defines a back-off strategy for locks.
///
/// This trait is used to define how a thread should behave when it
/// is unable to acquire a lock. Only `back_off` is required: the other
/// methods default to plain spinning, which is always correct.
pub trait BackOff {
    /// Performs the back-off operation.
    fn back_off();

    #[inline]
    /// Backs off for a duration proportional to `distance`,
    /// the number of threads known to be ahead of the caller.
    fn back_off_for(distance: u32) {
        for _ in 0..distance {
            Self::back_off();
        }
    }

    #[inline]
    /// Waits until another thread might have released something.
    ///
    /// Can return at any time: callers must re-check their condition.
    fn wait_event() {
        Self::back_off();
    }

    #[inline]
    /// Wakes threads parked in `wait_event`.
    ///
    /// Must be called after every store that can unblock a waiter.
    fn notify() {}
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// A back-off strategy that uses a spin-wait loop.
///
/// Calls the architecture's spin hint, which is `pause` on x86
/// and `yield` on ARM.
pub struct Spin;

impl BackOff for Spin {
    #[inline]
    fn back_off() {
        handoff_hal::spin_hint();
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// A back-off strategy that parks waiting cores until a release signals them.
///
/// On targets without event-driven wait, this is exactly `Spin`.
pub struct Event;

impl BackOff for Event {
    #[inline]
    fn back_off() {
        handoff_hal::spin_hint();
    }

    #[inline]
    fn back_off_for(distance: u32) {
        if handoff_hal::EVENTS {
            // Every release signals, there is no point in spinning longer
            handoff_hal::wait_for_event();
        } else {
            for _ in 0..distance {
                handoff_hal::spin_hint();
            }
        }
    }

    #[inline]
    fn wait_event() {
        handoff_hal::wait_for_event();
    }

    #[inline]
    fn notify() {
        handoff_hal::send_event();
    }
}
