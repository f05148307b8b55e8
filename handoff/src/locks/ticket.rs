//! Ticket lock implementation.
//!
//! This module implements a ticket lock, which is a synchronization primitive
//! that provides mutual exclusion and fairness.
//!
//! It is not suitable for high contention scenarios, as every waiter polls the same
//! counter, but it is a good alternative to spin locks in low contention scenarios.
//!
//! Note that rustc currently requires that you at least specify either the back-off strategy
//! (and will infer the type of `T`) or the type of `T` (and will use the default `Spin`
//! back-off strategy).
//!
//! ```rust
//! # use handoff::locks::ticket::TicketLock;
//! # use handoff::locks::Spin;
//! #
//! let lock = TicketLock::<u32>::new(0); // `Spin` is used
//! let lock = TicketLock::<_, Spin>::new(0); // `T` is inferred
//! ```
//!
//! ```rust,compile_fail
//! # use handoff::locks::ticket::TicketLock;
//! let lock = TicketLock::new(0);
//! ```
//!
//! # Example
//!
//! ```rust
//! # use handoff::locks::ticket::TicketLock;
//! let lock = TicketLock::<u8>::new(0);
//!
//! let mut guard = lock.lock();
//! *guard = 42;
//! assert_eq!(*guard, 42);
//! assert!(lock.try_lock().is_none());
//! ```
//!
//! Guards of a `!Sync` type cannot be shared between threads:
//!
//! ```rust,compile_fail
//! # use core::cell::Cell;
//! # use handoff::locks::ticket::TicketLock;
//! fn shareable<S: Sync>(_: &S) {}
//!
//! let lock = TicketLock::<Cell<u8>>::new(Cell::new(0));
//! shareable(&lock.lock());
//! ```
//!
//! ## `try_lock`
//!
//! A ticket cannot be given back, so `try_lock` must only draw one when it is
//! immediately served. On targets with 64-bit atomics both counters live in one word
//! and `try_lock` is a single compare-and-swap from `(v, v)` to `(v + 1, v)`.
//!
//! Elsewhere, the counters are two words and `try_lock` reads `serving` before
//! swapping `issued`. It is still exact unless `issued` wraps all the way around
//! between the two steps.

use super::{BackOff, Spin};
use core::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::Ordering,
};

/// A ticket lock.
///
/// This is an improved version of the spin lock that guarantees
/// fairness and avoids starvation: tickets are served in the order they are drawn.
///
/// However, it is not suitable for high contention scenarios.
/// In such cases, it is recommended to use MCS locks.
pub struct TicketLock<T, B: BackOff = Spin> {
    /// The issued and now serving ticket numbers.
    counters: Counters,
    /// The inner data protected by the lock.
    data: UnsafeCell<T>,
    /// The back-off strategy to use when the lock is contended.
    _back_off: PhantomData<B>,
}

// Safety:
// The data is only reachable through a guard, and there is at most one guard.
unsafe impl<T: Send, B: BackOff> Send for TicketLock<T, B> {}
unsafe impl<T: Send, B: BackOff> Sync for TicketLock<T, B> {}

impl<T: Default, B: BackOff> Default for TicketLock<T, B> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T, B: BackOff> TicketLock<T, B> {
    #[must_use]
    #[inline]
    /// Creates a new ticket lock.
    pub const fn new(data: T) -> Self {
        Self {
            counters: Counters::new(),
            data: UnsafeCell::new(data),
            _back_off: PhantomData,
        }
    }

    #[must_use]
    /// Locks the ticket lock and returns a guard.
    pub fn lock(&self) -> TicketGuard<'_, T, B> {
        // Get the ticket number for this thread.
        // Nothing is published yet, so this needs no ordering.
        let ticket = self.counters.draw();

        // Wait until it's this thread's turn to acquire the lock.
        loop {
            let ahead = ticket.wrapping_sub(self.counters.serving(Ordering::Acquire));
            if ahead == 0 {
                break;
            }
            B::back_off_for(ahead);
        }

        TicketGuard {
            lock: self,
            _data: PhantomData,
        }
    }

    #[must_use]
    #[inline]
    /// Tries to lock the ticket lock without waiting.
    ///
    /// Only succeeds if nobody holds nor waits for the lock.
    pub fn try_lock(&self) -> Option<TicketGuard<'_, T, B>> {
        // Not `then_some`: a guard built eagerly would unlock on drop
        self.counters.try_claim().then(|| TicketGuard {
            lock: self,
            _data: PhantomData,
        })
    }

    #[inline]
    /// Locks the lock and calls the closure with the guard.
    pub fn with_locked<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut guard = self.lock();
        f(&mut guard)
    }

    #[inline]
    /// Tries to lock the lock and calls the closure with the guard.
    pub fn try_with_locked<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut guard = self.try_lock()?;
        Some(f(&mut guard))
    }

    #[must_use]
    #[inline]
    /// Returns true if some thread holds or waits for the lock.
    ///
    /// The answer may be outdated as soon as it is returned.
    pub fn is_locked(&self) -> bool {
        let (issued, serving) = self.counters.snapshot();
        issued != serving
    }

    #[must_use]
    #[inline]
    #[expect(clippy::mut_from_ref, reason = "Force lock")]
    /// Force access to the data.
    ///
    /// # Safety
    ///
    /// The caller must ensure there are no data races.
    pub unsafe fn force_lock(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }

    #[must_use]
    #[inline]
    /// Returns a mutable reference to the data.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    #[inline]
    /// Unlocks the ticket lock.
    ///
    /// # Safety
    ///
    /// The caller must be the owner of the lock.
    unsafe fn unlock(&self) {
        self.counters.advance();
        B::notify();
    }

    #[must_use]
    #[inline]
    /// Consumes the lock and returns the inner data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

#[cfg(target_has_atomic = "64")]
/// Both counters, packed in a single word.
///
/// `issued` is the high half and `serving` the low half. Being one integer,
/// the packing does not depend on the target's byte order.
struct Counters(core::sync::atomic::AtomicU64);

#[cfg(target_has_atomic = "64")]
impl Counters {
    const ISSUED_SHIFT: u32 = 32;
    const ISSUED_ONE: u64 = 1 << Self::ISSUED_SHIFT;
    const SERVING_MASK: u64 = Self::ISSUED_ONE - 1;

    const fn new() -> Self {
        Self(core::sync::atomic::AtomicU64::new(0))
    }

    #[cfg(test)]
    const fn with_values(issued: u32, serving: u32) -> Self {
        Self(core::sync::atomic::AtomicU64::new(Self::pack(issued, serving)))
    }

    #[inline]
    const fn pack(issued: u32, serving: u32) -> u64 {
        ((issued as u64) << Self::ISSUED_SHIFT) | serving as u64
    }

    #[inline]
    #[expect(clippy::cast_possible_truncation, reason = "Halves are 32 bits wide")]
    const fn unpack(packed: u64) -> (u32, u32) {
        (
            (packed >> Self::ISSUED_SHIFT) as u32,
            (packed & Self::SERVING_MASK) as u32,
        )
    }

    #[inline]
    /// Draws the next ticket.
    fn draw(&self) -> u32 {
        // Overflowing `issued` drops the carry out of the word, wrapping it in place.
        Self::unpack(self.0.fetch_add(Self::ISSUED_ONE, Ordering::Relaxed)).0
    }

    #[inline]
    fn serving(&self, order: Ordering) -> u32 {
        Self::unpack(self.0.load(order)).1
    }

    #[inline]
    /// Serves the next ticket. Only the holder may call this.
    fn advance(&self) {
        // Only the holder writes `serving`, so it can read it relaxed.
        // The increment must not carry into `issued` when `serving` wraps.
        if self.serving(Ordering::Relaxed) == u32::MAX {
            self.0.fetch_sub(Self::SERVING_MASK, Ordering::Release);
        } else {
            self.0.fetch_add(1, Ordering::Release);
        }
    }

    #[inline]
    /// Draws a ticket only if it would be served right away.
    fn try_claim(&self) -> bool {
        let (issued, _) = Self::unpack(self.0.load(Ordering::Relaxed));
        let idle = Self::pack(issued, issued);
        let claimed = Self::pack(issued.wrapping_add(1), issued);
        self.0
            .compare_exchange(idle, claimed, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    fn snapshot(&self) -> (u32, u32) {
        Self::unpack(self.0.load(Ordering::Relaxed))
    }
}

#[cfg(target_has_atomic = "64")]
crate::static_assert!(
    Counters::ISSUED_SHIFT == u32::BITS,
    "`issued` must sit right above a 32 bits `serving`"
);
#[cfg(target_has_atomic = "64")]
crate::static_assert!(Counters::SERVING_MASK == u32::MAX as u64);
#[cfg(target_has_atomic = "64")]
crate::static_assert!(
    Counters::unpack(Counters::pack(u32::MAX, 0)).0 == u32::MAX
        && Counters::unpack(Counters::pack(u32::MAX, 0)).1 == 0
);

#[cfg(not(target_has_atomic = "64"))]
/// Both counters, in two separate words.
struct Counters {
    issued: core::sync::atomic::AtomicU32,
    serving: core::sync::atomic::AtomicU32,
}

#[cfg(not(target_has_atomic = "64"))]
impl Counters {
    const fn new() -> Self {
        Self {
            issued: core::sync::atomic::AtomicU32::new(0),
            serving: core::sync::atomic::AtomicU32::new(0),
        }
    }

    #[cfg(test)]
    const fn with_values(issued: u32, serving: u32) -> Self {
        Self {
            issued: core::sync::atomic::AtomicU32::new(issued),
            serving: core::sync::atomic::AtomicU32::new(serving),
        }
    }

    #[inline]
    fn draw(&self) -> u32 {
        self.issued.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    fn serving(&self, order: Ordering) -> u32 {
        self.serving.load(order)
    }

    #[inline]
    fn advance(&self) {
        let next = self.serving.load(Ordering::Relaxed).wrapping_add(1);
        self.serving.store(next, Ordering::Release);
    }

    #[inline]
    fn try_claim(&self) -> bool {
        // While `issued == serving` nobody holds the lock, so `serving` cannot move
        // until our exchange fails or succeeds.
        let serving = self.serving.load(Ordering::Acquire);
        self.issued
            .compare_exchange(
                serving,
                serving.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    #[inline]
    fn snapshot(&self) -> (u32, u32) {
        (
            self.issued.load(Ordering::Relaxed),
            self.serving.load(Ordering::Relaxed),
        )
    }
}

/// RAII guard for the ticket lock.
pub struct TicketGuard<'l, T, B: BackOff = Spin> {
    lock: &'l TicketLock<T, B>,
    _data: PhantomData<&'l mut T>,
}

impl<T, B: BackOff> Drop for TicketGuard<'_, T, B> {
    #[inline]
    fn drop(&mut self) {
        // Safety: If the guard exists, we have the lock.
        unsafe { self.lock.unlock() };
    }
}

impl<T, B: BackOff> Deref for TicketGuard<'_, T, B> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T, B: BackOff> DerefMut for TicketGuard<'_, T, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}
