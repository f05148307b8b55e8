//! Naive spinlock.
//!
//! A single atomic flag, taken with a compare-and-swap loop.
//!
//! It is the cheapest lock when uncontended, but it provides neither
//! fairness nor bounded waiting: a thread can lose the race forever.
//! Prefer `TicketLock` or `McsLock` if this matters.
//!
//! ```rust
//! # use handoff::locks::naive::SpinLock;
//! # use handoff::locks::Event;
//! #
//! let lock = SpinLock::<u32>::new(0); // `Spin` is used
//! let lock = SpinLock::<_, Event>::new(0_u32); // `T` is inferred
//! ```
//!
//! # Example
//!
//! ```rust
//! # use handoff::locks::naive::SpinLock;
//! let lock = SpinLock::<u8>::new(0);
//!
//! let mut guard = lock.lock();
//! *guard = 42;
//! assert!(lock.try_lock().is_none());
//! drop(guard);
//!
//! assert_eq!(lock.try_with_locked(|value| *value), Some(42));
//! ```
//!
//! A guard hands out `&T`, so it can only be shared between threads if `T` is `Sync`:
//!
//! ```rust,compile_fail
//! # use core::cell::Cell;
//! # use handoff::locks::naive::SpinLock;
//! fn shareable<S: Sync>(_: &S) {}
//!
//! let lock = SpinLock::<Cell<u64>>::new(Cell::new(0));
//! let guard = lock.lock();
//! shareable(&guard);
//! ```

use super::{BackOff, Spin};
use core::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

/// A compare-and-swap spinlock.
pub struct SpinLock<T, B: BackOff = Spin> {
    /// Whether the lock is held.
    locked: AtomicBool,
    /// The inner data protected by the lock.
    data: UnsafeCell<T>,
    /// The back-off strategy to use when the lock is contended.
    _back_off: PhantomData<B>,
}

// Safety:
// The data is only reachable through a guard, and there is at most one guard.
unsafe impl<T: Send, B: BackOff> Send for SpinLock<T, B> {}
unsafe impl<T: Send, B: BackOff> Sync for SpinLock<T, B> {}

impl<T: Default, B: BackOff> Default for SpinLock<T, B> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T, B: BackOff> SpinLock<T, B> {
    #[must_use]
    #[inline]
    /// Creates a new unlocked spinlock.
    pub const fn new(data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
            _back_off: PhantomData,
        }
    }

    #[must_use]
    /// Locks the spinlock and returns a guard.
    pub fn lock(&self) -> SpinGuard<'_, T, B> {
        // The exchange must be strong: a spurious failure followed by `wait_event`
        // could park us waiting for a release that already happened.
        while self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            B::wait_event();
        }

        SpinGuard {
            lock: self,
            _data: PhantomData,
        }
    }

    #[must_use]
    #[inline]
    /// Tries to lock the spinlock once, without spinning.
    pub fn try_lock(&self) -> Option<SpinGuard<'_, T, B>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;

        Some(SpinGuard {
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
    /// Returns true if some thread holds the lock.
    ///
    /// The answer may be outdated as soon as it is returned.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
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
    ///
    /// No locking is needed: the exclusive borrow proves there is no guard.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    #[must_use]
    #[inline]
    /// Consumes the lock and returns the inner data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    #[inline]
    /// Unlocks the spinlock.
    ///
    /// # Safety
    ///
    /// The caller must be the owner of the lock.
    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
        B::notify();
    }
}

/// RAII guard for the spinlock.
pub struct SpinGuard<'l, T, B: BackOff = Spin> {
    lock: &'l SpinLock<T, B>,
    /// Sharing the guard shares `&T`, so it is only `Sync` if `T` is.
    _data: PhantomData<&'l mut T>,
}

impl<T, B: BackOff> Drop for SpinGuard<'_, T, B> {
    #[inline]
    fn drop(&mut self) {
        // Safety: If the guard exists, we have the lock.
        unsafe { self.lock.unlock() };
    }
}

impl<T, B: BackOff> Deref for SpinGuard<'_, T, B> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T, B: BackOff> DerefMut for SpinGuard<'_, T, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}
