//! Mellor-Crummey and Scott lock.
//!
//! This module contains the implementation of the Mellor-Crummey and Scott lock.
//! It is a synchronization primitive that is an evolution of the ticket lock and spinlock:
//! waiters are queued in arrival order and each one spins on its own node,
//! so a release only touches the cache line of the next waiter.
//!
//! ## Usage
//!
//! `McsLock` accepts a generic type `T` that is the type of the data protected by the lock.
//! The second generic type `B` is the back-off strategy used by the lock.
//!
//! Note that rustc currently requires that you at least specify either the back-off strategy
//! (and will infer the type of `T`) or the type of `T` (and will use the default `Spin`
//! back-off strategy).
//!
//! ```rust
//! # use handoff::locks::mcs::McsLock;
//! # use handoff::locks::Spin;
//! #
//! let lock = McsLock::<u32>::new(0); // `Spin` is used
//! let lock = McsLock::<_, Spin>::new(0); // `T` is inferred
//! ```
//!
//! To access the content of the lock, use the `with_locked` method.
//! This method is a convenient wrapper around the `lock` method.
//!
//! ```rust
//! # use handoff::locks::mcs::McsLock;
//! #
//! let lock = McsLock::<u8>::new(0);
//!
//! let res = lock.with_locked(|value| {
//!     *value = 42;
//!     *value
//! });
//! assert_eq!(res, 42);
//! ```
//!
//! If you need a more fine-grained control over the lock, you can use the `lock` method,
//! which lets you handle the guard manually.
//!
//! `McsNode` is a structure used to queue the locks, and they must only be used on one lock
//! at once. The guard borrows the node mutably, so the borrow checker rejects any reuse
//! while the node is queued:
//!
//! ```rust,compile_fail
//! # use handoff::locks::mcs::{McsLock, McsNode};
//! let lock = McsLock::<u8>::new(0);
//! let mut node = McsNode::new();
//!
//! let guard = lock.lock(&mut node);
//! let again = lock.lock(&mut node);
//! # drop(guard);
//! ```
//!
//! Guards unlock the lock automatically on drop, on every exit path.
//!
//! ```rust
//! # use handoff::locks::mcs::{McsLock, McsNode};
//! #
//! let lock = McsLock::<u8>::new(0);
//! let mut node = McsNode::new();
//!
//! let mut guard = lock.lock(&mut node);
//! *guard = 42;
//! assert_eq!(*guard, 42);
//! drop(guard);
//!
//! // The lock is free again!
//! assert!(!lock.is_locked());
//! ```
//!
//! Like the data it protects, a guard is only `Sync` when `T` is:
//!
//! ```rust,compile_fail
//! # use core::cell::Cell;
//! # use handoff::locks::mcs::{McsLock, McsNode};
//! fn shareable<S: Sync>(_: &S) {}
//!
//! let lock = McsLock::<Cell<u8>>::new(Cell::new(0));
//! let mut node = McsNode::new();
//! shareable(&lock.lock(&mut node));
//! ```
//!
//! ## Release strategies
//!
//! A release that finds no successor linked to its node must find out whether one is
//! about to appear. By default this is a compare-and-swap of the tail back to null.
//!
//! With the `swap-release` feature, the tail is swapped to null instead. If a successor
//! was indeed enqueuing, the swapped-out chain is put back and linked behind whoever
//! enqueued in the meantime. The uncontended release then never fails a compare-and-swap,
//! at the cost of a second swap when the race happens.

use super::{BackOff, Spin};
use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

/// Mellor-Crummey and Scott lock.
pub struct McsLock<T, B: BackOff = Spin> {
    /// Tail of the queue.
    tail: AtomicPtr<McsNode>,
    /// Data protected by the lock.
    data: UnsafeCell<T>,
    /// Back-off strategy.
    _back_off: PhantomData<B>,
}

// Safety:
// Mellor-Crummey and Scott lock is a synchronization primitive.
unsafe impl<T: Send, B: BackOff> Send for McsLock<T, B> {}
unsafe impl<T: Send, B: BackOff> Sync for McsLock<T, B> {}

impl<T: Default, B: BackOff> Default for McsLock<T, B> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Node for MCS lock.
///
/// Nodes are basically used as a queue for the lock.
/// Locking with a node means that the node will patiently wait in the queue.
/// Once the node is at the front of the queue, it can access the lock.
///
/// Unless you specifically want to use a node, you shouldn't need to build one yourself.
/// The `with_locked` function will take care of creating a node for you.
pub struct McsNode {
    /// Whether the node is still waiting for its predecessor.
    locked: AtomicBool,
    /// Next node in the queue.
    next: AtomicPtr<McsNode>,
}

impl McsNode {
    #[must_use]
    #[inline]
    /// Returns true if the node is still waiting.
    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    #[must_use]
    #[inline]
    fn next(&self) -> Option<NonNull<Self>> {
        NonNull::new(self.next.load(Ordering::Acquire))
    }

    #[inline]
    fn set_next(&self, next: *mut Self) {
        self.next.store(next, Ordering::Release);
    }
}

impl<T, B: BackOff> McsLock<T, B> {
    #[must_use]
    #[inline]
    /// Creates a new MCS lock.
    pub const fn new(value: T) -> Self {
        Self {
            tail: AtomicPtr::new(ptr::null_mut()),
            data: UnsafeCell::new(value),
            _back_off: PhantomData,
        }
    }

    #[must_use]
    /// Locks the MCS lock and returns a guard.
    ///
    /// For single operations, prefer `with_locked`.
    /// This function allows for a more fine-grained control over the duration of the lock.
    pub fn lock<'s, 'node>(&'s self, node: &'node mut McsNode) -> McsGuard<'node, 's, T, B> {
        // Nobody else can see the node yet
        node.locked.store(true, Ordering::Relaxed);
        node.next.store(ptr::null_mut(), Ordering::Relaxed);

        // Place the node at the end of the queue
        let prev = self.tail.swap(node, Ordering::AcqRel);

        if let Some(prev_ptr) = NonNull::new(prev) {
            // Safety: `prev` cannot be released (and dropped) before it sees us
            // in its `next` field.
            unsafe { prev_ptr.as_ref() }.set_next(node);
            // `prev` may be waiting for this link in its release
            B::notify();

            // Wait until the node is at the front of the queue
            while node.is_locked() {
                B::wait_event();
            }
        }

        McsGuard {
            lock: self,
            node,
            _data: PhantomData,
        }
    }

    #[must_use]
    /// Tries to lock the MCS lock and returns a guard.
    /// If it is already in use, does nothing.
    ///
    /// The node is never queued: this fails as soon as any thread holds or waits for the lock.
    ///
    /// For single operations, prefer `try_with_locked`.
    /// This function allows for a more fine-grained control over the duration of the lock.
    pub fn try_lock<'s, 'node>(
        &'s self,
        node: &'node mut McsNode,
    ) -> Option<McsGuard<'node, 's, T, B>> {
        // Assert the node is ready to be used
        node.next.store(ptr::null_mut(), Ordering::Relaxed);
        // Note: we do not care about `locked` here as this field will never be accessed

        // Try to place the node at the end of the queue
        self.tail
            .compare_exchange(ptr::null_mut(), node, Ordering::AcqRel, Ordering::Relaxed)
            .ok()?;

        Some(McsGuard {
            lock: self,
            node,
            _data: PhantomData,
        })
    }

    #[inline]
    /// Locks the lock and calls the closure with the guard.
    pub fn with_locked<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut node = McsNode::new();
        let mut guard = self.lock(&mut node);
        f(&mut guard)
    }

    #[inline]
    /// Tries to lock the lock and calls the closure with the guard.
    pub fn try_with_locked<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut node = McsNode::new();
        let mut guard = self.try_lock(&mut node)?;
        Some(f(&mut guard))
    }

    #[must_use]
    #[inline]
    /// Returns true if some thread holds or waits for the lock.
    ///
    /// The answer may be outdated as soon as it is returned.
    pub fn is_locked(&self) -> bool {
        !self.tail.load(Ordering::Relaxed).is_null()
    }

    #[must_use]
    #[inline]
    #[expect(clippy::mut_from_ref, reason = "Force lock")]
    /// Force access to the data.
    ///
    /// ## Safety
    ///
    /// Caller is responsible for ensuring there are no data races.
    pub unsafe fn force_lock(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }

    #[must_use]
    #[inline]
    /// Returns a mutable reference to the data.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    #[must_use]
    #[inline]
    /// Consume the lock and returns the inner data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    #[inline]
    /// Releases the lock held through `node`, with the strategy selected at build time.
    ///
    /// ## Safety
    ///
    /// `node` must be the node the lock is currently held with.
    unsafe fn unlock(&self, node: &McsNode) {
        if cfg!(feature = "swap-release") {
            unsafe { self.release_by_swap(node) };
        } else {
            unsafe { self.release_by_cas(node) };
        }
    }

    /// Releases the lock, detecting a concurrent enqueue with a compare-and-swap.
    ///
    /// ## Safety
    ///
    /// `node` must be the node the lock is currently held with.
    unsafe fn release_by_cas(&self, node: &McsNode) {
        // Check if the node is the back of the queue
        if node.next().is_none() {
            if self
                .tail
                .compare_exchange(
                    ptr::from_ref(node).cast_mut(),
                    ptr::null_mut(),
                    Ordering::Release,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return;
            }

            // If setting the tail to null fails, it means a new node is being added.
            // In such a case, wait until it is completely added.
            Self::wait_for_successor(node);
        }

        unsafe { Self::hand_off(node) };
    }

    /// Releases the lock, detecting a concurrent enqueue with swaps only.
    ///
    /// ## Safety
    ///
    /// `node` must be the node the lock is currently held with.
    unsafe fn release_by_swap(&self, node: &McsNode) {
        if node.next().is_some() {
            unsafe { Self::hand_off(node) };
            return;
        }

        let old_tail = self.tail.swap(ptr::null_mut(), Ordering::AcqRel);
        if ptr::eq(old_tail, node) {
            return;
        }

        #[cfg(test)]
        tests::between_swaps();

        // Nodes were queued behind us and we just unlinked them from the tail.
        // Put them back: whoever enqueued on the empty tail meanwhile (the usurpers)
        // now holds the lock, and our waiters must queue behind the last of them.
        let usurper = self.tail.swap(old_tail, Ordering::AcqRel);
        Self::wait_for_successor(node);

        if let Some(usurper) = NonNull::new(usurper) {
            // Safety: the usurper was the tail until our swap, so its release
            // cannot complete before it sees our waiters in its `next` field.
            unsafe { usurper.as_ref() }.set_next(node.next.load(Ordering::Acquire));
            B::notify();
        } else {
            unsafe { Self::hand_off(node) };
        }
    }

    #[inline]
    /// Waits until the thread enqueued behind `node` links itself.
    fn wait_for_successor(node: &McsNode) {
        // As this operation should be very fast, we can afford to spin here.
        while node.next().is_none() {
            B::wait_event();
        }
    }

    #[inline]
    /// Gives the lock to the node linked behind `node`.
    ///
    /// ## Safety
    ///
    /// `node` must hold the lock and have a successor.
    unsafe fn hand_off(node: &McsNode) {
        let next = node.next.load(Ordering::Acquire);
        debug_assert!(!next.is_null());

        // The successor may return and drop its node as soon as this store lands.
        unsafe { &*next }.locked.store(false, Ordering::Release);
        B::notify();
    }
}

impl Default for McsNode {
    /// Creates a new node for the MCS lock.
    fn default() -> Self {
        Self::new()
    }
}

impl McsNode {
    #[must_use]
    #[inline]
    /// Creates a new node for the MCS lock.
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

/// RAII guard for MCS lock.
pub struct McsGuard<'node, 'lock, T, B: BackOff = Spin> {
    lock: &'lock McsLock<T, B>,
    node: &'node McsNode,
    /// Sharing the guard shares `&T`, so it is only `Sync` if `T` is.
    _data: PhantomData<&'lock mut T>,
}

impl<T, B: BackOff> Deref for McsGuard<'_, '_, T, B> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T, B: BackOff> DerefMut for McsGuard<'_, '_, T, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T, B: BackOff> Drop for McsGuard<'_, '_, T, B> {
    #[inline]
    fn drop(&mut self) {
        // Safety: If the guard exists, we hold the lock through its node.
        unsafe { self.lock.unlock(self.node) };
    }
}
