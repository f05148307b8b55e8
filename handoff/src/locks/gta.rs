//! Array-based queue lock, after Graunke and Thakkar.
//!
//! Like the MCS lock, every waiter spins on its own memory location, but those
//! locations are pre-allocated: the lock owns one slot per participant, and a
//! participant keeps its slot for as long as it lives instead of bringing a node
//! to every acquisition.
//!
//! Each slot holds a single parity bit. The tail of the lock records which slot
//! was enqueued last and the parity it had at that time. A thread enqueues by
//! swapping its own (slot, parity) in the tail, then waits until the slot it got
//! back flips its parity. Releasing is flipping one's own slot.
//!
//! ## Participants
//!
//! The number of participants `N` is fixed at compile time. Each thread needs a
//! `Participant` handle, which owns one of the `N` slots.
//!
//! ```rust
//! # use handoff::locks::gta::GtaLock;
//! #
//! let lock = GtaLock::<u32, 4>::new(0);
//! let mut me = lock.register().unwrap();
//!
//! let mut guard = lock.lock(&mut me);
//! *guard = 42;
//! drop(guard);
//!
//! assert_eq!(lock.with_locked(&mut me, |value| *value), 42);
//! ```
//!
//! Registering more than `N` participants fails:
//!
//! ```rust
//! # use handoff::locks::gta::{GtaError, GtaLock};
//! #
//! let lock = GtaLock::<(), 1>::new(());
//! let _me = lock.register().unwrap();
//! assert_eq!(lock.register().err(), Some(GtaError::Exhausted { capacity: 1 }));
//! ```
//!
//! A guard over a `!Sync` type cannot be shared between threads:
//!
//! ```rust,compile_fail
//! # use core::cell::Cell;
//! # use handoff::locks::gta::GtaLock;
//! fn shareable<S: Sync>(_: &S) {}
//!
//! let lock = GtaLock::<Cell<u8>, 2>::new(Cell::new(0));
//! let mut me = lock.register().unwrap();
//! shareable(&lock.lock(&mut me));
//! ```
//!
//! ## No `try_lock`
//!
//! Enqueuing is an unconditional swap: there is no way to back out of the queue
//! once in it. This lock therefore has no `try_lock`.
//!
//! ```rust,compile_fail
//! # use handoff::locks::gta::GtaLock;
//! let lock = GtaLock::<u8, 2>::new(0);
//! let mut me = lock.register().unwrap();
//! let guard = lock.try_lock(&mut me);
//! ```

use super::{BackOff, Spin};
use core::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering, fence},
};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GtaError {
    #[error("Participant id {id} is out of range (capacity {capacity})")]
    OutOfRange { id: usize, capacity: usize },
    #[error("All {capacity} participant slots are taken")]
    Exhausted { capacity: usize },
}

pub type GtaResult<T> = Result<T, GtaError>;

#[repr(align(64))]
/// A participant's slot, alone on its cache line.
struct Slot {
    parity: AtomicBool,
}

impl Slot {
    const fn new() -> Self {
        Self {
            parity: AtomicBool::new(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The value of the tail: a slot and the parity it had when it was enqueued.
///
/// The lock is free for whoever dequeues a waypoint once its slot's parity
/// differs from the recorded one.
struct Waypoint {
    slot: usize,
    parity: bool,
}

impl Waypoint {
    #[inline]
    const fn pack(self) -> usize {
        (self.slot << 1) | self.parity as usize
    }

    #[inline]
    const fn unpack(packed: usize) -> Self {
        Self {
            slot: packed >> 1,
            parity: (packed & 1) == 1,
        }
    }
}

/// Graunke and Thakkar array-based queue lock, for at most `N` participants.
pub struct GtaLock<T, const N: usize, B: BackOff = Spin> {
    /// Packed `Waypoint` of the last enqueued participant.
    tail: AtomicUsize,
    /// One slot per participant.
    slots: [Slot; N],
    /// Amount of slots handed out by `register`.
    registered: AtomicUsize,
    /// Data protected by the lock.
    data: UnsafeCell<T>,
    /// Back-off strategy.
    _back_off: PhantomData<B>,
}

// Safety:
// The data is only reachable through a guard, and there is at most one guard.
unsafe impl<T: Send, const N: usize, B: BackOff> Send for GtaLock<T, N, B> {}
unsafe impl<T: Send, const N: usize, B: BackOff> Sync for GtaLock<T, N, B> {}

impl<T: Default, const N: usize, B: BackOff> Default for GtaLock<T, N, B> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// A participant of a `GtaLock`, owning one of its slots.
///
/// A participant is bound to the lock it was created from.
/// Locking takes it by mutable reference, so it can only be in the queue once.
#[derive(Debug)]
pub struct Participant<'l> {
    id: usize,
    /// Address of the lock this participant belongs to.
    owner: usize,
    _lock: PhantomData<&'l ()>,
}

impl Participant<'_> {
    #[must_use]
    #[inline]
    /// Returns the index of the slot owned by this participant.
    pub const fn id(&self) -> usize {
        self.id
    }
}

impl<T, const N: usize, B: BackOff> GtaLock<T, N, B> {
    /// The unlocked state right after construction: slot 0 holds parity `false`,
    /// so a waypoint on slot 0 with parity `true` is already passed.
    const INITIAL_TAIL: Waypoint = Waypoint {
        slot: 0,
        parity: true,
    };

    #[must_use]
    #[inline]
    /// Creates a new array-based queue lock.
    ///
    /// ## Panics
    ///
    /// Panics if `N` is 0. In a const context, this is a compile error.
    pub const fn new(value: T) -> Self {
        assert!(N > 0, "GtaLock needs at least one participant slot");
        Self {
            tail: AtomicUsize::new(Self::INITIAL_TAIL.pack()),
            slots: [const { Slot::new() }; N],
            registered: AtomicUsize::new(0),
            data: UnsafeCell::new(value),
            _back_off: PhantomData,
        }
    }

    #[must_use]
    #[inline]
    /// Returns the maximum number of participants.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Registers a new participant, handing out the next free slot.
    ///
    /// Slots are not given back when a participant is dropped, only by `reset`.
    /// Do not mix this with `participant`, which could hand out the same slots.
    pub fn register(&self) -> GtaResult<Participant<'_>> {
        let id = self
            .registered
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |taken| {
                (taken < N).then_some(taken + 1)
            })
            .map_err(|_| {
                log::warn!("GTA lock at {:p}: all {} participant slots are taken", self, N);
                GtaError::Exhausted { capacity: N }
            })?;

        log::trace!("GTA lock at {:p}: registered participant {id}", self);
        Ok(self.bind(id))
    }

    /// Creates the participant owning slot `id`.
    ///
    /// This is meant for callers that already number their threads, such as
    /// CPU indices.
    ///
    /// ## Safety
    ///
    /// There must be no other live participant with the same `id` on this lock,
    /// including one handed out by `register`.
    pub unsafe fn participant(&self, id: usize) -> GtaResult<Participant<'_>> {
        if id >= N {
            return Err(GtaError::OutOfRange { id, capacity: N });
        }
        Ok(self.bind(id))
    }

    #[inline]
    fn bind(&self, id: usize) -> Participant<'_> {
        Participant {
            id,
            owner: self.address(),
            _lock: PhantomData,
        }
    }

    #[inline]
    fn address(&self) -> usize {
        core::ptr::from_ref(self).addr()
    }

    #[must_use]
    /// Locks the lock and returns a guard.
    ///
    /// ## Panics
    ///
    /// Panics if `participant` belongs to another lock.
    pub fn lock<'s, 'p>(
        &'s self,
        participant: &'p mut Participant<'s>,
    ) -> GtaGuard<'p, 's, T, N, B> {
        assert_eq!(
            participant.owner,
            self.address(),
            "Participant belongs to another GtaLock"
        );

        // Only we write our own slot
        let me = Waypoint {
            slot: participant.id,
            parity: self.slots[participant.id].parity.load(Ordering::Relaxed),
        };
        let ahead = Waypoint::unpack(self.tail.swap(me.pack(), Ordering::AcqRel));

        // Wait for the participant ahead of us to flip its slot
        let awaited = &self.slots[ahead.slot].parity;
        while awaited.load(Ordering::Relaxed) == ahead.parity {
            B::wait_event();
        }
        fence(Ordering::Acquire);

        GtaGuard {
            lock: self,
            participant,
            _data: PhantomData,
        }
    }

    #[inline]
    /// Locks the lock and calls the closure with the guard.
    pub fn with_locked<'s, F, R>(&'s self, participant: &mut Participant<'s>, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut guard = self.lock(participant);
        f(&mut guard)
    }

    #[must_use]
    #[inline]
    /// Returns true if some thread holds or waits for the lock.
    ///
    /// The answer may be outdated as soon as it is returned.
    pub fn is_locked(&self) -> bool {
        let last = Waypoint::unpack(self.tail.load(Ordering::Relaxed));
        self.slots[last.slot].parity.load(Ordering::Relaxed) == last.parity
    }

    /// Puts the lock back in its unlocked state and takes back every slot.
    ///
    /// The exclusive borrow guarantees no participant or guard is alive,
    /// so this also recovers a lock whose guard was leaked.
    pub fn reset(&mut self) {
        let first = Waypoint {
            slot: 0,
            parity: !*self.slots[0].parity.get_mut(),
        };
        *self.tail.get_mut() = first.pack();
        *self.registered.get_mut() = 0;

        log::debug!("GTA lock at {:p}: reset", self);
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
    /// Hands the lock to whoever enqueued behind `id`, if anyone.
    ///
    /// ## Safety
    ///
    /// `id` must be the slot the lock is currently held with.
    unsafe fn unlock(&self, id: usize) {
        let parity = &self.slots[id].parity;
        let flipped = !parity.load(Ordering::Relaxed);
        parity.store(flipped, Ordering::Release);
        B::notify();
    }
}

/// RAII guard for the array-based queue lock.
pub struct GtaGuard<'p, 'l, T, const N: usize, B: BackOff = Spin> {
    lock: &'l GtaLock<T, N, B>,
    participant: &'p Participant<'l>,
    _data: PhantomData<&'l mut T>,
}

impl<T, const N: usize, B: BackOff> Deref for GtaGuard<'_, '_, T, N, B> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T, const N: usize, B: BackOff> DerefMut for GtaGuard<'_, '_, T, N, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T, const N: usize, B: BackOff> Drop for GtaGuard<'_, '_, T, N, B> {
    #[inline]
    fn drop(&mut self) {
        // Safety: If the guard exists, we hold the lock through this slot.
        unsafe { self.lock.unlock(self.participant.id) };
    }
}

#[cfg(test)]
mod tests {
    use super::super::Event;
    use super::*;
    use std::sync::atomic::AtomicIsize;
    use std::thread::{scope, spawn};

    type TestGtaLock<T, const N: usize> = GtaLock<T, N, Spin>;

    fn parity<T, const N: usize, B: BackOff>(lock: &GtaLock<T, N, B>, id: usize) -> bool {
        lock.slots[id].parity.load(Ordering::Relaxed)
    }

    #[test]
    fn test_gta_lock() {
        let lock = TestGtaLock::<_, 2>::new(0);
        let mut me = lock.register().unwrap();

        let mut guard = lock.lock(&mut me);
        *guard = 42;
        assert_eq!(*guard, 42);
        assert!(lock.is_locked());
        drop(guard);
        assert!(!lock.is_locked());
    }

    #[test]
    #[should_panic = "GtaLock needs at least one participant slot"]
    fn test_gta_without_slots() {
        let _ = TestGtaLock::<(), 0>::new(());
    }

    #[test]
    fn test_gta_waypoint() {
        let waypoint = Waypoint {
            slot: 5,
            parity: true,
        };
        assert_eq!(waypoint.pack(), 0b1011);
        assert_eq!(Waypoint::unpack(0b1011), waypoint);
        assert!(!Waypoint::unpack(0b1010).parity);
    }

    #[test]
    fn test_gta_register() {
        let lock = TestGtaLock::<(), 3>::new(());

        let ids = (0..3)
            .map(|_| lock.register().unwrap().id())
            .collect::<Vec<_>>();
        assert_eq!(ids, [0, 1, 2]);
        assert_eq!(
            lock.register().unwrap_err(),
            GtaError::Exhausted { capacity: 3 }
        );
    }

    #[test]
    fn test_gta_participant_out_of_range() {
        let lock = TestGtaLock::<(), 3>::new(());

        let err = unsafe { lock.participant(3) }.unwrap_err();
        assert_eq!(err, GtaError::OutOfRange { id: 3, capacity: 3 });

        let participant = unsafe { lock.participant(2) }.unwrap();
        assert_eq!(participant.id(), 2);
    }

    #[test]
    #[should_panic = "Participant belongs to another GtaLock"]
    fn test_gta_foreign_participant() {
        let lock = TestGtaLock::<(), 2>::new(());
        let other = TestGtaLock::<(), 2>::new(());
        let mut stranger = other.register().unwrap();

        // Lifetimes allow it, the owner check does not
        let _guard = lock.lock(&mut stranger);
    }

    #[test]
    fn test_gta_parity_flips_once_per_cycle() {
        let lock = TestGtaLock::<_, 2>::new(0);
        let mut me = unsafe { lock.participant(1) }.unwrap();
        let initial = parity(&lock, 1);

        for cycle in 1..=7 {
            lock.with_locked(&mut me, |value| *value += 1);
            assert_eq!(parity(&lock, 1), initial ^ (cycle % 2 == 1));
        }
        assert_eq!(lock.into_inner(), 7);
    }

    #[test]
    fn test_gta_slot_zero_first() {
        let lock = TestGtaLock::<_, 2>::new(0);
        let mut first = lock.register().unwrap();
        let mut second = lock.register().unwrap();

        for _ in 0..3 {
            lock.with_locked(&mut first, |value| *value += 1);
            lock.with_locked(&mut second, |value| *value += 1);
            lock.with_locked(&mut second, |value| *value += 1);
        }
        assert_eq!(lock.with_locked(&mut first, |value| *value), 9);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_gta_reset() {
        let mut lock = TestGtaLock::<_, 2>::new(0);

        {
            let mut me = lock.register().unwrap();
            let _ = lock.register().unwrap();
            let mut guard = lock.lock(&mut me);
            *guard = 1;
            // A leaked guard leaves the lock held for good
            core::mem::forget(guard);
        }
        assert!(lock.is_locked());

        lock.reset();
        assert!(!lock.is_locked());

        let mut me = lock.register().unwrap();
        assert_eq!(me.id(), 0);
        assert_eq!(lock.with_locked(&mut me, |value| *value), 1);
    }

    #[test]
    fn test_gta_fifo() {
        let num_threads = 8;
        let lock = GtaLock::<_, 9, Event>::new(Vec::new());

        scope(|s| {
            let mut me = lock.register().unwrap();
            let guard = lock.lock(&mut me);
            let mut tail = lock.tail.load(Ordering::Acquire);

            for arrival in 0..num_threads {
                let mut participant = lock.register().unwrap();
                let lock = &lock;
                s.spawn(move || {
                    lock.with_locked(&mut participant, |order| order.push(arrival));
                });

                // Only let the next thread in once this one swapped itself in the tail
                while lock.tail.load(Ordering::Acquire) == tail {
                    core::hint::spin_loop();
                }
                tail = lock.tail.load(Ordering::Acquire);
            }

            drop(guard);
        });

        let order = lock.into_inner();
        assert_eq!(order, (0..num_threads).collect::<Vec<_>>());
    }

    #[test]
    fn test_gta_concurrent() {
        const THREADS: usize = 6;
        let lock = std::sync::Arc::new(GtaLock::<_, THREADS, Event>::new(0_isize));
        let inside = std::sync::Arc::new(AtomicIsize::new(0));
        let iterations = 2_000;

        let handles = (0..THREADS)
            .map(|id| {
                let lock = lock.clone();
                let inside = inside.clone();
                spawn(move || {
                    // Safety: every thread gets a different id
                    let mut me = unsafe { lock.participant(id) }.unwrap();
                    for _ in 0..iterations {
                        let mut guard = lock.lock(&mut me);
                        assert_eq!(inside.fetch_add(1, Ordering::Relaxed), 0);
                        *guard += 1;
                        inside.fetch_sub(1, Ordering::Relaxed);
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }

        let mut me = unsafe { lock.participant(0) }.unwrap();
        assert_eq!(
            lock.with_locked(&mut me, |value| *value),
            THREADS as isize * iterations
        );
    }
}
