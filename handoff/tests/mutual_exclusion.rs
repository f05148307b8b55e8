//! Mutual exclusion of every lock under contention.

mod common;

use common::{Monitor, contenders, run_workers};
use handoff::locks::gta::GtaLock;
use handoff::locks::mcs::{McsLock, McsNode};
use handoff::locks::naive::SpinLock;
use handoff::locks::ticket::TicketLock;
use handoff::locks::{BackOff, Event, Spin};
use std::sync::Arc;

const SLOTS: usize = 4;

fn naive_exclusion<B: BackOff + 'static>(threads: usize, iterations: usize) {
    let lock = Arc::new(SpinLock::<usize, B>::new(0));
    let monitor = Arc::new(Monitor::default());

    run_workers(threads, {
        let lock = lock.clone();
        let monitor = monitor.clone();
        move |_| {
            for _ in 0..iterations {
                let mut guard = lock.lock();
                monitor.critical_section();
                *guard += 1;
            }
        }
    });

    monitor.assert_exclusive();
    assert_eq!(lock.with_locked(|entries| *entries), threads * iterations);
    assert!(!lock.is_locked());
}

fn ticket_exclusion<B: BackOff + 'static>(threads: usize, iterations: usize) {
    let lock = Arc::new(TicketLock::<usize, B>::new(0));
    let monitor = Arc::new(Monitor::default());

    run_workers(threads, {
        let lock = lock.clone();
        let monitor = monitor.clone();
        move |_| {
            for _ in 0..iterations {
                lock.with_locked(|entries| {
                    monitor.critical_section();
                    *entries += 1;
                });
            }
        }
    });

    monitor.assert_exclusive();
    assert_eq!(lock.with_locked(|entries| *entries), threads * iterations);
    assert!(!lock.is_locked());
}

fn mcs_exclusion<B: BackOff + 'static>(threads: usize, iterations: usize) {
    let lock = Arc::new(McsLock::<usize, B>::new(0));
    let monitor = Arc::new(Monitor::default());

    run_workers(threads, {
        let lock = lock.clone();
        let monitor = monitor.clone();
        move |_| {
            // One node for the whole run: it is free again once its guard is gone
            let mut node = McsNode::new();
            for _ in 0..iterations {
                let mut guard = lock.lock(&mut node);
                monitor.critical_section();
                *guard += 1;
            }
        }
    });

    monitor.assert_exclusive();
    assert_eq!(lock.with_locked(|entries| *entries), threads * iterations);
    assert!(!lock.is_locked());
}

fn gta_exclusion<B: BackOff + 'static>(threads: usize, iterations: usize) {
    assert!(threads <= SLOTS);
    let lock = Arc::new(GtaLock::<usize, SLOTS, B>::new(0));
    let monitor = Arc::new(Monitor::default());

    run_workers(threads, {
        let lock = lock.clone();
        let monitor = monitor.clone();
        move |id| {
            // Safety: the harness gives every worker a distinct id
            let mut me = unsafe { lock.participant(id) }.unwrap();
            for _ in 0..iterations {
                let mut guard = lock.lock(&mut me);
                monitor.critical_section();
                *guard += 1;
            }
        }
    });

    monitor.assert_exclusive();
    let mut me = lock.register().unwrap();
    assert_eq!(lock.with_locked(&mut me, |entries| *entries), threads * iterations);
    assert!(!lock.is_locked());
}

#[test]
fn naive_four_threads() {
    naive_exclusion::<Spin>(4, 100_000);
}

#[test]
fn naive_four_threads_event() {
    naive_exclusion::<Event>(4, 10_000);
}

#[test]
fn ticket() {
    ticket_exclusion::<Spin>(contenders(), 10_000);
}

#[test]
fn ticket_event() {
    ticket_exclusion::<Event>(contenders(), 10_000);
}

#[test]
fn mcs() {
    mcs_exclusion::<Spin>(contenders(), 10_000);
}

#[test]
fn mcs_event() {
    mcs_exclusion::<Event>(contenders(), 10_000);
}

#[test]
fn gta() {
    gta_exclusion::<Spin>(contenders(), 10_000);
}

#[test]
fn gta_event() {
    gta_exclusion::<Event>(contenders(), 10_000);
}

#[test]
fn static_locks() {
    static NAIVE: SpinLock<u64> = SpinLock::new(0);
    static TICKET: TicketLock<u64> = TicketLock::new(0);
    static MCS: McsLock<u64> = McsLock::new(0);
    static GTA: GtaLock<u64, SLOTS> = GtaLock::new(0);

    run_workers(2, |_| {
        let mut me = GTA.register().unwrap();
        for _ in 0..1_000 {
            NAIVE.with_locked(|value| *value += 1);
            TICKET.with_locked(|value| *value += 1);
            MCS.with_locked(|value| *value += 1);
            GTA.with_locked(&mut me, |value| *value += 1);
        }
    });

    assert_eq!(NAIVE.with_locked(|value| *value), 2_000);
    assert_eq!(TICKET.with_locked(|value| *value), 2_000);
    assert_eq!(MCS.with_locked(|value| *value), 2_000);
    let mut me = GTA.register().unwrap();
    assert_eq!(GTA.with_locked(&mut me, |value| *value), 2_000);
}
