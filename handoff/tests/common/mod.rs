//! Harness shared by the integration tests.
//!
//! Workers run with a deadline, so a lost wake-up fails the test instead of hanging it,
//! and critical sections are instrumented to count overlapping holders.
#![allow(dead_code)]

use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::mpsc::{RecvTimeoutError, channel};
use std::sync::{Arc, Barrier};
use std::thread::{available_parallelism, spawn};
use std::time::{Duration, Instant};

/// Upper bound for a whole run. A correct run only gets close on a badly oversubscribed host.
pub const DEADLINE: Duration = Duration::from_secs(120);

/// Threads to use for FIFO locks.
///
/// A FIFO lock hands off to the next waiter even if it is not running, so more threads
/// than cores turns every hand-off into a scheduler round trip.
pub fn contenders() -> usize {
    available_parallelism().map_or(2, usize::from).clamp(2, 4)
}

/// Instrumentation of a critical section.
#[derive(Default)]
pub struct Monitor {
    /// Threads currently inside the critical section.
    inside: AtomicUsize,
    /// Times a thread entered while another one was inside.
    violations: AtomicUsize,
    /// Shadow counter, updated with plain loads and stores like unprotected memory.
    value: AtomicI64,
    /// Largest deviation of `value` from 0 seen by a thread.
    deviation: AtomicI64,
}

impl Monitor {
    /// Runs the instrumented critical section: six alternating +1/-1 steps.
    pub fn critical_section(&self) {
        if self.inside.fetch_add(1, Ordering::SeqCst) != 0 {
            self.violations.fetch_add(1, Ordering::Relaxed);
        }

        for step in 0..6 {
            let delta = if step % 2 == 0 { 1 } else { -1 };
            let seen = self.value.load(Ordering::Relaxed);
            self.deviation.fetch_max(seen.abs(), Ordering::Relaxed);
            self.value.store(seen + delta, Ordering::Relaxed);
        }

        self.inside.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::Relaxed)
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn deviation(&self) -> i64 {
        self.deviation.load(Ordering::Relaxed)
    }

    /// Asserts that no two threads were ever inside together.
    pub fn assert_exclusive(&self) {
        assert_eq!(self.violations(), 0, "threads overlapped in the critical section");
        assert_eq!(self.value(), 0);
        assert!(self.deviation() <= 1, "deviation {}", self.deviation());
    }
}

/// Runs `worker(id)` on `threads` threads released together, failing after `DEADLINE`.
///
/// Panics from workers are forwarded to the caller.
pub fn run_workers<F>(threads: usize, worker: F)
where
    F: Fn(usize) + Send + Sync + 'static,
{
    let worker = Arc::new(worker);
    let start = Arc::new(Barrier::new(threads));
    let (done, finished) = channel();

    for id in 0..threads {
        let worker = worker.clone();
        let start = start.clone();
        let done = done.clone();
        spawn(move || {
            start.wait();
            let outcome = catch_unwind(AssertUnwindSafe(|| worker(id)));
            let _ = done.send(outcome);
        });
    }

    let deadline = Instant::now() + DEADLINE;
    for _ in 0..threads {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match finished.recv_timeout(remaining) {
            Ok(Ok(())) => {}
            Ok(Err(panic)) => resume_unwind(panic),
            Err(RecvTimeoutError::Timeout) => {
                panic!("workers still blocked after {DEADLINE:?}: lost wake-up")
            }
            Err(RecvTimeoutError::Disconnected) => unreachable!("the harness keeps a sender"),
        }
    }
}
