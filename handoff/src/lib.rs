//! Handoff is a small library of spinning mutual-exclusion primitives.
//!
//! It provides four interchangeable locks for threads sharing one address space:
//! a naive spinlock, a ticket lock, an MCS queue lock and an array-based queue lock.
//! See the `locks` module for how to pick one.
#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(clippy::pedantic, clippy::nursery)]

#[macro_export]
macro_rules! static_assert {
    ($condition:expr $(, $($arg:tt)+)?) => {
        const _: () = assert!($condition $(, $($arg)+)?);
    };
}

pub mod locks;
