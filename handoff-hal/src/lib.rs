//! Architecture-specific spin and wake instructions.
//!
//! Every target exposes the same three functions and one constant:
//!
//! - `spin_hint` tells the processor the caller is busy-waiting,
//! - `send_event` wakes every core parked in `wait_for_event`,
//! - `wait_for_event` parks the core until an event (or a spurious wake-up),
//! - `EVENTS` is `true` when `wait_for_event` really parks the core.
//!
//! On targets without event-driven wait, `send_event` does nothing and
//! `wait_for_event` degrades to `spin_hint`.
//!
//! `wait_for_event` may return without a matching `send_event`:
//! callers must always re-check the condition they are waiting on.
//!
//! ```rust
//! use core::sync::atomic::{AtomicBool, Ordering};
//!
//! let ready = AtomicBool::new(true);
//! while !ready.load(Ordering::Acquire) {
//!     handoff_hal::wait_for_event();
//! }
//! handoff_hal::send_event();
//! ```
#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(clippy::pedantic, clippy::nursery)]

#[cfg(any(target_arch = "aarch64", all(target_arch = "arm", target_feature = "v7")))]
mod arm;
#[cfg(not(any(
    target_arch = "x86",
    target_arch = "x86_64",
    target_arch = "aarch64",
    all(target_arch = "arm", target_feature = "v7")
)))]
mod fallback;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod x86;

#[cfg(any(target_arch = "aarch64", all(target_arch = "arm", target_feature = "v7")))]
pub use arm::*;
#[cfg(not(any(
    target_arch = "x86",
    target_arch = "x86_64",
    target_arch = "aarch64",
    all(target_arch = "arm", target_feature = "v7")
)))]
pub use fallback::*;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use x86::*;
