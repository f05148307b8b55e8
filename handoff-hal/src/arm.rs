//! AArch64 and ARMv7 instructions.
//!
//! Both have the `sev`/`wfe` pair, which lets a spinning core sleep until
//! a releasing core signals it.
mod instructions;

pub use instructions::{sev as send_event, wfe as wait_for_event, yield_hint as spin_hint};

/// `wfe` parks the core until an event is signaled.
pub const EVENTS: bool = true;
