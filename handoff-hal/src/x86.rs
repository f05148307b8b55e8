//! x86 and x86_64 instructions.
//!
//! These targets have no event-driven wait: spinners simply `pause`.
mod instructions;

pub use instructions::pause as spin_hint;

/// x86 cannot park a core until another one signals it.
pub const EVENTS: bool = false;

#[inline]
pub fn send_event() {}

#[inline]
pub fn wait_for_event() {
    spin_hint();
}
