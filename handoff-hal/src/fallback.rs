//! Targets without a known spin hint or event instructions.

/// No event-driven wait on this target.
pub const EVENTS: bool = false;

#[inline]
pub fn spin_hint() {}

#[inline]
pub fn send_event() {}

#[inline]
pub fn wait_for_event() {
    spin_hint();
}
