use core::arch::asm;

/// Hints the processor that the caller is in a spin-wait loop.
#[inline]
pub fn yield_hint() {
    unsafe {
        asm!("yield", options(nomem, nostack, preserves_flags));
    }
}

/// Signals an event to every core.
///
/// The barrier makes the caller's previous stores visible before the event,
/// so a woken core re-reading its condition cannot miss them.
/// The asm block is not `nomem`: the compiler must not sink earlier stores below it.
#[inline]
pub fn sev() {
    unsafe {
        asm!("dsb ish", "sev", options(nostack, preserves_flags));
    }
}

/// Parks the core until an event is signaled.
///
/// Returns immediately if the local event register is already set,
/// and may also return spuriously.
#[inline]
pub fn wfe() {
    unsafe {
        asm!("wfe", options(nostack, preserves_flags));
    }
}
