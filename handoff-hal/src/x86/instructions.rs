use core::arch::asm;

/// Hints the processor that the caller is in a spin-wait loop.
///
/// Lowers power usage and avoids the memory-order violation penalty
/// when the loop exits.
#[inline]
pub fn pause() {
    unsafe {
        asm!("pause", options(nomem, nostack, preserves_flags));
    }
}
