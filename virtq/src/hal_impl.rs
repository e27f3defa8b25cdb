//! Default barrier implementation.
//!
//! `core::sync::atomic::fence` orders CPU accesses. On aarch64 the fence alone
//! does not guarantee a DMA master observes the stores, so a DSB follows it.

use core::sync::atomic::{Ordering, fence};

use crate::hal::RingHal;

/// Barriers built from atomic fences.
#[derive(Debug, Clone, Copy, Default)]
pub struct FenceHal;

// SAFETY: SeqCst/Release/Acquire fences give full, store and load ordering on
// every target; aarch64 additionally waits for completion with DSB.
unsafe impl RingHal for FenceHal {
    fn full_barrier() {
        fence(Ordering::SeqCst);
        #[cfg(target_arch = "aarch64")]
        unsafe {
            core::arch::asm!("dsb sy", options(nostack, preserves_flags));
        }
    }

    fn write_barrier() {
        fence(Ordering::Release);
        #[cfg(target_arch = "aarch64")]
        unsafe {
            core::arch::asm!("dsb st", options(nostack, preserves_flags));
        }
    }

    fn read_barrier() {
        fence(Ordering::Acquire);
        #[cfg(target_arch = "aarch64")]
        unsafe {
            core::arch::asm!("dsb ld", options(nostack, preserves_flags));
        }
    }
}
