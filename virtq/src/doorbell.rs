//! Doorbell register notifier.

use core::ptr::{NonNull, write_volatile};

use crate::hal::Notifier;

/// A 16-bit notification register. Writing the queue index kicks the device.
///
/// PCI legacy (QUEUE_NOTIFY) and modern notify capabilities both take the
/// queue index as the written value.
#[derive(Debug)]
pub struct Doorbell {
    reg: NonNull<u16>,
}

impl Doorbell {
    /// # Safety
    ///
    /// `reg` must be a mapped, writable notification register (or plain memory
    /// in tests) for the lifetime of the doorbell.
    pub const unsafe fn new(reg: NonNull<u16>) -> Self {
        Self { reg }
    }
}

impl Notifier for Doorbell {
    fn notify(&self, queue_index: u16) {
        // SAFETY: validity of `reg` is the contract of `Doorbell::new`.
        unsafe { write_volatile(self.reg.as_ptr(), queue_index.to_le()) }
    }
}

// SAFETY: the register is a device address, not thread-local state.
unsafe impl Send for Doorbell {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doorbell_writes_queue_index() {
        let mut reg: u16 = 0xFFFF;
        let bell = unsafe { Doorbell::new(NonNull::from(&mut reg)) };
        bell.notify(2);
        assert_eq!(u16::from_le(reg), 2);
    }
}
