//! Split ring wire layout and volatile views over the shared regions.
//!
//! Layout per the virtio split virtqueue format (little-endian):
//!
//! ```text
//! desc:  { addr: u64, len: u32, flags: u16, next: u16 } x N           (16-byte aligned)
//! avail: flags: u16, idx: u16, ring: [u16; N], used_event: u16        (2-byte aligned)
//! used:  flags: u16, idx: u16, ring: [{id: u32, len: u32}; N], avail_event: u16  (4-byte aligned)
//! ```
//!
//! The views only hand out volatile accesses. The device may touch these
//! regions at any time, so nothing here ever forms a reference into them.

use bitflags::bitflags;
use core::ptr::NonNull;

bitflags! {
    /// Descriptor flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DescriptorFlags: u16 {
        /// Buffer continues via the next field.
        const NEXT = 1;
        /// Buffer is device write-only (otherwise read-only).
        const WRITE = 2;
        /// Buffer contains a list of buffer descriptors.
        const INDIRECT = 4;
    }
}

bitflags! {
    /// Driver-owned flags in the available ring header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AvailFlags: u16 {
        /// Driver does not want used-buffer interrupts.
        const NO_INTERRUPT = 1;
    }
}

bitflags! {
    /// Device-owned flags in the used ring header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UsedFlags: u16 {
        /// Device does not want available-buffer notifications.
        const NO_NOTIFY = 1;
    }
}

/// A single descriptor, in the main table or in an indirect table.
// align(16) matches the table alignment requirement; size stays 16.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Descriptor {
    /// Bus address of the buffer.
    pub addr: u64,
    /// Length of the buffer in bytes.
    pub len: u32,
    /// Descriptor flags.
    pub flags: DescriptorFlags,
    /// Next descriptor index if NEXT flag is set.
    pub next: u16,
}

const _: () = assert!(core::mem::size_of::<Descriptor>() == 16);

impl Descriptor {
    /// Size of one descriptor on the wire.
    pub const SIZE: usize = 16;

    fn to_le(self) -> Self {
        Self {
            addr: self.addr.to_le(),
            len: self.len.to_le(),
            flags: DescriptorFlags::from_bits_retain(self.flags.bits().to_le()),
            next: self.next.to_le(),
        }
    }

    #[cfg(test)]
    fn to_native(self) -> Self {
        Self {
            addr: u64::from_le(self.addr),
            len: u32::from_le(self.len),
            flags: DescriptorFlags::from_bits_retain(u16::from_le(self.flags.bits())),
            next: u16::from_le(self.next),
        }
    }

    /// Store into a caller-owned indirect table entry.
    pub(crate) fn store(self, slot: &mut Descriptor) {
        *slot = self.to_le();
    }
}

/// Used ring entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsedElem {
    /// Head index of the completed chain.
    pub id: u32,
    /// Bytes the device wrote into the chain.
    pub len: u32,
}

/// Event index check.
///
/// True when `event` lies in `[old, new)` modulo 2^16, i.e. the other side
/// asked to be woken at an index this batch of updates just crossed.
pub fn need_event(event: u16, new: u16, old: u16) -> bool {
    new.wrapping_sub(event).wrapping_sub(1) < new.wrapping_sub(old)
}

unsafe fn read_u16(base: NonNull<u8>, offset: usize) -> u16 {
    unsafe { u16::from_le(base.as_ptr().add(offset).cast::<u16>().read_volatile()) }
}

unsafe fn write_u16(base: NonNull<u8>, offset: usize, value: u16) {
    unsafe { base.as_ptr().add(offset).cast::<u16>().write_volatile(value.to_le()) }
}

/// Descriptor table view.
pub(crate) struct DescTable {
    base: NonNull<Descriptor>,
    size: u16,
}

impl DescTable {
    /// # Safety
    ///
    /// `base` must point at `size` descriptors of memory, 16-byte aligned and
    /// valid for the lifetime of the view.
    pub(crate) unsafe fn new(base: NonNull<u8>, size: u16) -> Self {
        Self { base: base.cast(), size }
    }

    pub(crate) fn write(&mut self, index: u16, desc: Descriptor) {
        debug_assert!(index < self.size);
        // SAFETY: index is bounded by the table size checked at construction.
        unsafe {
            self.base
                .as_ptr()
                .add(usize::from(index))
                .write_volatile(desc.to_le());
        }
    }

    pub(crate) fn clear(&mut self) {
        for index in 0..self.size {
            self.write(index, Descriptor::default());
        }
    }

    #[cfg(test)]
    pub(crate) fn read(&self, index: u16) -> Descriptor {
        assert!(index < self.size);
        unsafe { self.base.as_ptr().add(usize::from(index)).read_volatile().to_native() }
    }
}

/// Available ring view. The driver is the only writer.
pub(crate) struct AvailRing {
    base: NonNull<u8>,
    size: u16,
}

impl AvailRing {
    const FLAGS: usize = 0;
    const IDX: usize = 2;
    const RING: usize = 4;

    /// # Safety
    ///
    /// `base` must point at `6 + 2 * size` bytes, 2-byte aligned and valid
    /// for the lifetime of the view.
    pub(crate) unsafe fn new(base: NonNull<u8>, size: u16) -> Self {
        Self { base, size }
    }

    fn used_event_offset(&self) -> usize {
        Self::RING + 2 * usize::from(self.size)
    }

    pub(crate) fn set_flags(&mut self, flags: AvailFlags) {
        unsafe { write_u16(self.base, Self::FLAGS, flags.bits()) }
    }

    pub(crate) fn set_idx(&mut self, idx: u16) {
        unsafe { write_u16(self.base, Self::IDX, idx) }
    }

    pub(crate) fn set_entry(&mut self, slot: u16, head: u16) {
        debug_assert!(slot < self.size);
        unsafe { write_u16(self.base, Self::RING + 2 * usize::from(slot), head) }
    }

    pub(crate) fn set_used_event(&mut self, idx: u16) {
        unsafe { write_u16(self.base, self.used_event_offset(), idx) }
    }

    pub(crate) fn clear(&mut self) {
        let len = self.used_event_offset() + 2;
        // SAFETY: len is the region size promised to `new`.
        unsafe { core::ptr::write_bytes(self.base.as_ptr(), 0, len) }
    }

    #[cfg(test)]
    pub(crate) fn flags(&self) -> AvailFlags {
        AvailFlags::from_bits_retain(unsafe { read_u16(self.base, Self::FLAGS) })
    }

    #[cfg(test)]
    pub(crate) fn idx(&self) -> u16 {
        unsafe { read_u16(self.base, Self::IDX) }
    }

    #[cfg(test)]
    pub(crate) fn entry(&self, slot: u16) -> u16 {
        assert!(slot < self.size);
        unsafe { read_u16(self.base, Self::RING + 2 * usize::from(slot)) }
    }

    #[cfg(test)]
    pub(crate) fn used_event(&self) -> u16 {
        unsafe { read_u16(self.base, self.used_event_offset()) }
    }
}

/// Used ring view. The device is the only writer after setup.
pub(crate) struct UsedRing {
    base: NonNull<u8>,
    size: u16,
}

impl UsedRing {
    const FLAGS: usize = 0;
    const IDX: usize = 2;
    const RING: usize = 4;
    const ELEM: usize = core::mem::size_of::<UsedElem>();

    /// # Safety
    ///
    /// `base` must point at `6 + 8 * size` bytes, 4-byte aligned and valid
    /// for the lifetime of the view.
    pub(crate) unsafe fn new(base: NonNull<u8>, size: u16) -> Self {
        Self { base, size }
    }

    fn avail_event_offset(&self) -> usize {
        Self::RING + Self::ELEM * usize::from(self.size)
    }

    fn elem_ptr(&self, slot: u16) -> *mut UsedElem {
        debug_assert!(slot < self.size);
        unsafe {
            self.base
                .as_ptr()
                .add(Self::RING + Self::ELEM * usize::from(slot))
                .cast::<UsedElem>()
        }
    }

    pub(crate) fn flags(&self) -> UsedFlags {
        UsedFlags::from_bits_retain(unsafe { read_u16(self.base, Self::FLAGS) })
    }

    pub(crate) fn idx(&self) -> u16 {
        unsafe { read_u16(self.base, Self::IDX) }
    }

    pub(crate) fn elem(&self, slot: u16) -> UsedElem {
        let raw = unsafe { self.elem_ptr(slot).read_volatile() };
        UsedElem {
            id: u32::from_le(raw.id),
            len: u32::from_le(raw.len),
        }
    }

    pub(crate) fn avail_event(&self) -> u16 {
        unsafe { read_u16(self.base, self.avail_event_offset()) }
    }

    /// Only valid while the device is not running.
    pub(crate) fn clear(&mut self) {
        let len = self.avail_event_offset() + 2;
        unsafe { core::ptr::write_bytes(self.base.as_ptr(), 0, len) }
    }

    #[cfg(test)]
    pub(crate) fn set_flags(&mut self, flags: UsedFlags) {
        unsafe { write_u16(self.base, Self::FLAGS, flags.bits()) }
    }

    #[cfg(test)]
    pub(crate) fn set_idx(&mut self, idx: u16) {
        unsafe { write_u16(self.base, Self::IDX, idx) }
    }

    #[cfg(test)]
    pub(crate) fn set_elem(&mut self, slot: u16, elem: UsedElem) {
        let raw = UsedElem {
            id: elem.id.to_le(),
            len: elem.len.to_le(),
        };
        unsafe { self.elem_ptr(slot).write_volatile(raw) }
    }

    #[cfg(test)]
    pub(crate) fn set_avail_event(&mut self, idx: u16) {
        unsafe { write_u16(self.base, self.avail_event_offset(), idx) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_sizes() {
        assert_eq!(core::mem::size_of::<Descriptor>(), 16);
        assert_eq!(core::mem::size_of::<UsedElem>(), 8);
        assert_eq!(DescriptorFlags::NEXT.bits(), 1);
        assert_eq!(DescriptorFlags::WRITE.bits(), 2);
        assert_eq!(DescriptorFlags::INDIRECT.bits(), 4);
    }

    #[test]
    fn test_need_event_window() {
        // Published 0..3 in one batch; device asked for a wake at 0, 1 or 2.
        assert!(need_event(0, 3, 0));
        assert!(need_event(2, 3, 0));
        // Wake point not reached yet, or already behind us.
        assert!(!need_event(3, 3, 0));
        assert!(!need_event(5, 3, 0));
        assert!(!need_event(0, 5, 3));
        // Nothing published.
        assert!(!need_event(7, 7, 7));
    }

    #[test]
    fn test_need_event_wraps() {
        assert!(need_event(u16::MAX, 1, u16::MAX - 1));
        assert!(need_event(0, 1, u16::MAX));
        assert!(!need_event(1, 1, u16::MAX));
    }
}
