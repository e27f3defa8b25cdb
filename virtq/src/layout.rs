//! Ring region sizing and placement.

use core::ptr::NonNull;

use crate::MAX_QUEUE_SIZE;
use crate::error::SetupError;
use crate::hal::PAGE_SIZE;
use crate::ring::{Descriptor, UsedElem};

/// Byte offsets of the three regions inside one contiguous allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    size: u16,
    avail_offset: usize,
    used_offset: usize,
    total: usize,
}

impl RingLayout {
    /// Descriptor table alignment.
    pub const DESC_ALIGN: usize = 16;
    /// Available ring alignment.
    pub const AVAIL_ALIGN: usize = 2;
    /// Used ring alignment.
    pub const USED_ALIGN: usize = 4;
    /// Used ring alignment for legacy (pre-1.0) devices.
    pub const LEGACY_ALIGN: usize = PAGE_SIZE;

    /// Packed layout: available ring right after the table, used ring at the
    /// next 4-byte boundary.
    pub fn new(size: u16) -> Result<Self, SetupError> {
        Self::with_used_align(size, Self::USED_ALIGN)
    }

    /// Legacy layout: the used ring starts on a page boundary.
    pub fn legacy(size: u16) -> Result<Self, SetupError> {
        Self::with_used_align(size, Self::LEGACY_ALIGN)
    }

    fn with_used_align(size: u16, used_align: usize) -> Result<Self, SetupError> {
        Self::check_size(size)?;
        let avail_offset = Self::desc_size(size);
        let used_offset = (avail_offset + Self::avail_size(size)).next_multiple_of(used_align);
        Ok(Self {
            size,
            avail_offset,
            used_offset,
            total: used_offset + Self::used_size(size),
        })
    }

    /// Reject sizes the split ring cannot use.
    pub fn check_size(size: u16) -> Result<(), SetupError> {
        if size == 0 || !size.is_power_of_two() || size > MAX_QUEUE_SIZE {
            return Err(SetupError::InvalidSize);
        }
        Ok(())
    }

    /// Bytes taken by the descriptor table.
    pub const fn desc_size(size: u16) -> usize {
        Descriptor::SIZE * size as usize
    }

    /// Bytes taken by the available ring, including `used_event`.
    pub const fn avail_size(size: u16) -> usize {
        2 * (3 + size as usize)
    }

    /// Bytes taken by the used ring, including `avail_event`.
    pub const fn used_size(size: u16) -> usize {
        6 + core::mem::size_of::<UsedElem>() * size as usize
    }

    pub fn size(&self) -> u16 {
        self.size
    }

    pub fn avail_offset(&self) -> usize {
        self.avail_offset
    }

    pub fn used_offset(&self) -> usize {
        self.used_offset
    }

    /// Total bytes from the table base to the end of the used ring.
    pub fn total_size(&self) -> usize {
        self.total
    }
}

/// Where the three regions live, as seen by the CPU and by the device.
///
/// The memory must be visible to the device (DMA-coherent) and stay valid for
/// as long as a queue is attached to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingRegions {
    pub desc: NonNull<u8>,
    pub avail: NonNull<u8>,
    pub used: NonNull<u8>,
    pub desc_paddr: u64,
    pub avail_paddr: u64,
    pub used_paddr: u64,
}

impl RingRegions {
    /// Check CPU and bus addresses against the split ring alignment rules.
    pub fn check_alignment(&self) -> Result<(), SetupError> {
        let aligned = |vaddr: NonNull<u8>, paddr: u64, align: usize| {
            vaddr.as_ptr() as usize % align == 0 && paddr % align as u64 == 0
        };
        if aligned(self.desc, self.desc_paddr, RingLayout::DESC_ALIGN)
            && aligned(self.avail, self.avail_paddr, RingLayout::AVAIL_ALIGN)
            && aligned(self.used, self.used_paddr, RingLayout::USED_ALIGN)
        {
            Ok(())
        } else {
            Err(SetupError::RegionMisaligned)
        }
    }

    /// Bus addresses to program into the transport.
    ///
    /// Returns (desc_addr, avail_addr, used_addr).
    pub fn addresses(&self) -> (u64, u64, u64) {
        (self.desc_paddr, self.avail_paddr, self.used_paddr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_sizes() {
        assert_eq!(RingLayout::desc_size(4), 64);
        assert_eq!(RingLayout::avail_size(4), 14);
        assert_eq!(RingLayout::used_size(4), 38);
    }

    #[test]
    fn test_packed_layout() {
        let layout = RingLayout::new(4).unwrap();
        assert_eq!(layout.avail_offset(), 64);
        // 64 + 14 = 78, rounded up to 80.
        assert_eq!(layout.used_offset(), 80);
        assert_eq!(layout.total_size(), 118);
    }

    #[test]
    fn test_legacy_layout() {
        let layout = RingLayout::legacy(256).unwrap();
        assert_eq!(layout.avail_offset(), 4096);
        // 4096 + 518 rounded up to the next page.
        assert_eq!(layout.used_offset(), 8192);
        assert_eq!(layout.total_size(), 8192 + 6 + 8 * 256);
    }

    #[test]
    fn test_invalid_sizes() {
        assert_eq!(RingLayout::new(0), Err(SetupError::InvalidSize));
        assert_eq!(RingLayout::new(3), Err(SetupError::InvalidSize));
        assert_eq!(RingLayout::new(48), Err(SetupError::InvalidSize));
        assert!(RingLayout::new(1).is_ok());
        assert!(RingLayout::new(32768).is_ok());
    }

    #[test]
    fn test_misaligned_regions() {
        let mut backing = [0u64; 32];
        let base = NonNull::new(backing.as_mut_ptr().cast::<u8>()).unwrap();
        let regions = RingRegions {
            desc: base,
            avail: base,
            used: base,
            desc_paddr: 0x1000,
            avail_paddr: 0x2000,
            used_paddr: 0x3002,
        };
        assert_eq!(regions.check_alignment(), Err(SetupError::RegionMisaligned));
    }
}
