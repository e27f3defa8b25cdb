//! Owned, zeroed ring memory.

use core::alloc::Layout;
use core::ptr::NonNull;

use log::debug;

use crate::error::SetupError;
use crate::hal::{PAGE_SIZE, pages_for};
use crate::layout::{RingLayout, RingRegions};

/// Page-aligned allocation holding all three regions of one queue.
///
/// The platform must identity-map or otherwise pin heap memory for DMA; the
/// translation closure passed to [`RingMemory::new`] supplies bus addresses.
pub struct RingMemory {
    base: NonNull<u8>,
    alloc_layout: Layout,
    layout: RingLayout,
    paddr: u64,
}

impl RingMemory {
    /// Allocate zeroed memory for `layout`.
    pub fn new<F>(layout: RingLayout, virt_to_phys: F) -> Result<Self, SetupError>
    where
        F: Fn(usize) -> u64,
    {
        let bytes = pages_for(layout.total_size()) * PAGE_SIZE;
        let alloc_layout =
            Layout::from_size_align(bytes, PAGE_SIZE).map_err(|_| SetupError::OutOfMemory)?;
        // SAFETY: layout has non-zero size, every valid queue size needs at least one page.
        let ptr = unsafe { alloc::alloc::alloc_zeroed(alloc_layout) };
        let base = NonNull::new(ptr).ok_or(SetupError::OutOfMemory)?;
        let paddr = virt_to_phys(base.as_ptr() as usize);
        debug!(
            "virtq: ring memory for {} entries at {:#x} ({} bytes)",
            layout.size(),
            paddr,
            bytes
        );
        Ok(Self {
            base,
            alloc_layout,
            layout,
            paddr,
        })
    }

    pub fn layout(&self) -> &RingLayout {
        &self.layout
    }

    /// Region pointers and bus addresses. Valid while `self` is alive.
    pub fn regions(&self) -> RingRegions {
        let at = |offset: usize| {
            // SAFETY: offsets come from the layout this allocation was sized for.
            unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
        };
        RingRegions {
            desc: self.base,
            avail: at(self.layout.avail_offset()),
            used: at(self.layout.used_offset()),
            desc_paddr: self.paddr,
            avail_paddr: self.paddr + self.layout.avail_offset() as u64,
            used_paddr: self.paddr + self.layout.used_offset() as u64,
        }
    }
}

impl Drop for RingMemory {
    fn drop(&mut self) {
        // SAFETY: base was returned by alloc_zeroed with this exact layout.
        unsafe { alloc::alloc::dealloc(self.base.as_ptr(), self.alloc_layout) };
    }
}

// SAFETY: RingMemory owns its allocation outright.
unsafe impl Send for RingMemory {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regions_follow_layout() {
        let layout = RingLayout::new(8).unwrap();
        let memory = RingMemory::new(layout, |vaddr| vaddr as u64).unwrap();
        let regions = memory.regions();

        assert_eq!(regions.desc.as_ptr() as u64, regions.desc_paddr);
        assert_eq!(regions.avail_paddr - regions.desc_paddr, 128);
        assert_eq!(
            regions.used_paddr - regions.desc_paddr,
            layout.used_offset() as u64
        );
        assert!(regions.check_alignment().is_ok());
    }

    #[test]
    fn test_memory_is_zeroed() {
        let layout = RingLayout::legacy(16).unwrap();
        let memory = RingMemory::new(layout, |vaddr| vaddr as u64).unwrap();
        let bytes = unsafe {
            core::slice::from_raw_parts(memory.regions().desc.as_ptr(), layout.total_size())
        };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bus_address_translation() {
        let layout = RingLayout::new(4).unwrap();
        let memory = RingMemory::new(layout, |_| 0x8000_0000).unwrap();
        let (desc, avail, used) = memory.regions().addresses();
        assert_eq!(desc, 0x8000_0000);
        assert_eq!(avail, 0x8000_0040);
        assert_eq!(used, 0x8000_0050);
    }
}
