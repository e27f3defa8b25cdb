//! Test-only device side of the rings, plus recording HAL and notifier.

extern crate std;

use core::cell::{Cell, RefCell};
use core::sync::atomic::{Ordering, fence};
use std::boxed::Box;
use std::vec::Vec;

use crate::features::TransportFeatures;
use crate::hal::{Notifier, RingHal};
use crate::layout::{RingLayout, RingRegions};
use crate::memory::RingMemory;
use crate::queue::{QueueConfig, VirtQueue};
use crate::ring::{AvailFlags, AvailRing, DescTable, Descriptor, UsedElem, UsedFlags, UsedRing};

/// Which barrier the queue issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Barrier {
    Full,
    Write,
    Read,
}

std::thread_local! {
    static BARRIERS: RefCell<Vec<Barrier>> = const { RefCell::new(Vec::new()) };
}

fn record(barrier: Barrier) {
    BARRIERS.with(|log| log.borrow_mut().push(barrier));
}

/// Barriers issued on this thread since the last call.
pub(crate) fn take_barriers() -> Vec<Barrier> {
    BARRIERS.with(|log| core::mem::take(&mut *log.borrow_mut()))
}

/// Real fences, plus a per-thread log of which ones were requested.
pub(crate) struct RecordingHal;

unsafe impl RingHal for RecordingHal {
    fn full_barrier() {
        fence(Ordering::SeqCst);
        record(Barrier::Full);
    }

    fn write_barrier() {
        fence(Ordering::Release);
        record(Barrier::Write);
    }

    fn read_barrier() {
        fence(Ordering::Acquire);
        record(Barrier::Read);
    }
}

#[derive(Default)]
pub(crate) struct CountingNotifier {
    count: Cell<u32>,
    last_queue: Cell<Option<u16>>,
}

impl CountingNotifier {
    pub(crate) fn count(&self) -> u32 {
        self.count.get()
    }

    pub(crate) fn last_queue(&self) -> Option<u16> {
        self.last_queue.get()
    }
}

impl Notifier for CountingNotifier {
    fn notify(&self, queue_index: u16) {
        self.count.set(self.count.get() + 1);
        self.last_queue.set(Some(queue_index));
    }
}

/// Device view of one queue: consumes the available ring, fills the used ring.
pub(crate) struct FakeBackend {
    desc: DescTable,
    avail: AvailRing,
    used: UsedRing,
    size: u16,
    next_avail: u16,
    used_idx: u16,
}

impl FakeBackend {
    pub(crate) fn new(regions: &RingRegions, size: u16) -> Self {
        unsafe {
            Self {
                desc: DescTable::new(regions.desc, size),
                avail: AvailRing::new(regions.avail, size),
                used: UsedRing::new(regions.used, size),
                size,
                next_avail: 0,
                used_idx: 0,
            }
        }
    }

    pub(crate) fn avail_idx(&self) -> u16 {
        self.avail.idx()
    }

    pub(crate) fn avail_flags(&self) -> AvailFlags {
        self.avail.flags()
    }

    pub(crate) fn avail_entry(&self, slot: u16) -> u16 {
        self.avail.entry(slot)
    }

    pub(crate) fn used_event(&self) -> u16 {
        self.avail.used_event()
    }

    pub(crate) fn descriptor(&self, index: u16) -> Descriptor {
        self.desc.read(index)
    }

    /// Next chain head the driver made available.
    pub(crate) fn pop_avail(&mut self) -> Option<u16> {
        if self.next_avail == self.avail.idx() {
            return None;
        }
        let head = self.avail.entry(self.next_avail & (self.size - 1));
        self.next_avail = self.next_avail.wrapping_add(1);
        Some(head)
    }

    /// Publish a used entry.
    pub(crate) fn complete(&mut self, id: u32, len: u32) {
        self.used
            .set_elem(self.used_idx & (self.size - 1), UsedElem { id, len });
        fence(Ordering::SeqCst);
        self.used_idx = self.used_idx.wrapping_add(1);
        self.used.set_idx(self.used_idx);
    }

    pub(crate) fn set_no_notify(&mut self, on: bool) {
        let flags = if on { UsedFlags::NO_NOTIFY } else { UsedFlags::empty() };
        self.used.set_flags(flags);
    }

    pub(crate) fn set_avail_event(&mut self, idx: u16) {
        self.used.set_avail_event(idx);
    }
}

pub(crate) type TestQueue = VirtQueue<u32, CountingNotifier, RecordingHal>;

pub(crate) struct Harness {
    pub(crate) queue: TestQueue,
    pub(crate) device: FakeBackend,
}

/// Queue number 1 over freshly allocated, identity-mapped ring memory.
///
/// The memory is leaked so tests can destructure the harness freely.
pub(crate) fn harness(size: u16, features: TransportFeatures) -> Harness {
    let memory = RingMemory::new(RingLayout::new(size).unwrap(), |vaddr| vaddr as u64).unwrap();
    let memory: &'static RingMemory = Box::leak(Box::new(memory));
    let regions = memory.regions();
    let config = QueueConfig::new(1, size, regions).with_features(features);
    let queue = unsafe { VirtQueue::new(config, CountingNotifier::default()) }.unwrap();
    let device = FakeBackend::new(&regions, size);
    take_barriers();
    Harness { queue, device }
}
