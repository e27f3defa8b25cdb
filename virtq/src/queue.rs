//! Split virtqueue controller.
//!
//! TEAM_412: Reworked from the fixed-size in-struct queue into a controller
//! over caller-provided regions, with a driver-private shadow of the
//! descriptor table.
//!
//! The driver owns the descriptor table and the available ring; the device
//! owns the used ring. Chains are built and walked in `shadow`, and only
//! published to the shared table, so a misbehaving device can never redirect
//! the free list. Everything the device reports back is bounds- and
//! liveness-checked before it is trusted.
//!
//! # Ordering
//!
//! - full barrier between writing an available slot and bumping `avail.idx`
//! - read barrier between observing `used.idx` and reading the used entry
//! - full barrier after writing `used_event` or the interrupt-suppression flag
//! - write + full barrier ahead of an unconditional kick

use alloc::boxed::Box;
use core::marker::PhantomData;

use log::{debug, trace, warn};

use crate::error::{QueueError, SetupError, Violation};
use crate::features::TransportFeatures;
use crate::hal::{Notifier, RingHal};
use crate::hal_impl::FenceHal;
use crate::layout::{RingLayout, RingRegions};
use crate::ring::{
    AvailFlags, AvailRing, DescTable, Descriptor, DescriptorFlags, UsedFlags, UsedRing,
    need_event,
};

/// One physically addressed piece of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Segment {
    pub addr: u64,
    pub len: u32,
}

impl Segment {
    pub const fn new(addr: u64, len: u32) -> Self {
        Self { addr, len }
    }
}

/// Everything needed to attach a queue to its ring memory.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Queue selector, written to the doorbell on notify.
    pub queue_index: u16,
    /// Number of descriptors. Power of two, at most 32768.
    pub size: u16,
    pub regions: RingRegions,
    /// Negotiated transport features.
    pub features: TransportFeatures,
}

impl QueueConfig {
    pub fn new(queue_index: u16, size: u16, regions: RingRegions) -> Self {
        Self {
            queue_index,
            size,
            regions,
            features: TransportFeatures::empty(),
        }
    }

    #[must_use]
    pub fn with_features(mut self, features: TransportFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn use_event_idx(&self) -> bool {
        self.features.contains(TransportFeatures::RING_EVENT_IDX)
    }

    pub fn indirect(&self) -> bool {
        self.features.contains(TransportFeatures::RING_INDIRECT_DESC)
    }
}

/// Driver side of one split virtqueue.
///
/// `T` is the caller's per-chain token, handed back on completion or
/// teardown. The queue does no locking: one context at a time may call
/// `&mut self` methods, which the borrow checker already enforces.
pub struct VirtQueue<T, N, H = FenceHal> {
    desc: DescTable,
    avail: AvailRing,
    used: UsedRing,
    /// Driver-private copy of the descriptor table. Holds the free list links.
    shadow: Box<[Descriptor]>,
    /// Token per chain head; `Some` marks a live chain.
    tokens: Box<[Option<T>]>,
    addresses: (u64, u64, u64),
    notifier: N,
    queue_index: u16,
    size: u16,
    free_head: u16,
    num_free: u16,
    avail_idx: u16,
    avail_flags: AvailFlags,
    last_used_idx: u16,
    /// Buffers published since the last kick decision.
    num_added: u16,
    use_event_idx: bool,
    indirect: bool,
    _hal: PhantomData<fn() -> H>,
}

impl<T, N: Notifier, H: RingHal> VirtQueue<T, N, H> {
    /// Attach a queue to its regions and reset them.
    ///
    /// # Safety
    ///
    /// The regions in `config` must be sized for `config.size` (see
    /// [`RingLayout`]), visible to the device, and stay valid and unaliased by
    /// other driver code until the queue is dropped.
    pub unsafe fn new(config: QueueConfig, notifier: N) -> Result<Self, SetupError> {
        RingLayout::check_size(config.size)?;
        config.regions.check_alignment()?;

        let size = config.size;
        let regions = config.regions;
        let mut queue = Self {
            desc: unsafe { DescTable::new(regions.desc, size) },
            avail: unsafe { AvailRing::new(regions.avail, size) },
            used: unsafe { UsedRing::new(regions.used, size) },
            shadow: alloc::vec![Descriptor::default(); usize::from(size)].into_boxed_slice(),
            tokens: (0..size).map(|_| None).collect(),
            addresses: regions.addresses(),
            notifier,
            queue_index: config.queue_index,
            size,
            free_head: 0,
            num_free: size,
            avail_idx: 0,
            avail_flags: AvailFlags::empty(),
            last_used_idx: 0,
            num_added: 0,
            use_event_idx: config.use_event_idx(),
            indirect: config.indirect(),
            _hal: PhantomData,
        };
        queue.reset();

        debug!(
            "virtq[{}]: {} entries, event_idx={}, indirect={}",
            queue.queue_index, size, queue.use_event_idx, queue.indirect
        );
        Ok(queue)
    }

    /// Zero the rings and rebuild the free list as 0 -> 1 -> ... -> N-1.
    ///
    /// Only call while the device is reset. Chains still live are dropped;
    /// drain them with [`VirtQueue::detach_unused`] first to get tokens back.
    pub fn reset(&mut self) {
        let stale = self.tokens.iter().filter(|t| t.is_some()).count();
        if stale != 0 {
            warn!("virtq[{}]: reset dropped {} live buffers", self.queue_index, stale);
        }
        self.tokens.iter_mut().for_each(|t| *t = None);

        self.desc.clear();
        self.avail.clear();
        self.used.clear();

        let last = usize::from(self.size) - 1;
        for (i, desc) in self.shadow.iter_mut().enumerate() {
            *desc = Descriptor {
                next: if i < last { (i + 1) as u16 } else { 0 },
                ..Descriptor::default()
            };
        }

        self.free_head = 0;
        self.num_free = self.size;
        self.avail_idx = 0;
        self.avail_flags = AvailFlags::empty();
        self.last_used_idx = 0;
        self.num_added = 0;
        H::full_barrier();
    }

    /// Publish a chain of `out` (device-readable) then `inputs` (device-writable)
    /// segments. Returns the number of free descriptors left.
    ///
    /// Nothing is modified on error. On `QueueFull` with output segments the
    /// device is kicked anyway so a stalled transmit ring gets drained.
    pub fn enqueue(
        &mut self,
        out: &[Segment],
        inputs: &[Segment],
        token: T,
    ) -> Result<u16, QueueError> {
        let total = out.len() + inputs.len();
        if total == 0 || total > usize::from(self.size) {
            warn!(
                "virtq[{}]: rejected chain of {} segments (size {})",
                self.queue_index, total, self.size
            );
            return Err(QueueError::InvalidArgument);
        }
        if usize::from(self.num_free) < total {
            debug!(
                "virtq[{}]: can't add {} segments, {} free",
                self.queue_index, total, self.num_free
            );
            if !out.is_empty() {
                self.notify();
            }
            return Err(QueueError::QueueFull);
        }

        let head = self.free_head;
        let mut idx = head;
        for (i, seg) in out.iter().chain(inputs).enumerate() {
            let next = self.shadow[usize::from(idx)].next;
            let desc = Descriptor {
                addr: seg.addr,
                len: seg.len,
                flags: chain_flags(i, out.len(), total),
                next,
            };
            self.shadow[usize::from(idx)] = desc;
            self.desc.write(idx, desc);
            idx = next;
        }
        self.free_head = idx;
        self.num_free -= total as u16;

        self.tokens[usize::from(head)] = Some(token);
        self.publish(head);
        Ok(self.num_free)
    }

    /// Publish a chain through a caller-owned indirect table.
    ///
    /// `table` must be device-visible memory at bus address `table_paddr` with
    /// room for every segment. Takes one slot from the main table regardless
    /// of chain length. Requires `RING_INDIRECT_DESC`; there is no fallback to
    /// a direct chain.
    pub fn enqueue_indirect(
        &mut self,
        out: &[Segment],
        inputs: &[Segment],
        token: T,
        table: &mut [Descriptor],
        table_paddr: u64,
    ) -> Result<u16, QueueError> {
        let total = out.len() + inputs.len();
        if !self.indirect || total == 0 || total > table.len() || total > usize::from(u16::MAX) {
            warn!(
                "virtq[{}]: rejected indirect chain of {} segments (table {}, negotiated {})",
                self.queue_index,
                total,
                table.len(),
                self.indirect
            );
            return Err(QueueError::InvalidArgument);
        }
        if table_paddr == 0 {
            return Err(QueueError::MissingIndirectAddress);
        }
        if self.num_free == 0 {
            return Err(QueueError::QueueFull);
        }

        for (i, (seg, slot)) in out.iter().chain(inputs).zip(table.iter_mut()).enumerate() {
            Descriptor {
                addr: seg.addr,
                len: seg.len,
                flags: chain_flags(i, out.len(), total),
                next: if i + 1 < total { (i + 1) as u16 } else { 0 },
            }
            .store(slot);
        }

        let head = self.free_head;
        let next = self.shadow[usize::from(head)].next;
        let desc = Descriptor {
            addr: table_paddr,
            len: (total * Descriptor::SIZE) as u32,
            flags: DescriptorFlags::INDIRECT,
            next,
        };
        self.shadow[usize::from(head)] = desc;
        self.desc.write(head, desc);
        self.free_head = next;
        self.num_free -= 1;

        self.tokens[usize::from(head)] = Some(token);
        self.publish(head);
        Ok(self.num_free)
    }

    fn publish(&mut self, head: u16) {
        let slot = self.avail_idx & (self.size - 1);
        self.avail.set_entry(slot, head);

        // Chain and ring slot must be visible before the index that exposes them.
        H::full_barrier();
        self.avail_idx = self.avail_idx.wrapping_add(1);
        self.avail.set_idx(self.avail_idx);
        self.num_added = self.num_added.wrapping_add(1);

        trace!(
            "virtq[{}]: head {} in slot {}, avail {}, added {}, free {}",
            self.queue_index, head, slot, self.avail_idx, self.num_added, self.num_free
        );
    }

    /// Whether the device has published used entries not yet dequeued.
    pub fn has_unconsumed_responses(&self) -> bool {
        self.last_used_idx != self.used.idx()
    }

    /// Take the next completed chain: its token and the byte count the device
    /// wrote. `Ok(None)` when nothing is pending.
    ///
    /// A bad used entry is consumed and reported as
    /// [`QueueError::ProtocolViolation`]; nothing is reclaimed for it and the
    /// queue stays usable.
    pub fn dequeue(&mut self) -> Result<Option<(T, u32)>, QueueError> {
        if !self.has_unconsumed_responses() {
            return Ok(None);
        }

        // Only read the used entry after the device exposed it.
        H::read_barrier();
        let elem = self.used.elem(self.last_used_idx & (self.size - 1));
        trace!(
            "virtq[{}]: used id {}, len {}, last_used {}",
            self.queue_index, elem.id, elem.len, self.last_used_idx
        );

        let reclaimed = self.reclaim(elem.id);
        self.advance_used();
        Ok(Some((reclaimed?, elem.len)))
    }

    fn reclaim(&mut self, id: u32) -> Result<T, Violation> {
        if id >= u32::from(self.size) {
            warn!("virtq[{}]: used id {} out of range", self.queue_index, id);
            return Err(Violation::HeadOutOfRange);
        }
        let head = id as u16;
        let Some(token) = self.tokens[usize::from(head)].take() else {
            warn!("virtq[{}]: used id {} is not a head", self.queue_index, id);
            return Err(Violation::NotAHead);
        };
        self.detach_chain(head);
        Ok(token)
    }

    fn advance_used(&mut self) {
        self.last_used_idx = self.last_used_idx.wrapping_add(1);
        // Tell the device which used index should raise the next interrupt.
        if !self.avail_flags.contains(AvailFlags::NO_INTERRUPT) {
            self.avail.set_used_event(self.last_used_idx);
            H::full_barrier();
        }
    }

    /// Splice the chain starting at `head` onto the front of the free list.
    fn detach_chain(&mut self, head: u16) {
        let mut idx = head;
        loop {
            self.num_free += 1;
            let desc = self.shadow[usize::from(idx)];
            if !desc.flags.contains(DescriptorFlags::NEXT) {
                break;
            }
            idx = desc.next;
        }
        self.shadow[usize::from(idx)].next = self.free_head;
        self.free_head = head;
    }

    /// Teardown: detach one chain that was published but never completed and
    /// return its token. Call until `None` after the device has been reset.
    pub fn detach_unused(&mut self) -> Option<T> {
        let head = self.tokens.iter().position(Option::is_some)?;
        let token = self.tokens[head].take()?;
        self.detach_chain(head as u16);
        self.avail_idx = self.avail_idx.wrapping_sub(1);
        self.avail.set_idx(self.avail_idx);
        Some(token)
    }

    /// Ask the device not to interrupt. The caller polls instead.
    pub fn disable_interrupts(&mut self) {
        self.avail_flags.insert(AvailFlags::NO_INTERRUPT);
        self.avail.set_flags(self.avail_flags);
        H::full_barrier();
    }

    /// Re-enable interrupts. Always succeeds.
    ///
    /// The device may have completed buffers while interrupts were off, so
    /// callers must poll [`VirtQueue::dequeue`] again afterwards or risk a
    /// missed wakeup.
    pub fn enable_interrupts(&mut self) -> bool {
        self.avail_flags.remove(AvailFlags::NO_INTERRUPT);
        self.avail.set_flags(self.avail_flags);
        H::full_barrier();
        true
    }

    /// Enable interrupts and kick, in case the device throttled itself while
    /// it believed interrupts were off.
    pub fn start_interrupts(&mut self) {
        self.enable_interrupts();
        self.kick();
    }

    pub fn stop_interrupts(&mut self) {
        self.disable_interrupts();
    }

    /// Decide whether the buffers published since the last decision warrant a
    /// notification, and reset the published count.
    pub fn kick_prepare(&mut self) -> bool {
        // The new avail index must be visible before reading the device's wishes.
        H::full_barrier();

        let new = self.avail_idx;
        let old = new.wrapping_sub(self.num_added);
        self.num_added = 0;

        if self.use_event_idx {
            need_event(self.used.avail_event(), new, old)
        } else {
            !self.used.flags().contains(UsedFlags::NO_NOTIFY)
        }
    }

    /// Notify the device if [`VirtQueue::kick_prepare`] says so.
    pub fn kick(&mut self) {
        if self.kick_prepare() {
            self.notify();
        }
    }

    /// Notify unconditionally. For use after a restart, when the suppression
    /// state on either side may be stale.
    pub fn kick_always(&mut self) {
        H::write_barrier();
        trace!("virtq[{}]: kick always, avail {}", self.queue_index, self.avail_idx);
        self.num_added = 0;
        H::full_barrier();
        self.notify();
    }

    fn notify(&self) {
        self.notifier.notify(self.queue_index);
    }

    pub fn size(&self) -> u16 {
        self.size
    }

    pub fn queue_index(&self) -> u16 {
        self.queue_index
    }

    /// Descriptors currently on the free list.
    pub fn num_free(&self) -> u16 {
        self.num_free
    }

    /// Driver's published available index.
    pub fn avail_idx(&self) -> u16 {
        self.avail_idx
    }

    /// Used index up to which completions have been consumed.
    pub fn last_used_idx(&self) -> u16 {
        self.last_used_idx
    }

    pub fn use_event_idx(&self) -> bool {
        self.use_event_idx
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Bus addresses of the regions, for programming the transport.
    ///
    /// Returns (desc_addr, avail_addr, used_addr).
    pub fn addresses(&self) -> (u64, u64, u64) {
        self.addresses
    }
}

/// Flags for position `i` of a chain whose first `out_len` entries are
/// device-readable.
fn chain_flags(i: usize, out_len: usize, total: usize) -> DescriptorFlags {
    let mut flags = if i < out_len {
        DescriptorFlags::empty()
    } else {
        DescriptorFlags::WRITE
    };
    if i + 1 < total {
        flags |= DescriptorFlags::NEXT;
    }
    flags
}

// SAFETY: the queue is the only driver-side user of its regions, so moving it
// to another context moves that exclusive access with it.
unsafe impl<T: Send, N: Send, H> Send for VirtQueue<T, N, H> {}
