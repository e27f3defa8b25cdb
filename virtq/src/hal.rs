//! Platform hooks for the virtqueue.
//!
//! The queue needs exactly two things from the platform: memory fences strong
//! enough to order its writes against a DMA peer, and a way to ring the
//! device's doorbell. Everything else (PCI, interrupts, power) stays outside.

/// Memory barrier primitives.
///
/// # Safety
///
/// Implementations must provide at least the ordering their name implies,
/// as observed by a device reading or writing the rings through DMA:
/// - `full_barrier` orders all earlier loads and stores before all later ones
/// - `write_barrier` orders earlier stores before later stores
/// - `read_barrier` orders earlier loads before later loads
pub unsafe trait RingHal {
    /// Full memory barrier.
    fn full_barrier();

    /// Store-store barrier.
    fn write_barrier();

    /// Load-load barrier.
    fn read_barrier();
}

/// One-way signal to the device that a queue has new available entries.
///
/// Must not block. Delivery is fire-and-forget; the queue never retries.
pub trait Notifier {
    /// Notify the device about `queue_index`.
    fn notify(&self, queue_index: u16);
}

impl<F: Fn(u16)> Notifier for F {
    fn notify(&self, queue_index: u16) {
        self(queue_index);
    }
}

/// Size of a page for ring allocation.
pub const PAGE_SIZE: usize = 4096;

/// Calculate number of pages needed for a given size.
pub const fn pages_for(size: usize) -> usize {
    size.div_ceil(PAGE_SIZE)
}
