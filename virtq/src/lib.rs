//! # virtq
//!
//! Driver side of the virtio split virtqueue.
//!
//! The queue talks to a device backend through three shared regions (descriptor
//! table, available ring, used ring) and nothing else. Ordering between the two
//! sides is carried entirely by barriers, so the crate never takes a lock; the
//! caller serializes access when it drives one queue from several contexts.
//!
//! - [`VirtQueue`] - enqueue/dequeue, free-list management, notification control
//! - [`RingHal`] / [`Notifier`] - the two platform hooks the queue calls out to
//! - [`RingLayout`] / [`RingMemory`] - region sizing and an owned allocation
//! - [`negotiate_transport`] - transport feature filtering

#![no_std]

extern crate alloc;

mod doorbell;
mod error;
pub mod features;
pub mod hal;
mod hal_impl;
mod layout;
mod memory;
mod queue;
mod ring;

#[cfg(test)]
mod fake;

pub use doorbell::Doorbell;
pub use error::{QueueError, SetupError, Violation};
pub use features::{TransportFeatures, negotiate_transport};
pub use hal::{Notifier, PAGE_SIZE, RingHal, pages_for};
pub use hal_impl::FenceHal;
pub use layout::{RingLayout, RingRegions};
pub use memory::RingMemory;
pub use queue::{QueueConfig, Segment, VirtQueue};
pub use ring::{AvailFlags, Descriptor, DescriptorFlags, UsedElem, UsedFlags, need_event};

/// Largest queue size the split ring format can index.
pub const MAX_QUEUE_SIZE: u16 = 32768;
