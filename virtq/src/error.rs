//! Error types for queue setup and ring operations.

use virtq_error::define_ring_error;

define_ring_error! {
    /// Failures while sizing or attaching ring memory.
    pub enum SetupError(0x50) {
        /// Size is zero, not a power of two, or larger than 32768.
        InvalidSize = 0x01 => "Queue size must be a power of two in 1..=32768",
        /// A region base does not meet the split ring alignment.
        RegionMisaligned = 0x02 => "Ring region is misaligned",
        /// Ring memory could not be allocated.
        OutOfMemory = 0x03 => "Ring memory allocation failed",
    }
}

define_ring_error! {
    /// The backend published a used entry the driver cannot accept.
    pub enum Violation(0x52) {
        /// Used id is not an index into the descriptor table.
        HeadOutOfRange = 0x01 => "Used id outside the descriptor table",
        /// Used id names a slot that is not the head of a live chain.
        NotAHead = 0x02 => "Used id is not a live chain head",
    }
}

define_ring_error! {
    /// Errors returned by queue operations.
    ///
    /// None of these leave the queue in an unusable state.
    pub enum QueueError(0x51) {
        /// Empty chain, chain longer than the table, or unusable indirect table.
        InvalidArgument = 0x01 => "Invalid buffer chain",
        /// Not enough free descriptors for the chain.
        QueueFull = 0x02 => "Not enough free descriptors",
        /// The used ring entry was skipped without reclaiming anything.
        ProtocolViolation(Violation) = 0x03 => "Backend protocol violation",
        /// Indirect enqueue without a bus address for the table.
        MissingIndirectAddress = 0x04 => "Indirect table has no bus address",
    }
}
