//! Transport feature bits.
//!
//! Bits 28..38 belong to the transport; everything below is device-class and
//! is left to the device driver.

use bitflags::bitflags;

/// First transport feature bit.
pub const TRANSPORT_F_START: u32 = 28;
/// One past the last transport feature bit.
pub const TRANSPORT_F_END: u32 = 38;

bitflags! {
    /// Transport features this queue implementation understands.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TransportFeatures: u64 {
        /// Descriptors may point at an indirect descriptor table.
        const RING_INDIRECT_DESC = 1 << 28;
        /// used_event / avail_event notification suppression.
        const RING_EVENT_IDX = 1 << 29;
        /// Modern (non-legacy) device.
        const VERSION_1 = 1 << 32;
    }
}

const TRANSPORT_MASK: u64 = ((1u64 << TRANSPORT_F_END) - 1) & !((1u64 << TRANSPORT_F_START) - 1);

/// Clear every transport bit the queue does not support.
///
/// Device-class bits (below 28) and bits above the transport range pass
/// through unchanged.
pub fn negotiate_transport(features: u64) -> u64 {
    features & !(TRANSPORT_MASK & !TransportFeatures::all().bits())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_supported_transport_bits() {
        let offered = TransportFeatures::all().bits();
        assert_eq!(negotiate_transport(offered), offered);
    }

    #[test]
    fn test_clears_unsupported_transport_bits() {
        // NOTIFY_ON_EMPTY (24) is below the range, ANY_LAYOUT (27) too.
        // ACCESS_PLATFORM (33), RING_PACKED (34) and IN_ORDER (35) are cleared.
        let offered = (1 << 33) | (1 << 34) | (1 << 35) | (1 << 37);
        assert_eq!(negotiate_transport(offered), 0);
    }

    #[test]
    fn test_device_bits_untouched() {
        let device = (1 << 0) | (1 << 5) | (1 << 27);
        let offered = device | (1 << 30) | TransportFeatures::RING_EVENT_IDX.bits();
        assert_eq!(
            negotiate_transport(offered),
            device | TransportFeatures::RING_EVENT_IDX.bits()
        );
        assert_eq!(negotiate_transport(1 << 40), 1 << 40);
    }
}
