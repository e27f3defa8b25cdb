//! Error definitions for the virtqueue crates.
//!
//! Provides the `define_ring_error!` macro. Every error type declared with it
//! carries a subsystem byte, a per-variant code and a static description, so
//! a failure logged from an interrupt path is still identifiable as a single
//! `E5103`-style number.
//!
//! ## Usage
//!
//! ```ignore
//! define_ring_error! {
//!     pub enum Violation(0x52) {
//!         HeadOutOfRange = 0x01 => "Used id outside the descriptor table",
//!         NotAHead = 0x02 => "Used id is not a live chain head",
//!     }
//! }
//!
//! define_ring_error! {
//!     pub enum QueueError(0x51) {
//!         QueueFull = 0x02 => "Not enough free descriptors",
//!         ProtocolViolation(Violation) = 0x03 => "Backend misbehaved",
//!     }
//! }
//! ```
//!
//! Wrapping variants get a `From<Inner>` impl so `?` lifts the inner error.

#![no_std]

/// Declare a ring error enum.
///
/// Variants are either unit variants or wrap exactly one inner error type.
#[macro_export]
macro_rules! define_ring_error {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident($subsystem:literal) {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident $(($inner:ty))? = $code:literal => $desc:literal
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant $(($inner))?,
            )*
        }

        impl $name {
            /// Subsystem byte shared by every variant.
            pub const SUBSYSTEM: u8 = $subsystem;

            /// Numeric code: subsystem in the high byte, variant in the low byte.
            pub const fn code(&self) -> u16 {
                let variant: u16 = match self {
                    $( $crate::define_ring_error!(@arm $variant $(($inner))?) => $code, )*
                };
                ((Self::SUBSYSTEM as u16) << 8) | variant
            }

            /// Static description of the variant.
            pub const fn description(&self) -> &'static str {
                match self {
                    $( $crate::define_ring_error!(@arm $variant $(($inner))?) => $desc, )*
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "E{:04X}: {}", self.code(), self.description())?;
                $( $crate::define_ring_error!(@cause self f $variant $(($inner))?); )*
                Ok(())
            }
        }

        impl core::error::Error for $name {}

        $( $crate::define_ring_error!(@from $name $variant $(($inner))?); )*
    };

    (@arm $variant:ident ($inner:ty)) => { Self::$variant(_) };
    (@arm $variant:ident) => { Self::$variant };

    (@cause $self:ident $f:ident $variant:ident ($inner:ty)) => {
        if let Self::$variant(cause) = $self {
            write!($f, " ({cause})")?;
        }
    };
    (@cause $self:ident $f:ident $variant:ident) => {};

    (@from $name:ident $variant:ident ($inner:ty)) => {
        impl From<$inner> for $name {
            fn from(inner: $inner) -> Self {
                Self::$variant(inner)
            }
        }
    };
    (@from $name:ident $variant:ident) => {};
}
