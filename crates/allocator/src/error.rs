use snafu::{Location, Snafu};

/// Errors returned by [`BuddyAllocator`](crate::BuddyAllocator) operations.
///
/// `SizeTooLarge` and `OutOfMemory` are ordinary allocation failures. The
/// remaining variants indicate misuse of the allocator or corrupted
/// metadata; see [`BuddyError::is_recoverable`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BuddyError {
    #[snafu(display("requested size {size:#x} exceeds the largest block size"))]
    SizeTooLarge {
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("no free block of order {order} or above"))]
    OutOfMemory {
        order: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("invalid free of address {addr:#x}: {reason}"))]
    InvalidFree {
        addr: usize,
        reason: &'static str,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("double free of address {addr:#x}"))]
    DoubleFree {
        addr: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("corrupt allocator state at block {index}, order {order}: {reason}"))]
    CorruptState {
        index: usize,
        order: usize,
        reason: &'static str,
        #[snafu(implicit)]
        location: Location,
    },
}

impl BuddyError {
    /// Returns `true` for allocation failures the caller is expected to
    /// handle, and `false` for errors that indicate a bug.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SizeTooLarge { .. } | Self::OutOfMemory { .. })
    }

    /// Returns the source location where the error was raised.
    #[must_use]
    pub fn location(&self) -> &Location {
        match self {
            Self::SizeTooLarge { location, .. }
            | Self::OutOfMemory { location, .. }
            | Self::InvalidFree { location, .. }
            | Self::DoubleFree { location, .. }
            | Self::CorruptState { location, .. } => location,
        }
    }
}
