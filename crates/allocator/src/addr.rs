//! Conversions between block indices and arena addresses.
//!
//! Everything in this module is a pure function of its arguments. Block
//! indices are arena-relative page numbers in `0..num_blocks`; addresses are
//! absolute.

use core::num::NonZeroUsize;

use crate::{PAGE_SHIFT, PAGE_SIZE};

/// Returns the smallest power of two greater than or equal to `n`.
///
/// `0` and `1` both round to `1`. Returns `None` if the result does not fit
/// in a `usize`.
///
/// # Examples
///
/// ```
/// use allocator::addr::round_up_pow2;
///
/// assert_eq!(round_up_pow2(3), Some(4));
/// assert_eq!(round_up_pow2(4096), Some(4096));
/// assert_eq!(round_up_pow2(usize::MAX), None);
/// ```
#[must_use]
pub const fn round_up_pow2(n: usize) -> Option<usize> {
    if n <= 1 {
        return Some(1);
    }
    let mut v = n - 1;
    let mut shift = 1;
    while shift < usize::BITS {
        v |= v >> shift;
        shift <<= 1;
    }
    v.checked_add(1)
}

/// Returns the position of the highest set bit of `n`.
///
/// Taking `NonZeroUsize` keeps zero out of every call site.
#[must_use]
pub const fn log2_floor(n: NonZeroUsize) -> usize {
    n.ilog2() as usize
}

/// Returns the size in bytes of a block of the given order.
#[must_use]
pub const fn order_size(order: usize) -> usize {
    PAGE_SIZE << order
}

/// The fixed range of pages managed by one allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arena {
    base: usize,
    num_blocks: usize,
}

impl Arena {
    /// Creates an arena of `num_blocks` pages starting at `base`.
    ///
    /// # Panics
    ///
    /// Panics if `base` is not page-aligned or if the arena would extend
    /// past the end of the address space.
    #[must_use]
    pub const fn new(base: usize, num_blocks: usize) -> Self {
        assert!(
            base.is_multiple_of(PAGE_SIZE),
            "arena base must be page-aligned"
        );
        assert!(
            num_blocks <= usize::MAX >> PAGE_SHIFT,
            "arena size overflows usize"
        );
        assert!(
            base.checked_add(num_blocks << PAGE_SHIFT).is_some(),
            "arena end overflows usize"
        );
        Self { base, num_blocks }
    }

    /// Returns the address of the first page of the arena.
    #[must_use]
    pub const fn base(&self) -> usize {
        self.base
    }

    /// Returns the address one past the last byte of the arena.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.base + self.size()
    }

    /// Returns the arena capacity in pages.
    #[must_use]
    pub const fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    /// Returns the arena size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.num_blocks << PAGE_SHIFT
    }

    /// Returns `true` if `addr` lies within the arena.
    #[must_use]
    pub const fn contains(&self, addr: usize) -> bool {
        self.base <= addr && addr < self.end()
    }

    /// Converts a block index to the address of its first byte.
    ///
    /// The index is not checked against the arena bounds.
    #[must_use]
    pub const fn index_to_addr(&self, index: usize) -> usize {
        (index << PAGE_SHIFT) + self.base
    }

    /// Converts an address to the index of the page containing it.
    ///
    /// Returns `None` if `addr` is outside the arena.
    #[must_use]
    pub const fn addr_to_index(&self, addr: usize) -> Option<usize> {
        if !self.contains(addr) {
            return None;
        }
        Some((addr - self.base) >> PAGE_SHIFT)
    }

    /// Returns the index of the buddy of block `index` at `order`.
    ///
    /// A block whose `order` bit is clear pairs with the block right above it
    /// at the same order; otherwise it pairs with the block right below.
    /// Returns `None` if the buddy falls outside the arena.
    #[must_use]
    pub const fn buddy_index(&self, index: usize, order: usize) -> Option<usize> {
        if order >= usize::BITS as usize {
            return None;
        }
        let stride = 1 << order;
        let buddy = if index & stride == 0 {
            match index.checked_add(stride) {
                Some(buddy) => buddy,
                None => return None,
            }
        } else {
            index - stride
        };
        if buddy < self.num_blocks {
            Some(buddy)
        } else {
            None
        }
    }
}
