//! Allocator statistics.

use core::fmt;

use crate::addr::order_size;

/// A snapshot of the allocator's usage.
///
/// Produced by [`BuddyAllocator::stats`](crate::BuddyAllocator::stats).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats<const NUM_LISTS: usize> {
    /// Size of the arena in bytes.
    pub total_bytes: usize,
    /// Bytes held by live allocations, counted at block granularity.
    pub allocated_bytes: usize,
    /// Bytes sitting in the free lists.
    pub free_bytes: usize,
    /// Number of free blocks in each size class.
    pub free_blocks: [usize; NUM_LISTS],
    /// Number of successful allocations since construction.
    pub allocations: usize,
    /// Number of successful frees since construction.
    pub frees: usize,
    /// Number of allocation requests that failed.
    pub failed_allocations: usize,
}

impl<const NUM_LISTS: usize> Stats<NUM_LISTS> {
    /// Returns the size of the largest free block, or `0` if none is free.
    #[must_use]
    pub fn largest_free_block(&self) -> usize {
        self.free_blocks
            .iter()
            .rposition(|&count| count > 0)
            .map_or(0, order_size)
    }
}

impl<const NUM_LISTS: usize> fmt::Display for Stats<NUM_LISTS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Buddy Allocator")?;
        writeln!(f, "~~~~~~~~~~~~~~~")?;
        writeln!(f, "Total bytes:     {:#x}", self.total_bytes)?;
        writeln!(f, "Allocated bytes: {:#x}", self.allocated_bytes)?;
        writeln!(f, "Free bytes:      {:#x}", self.free_bytes)?;
        writeln!(
            f,
            "Allocations: {}, frees: {}, failed: {}",
            self.allocations, self.frees, self.failed_allocations
        )?;
        for (order, count) in self.free_blocks.iter().enumerate() {
            writeln!(
                f,
                "  order {order:2} ({:#10x} bytes): {count} free",
                order_size(order)
            )?;
        }
        Ok(())
    }
}
