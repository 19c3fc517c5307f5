//! Compile-time layout of the kernel heap.
//!
//! The arena is reserved by the boot code; these constants only describe
//! it to the allocator.

use allocator::PAGE_SIZE;

/// Physical address of the first page of the heap arena.
pub const BLOCK_OFFSET: usize = 0x0040_0000;
/// Number of power-of-two size classes.
pub const NUM_LISTS: usize = 11;
/// Arena capacity in pages. Always `2^(NUM_LISTS - 1)` so that the whole
/// arena is one block of the top order.
pub const NUM_BLOCKS: usize = 1 << (NUM_LISTS - 1);
/// Arena size in bytes.
pub const HEAP_SIZE: usize = NUM_BLOCKS * PAGE_SIZE;

const _: () = assert!(BLOCK_OFFSET.is_multiple_of(PAGE_SIZE));
const _: () = assert!(BLOCK_OFFSET.checked_add(HEAP_SIZE).is_some());
