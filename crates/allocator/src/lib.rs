//! Buddy block allocator for the kernel's page arena.
//!
//! This crate provides the allocator that hands out every dynamically-sized
//! memory region used by the rest of the kernel: page-table pages, driver DMA
//! buffers and filesystem scratch buffers. It has no heap of its own. All of
//! its metadata lives in fixed-size arrays sized by const generics, and free
//! lists are linked by block index rather than by pointer.
//!
//! # Structure
//!
//! The allocator is split into four layers, leaves first:
//!
//! - [`addr`]: pure conversions between block indices and addresses, plus
//!   the power-of-two helpers used for size-class computation.
//! - `registry`: per-block metadata (state, order and intrusive links).
//! - `free_list`: one index-linked doubly-linked list per size class.
//! - [`buddy`]: the [`BuddyAllocator`] engine that splits and coalesces
//!   blocks.
//!
//! # Usage Example
//!
//! ```rust
//! use allocator::{BuddyAllocator, PAGE_SIZE};
//!
//! // 6 size classes over a 32-page arena starting at 16 MiB.
//! let mut allocator = BuddyAllocator::<6, 32>::new(0x0100_0000);
//!
//! let addr = allocator.allocate(3 * PAGE_SIZE).unwrap();
//! assert_eq!(addr % PAGE_SIZE, 0);
//! assert_eq!(allocator.allocation_size(addr), Some(4 * PAGE_SIZE));
//!
//! allocator.deallocate(addr).unwrap();
//! assert_eq!(allocator.stats().allocated_bytes, 0);
//! ```
//!
//! # Memory Safety
//!
//! The allocator only manages metadata and never reads or writes the arena
//! itself, so none of its operations are `unsafe`. Callers that turn the
//! returned addresses into pointers are responsible for the arena actually
//! being mapped and reserved for the allocator.
//!
//! # Thread Safety
//!
//! [`BuddyAllocator`] has no internal synchronization and every mutating
//! operation takes `&mut self`. Shared use requires an external lock around
//! the whole allocator.

#![cfg_attr(not(test), no_std)]

pub use self::{
    buddy::BuddyAllocator,
    error::BuddyError,
    registry::BlockState,
    stats::Stats,
};

pub mod addr;
pub mod buddy;
pub mod error;
mod free_list;
mod registry;
pub mod stats;

/// Size of the smallest block handed out by the allocator.
pub const PAGE_SIZE: usize = 4096;
/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: usize = 12;
const _: () = assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
