//! The kernel heap.
//!
//! A single [`BuddyAllocator`] over the arena described in [`config`],
//! shared by the whole kernel behind a spin lock. Page-table setup, drivers
//! and the filesystem layers allocate through [`kalloc`] and release through
//! [`kfree`].
//!
//! Allocation failures are reported as `None`. Misuse on free (a bad
//! address or a double free) is a kernel bug: [`kfree`] halts with a report,
//! while [`try_kfree`] hands the error back to the caller instead.
//!
//! The lock is not reentrant. Calling into the heap from code that already
//! holds it (for example an interrupt handler that interrupted `kalloc`)
//! deadlocks.

#![cfg_attr(not(test), no_std)]

use allocator::{BuddyAllocator, BuddyError, Stats};
use log::warn;
use spin::Mutex;

use self::config::{BLOCK_OFFSET, NUM_BLOCKS, NUM_LISTS};

pub mod config;
pub mod error;

/// Allocator type backing the kernel heap.
pub type KernelAllocator = BuddyAllocator<NUM_LISTS, NUM_BLOCKS>;

static HEAP: Mutex<KernelAllocator> = Mutex::new(KernelAllocator::new(BLOCK_OFFSET));

/// Allocates at least `size` bytes from the kernel heap.
///
/// The returned address is page-aligned and the region is
/// `size.max(PAGE_SIZE).next_power_of_two()` bytes long. Returns `None` if
/// the request is larger than the heap or no block is free.
#[must_use]
pub fn kalloc(size: usize) -> Option<usize> {
    let result = HEAP.lock().allocate(size);
    match result {
        Ok(addr) => Some(addr),
        Err(err) if err.is_recoverable() => {
            warn!("kalloc({size:#x}) failed: {err}");
            None
        }
        Err(err) => error::report(&err),
    }
}

/// Returns a block obtained from [`kalloc`] to the kernel heap.
///
/// # Panics
///
/// Panics with an error report if `addr` is not a live allocation.
#[track_caller]
pub fn kfree(addr: usize) {
    if let Err(err) = try_kfree(addr) {
        error::report(&err);
    }
}

/// Returns a block obtained from [`kalloc`] to the kernel heap, reporting
/// misuse as an error.
pub fn try_kfree(addr: usize) -> Result<(), BuddyError> {
    HEAP.lock().deallocate(addr)
}

/// Returns the size of the live allocation at `addr`, if there is one.
#[must_use]
pub fn allocation_size(addr: usize) -> Option<usize> {
    HEAP.lock().allocation_size(addr)
}

/// Returns a snapshot of the kernel heap's usage.
#[must_use]
pub fn stats() -> Stats<NUM_LISTS> {
    HEAP.lock().stats()
}

/// Verifies the kernel heap's metadata.
pub fn check_consistency() -> Result<(), BuddyError> {
    HEAP.lock().check_consistency()
}
