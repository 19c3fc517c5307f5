//! The buddy allocation engine.
//!
//! # Algorithm
//!
//! The arena is `NUM_BLOCKS` pages, and every region handed out is a
//! power-of-two number of pages aligned to its own size:
//!
//! - **Allocation** rounds the request up to a size class (order). If that
//!   order's free list is empty, the smallest larger free block is taken and
//!   halved repeatedly; each upper half goes back to the free list one order
//!   down, and the lower half carries on until it has the requested order.
//! - **Deallocation** repeatedly merges the freed block with its buddy while
//!   the buddy is free at the same order, then pushes the merged block onto
//!   the free list of the resulting order.
//!
//! ```text
//! order 2: |               0               |
//! order 1: |       0       |       2       |
//! order 0: |   0   |   1   |   2   |   3   |
//! ```
//!
//! # Performance Characteristics
//!
//! - Free-list push, pop and unlink are O(1).
//! - Allocation and deallocation loop at most `NUM_LISTS` times.

use core::num::NonZeroUsize;

use log::{debug, error, trace};
use snafu::{OptionExt as _, ensure};

use crate::{
    BlockState, PAGE_SHIFT, PAGE_SIZE,
    addr::{self, Arena, order_size},
    error::{
        BuddyError, CorruptStateSnafu, DoubleFreeSnafu, InvalidFreeSnafu, OutOfMemorySnafu,
        SizeTooLargeSnafu,
    },
    free_list::FreeLists,
    registry::BlockRegistry,
    stats::Stats,
};

/// A buddy allocator over a fixed arena of `NUM_BLOCKS` pages with
/// `NUM_LISTS` size classes.
///
/// Order `k` blocks are `PAGE_SIZE << k` bytes, so the top order covers the
/// whole arena. `NUM_BLOCKS` must equal `2^(NUM_LISTS - 1)`; any other
/// combination is rejected when [`new`](Self::new) is instantiated.
///
/// # Examples
///
/// ```
/// use allocator::{BuddyAllocator, BuddyError, PAGE_SIZE};
///
/// let mut allocator = BuddyAllocator::<3, 4>::new(0x0800_0000);
/// let a = allocator.allocate(PAGE_SIZE).unwrap();
/// let b = allocator.allocate(2 * PAGE_SIZE).unwrap();
/// assert_ne!(a, b);
///
/// assert!(matches!(
///     allocator.allocate(4 * PAGE_SIZE),
///     Err(BuddyError::OutOfMemory { .. })
/// ));
///
/// allocator.deallocate(a).unwrap();
/// allocator.deallocate(b).unwrap();
/// assert!(allocator.allocate(4 * PAGE_SIZE).is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct BuddyAllocator<const NUM_LISTS: usize, const NUM_BLOCKS: usize> {
    arena: Arena,
    registry: BlockRegistry<NUM_BLOCKS>,
    free_lists: FreeLists<NUM_LISTS>,
    allocated_bytes: usize,
    allocations: usize,
    frees: usize,
    failed_allocations: usize,
}

impl<const NUM_LISTS: usize, const NUM_BLOCKS: usize> BuddyAllocator<NUM_LISTS, NUM_BLOCKS> {
    const TOP_ORDER: usize = NUM_LISTS - 1;

    /// Creates an allocator whose arena starts at `base`.
    ///
    /// The whole arena starts out as a single free block of the top order.
    ///
    /// # Panics
    ///
    /// Panics if `base` is not page-aligned or the arena would run past the
    /// end of the address space. When called in a `static` initializer this
    /// is a compile-time error.
    #[must_use]
    pub const fn new(base: usize) -> Self {
        const {
            assert!(NUM_LISTS >= 1, "at least one size class is required");
            assert!(
                NUM_LISTS <= usize::BITS as usize - PAGE_SHIFT,
                "largest block size overflows usize"
            );
            assert!(
                NUM_BLOCKS == 1 << (NUM_LISTS - 1),
                "NUM_BLOCKS must equal 2^(NUM_LISTS - 1)"
            );
        }
        Self {
            arena: Arena::new(base, NUM_BLOCKS),
            registry: BlockRegistry::new(Self::TOP_ORDER),
            free_lists: FreeLists::new(),
            allocated_bytes: 0,
            allocations: 0,
            frees: 0,
            failed_allocations: 0,
        }
    }

    /// Returns the arena managed by this allocator.
    #[must_use]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Returns the size of the largest block the allocator can hand out.
    #[must_use]
    pub const fn max_block_size() -> usize {
        order_size(Self::TOP_ORDER)
    }

    /// Returns the order of the block that serves a request of `size` bytes.
    ///
    /// Requests smaller than a page are served by a single page. Returns
    /// `None` if the request exceeds the largest size class.
    #[must_use]
    pub fn order_for_size(size: usize) -> Option<usize> {
        let adjusted = usize::max(size, PAGE_SIZE);
        if adjusted > Self::max_block_size() {
            return None;
        }
        let rounded = NonZeroUsize::new(addr::round_up_pow2(adjusted)?)?;
        let order = addr::log2_floor(rounded) - PAGE_SHIFT;
        (order < NUM_LISTS).then_some(order)
    }

    /// Allocates a block of at least `size` bytes and returns its address.
    ///
    /// The block is `PAGE_SIZE << order` bytes for the smallest order that
    /// fits `size`, and is aligned to a page boundary.
    pub fn allocate(&mut self, size: usize) -> Result<usize, BuddyError> {
        match self.allocate_block(size) {
            Ok(addr) => {
                self.allocations += 1;
                debug!("allocated {size:#x} bytes at {addr:#x}");
                Ok(addr)
            }
            Err(err) => {
                self.failed_allocations += 1;
                Err(err)
            }
        }
    }

    fn allocate_block(&mut self, size: usize) -> Result<usize, BuddyError> {
        let order = Self::order_for_size(size).context(SizeTooLargeSnafu { size })?;

        let (from_order, index) = (order..NUM_LISTS)
            .find_map(|o| {
                self.free_lists
                    .pop(&mut self.registry, o)
                    .map(|index| (o, index))
            })
            .context(OutOfMemorySnafu { order })?;

        let pages = 1_usize << from_order;
        if !index.is_multiple_of(pages) || index + pages > NUM_BLOCKS {
            self.free_lists.push(&mut self.registry, from_order, index);
            return CorruptStateSnafu {
                index,
                order: from_order,
                reason: "free block is misaligned for its order",
            }
            .fail();
        }

        // halve the block until it has the requested order, releasing the
        // upper half at each level
        for level in (order + 1..=from_order).rev() {
            let upper = index + (1 << (level - 1));
            trace!("split block {index} of order {level}, freeing block {upper}");
            self.free_lists.push(&mut self.registry, level - 1, upper);
        }
        self.registry.set_state(index, BlockState::Allocated(order));
        self.allocated_bytes += order_size(order);
        Ok(self.arena.index_to_addr(index))
    }

    /// Allocates a block of at least `size` bytes, returning `Ok(None)` when
    /// the request cannot be served.
    ///
    /// Only [`SizeTooLarge`](BuddyError::SizeTooLarge) and
    /// [`OutOfMemory`](BuddyError::OutOfMemory) are folded into `None`;
    /// corrupted metadata is still returned as an error.
    pub fn kalloc(&mut self, size: usize) -> Result<Option<usize>, BuddyError> {
        match self.allocate(size) {
            Ok(addr) => Ok(Some(addr)),
            Err(err) if err.is_recoverable() => {
                debug!("allocation of {size:#x} bytes failed: {err}");
                Ok(None)
            }
            Err(err) => {
                error!("allocation of {size:#x} bytes failed: {err} (at {})", err.location());
                Err(err)
            }
        }
    }

    /// Returns the block at `addr` to the allocator.
    ///
    /// The block is merged with its buddy for as long as the buddy is free
    /// at the same order.
    pub fn deallocate(&mut self, addr: usize) -> Result<(), BuddyError> {
        ensure!(
            addr.is_multiple_of(PAGE_SIZE),
            InvalidFreeSnafu {
                addr,
                reason: "address is not page-aligned",
            }
        );
        let mut index = self.arena.addr_to_index(addr).context(InvalidFreeSnafu {
            addr,
            reason: "address is outside the arena",
        })?;
        let mut order = match self.registry.state(index) {
            BlockState::Allocated(order) => order,
            BlockState::Free(_) => return DoubleFreeSnafu { addr }.fail(),
            BlockState::Absorbed => {
                return InvalidFreeSnafu {
                    addr,
                    reason: "address is inside a larger block",
                }
                .fail();
            }
        };
        ensure!(
            order < NUM_LISTS && index.is_multiple_of(1 << order),
            CorruptStateSnafu {
                index,
                order,
                reason: "allocated block is misaligned for its order",
            }
        );

        let size = order_size(order);
        while order < Self::TOP_ORDER {
            let buddy = self
                .arena
                .buddy_index(index, order)
                .context(CorruptStateSnafu {
                    index,
                    order,
                    reason: "buddy lies outside the arena",
                })?;
            if self.registry.state(buddy) != BlockState::Free(order) {
                break;
            }
            self.free_lists.remove(&mut self.registry, order, buddy);
            trace!("merge block {index} with buddy {buddy} at order {order}");
            self.registry.absorb(usize::max(index, buddy));
            index = usize::min(index, buddy);
            order += 1;
        }
        self.free_lists.push(&mut self.registry, order, index);

        self.allocated_bytes -= size;
        self.frees += 1;
        debug!("freed {size:#x} bytes at {addr:#x}");
        Ok(())
    }

    /// Returns the size of the live allocation starting at `addr`.
    ///
    /// Returns `None` if `addr` is not the start of an allocated block.
    #[must_use]
    pub fn allocation_size(&self, addr: usize) -> Option<usize> {
        let index = self.arena.addr_to_index(addr)?;
        if self.arena.index_to_addr(index) != addr {
            return None;
        }
        match self.registry.state(index) {
            BlockState::Allocated(order) => Some(order_size(order)),
            BlockState::Free(_) | BlockState::Absorbed => None,
        }
    }

    /// Returns `true` if `addr` lies within the managed arena.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        self.arena.contains(addr)
    }

    /// Iterates over the addresses of the free blocks of `order`.
    ///
    /// # Panics
    ///
    /// Panics if `order >= NUM_LISTS`.
    pub fn free_blocks(&self, order: usize) -> impl Iterator<Item = usize> + '_ {
        assert!(order < NUM_LISTS, "order {order} out of range");
        self.free_lists
            .iter(&self.registry, order)
            .map(|index| self.arena.index_to_addr(index))
    }

    /// Returns a snapshot of the allocator's usage.
    #[must_use]
    pub fn stats(&self) -> Stats<NUM_LISTS> {
        let mut free_blocks = [0; NUM_LISTS];
        let mut free_bytes = 0;
        for (order, count) in free_blocks.iter_mut().enumerate() {
            *count = self.free_lists.iter(&self.registry, order).count();
            free_bytes += *count * order_size(order);
        }
        Stats {
            total_bytes: self.arena.size(),
            allocated_bytes: self.allocated_bytes,
            free_bytes,
            free_blocks,
            allocations: self.allocations,
            frees: self.frees,
            failed_allocations: self.failed_allocations,
        }
    }

    /// Verifies the allocator's metadata.
    ///
    /// Walks every free list and every block head, and returns
    /// [`BuddyError::CorruptState`] on the first inconsistency found.
    pub fn check_consistency(&self) -> Result<(), BuddyError> {
        let mut listed = [0; NUM_LISTS];
        for (order, count) in listed.iter_mut().enumerate() {
            let mut prev = None;
            for index in self.free_lists.iter(&self.registry, order) {
                ensure!(
                    *count < NUM_BLOCKS,
                    CorruptStateSnafu {
                        index,
                        order,
                        reason: "free list contains a cycle",
                    }
                );
                ensure!(
                    self.registry.state(index) == BlockState::Free(order),
                    CorruptStateSnafu {
                        index,
                        order,
                        reason: "free list member is not free at the list's order",
                    }
                );
                ensure!(
                    self.registry.prev(index) == prev,
                    CorruptStateSnafu {
                        index,
                        order,
                        reason: "free list links are not symmetric",
                    }
                );
                prev = Some(index);
                *count += 1;
            }
        }

        let mut free_heads = [0; NUM_LISTS];
        let mut free_bytes = 0;
        let mut allocated_bytes = 0;
        let mut index = 0;
        while index < NUM_BLOCKS {
            let order = self.registry.order(index).context(CorruptStateSnafu {
                index,
                order: 0_usize,
                reason: "absorbed block is not covered by a block head",
            })?;
            ensure!(
                order < NUM_LISTS,
                CorruptStateSnafu {
                    index,
                    order,
                    reason: "block order exceeds the largest size class",
                }
            );
            let pages = 1 << order;
            ensure!(
                index.is_multiple_of(pages) && index + pages <= NUM_BLOCKS,
                CorruptStateSnafu {
                    index,
                    order,
                    reason: "block head is misaligned for its order",
                }
            );
            if let Some((inner, _)) = self
                .registry
                .iter()
                .skip(index + 1)
                .take(pages - 1)
                .find(|(_, state)| *state != BlockState::Absorbed)
            {
                return CorruptStateSnafu {
                    index: inner,
                    order,
                    reason: "block head overlaps another block",
                }
                .fail();
            }
            if self.registry.is_free(index) {
                free_heads[order] += 1;
                free_bytes += order_size(order);
            } else {
                allocated_bytes += order_size(order);
            }
            index += pages;
        }

        if let Some(order) = (0..NUM_LISTS).find(|&order| free_heads[order] != listed[order]) {
            return CorruptStateSnafu {
                index: self.free_lists.head(order).unwrap_or(NUM_BLOCKS),
                order,
                reason: "free block is missing from its free list",
            }
            .fail();
        }
        ensure!(
            allocated_bytes == self.allocated_bytes
                && free_bytes + allocated_bytes == self.arena.size(),
            CorruptStateSnafu {
                index: 0_usize,
                order: Self::TOP_ORDER,
                reason: "free and allocated bytes do not add up to the arena size",
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::{RngCore as _, SeedableRng as _};
    use rand_xorshift::XorShiftRng;

    use super::*;

    const BASE: usize = 0x0100_0000;

    type Buddy = BuddyAllocator<6, 32>;

    fn free_counts(allocator: &Buddy) -> [usize; 6] {
        allocator.stats().free_blocks
    }

    fn assert_consistent<const L: usize, const B: usize>(allocator: &BuddyAllocator<L, B>) {
        if let Err(err) = allocator.check_consistency() {
            panic!("inconsistent allocator: {err}");
        }
    }

    #[test]
    fn test_new_allocator() {
        let allocator = Buddy::new(BASE);
        let stats = allocator.stats();
        assert_eq!(stats.total_bytes, 32 * PAGE_SIZE);
        assert_eq!(stats.free_bytes, 32 * PAGE_SIZE);
        assert_eq!(stats.allocated_bytes, 0);
        assert_eq!(stats.free_blocks, [0, 0, 0, 0, 0, 1]);
        assert_eq!(allocator.free_blocks(5).collect::<Vec<_>>(), [BASE]);
        assert_eq!(Buddy::max_block_size(), 32 * PAGE_SIZE);
        assert_consistent(&allocator);
    }

    #[test]
    fn test_order_for_size() {
        assert_eq!(Buddy::order_for_size(0), Some(0));
        assert_eq!(Buddy::order_for_size(1), Some(0));
        assert_eq!(Buddy::order_for_size(PAGE_SIZE), Some(0));
        assert_eq!(Buddy::order_for_size(PAGE_SIZE + 1), Some(1));
        assert_eq!(Buddy::order_for_size(3 * PAGE_SIZE), Some(2));
        assert_eq!(Buddy::order_for_size(32 * PAGE_SIZE), Some(5));
        assert_eq!(Buddy::order_for_size(32 * PAGE_SIZE + 1), None);
        assert_eq!(Buddy::order_for_size(usize::MAX), None);
    }

    #[test]
    fn test_allocate_splits_down() {
        let mut allocator = Buddy::new(BASE);
        let addr = allocator.allocate(PAGE_SIZE).unwrap();
        assert_eq!(addr, BASE);
        assert_eq!(free_counts(&allocator), [1, 1, 1, 1, 1, 0]);
        assert_eq!(allocator.free_blocks(0).collect::<Vec<_>>(), [BASE + PAGE_SIZE]);
        assert_eq!(allocator.free_blocks(4).collect::<Vec<_>>(), [BASE + 16 * PAGE_SIZE]);
        assert_eq!(allocator.allocation_size(addr), Some(PAGE_SIZE));
        assert_consistent(&allocator);
    }

    #[test]
    fn test_allocate_exact_order_fast_path() {
        let mut allocator = Buddy::new(BASE);
        let first = allocator.allocate(PAGE_SIZE).unwrap();
        let second = allocator.allocate(PAGE_SIZE).unwrap();
        assert_eq!(first, BASE);
        assert_eq!(second, BASE + PAGE_SIZE);
        assert_eq!(free_counts(&allocator), [0, 1, 1, 1, 1, 0]);
        assert_consistent(&allocator);
    }

    #[test]
    fn test_alignment_and_bounds() {
        let mut allocator = Buddy::new(BASE);
        for size in [1, PAGE_SIZE, 3 * PAGE_SIZE, 5 * PAGE_SIZE, 2 * PAGE_SIZE - 1] {
            let addr = allocator.allocate(size).unwrap();
            let block = allocator.allocation_size(addr).unwrap();
            assert_eq!(addr % PAGE_SIZE, 0);
            assert_eq!((addr - BASE) % block, 0);
            assert!(block >= size);
            assert!(addr >= BASE);
            assert!(addr + block <= allocator.arena().end());
        }
        assert_consistent(&allocator);
    }

    #[test]
    fn test_size_too_large() {
        let mut allocator = Buddy::new(BASE);
        let err = allocator.allocate(33 * PAGE_SIZE).unwrap_err();
        assert!(matches!(err, BuddyError::SizeTooLarge { size, .. } if size == 33 * PAGE_SIZE));
        assert!(err.is_recoverable());
        assert_eq!(allocator.kalloc(usize::MAX).unwrap(), None);
        assert_eq!(allocator.stats().failed_allocations, 2);
        assert_eq!(free_counts(&allocator), [0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_whole_arena_allocation() {
        let mut allocator = Buddy::new(BASE);
        let addr = allocator.allocate(32 * PAGE_SIZE).unwrap();
        assert_eq!(addr, BASE);
        assert!(matches!(
            allocator.allocate(1),
            Err(BuddyError::OutOfMemory { order: 0, .. })
        ));
        allocator.deallocate(addr).unwrap();
        assert_eq!(free_counts(&allocator), [0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_exhaustion() {
        let mut allocator = Buddy::new(BASE);
        for _ in 0..2 {
            let mut addrs = Vec::new();
            for _ in 0..32 {
                addrs.push(allocator.allocate(PAGE_SIZE).unwrap());
            }
            let err = allocator.allocate(PAGE_SIZE).unwrap_err();
            assert!(matches!(err, BuddyError::OutOfMemory { .. }));
            assert_eq!(allocator.stats().free_bytes, 0);
            assert_consistent(&allocator);

            for addr in addrs {
                allocator.deallocate(addr).unwrap();
            }
            assert_eq!(free_counts(&allocator), [0, 0, 0, 0, 0, 1]);
            assert_consistent(&allocator);
        }
    }

    #[test]
    fn test_split_reuse() {
        let mut allocator = Buddy::new(BASE);
        let mut addrs = Vec::new();
        while let Some(addr) = allocator.kalloc(3 * PAGE_SIZE).unwrap() {
            assert_eq!(allocator.allocation_size(addr), Some(4 * PAGE_SIZE));
            addrs.push(addr);
        }
        assert_eq!(addrs.len(), 8);

        // nothing smaller is left before a free
        assert!(matches!(
            allocator.allocate(PAGE_SIZE),
            Err(BuddyError::OutOfMemory { .. })
        ));

        allocator.deallocate(addrs[3]).unwrap();
        let addr = allocator.allocate(PAGE_SIZE).unwrap();
        assert_eq!(addr, addrs[3]);
        assert_eq!(free_counts(&allocator), [1, 1, 0, 0, 0, 0]);
        assert_consistent(&allocator);
    }

    #[test]
    fn test_coalescing_lower_first() {
        let mut allocator = Buddy::new(BASE);
        let addrs: Vec<_> = (0..4).map(|_| allocator.allocate(PAGE_SIZE).unwrap()).collect();
        assert_eq!(free_counts(&allocator), [0, 0, 1, 1, 1, 0]);

        allocator.deallocate(addrs[0]).unwrap();
        assert_eq!(free_counts(&allocator), [1, 0, 1, 1, 1, 0]);
        allocator.deallocate(addrs[1]).unwrap();
        assert_eq!(free_counts(&allocator), [0, 1, 1, 1, 1, 0]);
        assert_eq!(allocator.free_blocks(1).collect::<Vec<_>>(), [addrs[0]]);
        assert_consistent(&allocator);
    }

    #[test]
    fn test_coalescing_upper_first() {
        let mut allocator = Buddy::new(BASE);
        let addrs: Vec<_> = (0..4).map(|_| allocator.allocate(PAGE_SIZE).unwrap()).collect();

        allocator.deallocate(addrs[3]).unwrap();
        allocator.deallocate(addrs[2]).unwrap();
        assert_eq!(free_counts(&allocator), [0, 1, 1, 1, 1, 0]);
        assert_eq!(allocator.free_blocks(1).collect::<Vec<_>>(), [addrs[2]]);
        assert_eq!(addrs[2], BASE + 2 * PAGE_SIZE);
        assert_consistent(&allocator);
    }

    #[test]
    fn test_no_merge_with_split_buddy() {
        let mut allocator = Buddy::new(BASE);
        let x = allocator.allocate(2 * PAGE_SIZE).unwrap();
        let y = allocator.allocate(PAGE_SIZE).unwrap();
        let z = allocator.allocate(PAGE_SIZE).unwrap();
        assert_eq!((x, y, z), (BASE, BASE + 2 * PAGE_SIZE, BASE + 3 * PAGE_SIZE));

        // y's page is free at order 0, x's buddy at order 1 is only half free
        allocator.deallocate(y).unwrap();
        allocator.deallocate(x).unwrap();
        assert_eq!(allocator.free_blocks(1).collect::<Vec<_>>(), [BASE]);
        assert_eq!(allocator.free_blocks(0).collect::<Vec<_>>(), [y]);
        assert_consistent(&allocator);

        allocator.deallocate(z).unwrap();
        assert_eq!(free_counts(&allocator), [0, 0, 0, 0, 0, 1]);
        assert_consistent(&allocator);
    }

    #[test]
    fn test_round_trip_restores_metadata() {
        let fresh = Buddy::new(BASE);
        for size in [1, PAGE_SIZE, 2 * PAGE_SIZE, 7 * PAGE_SIZE, 32 * PAGE_SIZE] {
            let mut allocator = fresh.clone();
            let addr = allocator.allocate(size).unwrap();
            allocator.deallocate(addr).unwrap();
            assert_eq!(allocator.registry, fresh.registry);
            assert_eq!(allocator.free_lists, fresh.free_lists);
            assert_eq!(allocator.allocated_bytes, 0);
        }
    }

    #[test]
    fn test_round_trip_from_quiescent_state() {
        let fresh = Buddy::new(BASE);
        let mut allocator = fresh.clone();
        let addrs: Vec<_> = [PAGE_SIZE, 4 * PAGE_SIZE, 2 * PAGE_SIZE, PAGE_SIZE]
            .into_iter()
            .map(|size| allocator.allocate(size).unwrap())
            .collect();
        for addr in addrs.into_iter().rev() {
            allocator.deallocate(addr).unwrap();
        }
        assert_eq!(allocator.registry, fresh.registry);
        assert_eq!(allocator.free_lists, fresh.free_lists);

        let addr = allocator.allocate(3 * PAGE_SIZE).unwrap();
        allocator.deallocate(addr).unwrap();
        assert_eq!(allocator.registry, fresh.registry);
        assert_eq!(allocator.free_lists, fresh.free_lists);
    }

    #[test]
    fn test_double_free() {
        let mut allocator = Buddy::new(BASE);
        let a = allocator.allocate(PAGE_SIZE).unwrap();
        let _b = allocator.allocate(PAGE_SIZE).unwrap();
        allocator.deallocate(a).unwrap();
        let err = allocator.deallocate(a).unwrap_err();
        assert!(matches!(err, BuddyError::DoubleFree { addr, .. } if addr == a));
        assert!(!err.is_recoverable());
        assert_consistent(&allocator);
    }

    #[test]
    fn test_double_free_after_merge() {
        let mut allocator = Buddy::new(BASE);
        let a = allocator.allocate(PAGE_SIZE).unwrap();
        allocator.deallocate(a).unwrap();
        // `a` heads the whole arena again
        assert!(matches!(
            allocator.deallocate(a),
            Err(BuddyError::DoubleFree { .. })
        ));
    }

    #[test]
    fn test_invalid_free() {
        let mut allocator = Buddy::new(BASE);
        let a = allocator.allocate(4 * PAGE_SIZE).unwrap();

        for (addr, expected) in [
            (a + 1, "address is not page-aligned"),
            (BASE - PAGE_SIZE, "address is outside the arena"),
            (BASE + 32 * PAGE_SIZE, "address is outside the arena"),
            (a + PAGE_SIZE, "address is inside a larger block"),
        ] {
            let err = allocator.deallocate(addr).unwrap_err();
            assert!(
                matches!(err, BuddyError::InvalidFree { reason, .. } if reason == expected),
                "{err}"
            );
        }
        assert_eq!(allocator.allocation_size(a), Some(4 * PAGE_SIZE));
        assert_consistent(&allocator);
    }

    #[test]
    fn test_free_of_never_allocated_split_half() {
        let mut allocator = Buddy::new(BASE);
        let _a = allocator.allocate(PAGE_SIZE).unwrap();
        // the upper half of the first split is free, not allocated
        assert!(matches!(
            allocator.deallocate(BASE + 16 * PAGE_SIZE),
            Err(BuddyError::DoubleFree { .. })
        ));
    }

    #[test]
    fn test_allocation_size() {
        let mut allocator = Buddy::new(BASE);
        let a = allocator.allocate(5 * PAGE_SIZE).unwrap();
        assert_eq!(allocator.allocation_size(a), Some(8 * PAGE_SIZE));
        assert_eq!(allocator.allocation_size(a + 1), None);
        assert_eq!(allocator.allocation_size(a + PAGE_SIZE), None);
        assert_eq!(allocator.allocation_size(0), None);
        assert!(allocator.contains(a));
        assert!(!allocator.contains(BASE + 32 * PAGE_SIZE));
    }

    #[test]
    fn test_stats_counters() {
        let mut allocator = Buddy::new(BASE);
        let a = allocator.allocate(PAGE_SIZE).unwrap();
        let b = allocator.allocate(2 * PAGE_SIZE).unwrap();
        assert_eq!(allocator.kalloc(64 * PAGE_SIZE).unwrap(), None);
        allocator.deallocate(a).unwrap();

        let stats = allocator.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.frees, 1);
        assert_eq!(stats.failed_allocations, 1);
        assert_eq!(stats.allocated_bytes, 2 * PAGE_SIZE);
        assert_eq!(stats.free_bytes, 30 * PAGE_SIZE);
        assert_eq!(stats.largest_free_block(), 16 * PAGE_SIZE);

        allocator.deallocate(b).unwrap();
        assert_eq!(allocator.stats().allocated_bytes, 0);
    }

    #[test]
    fn test_consistency_detects_corruption() {
        let mut allocator = Buddy::new(BASE);
        let _a = allocator.allocate(PAGE_SIZE).unwrap();
        assert_consistent(&allocator);

        let mut broken = allocator.clone();
        broken.registry.set_state(1, BlockState::Allocated(0));
        assert!(matches!(
            broken.check_consistency(),
            Err(BuddyError::CorruptState { .. })
        ));

        let mut broken = allocator.clone();
        broken.registry.set_state(3, BlockState::Free(0));
        assert!(matches!(
            broken.check_consistency(),
            Err(BuddyError::CorruptState { .. })
        ));

        // block 1 is the only member of the order-0 list
        let mut broken = allocator;
        broken.registry.set_prev(1, Some(5));
        assert!(matches!(
            broken.check_consistency(),
            Err(BuddyError::CorruptState { .. })
        ));
    }

    #[test]
    fn test_deallocate_rejects_misaligned_head() {
        let mut allocator = Buddy::new(BASE);
        let _a = allocator.allocate(PAGE_SIZE).unwrap();

        // block 1 claims an order its index cannot be aligned to
        let mut broken = allocator.clone();
        broken.registry.set_state(1, BlockState::Allocated(1));
        let registry = broken.registry.clone();
        let free_lists = broken.free_lists.clone();

        let err = broken.deallocate(BASE + PAGE_SIZE).unwrap_err();
        assert!(matches!(
            err,
            BuddyError::CorruptState {
                index: 1,
                order: 1,
                reason: "allocated block is misaligned for its order",
                ..
            }
        ));
        assert!(!err.is_recoverable());
        assert_eq!(broken.registry, registry);
        assert_eq!(broken.free_lists, free_lists);
        assert_eq!(broken.stats().frees, 0);
    }

    #[test]
    fn test_allocate_rejects_misaligned_free_block() {
        let mut allocator = Buddy::new(BASE);
        let _a = allocator.allocate(PAGE_SIZE).unwrap();

        // move block 1 from the order-0 list to the head of the order-1 list
        let mut broken = allocator.clone();
        broken.free_lists.remove(&mut broken.registry, 0, 1);
        broken.free_lists.push(&mut broken.registry, 1, 1);
        let registry = broken.registry.clone();
        let free_lists = broken.free_lists.clone();

        let err = broken.kalloc(2 * PAGE_SIZE).unwrap_err();
        assert!(matches!(
            err,
            BuddyError::CorruptState {
                index: 1,
                order: 1,
                reason: "free block is misaligned for its order",
                ..
            }
        ));
        assert_eq!(broken.registry, registry);
        assert_eq!(broken.free_lists, free_lists);
        let stats = broken.stats();
        assert_eq!(stats.allocated_bytes, PAGE_SIZE);
        assert_eq!(stats.failed_allocations, 1);

        // a healthy allocator only folds recoverable failures into `None`
        assert_eq!(allocator.kalloc(2 * PAGE_SIZE).unwrap(), Some(BASE + 2 * PAGE_SIZE));
        assert_eq!(allocator.kalloc(64 * PAGE_SIZE).unwrap(), None);
    }

    #[test]
    fn test_single_size_class() {
        let mut allocator = BuddyAllocator::<1, 1>::new(BASE);
        let a = allocator.allocate(PAGE_SIZE).unwrap();
        assert!(matches!(
            allocator.allocate(PAGE_SIZE),
            Err(BuddyError::OutOfMemory { .. })
        ));
        assert!(matches!(
            allocator.allocate(2 * PAGE_SIZE),
            Err(BuddyError::SizeTooLarge { .. })
        ));
        allocator.deallocate(a).unwrap();
        assert_eq!(allocator.stats().free_blocks, [1]);
    }

    #[test]
    fn test_random_workload() {
        let mut rng = XorShiftRng::seed_from_u64(0x5eed_b0dd);
        let mut allocator = BuddyAllocator::<8, 128>::new(BASE);
        let mut live: Vec<(usize, usize)> = Vec::new();

        for _ in 0..4000 {
            let roll = rng.next_u64();
            if live.is_empty() || roll % 3 != 0 {
                let size = usize::try_from(rng.next_u64() % (9 * PAGE_SIZE as u64)).unwrap();
                let Ok(addr) = allocator.allocate(size) else {
                    continue;
                };
                let block = allocator.allocation_size(addr).unwrap();
                assert_eq!(addr % PAGE_SIZE, 0);
                assert!(block >= size);
                assert!(addr + block <= allocator.arena().end());
                for &(other, other_block) in &live {
                    assert!(addr + block <= other || other + other_block <= addr);
                }
                live.push((addr, block));
            } else {
                let victim = usize::try_from(roll / 3).unwrap() % live.len();
                let (addr, _) = live.swap_remove(victim);
                allocator.deallocate(addr).unwrap();
            }
            let stats = allocator.stats();
            assert_eq!(
                stats.allocated_bytes,
                live.iter().map(|&(_, block)| block).sum::<usize>()
            );
            assert_consistent(&allocator);
        }

        for (addr, _) in live {
            allocator.deallocate(addr).unwrap();
        }
        assert_eq!(allocator.stats().free_blocks, [0, 0, 0, 0, 0, 0, 0, 1]);
        assert_consistent(&allocator);
    }
}
