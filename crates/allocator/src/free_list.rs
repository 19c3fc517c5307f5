//! Index-linked free lists, one per size class.
//!
//! The lists own no storage of their own: each list is a head index, and
//! the chain runs through the `next`/`prev` links of the blocks in the
//! [`BlockRegistry`]. Every operation is O(1).

use crate::registry::{BlockRegistry, BlockState, Link};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FreeLists<const NUM_LISTS: usize> {
    heads: [Link; NUM_LISTS],
}

impl<const NUM_LISTS: usize> FreeLists<NUM_LISTS> {
    /// Creates a directory where only the top-most list is non-empty and
    /// holds block `0`.
    pub(crate) const fn new() -> Self {
        let mut heads = [Link::NONE; NUM_LISTS];
        if NUM_LISTS > 0 {
            heads[NUM_LISTS - 1] = Link::from_index(0);
        }
        Self { heads }
    }

    pub(crate) fn head(&self, order: usize) -> Option<usize> {
        self.heads[order].get()
    }

    /// Inserts block `index` at the head of list `order` and marks it free.
    pub(crate) fn push<const NUM_BLOCKS: usize>(
        &mut self,
        registry: &mut BlockRegistry<NUM_BLOCKS>,
        order: usize,
        index: usize,
    ) {
        let old_head = self.head(order);
        registry.set_state(index, BlockState::Free(order));
        registry.set_prev(index, None);
        registry.set_next(index, old_head);
        if let Some(old_head) = old_head {
            registry.set_prev(old_head, Some(index));
        }
        self.heads[order] = Link::from_index(index);
    }

    /// Detaches the head of list `order` and hands it to the caller as an
    /// allocated block.
    pub(crate) fn pop<const NUM_BLOCKS: usize>(
        &mut self,
        registry: &mut BlockRegistry<NUM_BLOCKS>,
        order: usize,
    ) -> Option<usize> {
        let head = self.head(order)?;
        let next = registry.next(head);
        self.heads[order] = Link::from_option(next);
        if let Some(next) = next {
            registry.set_prev(next, None);
        }
        registry.set_next(head, None);
        registry.set_prev(head, None);
        registry.set_state(head, BlockState::Allocated(order));
        Some(head)
    }

    /// Unlinks free block `index` from the list of `order`, wherever it sits
    /// in the chain.
    ///
    /// Both neighbours are repaired. The block keeps its `Free` state; the
    /// caller decides what it becomes next.
    pub(crate) fn remove<const NUM_BLOCKS: usize>(
        &mut self,
        registry: &mut BlockRegistry<NUM_BLOCKS>,
        order: usize,
        index: usize,
    ) {
        debug_assert_eq!(registry.state(index), BlockState::Free(order));

        let prev = registry.prev(index);
        let next = registry.next(index);
        match prev {
            Some(prev) => registry.set_next(prev, next),
            None => {
                debug_assert_eq!(self.head(order), Some(index));
                self.heads[order] = Link::from_option(next);
            }
        }
        if let Some(next) = next {
            registry.set_prev(next, prev);
        }
        registry.set_next(index, None);
        registry.set_prev(index, None);
    }

    /// Iterates over the block indices in list `order`, head first.
    pub(crate) fn iter<'a, const NUM_BLOCKS: usize>(
        &self,
        registry: &'a BlockRegistry<NUM_BLOCKS>,
        order: usize,
    ) -> Iter<'a, NUM_BLOCKS> {
        Iter {
            registry,
            cursor: self.head(order),
        }
    }
}

pub(crate) struct Iter<'a, const NUM_BLOCKS: usize> {
    registry: &'a BlockRegistry<NUM_BLOCKS>,
    cursor: Option<usize>,
}

impl<const NUM_BLOCKS: usize> Iterator for Iter<'_, NUM_BLOCKS> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        self.cursor = self.registry.next(index);
        Some(index)
    }
}
