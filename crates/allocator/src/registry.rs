//! Per-block metadata.
//!
//! The registry holds one [`Block`] for every page of the arena. Only the
//! first page of a region (its *head*) carries meaningful state; the other
//! pages of a region are [`BlockState::Absorbed`].

/// State of one block metadata slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockState {
    /// Head of a free region of the given order, linked into that order's
    /// free list.
    Free(usize),
    /// Head of an allocated region of the given order.
    Allocated(usize),
    /// Not the head of any region; the page lies inside a larger block.
    Absorbed,
}

impl BlockState {
    /// Returns the order of the region headed by this block, if any.
    #[must_use]
    pub fn order(self) -> Option<usize> {
        match self {
            Self::Free(order) | Self::Allocated(order) => Some(order),
            Self::Absorbed => None,
        }
    }

    /// Returns `true` if this block heads a free region.
    #[must_use]
    pub fn is_free(self) -> bool {
        matches!(self, Self::Free(_))
    }
}

/// Intrusive free-list link.
///
/// Stored as a raw index with [`Link::NONE`] standing in for "no block".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Link(usize);

impl Link {
    pub(crate) const NONE: Self = Self(usize::MAX);

    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index)
    }

    pub(crate) fn from_option(index: Option<usize>) -> Self {
        index.map_or(Self::NONE, Self)
    }

    pub(crate) fn get(self) -> Option<usize> {
        (self != Self::NONE).then_some(self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Block {
    state: BlockState,
    next: Link,
    prev: Link,
}

impl Block {
    pub(crate) const ABSORBED: Self = Self {
        state: BlockState::Absorbed,
        next: Link::NONE,
        prev: Link::NONE,
    };
}

/// Fixed-capacity array of block metadata.
///
/// Accessors take indices that callers guarantee to be in range; an
/// out-of-range index panics like any slice access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BlockRegistry<const NUM_BLOCKS: usize> {
    blocks: [Block; NUM_BLOCKS],
}

impl<const NUM_BLOCKS: usize> BlockRegistry<NUM_BLOCKS> {
    /// Creates a registry whose first block heads a free region of
    /// `top_order` covering the whole arena.
    pub(crate) const fn new(top_order: usize) -> Self {
        let mut blocks = [Block::ABSORBED; NUM_BLOCKS];
        if NUM_BLOCKS > 0 {
            blocks[0].state = BlockState::Free(top_order);
        }
        Self { blocks }
    }

    pub(crate) fn state(&self, index: usize) -> BlockState {
        self.blocks[index].state
    }

    pub(crate) fn set_state(&mut self, index: usize, state: BlockState) {
        self.blocks[index].state = state;
    }

    pub(crate) fn order(&self, index: usize) -> Option<usize> {
        self.blocks[index].state.order()
    }

    pub(crate) fn is_free(&self, index: usize) -> bool {
        self.blocks[index].state.is_free()
    }

    pub(crate) fn next(&self, index: usize) -> Option<usize> {
        self.blocks[index].next.get()
    }

    pub(crate) fn set_next(&mut self, index: usize, next: Option<usize>) {
        self.blocks[index].next = Link::from_option(next);
    }

    pub(crate) fn prev(&self, index: usize) -> Option<usize> {
        self.blocks[index].prev.get()
    }

    pub(crate) fn set_prev(&mut self, index: usize, prev: Option<usize>) {
        self.blocks[index].prev = Link::from_option(prev);
    }

    /// Resets a slot that has been merged into a larger block.
    pub(crate) fn absorb(&mut self, index: usize) {
        self.blocks[index] = Block::ABSORBED;
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, BlockState)> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .map(|(index, block)| (index, block.state))
    }
}
