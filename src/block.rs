/// This is the record kept for every contiguous span of a pool. Blocks are
/// stored as the data of a [`crate::list::Node`], so the node heap, walked
/// from its head, describes the pool left to right.
///
/// ```text
/// offset 0                                                       total_size
/// +--------------+-----------+--------------------+--------------+
/// | Block(alloc) | Block(gap)| Block(alloc)       | Block(gap)   |
/// +--------------+-----------+--------------------+--------------+
/// ```
///
/// Adjacent blocks never overlap and never leave a hole: the offset of a
/// block is always the offset of its predecessor plus that predecessor's size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block {
    /// Start of the span inside the pool's storage.
    pub offset: usize,
    /// Size of the span.
    pub size: usize,
    /// Flag to tell whether the span is handed out or is a gap.
    pub allocated: bool,
    /// Serial number of the allocation occupying the span, zero for gaps.
    pub stamp: u64,
}

impl Block {
    pub const fn gap(offset: usize, size: usize) -> Self {
        Self { offset, size, allocated: false, stamp: 0 }
    }

    #[inline]
    pub const fn is_gap(&self) -> bool {
        !self.allocated
    }

    #[inline]
    pub const fn end(&self) -> usize {
        self.offset + self.size
    }
}
