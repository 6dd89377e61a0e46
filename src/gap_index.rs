use std::slice;

use crate::{
    config::GrowthConfig,
    error::{PoolError, Result},
    list::NodeId,
    utils::Capacity,
};

/// One free span of the pool, as seen by the gap index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Gap {
    pub size: usize,
    pub node: NodeId,
}

/// Size-sorted index over the gap nodes of a pool.
///
/// The index holds exactly one entry per gap node in the node heap. Entries are
/// kept in ascending size order; gaps of equal size stay in the order they
/// were inserted, so the order is total and deterministic.
///
/// ```text
///    size:  16      16      40      128     512
///         +-------+-------+-------+-------+-------+-----------------+
///         | n(4)  | n(9)  | n(1)  | n(7)  | n(0)  |  spare capacity |
///         +-------+-------+-------+-------+-------+-----------------+
///          ^ smallest gap                 live entries are contiguous
/// ```
pub(crate) struct GapIndex {
    entries: Vec<Gap>,
    capacity: Capacity,
}

impl GapIndex {
    /// Creates an empty index with the initial capacity of `growth` reserved.
    pub fn with_growth(growth: GrowthConfig) -> Result<Self> {
        let mut entries = Vec::new();
        let capacity = Capacity::reserve_initial(growth, &mut entries)?;

        Ok(Self { entries, capacity })
    }

    /// Number of live entries, i.e. the number of gaps in the pool.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Makes sure one more entry can be inserted.
    pub fn reserve_one(&mut self) -> Result<()> {
        let live = self.entries.len();

        self.capacity.reserve_one(&mut self.entries, live).map(|_| ())
    }

    /// Inserts a gap of `size` bytes held by `node`, growing the index first
    /// if needed.
    ///
    /// The entry goes right after every entry of the same or smaller size,
    /// which is where a stable sort of the appended entry would leave it.
    pub fn insert(&mut self, size: usize, node: NodeId) -> Result<()> {
        self.reserve_one()?;

        let position = self.entries.partition_point(|gap| gap.size <= size);
        self.entries.insert(position, Gap { size, node });

        Ok(())
    }

    /// Removes the entry held by `node`. The remaining entries are shifted so
    /// the live ones stay contiguous at the front.
    pub fn remove(&mut self, node: NodeId) -> Result<Gap> {
        let position = self
            .entries
            .iter()
            .position(|gap| gap.node == node)
            .ok_or_else(|| PoolError::Inconsistent(format!("gap index has no entry for {node:?}")))?;

        Ok(self.entries.remove(position))
    }

    /// First entry, in ascending size order, that can hold `size` bytes.
    pub fn smallest_fit(&self, size: usize) -> Option<&Gap> {
        let position = self.entries.partition_point(|gap| gap.size < size);

        self.entries.get(position)
    }

    /// Size of the largest gap, or zero when there are none.
    pub fn largest(&self) -> usize {
        self.entries.last().map_or(0, |gap| gap.size)
    }

    pub fn iter(&self) -> slice::Iter<'_, Gap> {
        self.entries.iter()
    }
}
