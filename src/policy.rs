//! Placement policies: which gap serves an allocation request.

use std::fmt;

use crate::{block::Block, gap_index::GapIndex, list::{List, NodeId}};

/// Placement policy of a pool, chosen when the pool is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Policy {
    /// First gap, in physical order, that is large enough.
    #[default]
    FirstFit,
    /// Smallest gap that is large enough.
    BestFit,
}

impl Policy {
    pub(crate) fn placement(self) -> &'static dyn Placement {
        match self {
            Policy::FirstFit => &FirstFit,
            Policy::BestFit => &BestFit,
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::FirstFit => f.write_str("first-fit"),
            Policy::BestFit => f.write_str("best-fit"),
        }
    }
}

/// Picks the gap node an allocation of `size` bytes is carved from.
pub(crate) trait Placement {
    fn select(&self, blocks: &List<Block>, gaps: &GapIndex, size: usize) -> Option<NodeId>;
}

/// Walks the node heap left to right.
pub(crate) struct FirstFit;

/// Asks the size-sorted gap index, O(log n).
pub(crate) struct BestFit;

impl Placement for FirstFit {
    fn select(&self, blocks: &List<Block>, _gaps: &GapIndex, size: usize) -> Option<NodeId> {
        blocks
            .iter()
            .find(|(_, block)| block.is_gap() && block.size >= size)
            .map(|(id, _)| id)
    }
}

impl Placement for BestFit {
    fn select(&self, _blocks: &List<Block>, gaps: &GapIndex, size: usize) -> Option<NodeId> {
        gaps.smallest_fit(size).map(|gap| gap.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GrowthConfig;

    /// Lays out `spans` left to right and indexes the gaps among them.
    fn layout(spans: &[(usize, bool)]) -> (List<Block>, GapIndex, Vec<NodeId>) {
        let mut blocks = List::with_growth(GrowthConfig::new(8)).unwrap();
        let mut gaps = GapIndex::with_growth(GrowthConfig::new(8)).unwrap();
        let mut ids = Vec::new();
        let mut offset = 0;

        for &(size, allocated) in spans {
            let id = blocks.push_back(Block { offset, size, allocated, stamp: 0 }).unwrap();
            if !allocated {
                gaps.insert(size, id).unwrap();
            }
            ids.push(id);
            offset += size;
        }

        (blocks, gaps, ids)
    }

    #[test]
    fn first_fit_takes_leftmost_gap() {
        let (blocks, gaps, ids) = layout(&[(90, false), (100, true), (40, false), (70, true)]);

        assert_eq!(Policy::FirstFit.placement().select(&blocks, &gaps, 30), Some(ids[0]));
        assert_eq!(Policy::FirstFit.placement().select(&blocks, &gaps, 91), None);
    }

    #[test]
    fn first_fit_skips_allocated_and_small_blocks() {
        let (blocks, gaps, ids) = layout(&[(500, true), (10, false), (20, true), (60, false)]);

        assert_eq!(FirstFit.select(&blocks, &gaps, 50), Some(ids[3]));
    }

    #[test]
    fn best_fit_takes_smallest_sufficient_gap() {
        let (blocks, gaps, ids) = layout(&[(90, false), (100, true), (40, false), (70, true)]);

        assert_eq!(Policy::BestFit.placement().select(&blocks, &gaps, 30), Some(ids[2]));
        assert_eq!(BestFit.select(&blocks, &gaps, 41), Some(ids[0]));
        assert_eq!(BestFit.select(&blocks, &gaps, 91), None);
    }

    #[test]
    fn display_names() {
        assert_eq!(Policy::FirstFit.to_string(), "first-fit");
        assert_eq!(Policy::BestFit.to_string(), "best-fit");
        assert_eq!(Policy::default(), Policy::FirstFit);
    }
}
