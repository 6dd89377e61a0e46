//! The pool manager: one fixed-size region of storage, the node heap that
//! describes it and the gap index that serves allocation requests.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use tracing::{debug, trace, warn};

use crate::{
    block::Block,
    config::PoolConfig,
    error::{PoolError, Result},
    gap_index::GapIndex,
    kernel::Storage,
    list::{Link, List, NodeId},
    policy::Policy,
};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a [`Pool`], used to reject allocations that
/// were carved out of a different pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(u64);

/// Handle to a live allocation. It stays valid until it is freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Allocation {
    pool: PoolId,
    node: NodeId,
    stamp: u64,
    offset: usize,
    size: usize,
}

impl Allocation {
    /// Pool the allocation was carved out of.
    pub fn pool(&self) -> PoolId {
        self.pool
    }

    /// Node of the pool's node heap that tracks the allocation.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Start of the allocation inside the pool's storage.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// One span of a pool as reported by [`Pool::inspect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub offset: usize,
    pub size: usize,
    pub allocated: bool,
}

/// Snapshot of a pool's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Size of the pool in bytes, fixed at open.
    pub total_size: usize,
    /// Bytes currently handed out.
    pub alloc_size: usize,
    pub num_allocs: usize,
    pub num_gaps: usize,
    /// Live nodes in the node heap (allocations plus gaps).
    pub used_nodes: usize,
    /// Capacity of the node heap.
    pub total_nodes: usize,
    /// Capacity of the gap index.
    pub gap_capacity: usize,
    pub policy: Policy,
}

/// A fixed-size region from which allocations are carved.
///
/// Every byte of the pool belongs to exactly one node of the node heap. A
/// node is either an allocation or a gap, and the nodes are linked in the
/// same order as the spans they describe:
///
/// ```text
///                              Gap index (by size)
///                      +------------+------------------+
///                      |            |                  |
///  +---------------+---|----+---------------+----------|-------+
///  | Alloc(100)    | Gap(40)| Alloc(60)     | Gap(300)         |
///  +---------------+--------+---------------+------------------+
///  0              100      140             200               500
/// ```
///
/// Allocating splits a gap into an allocation and, if anything is left, a
/// new gap right after it. Freeing turns the allocation back into a gap and
/// merges it with the gaps on either side, so two gaps are never adjacent.
pub struct Pool {
    id: PoolId,
    storage: Storage,
    blocks: List<Block>,
    gaps: GapIndex,
    policy: Policy,
    alloc_size: usize,
    num_allocs: usize,
    /// Stamp of the last allocation handed out.
    last_stamp: u64,
}

impl Pool {
    /// Opens a pool of `size` bytes with the default configuration.
    pub fn open(size: usize, policy: Policy) -> Result<Self> {
        Self::with_config(size, policy, &PoolConfig::default())
    }

    /// Opens a pool of `size` bytes.
    ///
    /// The storage, the node heap and the gap index are all reserved up
    /// front. If any of them can't be, whatever was already reserved is
    /// released and [`PoolError::OutOfMemory`] is returned.
    pub fn with_config(size: usize, policy: Policy, config: &PoolConfig) -> Result<Self> {
        if size == 0 {
            return Err(PoolError::ZeroSize);
        }
        config.validate()?;

        let storage = Storage::request(size)?;
        let mut blocks = List::with_growth(config.node_heap)?;
        let mut gaps = GapIndex::with_growth(config.gap_index)?;

        // The whole pool starts out as a single gap.
        let whole = blocks.push_back(Block::gap(0, size))?;
        gaps.insert(size, whole)?;

        let id = PoolId(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed));
        debug!(pool = id.0, size, %policy, "opened pool");

        Ok(Self {
            id,
            storage,
            blocks,
            gaps,
            policy,
            alloc_size: 0,
            num_allocs: 0,
            last_stamp: 0,
        })
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn total_size(&self) -> usize {
        self.storage.len()
    }

    pub fn alloc_size(&self) -> usize {
        self.alloc_size
    }

    pub fn num_allocs(&self) -> usize {
        self.num_allocs
    }

    pub fn num_gaps(&self) -> usize {
        self.gaps.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total_size: self.total_size(),
            alloc_size: self.alloc_size,
            num_allocs: self.num_allocs,
            num_gaps: self.gaps.len(),
            used_nodes: self.blocks.len(),
            total_nodes: self.blocks.capacity(),
            gap_capacity: self.gaps.capacity(),
            policy: self.policy,
        }
    }

    /// A pool can only be closed once it has collapsed back into one gap
    /// spanning the whole storage.
    pub fn check_closable(&self) -> Result<()> {
        if self.gaps.len() != 1 || self.num_allocs != 0 {
            return Err(PoolError::PoolNotEmpty {
                allocations: self.num_allocs,
                gaps: self.gaps.len(),
            });
        }

        Ok(())
    }

    /// Closes the pool and releases its storage.
    ///
    /// A pool that still has allocations (or is split into several gaps) is
    /// handed back untouched together with the reason it can't be closed.
    pub fn close(self) -> std::result::Result<(), (Self, PoolError)> {
        if let Err(error) = self.check_closable() {
            return Err((self, error));
        }
        debug!(pool = self.id.0, "closed pool");

        Ok(())
    }

    /// Carves `size` bytes out of a gap chosen by the pool's [`Policy`].
    pub fn allocate(&mut self, size: usize) -> Result<Allocation> {
        if size == 0 {
            return Err(PoolError::ZeroSize);
        }
        if self.gaps.is_empty() {
            return Err(PoolError::NoGap);
        }

        // Grow before anything is touched, so a failure leaves the pool as it was.
        self.blocks.reserve_one()?;
        self.gaps.reserve_one()?;

        let node = self
            .policy
            .placement()
            .select(&self.blocks, &self.gaps, size)
            .ok_or_else(|| PoolError::NoFit {
                requested: size,
                largest: self.gaps.largest(),
            })?;

        self.gaps.remove(node)?;
        let stamp = self.last_stamp + 1;

        let block = self
            .blocks
            .data_mut(node)
            .ok_or_else(|| PoolError::Inconsistent(format!("selected dead node {node:?}")))?;
        let remainder = block.size - size;
        let offset = block.offset;
        block.size = size;
        block.allocated = true;
        block.stamp = stamp;

        if remainder > 0 {
            let gap = self
                .blocks
                .insert_after(node, Block::gap(offset + size, remainder))?;
            self.gaps.insert(remainder, gap)?;
        }

        self.last_stamp = stamp;
        self.num_allocs += 1;
        self.alloc_size += size;
        trace!(pool = self.id.0, offset, size, remainder, "allocated");

        Ok(Allocation { pool: self.id, node, stamp, offset, size })
    }

    /// Returns `allocation` to the pool, merging it with adjacent gaps.
    ///
    /// Whatever the number of merges, exactly one entry is added to the gap
    /// index: the one for the surviving gap.
    pub fn free(&mut self, allocation: Allocation) -> Result<()> {
        self.live_block(&allocation)?;
        self.gaps.reserve_one()?;

        let node = allocation.node;
        if let Some(block) = self.blocks.data_mut(node) {
            block.allocated = false;
            block.stamp = 0;
        }
        self.num_allocs -= 1;
        self.alloc_size -= allocation.size;

        self.merge_with_next(node)?;
        let node = self.merge_with_prev(node)?;

        let size = self
            .blocks
            .data(node)
            .map(|block| block.size)
            .ok_or_else(|| PoolError::Inconsistent(format!("merged into dead node {node:?}")))?;
        self.gaps.insert(size, node)?;

        trace!(pool = self.id.0, offset = allocation.offset, size = allocation.size, gap = size, "freed");

        Ok(())
    }

    /// Lists every span of the pool, left to right.
    pub fn inspect(&self) -> Vec<Segment> {
        self.blocks
            .iter()
            .map(|(_, block)| Segment {
                offset: block.offset,
                size: block.size,
                allocated: block.allocated,
            })
            .collect()
    }

    /// Sizes of the gap index entries, in index order.
    pub fn gap_sizes(&self) -> Vec<usize> {
        self.gaps.iter().map(|gap| gap.size).collect()
    }

    /// The bytes backing `allocation`.
    pub fn bytes(&self, allocation: &Allocation) -> Result<&[u8]> {
        let block = self.live_block(allocation)?;
        let range = block.offset..block.end();

        Ok(&self.storage.as_slice()[range])
    }

    pub fn bytes_mut(&mut self, allocation: &Allocation) -> Result<&mut [u8]> {
        let block = self.live_block(allocation)?;
        let range = block.offset..block.end();

        Ok(&mut self.storage.as_mut_slice()[range])
    }

    /// Walks the whole bookkeeping and reports the first broken invariant.
    ///
    /// Checks that the nodes cover the storage exactly once, that the links
    /// agree in both directions, that there is one gap index entry per gap
    /// node (same size), that the index is sorted, that no two gaps are
    /// adjacent and that the allocation counters match the nodes.
    pub fn check_consistency(&self) -> Result<()> {
        let mut expected_offset = 0;
        let mut prev: Link = None;
        let mut prev_is_gap = false;
        let mut live = 0;
        let mut gap_nodes = 0;
        let mut allocations = 0;
        let mut allocated_bytes = 0;

        let mut current = self.blocks.first();
        while let Some(id) = current {
            let node = self
                .blocks
                .get(id)
                .ok_or_else(|| inconsistent(format!("dangling link to {id:?}")))?;
            let block = node.data;

            live += 1;
            if live > self.blocks.len() {
                return Err(inconsistent("node list does not terminate"));
            }
            if node.prev != prev {
                return Err(inconsistent(format!("{id:?} has a stale back link")));
            }
            if block.offset != expected_offset {
                return Err(inconsistent(format!(
                    "{id:?} starts at {} instead of {expected_offset}",
                    block.offset
                )));
            }
            if block.size == 0 {
                return Err(inconsistent(format!("{id:?} is empty")));
            }

            if block.allocated {
                allocations += 1;
                allocated_bytes += block.size;
                prev_is_gap = false;
            } else {
                if prev_is_gap {
                    return Err(inconsistent(format!("{id:?} is a gap next to another gap")));
                }
                if !self.gaps.iter().any(|gap| gap.node == id && gap.size == block.size) {
                    return Err(inconsistent(format!("gap {id:?} is missing from the gap index")));
                }
                gap_nodes += 1;
                prev_is_gap = true;
            }

            expected_offset += block.size;
            prev = Some(id);
            current = node.next;
        }

        if self.blocks.last() != prev {
            return Err(inconsistent("tail does not match the last node"));
        }
        if live != self.blocks.len() {
            return Err(inconsistent(format!("{live} nodes linked, {} live", self.blocks.len())));
        }
        if expected_offset != self.total_size() {
            return Err(inconsistent(format!(
                "nodes span {expected_offset} bytes of {}",
                self.total_size()
            )));
        }
        if gap_nodes != self.gaps.len() {
            return Err(inconsistent(format!(
                "{gap_nodes} gap nodes but {} gap index entries",
                self.gaps.len()
            )));
        }
        let mut sizes = self.gaps.iter().map(|gap| gap.size);
        if let Some(mut last) = sizes.next() {
            for size in sizes {
                if size < last {
                    return Err(inconsistent("gap index is out of order"));
                }
                last = size;
            }
        }
        if allocations != self.num_allocs || allocated_bytes != self.alloc_size {
            return Err(inconsistent(format!(
                "{allocations} allocations of {allocated_bytes} bytes, counters say {} of {}",
                self.num_allocs, self.alloc_size
            )));
        }

        Ok(())
    }

    /// The allocated block `allocation` refers to, if it is still live here.
    fn live_block(&self, allocation: &Allocation) -> Result<&Block> {
        if allocation.pool != self.id {
            return Err(PoolError::InvalidAllocation);
        }

        self.blocks
            .data(allocation.node)
            .filter(|block| {
                block.allocated
                    && block.stamp == allocation.stamp
                    && block.offset == allocation.offset
                    && block.size == allocation.size
            })
            .ok_or(PoolError::InvalidAllocation)
    }

    /// Absorbs the node after `node` if it is a gap.
    fn merge_with_next(&mut self, node: NodeId) -> Result<()> {
        let Some(next) = self.blocks.get(node).and_then(|node| node.next) else {
            return Ok(());
        };
        if !self.blocks.data(next).is_some_and(|block| block.is_gap()) {
            return Ok(());
        }

        // The next gap is indexed on its own, it has to leave the index first.
        self.gaps.remove(next)?;
        let absorbed = self
            .blocks
            .remove(next)
            .ok_or_else(|| inconsistent(format!("lost node {next:?} while merging")))?;

        if let Some(block) = self.blocks.data_mut(node) {
            block.size += absorbed.size;
        }
        trace!(pool = self.id.0, absorbed = absorbed.size, "merged with next gap");

        Ok(())
    }

    /// Folds `node` into the node before it if that one is a gap. Returns the
    /// node that survives.
    fn merge_with_prev(&mut self, node: NodeId) -> Result<NodeId> {
        let Some(prev) = self.blocks.get(node).and_then(|node| node.prev) else {
            return Ok(node);
        };
        if !self.blocks.data(prev).is_some_and(|block| block.is_gap()) {
            return Ok(node);
        }

        self.gaps.remove(prev)?;
        let absorbed = self
            .blocks
            .remove(node)
            .ok_or_else(|| inconsistent(format!("lost node {node:?} while merging")))?;

        if let Some(block) = self.blocks.data_mut(prev) {
            block.size += absorbed.size;
        }
        trace!(pool = self.id.0, absorbed = absorbed.size, "merged into previous gap");

        Ok(prev)
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.id)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if let Err(error) = self.check_closable() {
            warn!(pool = self.id.0, %error, "releasing pool that is still in use");
        }
    }
}

fn inconsistent(message: impl Into<String>) -> PoolError {
    PoolError::Inconsistent(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GrowthConfig;

    fn segments(pool: &Pool) -> Vec<(usize, bool)> {
        pool.inspect()
            .into_iter()
            .map(|segment| (segment.size, segment.allocated))
            .collect()
    }

    #[test]
    fn new_pool_is_one_gap() {
        let pool = Pool::open(1024, Policy::FirstFit).unwrap();

        assert_eq!(segments(&pool), vec![(1024, false)]);
        assert_eq!(pool.num_gaps(), 1);
        assert_eq!(pool.num_allocs(), 0);
        assert_eq!(pool.alloc_size(), 0);
        assert!(pool.check_closable().is_ok());
        pool.check_consistency().unwrap();
    }

    #[test]
    fn zero_sizes_are_rejected() {
        assert_eq!(Pool::open(0, Policy::FirstFit).err(), Some(PoolError::ZeroSize));

        let mut pool = Pool::open(64, Policy::FirstFit).unwrap();
        assert_eq!(pool.allocate(0), Err(PoolError::ZeroSize));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = PoolConfig {
            node_heap: GrowthConfig { fill_factor: 2.0, ..GrowthConfig::new(40) },
            ..PoolConfig::default()
        };

        assert!(matches!(
            Pool::with_config(64, Policy::FirstFit, &config),
            Err(PoolError::InvalidConfig(_))
        ));
    }

    #[test]
    fn allocation_splits_gap() {
        let mut pool = Pool::open(1024, Policy::FirstFit).unwrap();

        let first = pool.allocate(100).unwrap();
        let second = pool.allocate(200).unwrap();

        assert_eq!((first.offset(), first.size()), (0, 100));
        assert_eq!((second.offset(), second.size()), (100, 200));
        assert_eq!(segments(&pool), vec![(100, true), (200, true), (724, false)]);
        assert_eq!(pool.alloc_size(), 300);
        assert_eq!(pool.num_allocs(), 2);
        pool.check_consistency().unwrap();
    }

    #[test]
    fn exact_fit_leaves_no_gap() {
        let mut pool = Pool::open(256, Policy::BestFit).unwrap();

        pool.allocate(256).unwrap();

        assert_eq!(pool.num_gaps(), 0);
        assert_eq!(pool.allocate(1), Err(PoolError::NoGap));
        pool.check_consistency().unwrap();
    }

    #[test]
    fn no_fit_leaves_pool_untouched() {
        let mut pool = Pool::open(300, Policy::FirstFit).unwrap();
        let a = pool.allocate(100).unwrap();
        pool.allocate(100).unwrap();
        pool.free(a).unwrap();
        let before = pool.stats();

        assert_eq!(
            pool.allocate(101),
            Err(PoolError::NoFit { requested: 101, largest: 100 })
        );
        assert_eq!(pool.stats(), before);
        pool.check_consistency().unwrap();
    }

    #[test]
    fn free_merges_with_next_gap() {
        let mut pool = Pool::open(300, Policy::FirstFit).unwrap();
        let a = pool.allocate(100).unwrap();
        let b = pool.allocate(100).unwrap();

        pool.free(b).unwrap();

        assert_eq!(segments(&pool), vec![(100, true), (200, false)]);
        assert_eq!(pool.gap_sizes(), vec![200]);

        pool.free(a).unwrap();
        assert_eq!(segments(&pool), vec![(300, false)]);
        pool.check_consistency().unwrap();
    }

    #[test]
    fn free_merges_with_previous_gap() {
        let mut pool = Pool::open(300, Policy::FirstFit).unwrap();
        let a = pool.allocate(100).unwrap();
        let b = pool.allocate(100).unwrap();
        pool.allocate(100).unwrap();

        pool.free(a).unwrap();
        pool.free(b).unwrap();

        assert_eq!(segments(&pool), vec![(200, false), (100, true)]);
        assert_eq!(pool.stats().used_nodes, 2);
        pool.check_consistency().unwrap();
    }

    #[test]
    fn free_merges_both_sides() {
        let mut pool = Pool::open(400, Policy::FirstFit).unwrap();
        let a = pool.allocate(100).unwrap();
        let b = pool.allocate(100).unwrap();
        let c = pool.allocate(100).unwrap();
        pool.allocate(100).unwrap();

        pool.free(a).unwrap();
        pool.free(c).unwrap();
        assert_eq!(pool.num_gaps(), 2);

        pool.free(b).unwrap();

        assert_eq!(segments(&pool), vec![(300, false), (100, true)]);
        assert_eq!(pool.gap_sizes(), vec![300]);
        assert_eq!(pool.alloc_size(), 100);
        pool.check_consistency().unwrap();
    }

    #[test]
    fn stale_and_foreign_allocations_are_rejected() {
        let mut pool = Pool::open(128, Policy::FirstFit).unwrap();
        let mut other = Pool::open(128, Policy::FirstFit).unwrap();
        let a = pool.allocate(32).unwrap();
        let foreign = other.allocate(32).unwrap();

        assert_eq!(pool.free(foreign), Err(PoolError::InvalidAllocation));

        pool.free(a).unwrap();
        assert_eq!(pool.free(a), Err(PoolError::InvalidAllocation));
        assert_eq!(pool.bytes(&a).err(), Some(PoolError::InvalidAllocation));

        // Same node, same span, but a different allocation.
        let b = pool.allocate(32).unwrap();
        assert_eq!((b.node(), b.offset(), b.size()), (a.node(), a.offset(), a.size()));
        assert_eq!(pool.free(a), Err(PoolError::InvalidAllocation));
        pool.free(b).unwrap();
        pool.check_consistency().unwrap();
    }

    #[test]
    fn allocations_own_disjoint_bytes() {
        let mut pool = Pool::open(64, Policy::FirstFit).unwrap();
        let a = pool.allocate(16).unwrap();
        let b = pool.allocate(16).unwrap();

        pool.bytes_mut(&a).unwrap().fill(0xAA);
        pool.bytes_mut(&b).unwrap().fill(0xBB);

        assert_eq!(pool.bytes(&a).unwrap(), &[0xAA; 16]);
        assert_eq!(pool.bytes(&b).unwrap(), &[0xBB; 16]);
    }

    #[test]
    fn node_heap_grows_past_initial_capacity() {
        let mut pool = Pool::open(4096, Policy::BestFit).unwrap();
        let initial = pool.stats().total_nodes;

        let allocations: Vec<_> = (0..100).map(|_| pool.allocate(8).unwrap()).collect();

        let stats = pool.stats();
        assert!(stats.total_nodes > initial);
        assert_eq!(stats.used_nodes, 101);
        for (position, allocation) in allocations.iter().enumerate() {
            assert_eq!(allocation.offset(), position * 8);
        }
        pool.check_consistency().unwrap();

        for allocation in allocations {
            pool.free(allocation).unwrap();
        }
        assert_eq!(segments(&pool), vec![(4096, false)]);
        assert!(pool.check_closable().is_ok());
    }

    #[test]
    fn close_hands_back_busy_pool() {
        let mut pool = Pool::open(64, Policy::FirstFit).unwrap();
        let a = pool.allocate(10).unwrap();

        let (mut pool, error) = pool.close().unwrap_err();
        assert_eq!(error, PoolError::PoolNotEmpty { allocations: 1, gaps: 1 });
        assert_eq!(pool.bytes(&a).unwrap().len(), 10);

        pool.free(a).unwrap();
        assert!(pool.close().is_ok());
    }

    #[test]
    fn failed_node_heap_growth_leaves_allocate_untouched() {
        let config = PoolConfig {
            node_heap: GrowthConfig { expand_factor: usize::MAX, ..GrowthConfig::new(2) },
            ..PoolConfig::default()
        };
        let mut pool = Pool::with_config(100, Policy::FirstFit, &config).unwrap();
        let before = (pool.inspect(), pool.gap_sizes(), pool.stats());

        assert_eq!(pool.allocate(10), Err(PoolError::OutOfMemory));

        assert_eq!((pool.inspect(), pool.gap_sizes(), pool.stats()), before);
        pool.check_consistency().unwrap();
    }

    #[test]
    fn failed_gap_index_growth_leaves_free_untouched() {
        let config = PoolConfig {
            gap_index: GrowthConfig { expand_factor: usize::MAX, ..GrowthConfig::new(3) },
            ..PoolConfig::default()
        };
        let mut pool = Pool::with_config(100, Policy::FirstFit, &config).unwrap();
        let a = pool.allocate(10).unwrap();
        pool.allocate(20).unwrap();
        let c = pool.allocate(10).unwrap();
        pool.free(a).unwrap();
        assert_eq!(pool.gap_sizes(), vec![10, 60]);
        let before = (pool.inspect(), pool.gap_sizes(), pool.stats());

        // A third gap entry would push the index past its fill factor.
        assert_eq!(pool.free(c), Err(PoolError::OutOfMemory));

        assert_eq!((pool.inspect(), pool.gap_sizes(), pool.stats()), before);
        assert_eq!(pool.gap_sizes(), vec![10, 60]);
        pool.check_consistency().unwrap();
    }

    #[test]
    fn outstanding_allocation_blocks_close() {
        let mut pool = Pool::open(64, Policy::FirstFit).unwrap();
        let a = pool.allocate(10).unwrap();

        assert_eq!(
            pool.check_closable(),
            Err(PoolError::PoolNotEmpty { allocations: 1, gaps: 1 })
        );

        pool.free(a).unwrap();
        assert!(pool.check_closable().is_ok());
    }
}
