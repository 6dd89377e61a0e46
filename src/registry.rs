//! Bookkeeping for several independently opened pools.

use tracing::debug;

use crate::{
    config::RegistryConfig,
    error::{PoolError, Result},
    policy::Policy,
    pool::{Allocation, Pool, PoolStats, Segment},
    utils::Capacity,
};

/// Opaque handle to a pool opened through a [`Registry`].
///
/// Slots are never reused and every [`Registry::init`] starts a new epoch, so
/// a handle can't end up pointing at a pool it wasn't issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolHandle {
    slot: u32,
    epoch: u32,
}

#[derive(Debug)]
struct PoolStore {
    /// Closed pools leave an empty slot behind; the store only grows.
    pools: Vec<Option<Pool>>,
    capacity: Capacity,
}

/// Table of open pools with an explicit lifecycle.
///
/// ```text
///   new() ──> init() ──> open / allocate / free / inspect / close ──> teardown()
///               ^                                                        │
///               └────────────────────────────────────────────────────────┘
/// ```
///
/// Every operation fails with [`PoolError::NotInitialized`] outside of an
/// `init`/`teardown` bracket. Tearing down releases every pool that is still
/// open, even the ones holding allocations.
#[derive(Debug)]
pub struct Registry {
    config: RegistryConfig,
    epoch: u32,
    store: Option<PoolStore>,
}

impl Registry {
    /// Creates a registry that still has to be initialized.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self { config, epoch: 0, store: None }
    }

    pub fn is_initialized(&self) -> bool {
        self.store.is_some()
    }

    pub fn init(&mut self) -> Result<()> {
        if self.store.is_some() {
            return Err(PoolError::AlreadyInitialized);
        }
        self.config.validate()?;

        let mut pools = Vec::new();
        let capacity = Capacity::reserve_initial(self.config.store, &mut pools)?;

        self.epoch = self.epoch.wrapping_add(1);
        self.store = Some(PoolStore { pools, capacity });
        debug!(epoch = self.epoch, capacity = capacity.get(), "registry initialized");

        Ok(())
    }

    /// Releases every pool that is still open and returns how many there were.
    pub fn teardown(&mut self) -> Result<usize> {
        let store = self.store.take().ok_or(PoolError::NotInitialized)?;

        // Busy pools log a warning as they are dropped.
        let released = store.pools.into_iter().flatten().count();
        debug!(epoch = self.epoch, released, "registry torn down");

        Ok(released)
    }

    /// Opens a new pool of `size` bytes and registers it.
    pub fn open(&mut self, size: usize, policy: Policy) -> Result<PoolHandle> {
        let epoch = self.epoch;
        let config = self.config.pool;
        let store = self.store.as_mut().ok_or(PoolError::NotInitialized)?;

        let live = store.pools.len();
        store.capacity.reserve_one(&mut store.pools, live)?;
        let slot = u32::try_from(live).map_err(|_| PoolError::OutOfMemory)?;

        let pool = Pool::with_config(size, policy, &config)?;
        store.pools.push(Some(pool));

        Ok(PoolHandle { slot, epoch })
    }

    /// Closes the pool behind `handle`, which must have no allocations left.
    pub fn close(&mut self, handle: PoolHandle) -> Result<()> {
        let slot = self.slot_mut(handle)?;
        let pool = slot.take().ok_or(PoolError::UnknownPool)?;

        pool.close().map_err(|(pool, error)| {
            *slot = Some(pool);
            error
        })
    }

    pub fn allocate(&mut self, handle: PoolHandle, size: usize) -> Result<Allocation> {
        self.pool_mut(handle)?.allocate(size)
    }

    pub fn free(&mut self, handle: PoolHandle, allocation: Allocation) -> Result<()> {
        self.pool_mut(handle)?.free(allocation)
    }

    pub fn inspect(&self, handle: PoolHandle) -> Result<Vec<Segment>> {
        Ok(self.pool(handle)?.inspect())
    }

    pub fn stats(&self, handle: PoolHandle) -> Result<PoolStats> {
        Ok(self.pool(handle)?.stats())
    }

    /// Handles of all pools that are currently open, in opening order.
    pub fn handles(&self) -> Result<Vec<PoolHandle>> {
        let store = self.store.as_ref().ok_or(PoolError::NotInitialized)?;

        Ok(store
            .pools
            .iter()
            .enumerate()
            .filter(|(_, pool)| pool.is_some())
            .map(|(slot, _)| PoolHandle { slot: slot as u32, epoch: self.epoch })
            .collect())
    }

    pub fn pool(&self, handle: PoolHandle) -> Result<&Pool> {
        let store = self.store.as_ref().ok_or(PoolError::NotInitialized)?;
        if handle.epoch != self.epoch {
            return Err(PoolError::UnknownPool);
        }

        store
            .pools
            .get(handle.slot as usize)
            .and_then(Option::as_ref)
            .ok_or(PoolError::UnknownPool)
    }

    pub fn pool_mut(&mut self, handle: PoolHandle) -> Result<&mut Pool> {
        self.slot_mut(handle)?.as_mut().ok_or(PoolError::UnknownPool)
    }

    fn slot_mut(&mut self, handle: PoolHandle) -> Result<&mut Option<Pool>> {
        let store = self.store.as_mut().ok_or(PoolError::NotInitialized)?;
        if handle.epoch != self.epoch {
            return Err(PoolError::UnknownPool);
        }

        store
            .pools
            .get_mut(handle.slot as usize)
            .ok_or(PoolError::UnknownPool)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if self.is_initialized() {
            let _ = self.teardown();
        }
    }
}
