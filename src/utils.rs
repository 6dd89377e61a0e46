//! This file contains the helper functions for the allocator. These are pieces that
//! don't particularly belong to any concrete module of the program.

use tracing::debug;

use crate::{
    config::GrowthConfig,
    error::{PoolError, Result},
};

/// It aligns `to_be_aligned` using `alignment`, which must be a power of two.
///
/// This is used to round pool storage up to a multiple of
/// [`crate::kernel::page_size`]. Returns `None` if the rounded value does not
/// fit in a `usize`.
pub fn align(to_be_aligned: usize, alignment: usize) -> Option<usize> {
    to_be_aligned
        .checked_add(alignment - 1)
        .map(|value| value & !(alignment - 1))
}

/// Logical capacity of a growable array.
///
/// The node heap, the gap index and the registry store all follow the same
/// discipline: the array only grows, it grows by `expand_factor` and it does so
/// *before* an insertion would push its fill ratio above `fill_factor`. The
/// logical capacity is tracked here, separately from the live-entry count the
/// owner keeps.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Capacity {
    current: usize,
    growth: GrowthConfig,
}

impl Capacity {
    /// Reserves the initial capacity in `storage`.
    pub fn reserve_initial<T>(growth: GrowthConfig, storage: &mut Vec<T>) -> Result<Self> {
        growth.validate()?;

        storage
            .try_reserve_exact(growth.initial_capacity)
            .map_err(|_| PoolError::OutOfMemory)?;

        Ok(Self { current: growth.initial_capacity, growth })
    }

    #[inline]
    pub fn get(&self) -> usize {
        self.current
    }

    /// Whether one more entry on top of `live` would exceed the fill factor.
    #[inline]
    pub fn needs_growth(&self, live: usize) -> bool {
        (live + 1) as f64 / self.current as f64 > self.growth.fill_factor
    }

    /// Makes room for one more entry on top of `live`, expanding `storage` if
    /// the fill factor requires it. Existing entries keep their order.
    ///
    /// Returns whether the array grew. On failure nothing changes.
    pub fn reserve_one<T>(&mut self, storage: &mut Vec<T>, live: usize) -> Result<bool> {
        if !self.needs_growth(live) {
            return Ok(false);
        }

        let mut expanded = self.current;
        while (live + 1) as f64 / expanded as f64 > self.growth.fill_factor {
            expanded = expanded
                .checked_mul(self.growth.expand_factor)
                .ok_or(PoolError::OutOfMemory)?;
        }

        storage
            .try_reserve_exact(expanded.saturating_sub(storage.len()))
            .map_err(|_| PoolError::OutOfMemory)?;

        debug!(from = self.current, to = expanded, live, "expanded growable array");
        self.current = expanded;

        Ok(true)
    }
}
