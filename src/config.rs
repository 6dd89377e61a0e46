//! Sizing knobs for the growable arrays behind a pool and a registry.

use crate::error::{PoolError, Result};

/// How a growable array starts out and when it expands.
///
/// Before an insertion that would push `live / capacity` above
/// `fill_factor`, the array is reallocated to `capacity * expand_factor`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowthConfig {
    pub initial_capacity: usize,
    pub fill_factor: f64,
    pub expand_factor: usize,
}

impl GrowthConfig {
    pub const DEFAULT_FILL_FACTOR: f64 = 0.75;
    pub const DEFAULT_EXPAND_FACTOR: usize = 2;

    pub const fn new(initial_capacity: usize) -> Self {
        Self {
            initial_capacity,
            fill_factor: Self::DEFAULT_FILL_FACTOR,
            expand_factor: Self::DEFAULT_EXPAND_FACTOR,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_capacity == 0 {
            return Err(PoolError::InvalidConfig("initial capacity must be at least 1"));
        }
        if !(self.fill_factor > 0.0 && self.fill_factor <= 1.0) {
            return Err(PoolError::InvalidConfig("fill factor must be in (0, 1]"));
        }
        if self.expand_factor < 2 {
            return Err(PoolError::InvalidConfig("expand factor must be at least 2"));
        }

        Ok(())
    }
}

/// Configuration of a single [`crate::Pool`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolConfig {
    /// Node heap (one node per allocation or gap).
    pub node_heap: GrowthConfig,
    /// Size-sorted gap index.
    pub gap_index: GrowthConfig,
}

impl PoolConfig {
    pub const NODE_HEAP_INIT_CAPACITY: usize = 40;
    pub const GAP_INDEX_INIT_CAPACITY: usize = 40;

    pub fn validate(&self) -> Result<()> {
        self.node_heap.validate()?;
        self.gap_index.validate()
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            node_heap: GrowthConfig::new(Self::NODE_HEAP_INIT_CAPACITY),
            gap_index: GrowthConfig::new(Self::GAP_INDEX_INIT_CAPACITY),
        }
    }
}

/// Configuration of a [`crate::Registry`] and of every pool it opens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistryConfig {
    pub store: GrowthConfig,
    pub pool: PoolConfig,
}

impl RegistryConfig {
    pub const STORE_INIT_CAPACITY: usize = 20;

    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.pool.validate()
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            store: GrowthConfig::new(Self::STORE_INIT_CAPACITY),
            pool: PoolConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RegistryConfig::default();

        assert_eq!(config.store.initial_capacity, 20);
        assert_eq!(config.pool.node_heap.initial_capacity, 40);
        assert_eq!(config.pool.gap_index.initial_capacity, 40);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let invalid = [
            GrowthConfig { initial_capacity: 0, ..GrowthConfig::new(1) },
            GrowthConfig { fill_factor: 0.0, ..GrowthConfig::new(8) },
            GrowthConfig { fill_factor: 1.5, ..GrowthConfig::new(8) },
            GrowthConfig { fill_factor: f64::NAN, ..GrowthConfig::new(8) },
            GrowthConfig { expand_factor: 1, ..GrowthConfig::new(8) },
        ];

        for growth in invalid {
            assert!(matches!(growth.validate(), Err(PoolError::InvalidConfig(_))), "{growth:?}");
        }
    }
}
