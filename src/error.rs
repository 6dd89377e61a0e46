use thiserror::Error;

/// Everything that can go wrong while managing pools.
///
/// Every public operation returns one of these instead of a sentinel, so a
/// failed request can never be mistaken for a valid zero-sized result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("registry is already initialized")]
    AlreadyInitialized,

    #[error("registry is not initialized")]
    NotInitialized,

    #[error("out of memory")]
    OutOfMemory,

    #[error("pool is not empty: {allocations} live allocation(s), {gaps} gap(s)")]
    PoolNotEmpty { allocations: usize, gaps: usize },

    #[error("pool has no free space")]
    NoGap,

    #[error("no gap can hold {requested} bytes (largest gap is {largest} bytes)")]
    NoFit { requested: usize, largest: usize },

    #[error("allocation is not live in this pool")]
    InvalidAllocation,

    #[error("pool handle is not open in this registry")]
    UnknownPool,

    #[error("size must be greater than zero")]
    ZeroSize,

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("pool bookkeeping is inconsistent: {0}")]
    Inconsistent(String),
}

pub type Result<T> = std::result::Result<T, PoolError>;
