//! # mempool - explicit memory pools
//!
//! A pool is a fixed-size region of raw storage requested from the kernel.
//! Allocations are carved out of it and handed back to it, and the pool keeps
//! track of the free spans ("gaps") left in between:
//!
//! ```text
//!   +-----------+-------+-----------------+---------------------------+
//!   | Alloc(64) | Gap   | Alloc(200)      | Gap                       |
//!   +-----------+-------+-----------------+---------------------------+
//!                   |                                  |
//!                   +----------- gap index ------------+
//!                           (sorted by size)
//! ```
//!
//! Every span is a node of a doubly-linked list kept in a growable node heap;
//! every gap also has an entry in a size-sorted gap index. A [`Policy`] chosen
//! at open time decides which gap serves a request:
//!
//! - [`Policy::FirstFit`]: the leftmost gap that is large enough.
//! - [`Policy::BestFit`]: the smallest gap that is large enough.
//!
//! Freeing merges the released span with the gaps around it, so a pool whose
//! allocations have all been freed is again a single gap and can be closed.
//!
//! ```rust
//! use mempool::{Policy, Pool};
//!
//! let mut pool = Pool::open(1024, Policy::BestFit)?;
//!
//! let allocation = pool.allocate(100)?;
//! pool.bytes_mut(&allocation)?.fill(0x2A);
//! assert_eq!(pool.inspect().len(), 2);
//!
//! pool.free(allocation)?;
//! assert_eq!(pool.inspect().len(), 1);
//! pool.check_closable()?;
//! # Ok::<(), mempool::PoolError>(())
//! ```
//!
//! Several pools can be managed by handle through a [`Registry`], which has an
//! explicit `init`/`teardown` lifecycle.
//!
//! ## Limitations
//!
//! - **Single-threaded**: a pool does no locking. Share it behind a mutex.
//! - **No in-place growth**: a live allocation never changes size.
//! - **No alignment control**: allocations start wherever the chosen gap does.

mod block;
mod config;
mod error;
mod gap_index;
mod kernel;
mod list;
mod policy;
mod pool;
mod registry;
mod utils;

pub use config::{GrowthConfig, PoolConfig, RegistryConfig};
pub use error::{PoolError, Result};
pub use list::NodeId;
pub use policy::Policy;
pub use pool::{Allocation, Pool, PoolId, PoolStats, Segment};
pub use registry::{PoolHandle, Registry};
