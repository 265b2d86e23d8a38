//! Compile time pool configuration.
//!
//! A pool's shape is fixed by its configuration type rather than by values
//! passed at runtime. Every pool of a given `(T, C)` pair shares the same
//! thread local caches and the same global registry, so two configurations
//! that should not share objects must be different types.
//!
//! ```
//! use std::time::Duration;
//! use tidepool::{Global, PoolConfig};
//!
//! struct Small;
//!
//! impl PoolConfig for Small {
//!     const CAPACITY: usize = 64;
//!     const LOCAL_CACHE: usize = 4;
//!     const STATS: bool = true;
//!     const GRACE: Duration = Duration::ZERO;
//!     type Alloc = Global;
//! }
//! ```
use crate::alloc::{Global, ObjectAlloc};
use std::time::Duration;

/// What to do when reinitializing a recycled object fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReinitFailure {
    /// hand the object out anyway, in whatever state the failed hook left it
    Keep,
    /// destroy the object and fail the acquisition with
    /// [AllocationFailed](crate::PoolError::AllocationFailed)
    Fail,
}

pub trait PoolConfig: Send + Sync + 'static {
    /// the number of idle objects the shared store can hold. Must be a power
    /// of two.
    const CAPACITY: usize = 1024;

    /// the number of idle objects each thread may keep for itself
    const LOCAL_CACHE: usize = 32;

    /// collect statistics
    const STATS: bool = false;

    /// fill half the store when the pool is created
    const PREWARM_ON_NEW: bool = false;

    /// how long a dropping pool waits for in flight operations to notice the
    /// shutdown flag before it drains the store
    const GRACE: Duration = Duration::from_millis(2);

    const ON_REINIT_FAILURE: ReinitFailure = ReinitFailure::Keep;

    type Alloc: ObjectAlloc;
}

/// 1024 slots, 32 per thread, no statistics, the global heap
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConfig;

impl PoolConfig for DefaultConfig {
    type Alloc = Global;
}
