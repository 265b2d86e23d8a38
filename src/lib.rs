//! A lock-free object pool with per thread caches.
//!
//! [Pool] recycles heap allocated objects instead of handing them back to the
//! allocator. Acquisition tries the calling thread's cache first, then a shared
//! bounded lock-free store, and only then allocates. Release goes the other way
//! around. When a thread exits while its cache still holds objects they are
//! donated to any live pool of the same configuration, or destroyed.
//!
//! What a pool does with a type is controlled by the [Poolable] and [Init]
//! traits. Every hook is optional except [Poolable::empty], and since the
//! pool is generic over the type all of this is resolved at compile time.
//!
//! ```
//! use tidepool::{Pool, DefaultConfig};
//!
//! let pool: Pool<Vec<u8>, DefaultConfig> = Pool::new();
//! let mut buf = pool.acquire().unwrap();
//! buf.extend_from_slice(b"hello");
//! drop(buf); // cleared and parked in this thread's cache
//! assert!(pool.acquire().unwrap().capacity() >= 5);
//! ```
extern crate self as tidepool;

use std::{
    fmt,
    sync::atomic::{AtomicU16, AtomicU64, Ordering},
};

pub mod alloc;
pub mod config;
pub mod error;
pub mod global;
pub mod local;
pub mod pooled;


pub use alloc::{AllocKind, Arena, ArenaAlloc, Global, ObjectAlloc};
pub use config::{DefaultConfig, PoolConfig, ReinitFailure};
pub use error::{HookError, PoolError};
pub use global::{
    Pool, Pooled,
    arc::{Shared, SharedPool},
    registry::Registry,
    stats::PoolStats,
};
#[cfg(feature = "triomphe")]
pub use global::arc::TShared;
pub use tidepool_derive::Poolable;

/// A small per thread identifier used to tell same thread releases from
/// cross thread releases. Tags are handed out in thread start order and wrap
/// after `u16::MAX` threads, so two threads may share a tag. That only costs a
/// cache miss, never correctness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadTag(u16);

impl ThreadTag {
    /// the tag of the calling thread
    pub fn current() -> Self {
        static NEXT: AtomicU16 = AtomicU16::new(0);
        thread_local! {
            static TAG: ThreadTag = ThreadTag(NEXT.fetch_add(1, Ordering::Relaxed));
        }
        // thread locals may already be gone while a thread is exiting
        TAG.try_with(|t| *t).unwrap_or(ThreadTag(u16::MAX))
    }

    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ThreadTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process unique identity of a pool instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolId(u64);

impl PoolId {
    pub(crate) fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

/// The outcome of an optional capability hook.
///
/// A type that does not provide a hook returns `Missing`, handing any
/// arguments back so the pool can try the next capability in line.
#[derive(Debug)]
pub enum Hook<A = ()> {
    /// the hook exists and ran, possibly unsuccessfully
    Ran(Result<(), HookError>),
    /// the type has no such hook
    Missing(A),
}

impl<A> Hook<A> {
    /// wrap the result of running a hook
    pub fn ran(r: impl IntoHookResult) -> Self {
        Hook::Ran(r.into_hook_result())
    }
}

/// Conversion from whatever a user hook returns into the pool's view of it.
/// Hooks returning `()` always succeed.
pub trait IntoHookResult {
    fn into_hook_result(self) -> Result<(), HookError>;
}

impl IntoHookResult for () {
    fn into_hook_result(self) -> Result<(), HookError> {
        Ok(())
    }
}

impl<E: fmt::Display> IntoHookResult for Result<(), E> {
    fn into_hook_result(self) -> Result<(), HookError> {
        self.map_err(|e| HookError::new(e.to_string()))
    }
}

/// Trait for poolable objects.
///
/// Only `empty` is required. The pool consults the other hooks to decide
/// what to do with an object at the edges of its life:
///
/// - on release it runs `destroy` if the type has it, otherwise `reset`.
/// - on reuse through [Pool::acquire] it runs `reset`. If there is no
///   `reset` and `T` needs drop, the object is replaced with a fresh `empty()`.
/// - if the type carries a thread tag the pool stamps it at creation and uses
///   it at release to keep cross thread returns out of the local cache.
///
/// Hook failures are logged and otherwise ignored, release never fails.
pub trait Poolable: Sized + Send + 'static {
    /// allocate a new default constructed object
    fn empty() -> Self;

    /// reinitialize in place with no arguments
    fn reset(&mut self) -> Hook {
        Hook::Missing(())
    }

    /// explicit teardown hook run when the object is released
    fn destroy(&mut self) -> Hook {
        Hook::Missing(())
    }

    /// the thread that created this object, if the type records it
    fn thread_tag(&self) -> Option<ThreadTag> {
        None
    }

    /// record the creating thread. Called once, right after construction.
    fn set_thread_tag(&mut self, _tag: ThreadTag) {}
}

/// Initialization from caller supplied arguments, used by
/// [Pool::acquire_with].
///
/// A recycled object is brought into shape by the first of these that the
/// type provides: `reinit`, then `build`, then dropping it and calling
/// `construct`. A brand new object is built by running `build` on an `empty()`
/// shell, or by `construct` if there is no `build`.
pub trait Init<A>: Poolable {
    /// reinitialize a recycled object in place
    fn reinit(&mut self, args: A) -> Hook<A> {
        Hook::Missing(args)
    }

    /// finish building an object from `args`
    fn build(&mut self, args: A) -> Hook<A> {
        Hook::Missing(args)
    }

    /// construct an object from `args`
    fn construct(args: A) -> Self;
}
