//! Reference counted pooled objects.
//!
//! A [SharedPool] hands out [Shared] handles, which behave like an `Arc<T>`
//! and put the object back in the pool when the last clone is dropped. With
//! the `triomphe` feature [SharedPool::acquire_t] hands out [TShared]
//! handles instead, which skip the weak count.
//!
//! Each handle keeps the pool's internals alive, so dropping the
//! [SharedPool] while handles are outstanding is fine: the pool shuts down,
//! and the stragglers are destroyed as they come back.
use super::{NoArgs, Pool, PoolInner, WithArgs, registry::Registry, stats::PoolStats};
use crate::{DefaultConfig, Init, PoolConfig, PoolError, PoolId, Poolable, alloc::Raw};
use std::{
    borrow::Borrow,
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    ops::Deref,
    sync::Arc as StdArc,
};

struct Slot<T: Poolable, C: PoolConfig> {
    pool: StdArc<PoolInner<T, C>>,
    raw: Raw<T>,
}

impl<T: Poolable, C: PoolConfig> Slot<T, C> {
    fn get(&self) -> &T {
        unsafe { &*self.raw.as_ptr() }
    }

    fn get_mut(&mut self) -> &mut T {
        unsafe { &mut *self.raw.as_ptr() }
    }
}

impl<T: Poolable, C: PoolConfig> Drop for Slot<T, C> {
    fn drop(&mut self) {
        self.pool.release(unsafe { std::ptr::read(&self.raw) })
    }
}

macro_rules! impl_shared {
    ($name:ident, $inner:ident, $count:expr) => {
        /// A reference counted pooled object. The object goes back to its
        /// pool when the last clone is dropped.
        pub struct $name<T: Poolable, C: PoolConfig = DefaultConfig> {
            inner: $inner<Slot<T, C>>,
        }

        impl<T: Poolable, C: PoolConfig> Clone for $name<T, C> {
            fn clone(&self) -> Self {
                Self { inner: $inner::clone(&self.inner) }
            }
        }

        impl<T: Poolable, C: PoolConfig> $name<T, C> {
            fn new(pool: &StdArc<PoolInner<T, C>>, raw: Raw<T>) -> Self {
                Self { inner: $inner::new(Slot { pool: StdArc::clone(pool), raw }) }
            }

            /// if this is the only reference, get a mutable reference to the
            /// object
            pub fn get_mut(&mut self) -> Option<&mut T> {
                $inner::get_mut(&mut self.inner).map(Slot::get_mut)
            }

            /// the number of strong references to the object
            pub fn strong_count(&self) -> usize {
                $count(&self.inner)
            }

            pub fn ptr_eq(&self, other: &Self) -> bool {
                $inner::ptr_eq(&self.inner, &other.inner)
            }

            /// the address of the pooled object, stable across reuse
            pub fn as_ptr(&self) -> *const T {
                self.inner.raw.as_ptr()
            }

            /// the pool this object came from
            pub fn pool_id(&self) -> PoolId {
                self.inner.pool.id()
            }
        }

        impl<T: Poolable, C: PoolConfig> Deref for $name<T, C> {
            type Target = T;

            fn deref(&self) -> &T {
                self.inner.get()
            }
        }

        impl<T: Poolable, C: PoolConfig> AsRef<T> for $name<T, C> {
            fn as_ref(&self) -> &T {
                self
            }
        }

        impl<T: Poolable, C: PoolConfig> Borrow<T> for $name<T, C> {
            fn borrow(&self) -> &T {
                self
            }
        }

        impl<T: Poolable + fmt::Debug, C: PoolConfig> fmt::Debug for $name<T, C> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(&**self, f)
            }
        }

        impl<T: Poolable + PartialEq, C: PoolConfig> PartialEq for $name<T, C> {
            fn eq(&self, other: &Self) -> bool {
                **self == **other
            }
        }

        impl<T: Poolable + Eq, C: PoolConfig> Eq for $name<T, C> {}

        impl<T: Poolable + PartialOrd, C: PoolConfig> PartialOrd for $name<T, C> {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                (**self).partial_cmp(&**other)
            }
        }

        impl<T: Poolable + Ord, C: PoolConfig> Ord for $name<T, C> {
            fn cmp(&self, other: &Self) -> Ordering {
                (**self).cmp(&**other)
            }
        }

        impl<T: Poolable + Hash, C: PoolConfig> Hash for $name<T, C> {
            fn hash<H: Hasher>(&self, state: &mut H) {
                (**self).hash(state)
            }
        }
    };
}

impl_shared!(Shared, StdArc, StdArc::strong_count);

#[cfg(feature = "triomphe")]
use triomphe::Arc as TArcInner;

#[cfg(feature = "triomphe")]
impl_shared!(TShared, TArcInner, TArcInner::count);

#[cfg(feature = "triomphe")]
impl<T: Poolable, C: PoolConfig> TShared<T, C> {
    pub fn is_unique(&self) -> bool {
        self.inner.is_unique()
    }
}

/// A pool that hands out reference counted objects. Owns its [Pool]; every
/// other operation is a straight delegation.
pub struct SharedPool<T: Poolable, C: PoolConfig = DefaultConfig> {
    pool: Pool<T, C>,
}

impl<T: Poolable, C: PoolConfig> fmt::Debug for SharedPool<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedPool").field(&self.pool).finish()
    }
}

impl<T: Poolable, C: PoolConfig> Default for SharedPool<T, C>
where
    C::Alloc: Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Poolable, C: PoolConfig> From<Pool<T, C>> for SharedPool<T, C> {
    fn from(pool: Pool<T, C>) -> Self {
        Self { pool }
    }
}

impl<T: Poolable, C: PoolConfig> SharedPool<T, C> {
    pub fn new() -> Self
    where
        C::Alloc: Default,
    {
        Pool::new().into()
    }

    pub fn with_alloc(alloc: C::Alloc) -> Self {
        Pool::with_alloc(alloc).into()
    }

    pub fn with_registry(alloc: C::Alloc, registry: StdArc<Registry<T, C>>) -> Self {
        Pool::with_registry(alloc, registry).into()
    }

    /// the underlying pool
    pub fn pool(&self) -> &Pool<T, C> {
        &self.pool
    }

    pub fn acquire(&self) -> Result<Shared<T, C>, PoolError> {
        let inner = self.pool.inner();
        inner.acquire(NoArgs).map(|raw| Shared::new(inner, raw))
    }

    pub fn acquire_with<A>(&self, args: A) -> Result<Shared<T, C>, PoolError>
    where
        T: Init<A>,
    {
        let inner = self.pool.inner();
        inner.acquire(WithArgs(args)).map(|raw| Shared::new(inner, raw))
    }

    #[cfg(feature = "triomphe")]
    pub fn acquire_t(&self) -> Result<TShared<T, C>, PoolError> {
        let inner = self.pool.inner();
        inner.acquire(NoArgs).map(|raw| TShared::new(inner, raw))
    }

    #[cfg(feature = "triomphe")]
    pub fn acquire_t_with<A>(&self, args: A) -> Result<TShared<T, C>, PoolError>
    where
        T: Init<A>,
    {
        let inner = self.pool.inner();
        inner.acquire(WithArgs(args)).map(|raw| TShared::new(inner, raw))
    }

    pub fn prewarm(&self, count: usize) {
        self.pool.prewarm(count)
    }

    pub fn flush_local_cache(&self) {
        self.pool.flush_local_cache()
    }

    pub fn shrink(&self, max: usize) -> usize {
        self.pool.shrink(max)
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub const fn capacity() -> usize {
        Pool::<T, C>::capacity()
    }

    pub fn shutdown(&self) {
        self.pool.shutdown()
    }

    pub fn is_shutdown(&self) -> bool {
        self.pool.is_shutdown()
    }
}
