//! Per thread caches.
//!
//! Every thread keeps a small LIFO stack of idle objects per pool
//! configuration. Taking from and putting to it involves no atomics at all,
//! which is what makes same thread churn cheap. The catch is that the cache is
//! shared by every pool of that configuration on the thread, and it outlives
//! them: when the thread exits the cache may still hold objects whose pool is
//! gone.
//!
//! So a cache tears itself down carefully. It first marks itself invalid,
//! then offers each object it still holds to the live pools of its
//! configuration, oldest first, through the pool's registry. Whatever nobody
//! takes is an orphan. Orphans from an owning allocator are destroyed, orphans
//! from an arena are leaked into the arena, since the arena reclaims its memory
//! in bulk and never frees individual objects.
//!
//! Thread exit is the safety net. A worker that knows it is about to finish
//! can call [Pool::flush_local_cache](crate::Pool::flush_local_cache) or
//! [clear] to hand its objects back right away.
use crate::{
    AllocKind, ObjectAlloc, PoolConfig, Poolable,
    alloc::{Raw, free_object},
    global::{PoolInner, registry::Registry},
};
use fxhash::FxHashMap;
use std::{
    any::{Any, TypeId},
    cell::RefCell,
    collections::HashMap,
    mem,
    sync::Arc,
};
use tracing::{trace, warn};

pub(crate) struct LocalCache<T: Poolable, C: PoolConfig> {
    valid: bool,
    data: Vec<Raw<T>>,
    // taken from the pool that created the cache. Objects are
    // interchangeable within a configuration, so either is good for any of
    // them.
    alloc: C::Alloc,
    registry: Arc<Registry<T, C>>,
}

impl<T: Poolable, C: PoolConfig> LocalCache<T, C> {
    fn new(pool: &PoolInner<T, C>) -> Self {
        Self {
            valid: true,
            data: Vec::with_capacity(C::LOCAL_CACHE),
            alloc: pool.alloc().clone(),
            registry: Arc::clone(pool.registry()),
        }
    }

    /// the most recently parked object
    pub(crate) fn take(&mut self) -> Option<Raw<T>> {
        if !self.valid {
            return None;
        }
        self.data.pop()
    }

    /// park an object, or hand it back if the cache is full or invalid
    pub(crate) fn put(&mut self, raw: Raw<T>) -> Result<(), Raw<T>> {
        if !self.valid || self.data.len() >= C::LOCAL_CACHE {
            return Err(raw);
        }
        self.data.push(raw);
        Ok(())
    }

    fn drain(&mut self) -> Vec<Raw<T>> {
        mem::take(&mut self.data)
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }
}

// offer `raw` to each live pool in turn
fn donate<T: Poolable, C: PoolConfig>(
    live: &[Arc<PoolInner<T, C>>],
    mut raw: Raw<T>,
) -> Result<(), Raw<T>> {
    for pool in live {
        if pool.is_shutdown() {
            continue;
        }
        match pool.safe_return(raw) {
            Ok(()) => {
                trace!(pool = %pool.id(), "donated cached object");
                return Ok(());
            }
            Err(r) => raw = r,
        }
    }
    Err(raw)
}

impl<T: Poolable, C: PoolConfig> Drop for LocalCache<T, C> {
    fn drop(&mut self) {
        self.valid = false;
        if self.data.is_empty() {
            return;
        }
        let live = self.registry.live();
        let (mut destroyed, mut leaked) = (0usize, 0usize);
        for raw in self.data.drain(..) {
            let Err(raw) = donate(&live, raw) else { continue };
            match <C::Alloc as ObjectAlloc>::KIND {
                AllocKind::Owning => {
                    unsafe { free_object(&self.alloc, raw) };
                    destroyed += 1;
                }
                // the arena reclaims it in bulk, the destructor never runs
                AllocKind::Arena => leaked += 1,
            }
        }
        if destroyed > 0 {
            trace!(destroyed, "destroyed orphaned cached objects");
        }
        if leaked > 0 {
            warn!(leaked, "left orphaned cached objects in their arena");
        }
    }
}

thread_local! {
    static CACHES: RefCell<FxHashMap<TypeId, Box<dyn Any>>> =
        RefCell::new(HashMap::default());
}

// Run `f` on this thread's cache for `(T, C)`, creating it from `pool` if
// there is none yet. Returns None if the cache can't be reached, either
// because the thread is exiting or because we are being called from inside a
// cache operation (e.g. an object's Drop calling back into a pool). Callers
// fall back to the store in that case.
fn with_cache<T, C, R, F>(pool: Option<&PoolInner<T, C>>, f: F) -> Option<R>
where
    T: Poolable,
    C: PoolConfig,
    F: FnOnce(&mut LocalCache<T, C>) -> R,
{
    CACHES
        .try_with(|caches| {
            let mut caches = caches.try_borrow_mut().ok()?;
            let key = TypeId::of::<LocalCache<T, C>>();
            let cache = match pool {
                Some(pool) => caches
                    .entry(key)
                    .or_insert_with(|| Box::new(LocalCache::<T, C>::new(pool))),
                None => caches.get_mut(&key)?,
            };
            cache.downcast_mut::<LocalCache<T, C>>().map(f)
        })
        .ok()
        .flatten()
}

pub(crate) fn take<T: Poolable, C: PoolConfig>() -> Option<Raw<T>> {
    with_cache::<T, C, _, _>(None, |cache| cache.take()).flatten()
}

pub(crate) fn put<T: Poolable, C: PoolConfig>(
    pool: &PoolInner<T, C>,
    raw: Raw<T>,
) -> Result<(), Raw<T>> {
    if C::LOCAL_CACHE == 0 {
        return Err(raw);
    }
    let mut slot = Some(raw);
    with_cache(Some(pool), |cache| {
        if let Some(raw) = slot.take() {
            if let Err(raw) = cache.put(raw) {
                slot = Some(raw)
            }
        }
    });
    match slot {
        None => Ok(()),
        Some(raw) => Err(raw),
    }
}

/// empty this thread's cache for `(T, C)` into `pool`'s store, returning how
/// many objects were moved (or destroyed, if the store had no room)
pub(crate) fn drain_to<T: Poolable, C: PoolConfig>(pool: &PoolInner<T, C>) -> usize {
    let objs = with_cache::<T, C, _, _>(None, |cache| cache.drain()).unwrap_or_default();
    let n = objs.len();
    if n > 0 {
        pool.return_batch(objs)
    }
    n
}

/// the number of objects in this thread's cache for `(T, C)`
pub fn cached<T: Poolable, C: PoolConfig>() -> usize {
    with_cache::<T, C, _, _>(None, |cache| cache.len()).unwrap_or(0)
}

/// Tear down all of this thread's caches now instead of at thread exit.
/// Cached objects are donated to live pools or dealt with as orphans, exactly
/// as if the thread had exited.
pub fn clear() {
    let caches = CACHES
        .try_with(|caches| caches.try_borrow_mut().map(|mut c| mem::take(&mut *c)).ok())
        .ok()
        .flatten();
    // dropped outside the borrow, teardown may call back into pools
    drop(caches)
}

/// Tear down this thread's cache for `(T, C)`, see [clear]
pub fn clear_type<T: Poolable, C: PoolConfig>() {
    let cache = CACHES
        .try_with(|caches| {
            caches
                .try_borrow_mut()
                .ok()
                .and_then(|mut c| c.remove(&TypeId::of::<LocalCache<T, C>>()))
        })
        .ok()
        .flatten();
    drop(cache)
}
