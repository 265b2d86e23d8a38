//! The shared pool.
//!
//! A [Pool] owns a bounded lock-free store of idle objects that every thread
//! can push to and pop from, plus the allocator, the shutdown flag and the
//! statistics. In front of the store sits the calling thread's cache
//! (see [local](crate::local)), which is where most same thread traffic
//! ends up.
//!
//! Objects are handed out as [Pooled] guards that go back to the pool when
//! dropped. For reference counted handles see [SharedPool](arc::SharedPool).
use crate::{
    DefaultConfig, Hook, Init, PoolConfig, PoolId, Poolable, ReinitFailure, ThreadTag,
    alloc::{Raw, alloc_object, free_object, take_object},
    error::{HookError, PoolError},
    local,
};
use crossbeam_utils::CachePadded;
use std::{
    borrow::Borrow,
    cmp::Ordering as CmpOrdering,
    fmt,
    hash::{Hash, Hasher},
    mem::{self, ManuallyDrop},
    ops::{Deref, DerefMut},
    ptr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Instant,
};
use tracing::{debug, trace, warn};

pub mod arc;
pub mod registry;
pub mod stats;
pub(crate) mod store;

use registry::Registry;
use stats::{PoolStats, Source, StatsBlock};
use store::Store;

const PREWARM_BATCH: usize = 32;
const SHRINK_BATCH: usize = 16;
const DRAIN_BATCH: usize = 64;

/// How an acquisition brings an object into shape. Resolved statically, one
/// impl for plain acquisition and one for acquisition with arguments.
pub(crate) trait Initializer<T> {
    /// build a brand new object
    fn fresh(self) -> Result<T, HookError>;

    /// bring a recycled object back into shape
    fn recycle(self, obj: &mut T) -> Result<(), HookError>;
}

pub(crate) struct NoArgs;

impl<T: Poolable> Initializer<T> for NoArgs {
    fn fresh(self) -> Result<T, HookError> {
        Ok(T::empty())
    }

    fn recycle(self, obj: &mut T) -> Result<(), HookError> {
        match obj.reset() {
            Hook::Ran(r) => r,
            Hook::Missing(()) => {
                if mem::needs_drop::<T>() {
                    reconstruct(obj, T::empty())
                }
                Ok(())
            }
        }
    }
}

pub(crate) struct WithArgs<A>(pub(crate) A);

impl<A, T: Init<A>> Initializer<T> for WithArgs<A> {
    fn fresh(self) -> Result<T, HookError> {
        let mut t = T::empty();
        match t.build(self.0) {
            Hook::Ran(r) => r.map(|()| t),
            Hook::Missing(args) => Ok(T::construct(args)),
        }
    }

    fn recycle(self, obj: &mut T) -> Result<(), HookError> {
        match obj.reinit(self.0) {
            Hook::Ran(r) => r,
            Hook::Missing(args) => match obj.build(args) {
                Hook::Ran(r) => r,
                Hook::Missing(args) => {
                    reconstruct(obj, T::construct(args));
                    Ok(())
                }
            },
        }
    }
}

// replacing the object wholesale must not lose the creating thread
fn reconstruct<T: Poolable>(obj: &mut T, new: T) {
    let tag = obj.thread_tag();
    *obj = new;
    if let Some(tag) = tag {
        obj.set_thread_tag(tag)
    }
}

fn cleanup<T: Poolable>(obj: &mut T) -> Result<(), HookError> {
    match obj.destroy() {
        Hook::Ran(r) => r,
        Hook::Missing(()) => match obj.reset() {
            Hook::Ran(r) => r,
            Hook::Missing(()) => Ok(()),
        },
    }
}

pub(crate) struct PoolInner<T: Poolable, C: PoolConfig> {
    id: PoolId,
    shutdown: CachePadded<AtomicBool>,
    stats: CachePadded<StatsBlock>,
    store: Store<T>,
    alloc: C::Alloc,
    registry: Arc<Registry<T, C>>,
}

impl<T: Poolable, C: PoolConfig> PoolInner<T, C> {
    pub(crate) fn id(&self) -> PoolId {
        self.id
    }

    pub(crate) fn alloc(&self) -> &C::Alloc {
        &self.alloc
    }

    pub(crate) fn registry(&self) -> &Arc<Registry<T, C>> {
        &self.registry
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn acquire<I: Initializer<T>>(&self, init: I) -> Result<Raw<T>, PoolError> {
        if self.is_shutdown() {
            return Err(PoolError::Shutdown);
        }
        if let Some(raw) = local::take::<T, C>() {
            return self.recycle(raw, init, Source::Cache);
        }
        if let Some(raw) = self.store.try_pop() {
            return self.recycle(raw, init, Source::Store);
        }
        self.create(init)
    }

    fn recycle<I: Initializer<T>>(
        &self,
        raw: Raw<T>,
        init: I,
        src: Source,
    ) -> Result<Raw<T>, PoolError> {
        if let Err(e) = init.recycle(unsafe { &mut *raw.as_ptr() }) {
            match C::ON_REINIT_FAILURE {
                ReinitFailure::Keep => {
                    warn!(pool = %self.id, error = %e, "reinitializing a recycled object failed, handing it out as is")
                }
                ReinitFailure::Fail => {
                    warn!(pool = %self.id, error = %e, "reinitializing a recycled object failed, destroying it");
                    unsafe { self.destroy(raw) };
                    return Err(PoolError::AllocationFailed);
                }
            }
        }
        if C::STATS {
            self.stats.acquired(src)
        }
        Ok(raw)
    }

    #[cold]
    fn create<I: Initializer<T>>(&self, init: I) -> Result<Raw<T>, PoolError> {
        let mut value = init.fresh().map_err(|e| {
            warn!(pool = %self.id, error = %e, "building a new object failed");
            PoolError::AllocationFailed
        })?;
        value.set_thread_tag(ThreadTag::current());
        let raw = alloc_object(&self.alloc, value).map_err(|_| {
            warn!(pool = %self.id, "allocator is out of memory");
            PoolError::AllocationFailed
        })?;
        if C::STATS {
            self.stats.acquired(Source::Fresh)
        }
        Ok(raw)
    }

    /// a default constructed object for prewarming
    fn make_idle(&self) -> Option<Raw<T>> {
        let mut value = T::empty();
        value.set_thread_tag(ThreadTag::current());
        alloc_object(&self.alloc, value).ok()
    }

    /// run the cleanup hook and work out where the object should go. Returns
    /// the object if it should go to the store and whether it is a cross
    /// thread release.
    fn prepare_release(&self, raw: Raw<T>, me: ThreadTag) -> (Option<Raw<T>>, bool) {
        let obj = unsafe { &mut *raw.as_ptr() };
        let same_thread = obj.thread_tag().is_none_or(|tag| tag == me);
        if let Err(e) = cleanup(obj) {
            warn!(pool = %self.id, error = %e, "cleanup hook failed on release");
        }
        if same_thread && !self.is_shutdown() {
            match local::put(self, raw) {
                Ok(()) => (None, false),
                Err(raw) => (Some(raw), false),
            }
        } else {
            (Some(raw), !same_thread)
        }
    }

    pub(crate) fn release(&self, raw: Raw<T>) {
        let (rest, cross) = self.prepare_release(raw, ThreadTag::current());
        if C::STATS {
            self.stats.released(1, usize::from(cross))
        }
        if let Some(raw) = rest {
            if let Err(raw) = self.safe_return(raw) {
                unsafe { self.destroy(raw) }
            }
        }
    }

    pub(crate) fn release_batch(&self, batch: impl IntoIterator<Item = Raw<T>>) {
        let me = ThreadTag::current();
        let (mut n, mut cross) = (0, 0);
        let mut overflow = Vec::new();
        for raw in batch {
            let (rest, is_cross) = self.prepare_release(raw, me);
            n += 1;
            cross += usize::from(is_cross);
            overflow.extend(rest);
        }
        if C::STATS {
            self.stats.released(n, cross)
        }
        if !overflow.is_empty() {
            self.return_batch(overflow)
        }
    }

    /// push into the store unless the pool is shutting down. Gives the object
    /// back if it was not accepted.
    pub(crate) fn safe_return(&self, raw: Raw<T>) -> Result<(), Raw<T>> {
        if self.is_shutdown() {
            return Err(raw);
        }
        self.store.try_push(raw)?;
        if self.shutdown.load(Ordering::Acquire) {
            // shutdown raced the push and the drain may already be done. The
            // store owns our object now, whatever we pop here is ours to free.
            if let Some(raw) = self.store.try_pop() {
                unsafe { self.destroy(raw) }
            }
        }
        Ok(())
    }

    /// move already cleaned objects into the store, destroying what doesn't
    /// fit
    pub(crate) fn return_batch(&self, batch: impl IntoIterator<Item = Raw<T>>) {
        if self.is_shutdown() {
            for raw in batch {
                unsafe { self.destroy(raw) }
            }
            return;
        }
        if C::STATS {
            self.stats.batch()
        }
        for raw in batch {
            if let Err(raw) = self.safe_return(raw) {
                unsafe { self.destroy(raw) }
            }
        }
    }

    /// # Safety
    ///
    /// `raw` must come from a pool of this configuration and be owned by the
    /// caller
    pub(crate) unsafe fn destroy(&self, raw: Raw<T>) {
        unsafe { free_object(&self.alloc, raw) }
    }

    fn drain(&self) -> usize {
        let mut batch = Vec::with_capacity(DRAIN_BATCH);
        let mut total = 0;
        loop {
            while batch.len() < DRAIN_BATCH {
                match self.store.try_pop() {
                    Some(raw) => batch.push(raw),
                    None => break,
                }
            }
            if batch.is_empty() {
                break total;
            }
            total += batch.len();
            for raw in batch.drain(..) {
                unsafe { self.destroy(raw) }
            }
        }
    }
}

impl<T: Poolable, C: PoolConfig> Drop for PoolInner<T, C> {
    fn drop(&mut self) {
        // late donations from exiting threads may still be in the store
        let n = self.drain();
        if n > 0 {
            trace!(pool = %self.id, destroyed = n, "destroyed late returns");
        }
    }
}

/// A lock-free, thread safe object pool.
///
/// The pool hands out objects from the calling thread's cache, then from its
/// shared store, and creates new ones when both are empty, so it never blocks
/// and never runs dry. Returned objects are cleaned and parked in the thread
/// cache, or in the store, or destroyed if there is no room.
///
/// Dropping the pool shuts it down: acquisition starts failing with
/// [PoolError::Shutdown], everything idle in the store is destroyed and the
/// pool leaves its registry. Objects parked in other threads' caches are dealt
/// with when those threads exit.
pub struct Pool<T: Poolable, C: PoolConfig = DefaultConfig> {
    inner: Arc<PoolInner<T, C>>,
}

impl<T: Poolable, C: PoolConfig> fmt::Debug for Pool<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.inner.id)
            .field("capacity", &C::CAPACITY)
            .field("idle", &self.idle())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl<T: Poolable, C: PoolConfig> Default for Pool<T, C>
where
    C::Alloc: Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Poolable, C: PoolConfig> Pool<T, C> {
    /// create a pool using the default allocator and the global registry
    pub fn new() -> Self
    where
        C::Alloc: Default,
    {
        Self::with_alloc(C::Alloc::default())
    }

    pub fn with_alloc(alloc: C::Alloc) -> Self {
        Self::with_registry(alloc, Registry::global())
    }

    /// create a pool that registers itself in `registry` instead of the
    /// global one
    pub fn with_registry(alloc: C::Alloc, registry: Arc<Registry<T, C>>) -> Self {
        const { assert!(C::CAPACITY.is_power_of_two(), "pool capacity must be a power of two") };
        let inner = Arc::new(PoolInner {
            id: PoolId::new(),
            shutdown: CachePadded::new(AtomicBool::new(false)),
            stats: CachePadded::new(StatsBlock::default()),
            store: Store::new(C::CAPACITY),
            alloc,
            registry,
        });
        inner.registry.register(inner.id, Instant::now(), Arc::downgrade(&inner));
        debug!(
            pool = %inner.id,
            capacity = C::CAPACITY,
            local_cache = C::LOCAL_CACHE,
            stats = C::STATS,
            "created pool"
        );
        let pool = Self { inner };
        if C::PREWARM_ON_NEW {
            pool.prewarm(C::CAPACITY / 2);
        }
        pool
    }

    pub(crate) fn inner(&self) -> &Arc<PoolInner<T, C>> {
        &self.inner
    }

    pub fn id(&self) -> PoolId {
        self.inner.id
    }

    pub fn registry(&self) -> &Arc<Registry<T, C>> {
        &self.inner.registry
    }

    /// the capacity of the shared store
    pub const fn capacity() -> usize {
        C::CAPACITY
    }

    /// approximately how many idle objects are in the shared store
    pub fn idle(&self) -> usize {
        self.inner.store.approx_size()
    }

    /// take an object, creating one if none are idle. Recycled objects are
    /// reinitialized with [Poolable::reset].
    pub fn acquire(&self) -> Result<Pooled<'_, T, C>, PoolError> {
        self.inner.acquire(NoArgs).map(|raw| Pooled::new(&self.inner, raw))
    }

    /// take an object initialized from `args`, see [Init]
    pub fn acquire_with<A>(&self, args: A) -> Result<Pooled<'_, T, C>, PoolError>
    where
        T: Init<A>,
    {
        self.inner.acquire(WithArgs(args)).map(|raw| Pooled::new(&self.inner, raw))
    }

    /// Return an object to this pool, `None` is ignored. Objects are
    /// interchangeable between pools of one configuration, so it need not be
    /// the pool the object came from. Never fails and never blocks.
    pub fn release<'a>(&self, obj: impl Into<Option<Pooled<'a, T, C>>>) {
        if let Some(obj) = obj.into() {
            self.inner.release(obj.into_raw())
        }
    }

    /// return many objects at once, updating the statistics once
    pub fn release_batch<'a>(&self, objs: impl IntoIterator<Item = Pooled<'a, T, C>>) {
        self.inner.release_batch(objs.into_iter().map(Pooled::into_raw))
    }

    /// Create up to `count` default constructed objects and park them in the
    /// shared store. Never overfills the store, and stops early if the
    /// allocator runs out.
    pub fn prewarm(&self, count: usize) {
        let inner = &*self.inner;
        if inner.is_shutdown() {
            return;
        }
        let mut remaining = count.min(C::CAPACITY.saturating_sub(inner.store.approx_size()));
        let mut batch = Vec::with_capacity(remaining.min(PREWARM_BATCH));
        let mut parked = 0;
        while remaining > 0 {
            let n = remaining.min(PREWARM_BATCH);
            batch.extend((0..n).map_while(|_| inner.make_idle()));
            let made = batch.len();
            let mut rejected = false;
            for raw in batch.drain(..) {
                if rejected {
                    unsafe { inner.destroy(raw) };
                    continue;
                }
                match inner.safe_return(raw) {
                    Ok(()) => parked += 1,
                    Err(raw) => {
                        rejected = true;
                        unsafe { inner.destroy(raw) }
                    }
                }
            }
            if rejected || made < n {
                break;
            }
            remaining -= made;
        }
        debug!(pool = %inner.id, requested = count, parked, "prewarmed");
    }

    /// move everything in this thread's cache to the shared store
    pub fn flush_local_cache(&self) {
        local::drain_to(&*self.inner);
    }

    /// Flush this thread's cache, then destroy up to `max` idle objects from
    /// the shared store. Returns the number destroyed.
    pub fn shrink(&self, max: usize) -> usize {
        let inner = &*self.inner;
        self.flush_local_cache();
        let mut released = 0;
        let mut batch = Vec::with_capacity(max.min(SHRINK_BATCH));
        while released < max {
            let target = (max - released).min(SHRINK_BATCH);
            while batch.len() < target {
                match inner.store.try_pop() {
                    Some(raw) => batch.push(raw),
                    None => break,
                }
            }
            if batch.is_empty() {
                break;
            }
            released += batch.len();
            for raw in batch.drain(..) {
                unsafe { inner.destroy(raw) }
            }
        }
        debug!(pool = %inner.id, max, released, "shrunk");
        released
    }

    pub fn stats(&self) -> PoolStats {
        if C::STATS {
            self.inner.stats.snapshot(self.inner.store.approx_size())
        } else {
            PoolStats::default()
        }
    }

    /// Stop handing out objects and destroy everything idle in the store.
    /// Objects still in use are destroyed when they are returned. Dropping
    /// the pool does this too.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.swap(true, Ordering::AcqRel) {
            let drained = self.inner.drain();
            debug!(pool = %self.inner.id, drained, "pool shutting down");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown()
    }
}

impl<T: Poolable, C: PoolConfig> Drop for Pool<T, C> {
    fn drop(&mut self) {
        let inner = &*self.inner;
        inner.shutdown.store(true, Ordering::Release);
        if !C::GRACE.is_zero() {
            thread::sleep(C::GRACE);
        }
        let flushed = local::drain_to(inner);
        let drained = inner.drain();
        inner.registry.unregister(inner.id);
        debug!(pool = %inner.id, flushed, drained, "pool shut down");
    }
}

/// An object on loan from a [Pool]. Goes back to the pool when dropped.
pub struct Pooled<'a, T: Poolable, C: PoolConfig = DefaultConfig> {
    pool: &'a PoolInner<T, C>,
    raw: Raw<T>,
}

impl<'a, T: Poolable, C: PoolConfig> Pooled<'a, T, C> {
    fn new(pool: &'a PoolInner<T, C>, raw: Raw<T>) -> Self {
        Self { pool, raw }
    }

    fn into_raw(self) -> Raw<T> {
        let t = ManuallyDrop::new(self);
        unsafe { ptr::read(&t.raw) }
    }

    /// the pool this object came from
    pub fn pool_id(&self) -> PoolId {
        self.pool.id
    }

    /// take the object out of the pool for good. Its memory slot is freed and
    /// it will not be returned when dropped.
    pub fn detach(self) -> T {
        let pool = self.pool;
        let raw = self.into_raw();
        if C::STATS {
            pool.stats.detached()
        }
        unsafe { take_object(&pool.alloc, raw) }
    }
}

impl<T: Poolable, C: PoolConfig> Drop for Pooled<'_, T, C> {
    fn drop(&mut self) {
        self.pool.release(unsafe { ptr::read(&self.raw) })
    }
}

impl<T: Poolable, C: PoolConfig> Deref for Pooled<'_, T, C> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.raw.as_ptr() }
    }
}

impl<T: Poolable, C: PoolConfig> DerefMut for Pooled<'_, T, C> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.raw.as_ptr() }
    }
}

impl<T: Poolable, C: PoolConfig> AsRef<T> for Pooled<'_, T, C> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T: Poolable, C: PoolConfig> AsMut<T> for Pooled<'_, T, C> {
    fn as_mut(&mut self) -> &mut T {
        self
    }
}

impl<T: Poolable, C: PoolConfig> Borrow<T> for Pooled<'_, T, C> {
    fn borrow(&self) -> &T {
        self
    }
}

impl<C: PoolConfig> Borrow<str> for Pooled<'_, String, C> {
    fn borrow(&self) -> &str {
        self
    }
}

impl<T: Poolable + fmt::Debug, C: PoolConfig> fmt::Debug for Pooled<'_, T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: Poolable + PartialEq, C: PoolConfig> PartialEq for Pooled<'_, T, C> {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl<T: Poolable + Eq, C: PoolConfig> Eq for Pooled<'_, T, C> {}

impl<T: Poolable + PartialOrd, C: PoolConfig> PartialOrd for Pooled<'_, T, C> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        (**self).partial_cmp(&**other)
    }
}

impl<T: Poolable + Ord, C: PoolConfig> Ord for Pooled<'_, T, C> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (**self).cmp(&**other)
    }
}

impl<T: Poolable + Hash, C: PoolConfig> Hash for Pooled<'_, T, C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (**self).hash(state)
    }
}
