//! The registry of live pools.
//!
//! A thread cache is shared by every pool of one configuration, so when its
//! thread exits it cannot know which of those pools are still around. The
//! registry answers that. Pools register themselves when they are created
//! and unregister when they shut down, and a dying cache asks for a snapshot
//! of whoever is left.
//!
//! Each configuration has a process wide registry ([Registry::global]), but
//! a pool can be given any registry, which keeps tests from donating objects
//! to each other's pools.
use super::PoolInner;
use crate::{Poolable, PoolConfig, PoolId};
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::{
    any::{Any, TypeId},
    fmt,
    sync::{Arc, LazyLock, Weak},
    time::Instant,
};

struct Entry<T: Poolable, C: PoolConfig> {
    registered: Instant,
    pool: Weak<PoolInner<T, C>>,
}

/// Live pools of one configuration, keyed by id. Holds weak references only,
/// the registry never keeps a pool alive.
pub struct Registry<T: Poolable, C: PoolConfig> {
    entries: Mutex<FxHashMap<PoolId, Entry<T, C>>>,
}

impl<T: Poolable, C: PoolConfig> fmt::Debug for Registry<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("pools", &self.snapshot()).finish()
    }
}

impl<T: Poolable, C: PoolConfig> Default for Registry<T, C> {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: LazyLock<Mutex<FxHashMap<TypeId, Box<dyn Any + Send + Sync>>>> =
    LazyLock::new(|| Mutex::new(FxHashMap::default()));

impl<T: Poolable, C: PoolConfig> Registry<T, C> {
    /// create an isolated registry
    pub fn new() -> Self {
        Self { entries: Mutex::new(FxHashMap::default()) }
    }

    /// the process wide registry for this configuration
    pub fn global() -> Arc<Self> {
        let mut registries = GLOBAL.lock();
        let key = TypeId::of::<Self>();
        if let Some(r) = registries.get(&key).and_then(|r| r.downcast_ref::<Arc<Self>>()) {
            return Arc::clone(r);
        }
        let r = Arc::new(Self::new());
        registries.insert(key, Box::new(Arc::clone(&r)));
        r
    }

    pub(crate) fn register(&self, id: PoolId, now: Instant, pool: Weak<PoolInner<T, C>>) {
        self.entries.lock().insert(id, Entry { registered: now, pool });
    }

    pub(crate) fn unregister(&self, id: PoolId) -> bool {
        self.entries.lock().remove(&id).is_some()
    }

    /// ids of the registered pools, oldest first
    pub fn snapshot(&self) -> Vec<PoolId> {
        let entries = self.entries.lock();
        let mut ids = entries.iter().map(|(id, e)| (e.registered, *id)).collect::<Vec<_>>();
        ids.sort_unstable();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// the registered pools that are still alive, oldest first
    pub(crate) fn live(&self) -> Vec<Arc<PoolInner<T, C>>> {
        let mut live = {
            let entries = self.entries.lock();
            entries
                .values()
                .filter_map(|e| e.pool.upgrade().map(|p| (e.registered, p)))
                .collect::<Vec<_>>()
        };
        live.sort_unstable_by_key(|(registered, p)| (*registered, p.id()));
        live.into_iter().map(|(_, p)| p).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: PoolId) -> bool {
        self.entries.lock().contains_key(&id)
    }
}
