//! Bounded dedup window over message uuids.
//!
//! Process-lifetime LRU rather than an unbounded set, so a long-lived
//! daemon neither grows without limit nor forgets a uuid while slow
//! transports are still delivering copies.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use uuid::Uuid;

pub struct SeenWindow {
    inner: Mutex<LruCache<Uuid, ()>>,
}

impl SeenWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Atomic contains-then-insert. Returns `true` when the uuid was not
    /// in the window (first sighting), `false` for a duplicate.
    pub fn insert(&self, uuid: Uuid) -> bool {
        let mut cache = self.lock();
        if cache.contains(&uuid) {
            false
        } else {
            cache.put(uuid, ());
            true
        }
    }

    /// Forget a uuid, re-arming dedup for it. Used when recording the
    /// first sighting failed and a later copy should get another chance.
    pub fn remove(&self, uuid: &Uuid) {
        self.lock().pop(uuid);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<Uuid, ()>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
