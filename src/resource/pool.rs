//! Mutex-guarded pools of recyclable resources, keyed by a caller-supplied
//! descriptor.
//!
//! A pooled resource is handed out as a strong reference; the pool itself
//! only tracks entries that have been explicitly returned via
//! [`ResourcePool::release`] (typically done by the command-buffer reap
//! pass once a resource is no longer tracked by any in-flight submission).

use parking_lot::Mutex;
use std::sync::Arc;

/// A pool of `T`, matched for reuse by equality of `K`.
pub struct ResourcePool<K, T> {
    free: Mutex<Vec<(K, Arc<T>)>>,
}

impl<K, T> Default for ResourcePool<K, T> {
    fn default() -> Self {
        Self { free: Mutex::new(Vec::new()) }
    }
}

impl<K: PartialEq + Clone, T> ResourcePool<K, T> {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a free entry matching `key`, if any, removing it from the
    /// free list. Otherwise constructs a new one via `create` and does not
    /// add it to the free list (it becomes free only once released).
    pub fn get_or_create<E>(
        &self,
        key: &K,
        create: impl FnOnce() -> Result<Arc<T>, E>,
    ) -> Result<Arc<T>, E> {
        let mut free = self.free.lock();
        if let Some(pos) = free.iter().position(|(k, _)| k == key) {
            return Ok(free.swap_remove(pos).1);
        }
        drop(free);
        create()
    }

    /// Returns `item` to the free list so a future `get_or_create` with an
    /// equal key can reuse it. The caller must guarantee no command buffer
    /// still references it.
    pub fn release(&self, key: K, item: Arc<T>) {
        self.free.lock().push((key, item));
    }

    /// Number of entries currently available for reuse.
    pub fn free_count(&self) -> usize {
        self.free.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_entry_with_matching_key() {
        let pool: ResourcePool<u32, i32> = ResourcePool::new();
        let created: Result<Arc<i32>, ()> = pool.get_or_create(&7, || Ok(Arc::new(42)));
        let item = created.unwrap();
        pool.release(7, item.clone());
        assert_eq!(pool.free_count(), 1);

        let mut construct_calls = 0;
        let reused = pool
            .get_or_create(&7, || {
                construct_calls += 1;
                Ok::<_, ()>(Arc::new(0))
            })
            .unwrap();
        assert_eq!(construct_calls, 0);
        assert!(Arc::ptr_eq(&reused, &item));
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn constructs_new_when_no_key_matches() {
        let pool: ResourcePool<u32, i32> = ResourcePool::new();
        let mut construct_calls = 0;
        let _ = pool
            .get_or_create(&1, || {
                construct_calls += 1;
                Ok::<_, ()>(Arc::new(1))
            })
            .unwrap();
        assert_eq!(construct_calls, 1);
    }
}
