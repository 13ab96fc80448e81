//! Lock-free holder for the composed router.
//!
//! Requests load the current router without locking; mounts build a new one
//! off to the side and swap it in atomically. In-flight requests keep the
//! router they started with.

use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct RouterCache<T> {
    inner: ArcSwap<T>,
    generation: AtomicU64,
}

impl<T> RouterCache<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: ArcSwap::from_pointee(initial),
            generation: AtomicU64::new(0),
        }
    }

    /// Hot path: the current value.
    pub fn load(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Replace the value; returns the new generation.
    pub fn store(&self, value: T) -> u64 {
        self.inner.store(Arc::new(value));
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Number of stores since creation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_keep_their_snapshot() {
        let cache = RouterCache::new(String::from("v0"));
        let before = cache.load();
        assert_eq!(cache.store("v1".into()), 1);
        assert_eq!(*before, "v0");
        assert_eq!(*cache.load(), "v1");
        assert_eq!(cache.generation(), 1);
    }

    #[test]
    fn concurrent_loads_and_stores() {
        let cache = Arc::new(RouterCache::new(0usize));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for n in 0..100 {
                        if i == 0 {
                            cache.store(n);
                        } else {
                            let _ = *cache.load();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.generation(), 100);
        assert_eq!(*cache.load(), 99);
    }
}
