use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc, Weak,
};

use dashmap::DashMap;

use crate::runtime::{ClassId, RuntimeClass};

/// Size at which the first sweep of dead and stale entries runs.
const INITIAL_SWEEP_THRESHOLD: usize = 64;

struct Entry<T> {
    generation: u64,
    class: Weak<RuntimeClass>,
    value: T,
}

impl<T> Entry<T> {
    fn is_live(&self, generation: u64) -> bool {
        self.generation == generation && self.class.strong_count() > 0
    }
}

/// Per-class derived values.
///
/// Entries hold their class weakly and never keep it alive; a value whose class has
/// been dropped is never returned. [`ClassValueCache::clear`] bumps a generation counter before dropping entries, and
/// every entry is stamped with the generation it was computed under, so a compute
/// that races with a clear can store its value but that value is never served.
///
/// Entries of dropped classes and of earlier generations are swept on insert once
/// the table has doubled since the last sweep.
pub struct ClassValueCache<T: Clone> {
    generation: AtomicU64,
    entries: DashMap<ClassId, Entry<T>>,
    sweep_at: AtomicUsize,
}

impl<T: Clone> ClassValueCache<T> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        ClassValueCache {
            generation: AtomicU64::new(0),
            entries: DashMap::new(),
            sweep_at: AtomicUsize::new(INITIAL_SWEEP_THRESHOLD),
        }
    }

    /// Returns the cached value for `class`, computing and storing it on a miss.
    ///
    /// `compute` runs without any lock held and may run more than once for the
    /// same class under contention; any of the results is valid.
    pub fn get_or_compute<F>(&self, class: &Arc<RuntimeClass>, compute: F) -> T
    where
        F: FnOnce(&Arc<RuntimeClass>) -> T,
    {
        let generation = self.generation.load(Ordering::Acquire);
        if let Some(entry) = self.entries.get(&class.id()) {
            let live = entry
                .class
                .upgrade()
                .is_some_and(|cached| Arc::ptr_eq(&cached, class));
            if entry.generation == generation && live {
                return entry.value.clone();
            }
        }

        let value = compute(class);
        if self.generation.load(Ordering::Acquire) == generation {
            self.entries.insert(
                class.id(),
                Entry {
                    generation,
                    class: Arc::downgrade(class),
                    value: value.clone(),
                },
            );
            self.sweep_if_grown();
        }
        value
    }

    fn sweep_if_grown(&self) {
        if self.entries.len() < self.sweep_at.load(Ordering::Relaxed) {
            return;
        }
        let generation = self.generation.load(Ordering::Acquire);
        self.entries.retain(|_, entry| entry.is_live(generation));
        self.sweep_at.store(
            (self.entries.len() * 2).max(INITIAL_SWEEP_THRESHOLD),
            Ordering::Relaxed,
        );
    }

    /// Returns the cached value without computing.
    #[must_use]
    pub fn get(&self, class: &Arc<RuntimeClass>) -> Option<T> {
        let generation = self.generation.load(Ordering::Acquire);
        self.entries
            .get(&class.id())
            .filter(|entry| entry.is_live(generation))
            .map(|entry| entry.value.clone())
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
    }

    /// Number of stored entries, stale ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Clone> Default for ClassValueCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicBool, thread};

    use super::*;
    use crate::test::plain_class;

    #[test]
    fn test_compute_once_then_hit() {
        let cache = ClassValueCache::new();
        let class = plain_class("com/example/Foo");
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let value = cache.get_or_compute(&class, |c| {
                calls.fetch_add(1, Ordering::SeqCst);
                c.name().len()
            });
            assert_eq!(value, 15);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_forces_recompute() {
        let cache = ClassValueCache::new();
        let class = plain_class("com/example/Foo");
        assert_eq!(cache.get_or_compute(&class, |_| 1), 1);
        cache.clear();
        assert!(cache.get(&class).is_none());
        assert_eq!(cache.get_or_compute(&class, |_| 2), 2);
    }

    #[test]
    fn test_compute_racing_clear_is_not_served() {
        let cache = ClassValueCache::new();
        let class = plain_class("com/example/Foo");
        let value = cache.get_or_compute(&class, |_| {
            cache.clear();
            7
        });
        assert_eq!(value, 7);
        assert!(cache.get(&class).is_none());
    }

    #[test]
    fn test_dropped_classes_are_swept() {
        let cache = ClassValueCache::new();
        for index in 0..INITIAL_SWEEP_THRESHOLD * 4 {
            let class = plain_class(&format!("com/example/Temp{index}"));
            cache.get_or_compute(&class, |_| index);
        }
        assert!(cache.len() < INITIAL_SWEEP_THRESHOLD);

        let kept = plain_class("com/example/Kept");
        cache.get_or_compute(&kept, |_| 1);
        assert_eq!(cache.get(&kept), Some(1));
    }

    #[test]
    fn test_readers_racing_clear_see_current_values() {
        let cache = ClassValueCache::new();
        let classes: Vec<_> = (0..16)
            .map(|index| plain_class(&format!("com/example/Racer{index}")))
            .collect();
        let done = AtomicBool::new(false);

        thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..200 {
                    cache.clear();
                    thread::yield_now();
                }
                done.store(true, Ordering::SeqCst);
            });
            for _ in 0..4 {
                scope.spawn(|| {
                    while !done.load(Ordering::SeqCst) {
                        for class in &classes {
                            let value = cache.get_or_compute(class, |c| c.name().len());
                            assert_eq!(value, class.name().len());
                            if let Some(cached) = cache.get(class) {
                                assert_eq!(cached, class.name().len());
                            }
                        }
                    }
                });
            }
        });

        cache.clear();
        assert!(cache.is_empty());
        for class in &classes {
            assert!(cache.get(class).is_none());
        }
    }
}
