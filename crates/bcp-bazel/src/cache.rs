use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Mutex, RwLock};

use crate::params::ParamFileResult;

pub const DEFAULT_PARAMS_CACHE_TTL: Duration = Duration::from_secs(60);

/// Identity of a test-classpath lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub is_source: bool,
    pub test_class: Option<blake3::Hash>,
    pub targets: blake3::Hash,
}

impl CacheKey {
    /// Target order does not matter; the set is hashed sorted.
    pub fn new<'a>(
        is_source: bool,
        test_class: Option<&str>,
        targets: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut sorted: Vec<&str> = targets.into_iter().collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut hasher = blake3::Hasher::new();
        for target in sorted {
            hasher.update(target.as_bytes());
            hasher.update(b"\0");
        }

        Self {
            is_source,
            test_class: test_class.map(|name| blake3::hash(name.as_bytes())),
            targets: hasher.finalize(),
        }
    }
}

#[derive(Debug)]
struct Generation {
    started: Instant,
    entries: RwLock<HashMap<CacheKey, Arc<ParamFileResult>>>,
}

impl Generation {
    fn new(started: Instant) -> Arc<Self> {
        Arc::new(Self {
            started,
            entries: RwLock::new(HashMap::new()),
        })
    }
}

/// Generational cache of params-file lookups.
///
/// There is no per-entry expiry: once the current generation is older than
/// the TTL the whole map is replaced. Swapping the generation pointer is the
/// only synchronized step, so a reader racing a swap may miss but never sees
/// a half-filled map.
#[derive(Debug)]
pub struct ParamFileCache {
    ttl: Duration,
    current: Mutex<Arc<Generation>>,
}

impl Default for ParamFileCache {
    fn default() -> Self {
        Self::new(DEFAULT_PARAMS_CACHE_TTL)
    }
}

impl ParamFileCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            current: Mutex::new(Generation::new(Instant::now())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn generation(&self, now: Instant) -> Arc<Generation> {
        let mut current = self.current.lock();
        if now.saturating_duration_since(current.started) > self.ttl {
            tracing::debug!(target = "bcp.bazel", "params cache generation expired");
            *current = Generation::new(now);
        }
        current.clone()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<ParamFileResult>> {
        self.get_at(key, Instant::now())
    }

    pub fn insert(&self, key: CacheKey, value: ParamFileResult) -> Arc<ParamFileResult> {
        self.insert_at(key, value, Instant::now())
    }

    pub(crate) fn get_at(&self, key: &CacheKey, now: Instant) -> Option<Arc<ParamFileResult>> {
        self.generation(now).entries.read().get(key).cloned()
    }

    pub(crate) fn insert_at(
        &self,
        key: CacheKey,
        value: ParamFileResult,
        now: Instant,
    ) -> Arc<ParamFileResult> {
        let value = Arc::new(value);
        self.generation(now)
            .entries
            .write()
            .insert(key, value.clone());
        value
    }

    /// Return the cached value or compute, store and return it.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: CacheKey,
        compute: impl FnOnce() -> Result<ParamFileResult, E>,
    ) -> Result<Arc<ParamFileResult>, E> {
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let value = compute()?;
        Ok(self.insert(key, value))
    }

    /// Drop everything, e.g. after a BUILD file changed.
    pub fn flush(&self) {
        *self.current.lock() = Generation::new(Instant::now());
    }

    pub fn len(&self) -> usize {
        self.current.lock().entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn result(file: &str) -> ParamFileResult {
        ParamFileResult {
            params_files: vec![PathBuf::from(file)],
            ..ParamFileResult::default()
        }
    }

    #[test]
    fn key_ignores_target_order_but_not_kind_or_class() {
        let a = CacheKey::new(false, Some("demo.FooTest"), ["//a:t", "//b:t"]);
        let b = CacheKey::new(false, Some("demo.FooTest"), ["//b:t", "//a:t"]);
        assert_eq!(a, b);
        assert_ne!(a, CacheKey::new(true, Some("demo.FooTest"), ["//a:t", "//b:t"]));
        assert_ne!(a, CacheKey::new(false, None, ["//a:t", "//b:t"]));
    }

    #[test]
    fn hits_within_ttl_return_the_same_value() {
        let cache = ParamFileCache::new(Duration::from_secs(60));
        let key = CacheKey::new(false, None, ["//a:t"]);
        let stored = cache.insert(key, result("a.params"));
        let hit = cache.get(&key).unwrap();
        assert!(Arc::ptr_eq(&stored, &hit));
    }

    #[test]
    fn whole_generation_expires_after_ttl() {
        let cache = ParamFileCache::new(Duration::from_secs(60));
        let start = Instant::now();
        let key = CacheKey::new(false, None, ["//a:t"]);
        cache.insert_at(key, result("a.params"), start);

        assert!(cache.get_at(&key, start + Duration::from_secs(30)).is_some());
        assert!(cache.get_at(&key, start + Duration::from_secs(61)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn flush_drops_everything() {
        let cache = ParamFileCache::default();
        let key = CacheKey::new(true, Some("demo.FooTest"), ["//a:t"]);
        cache.insert(key, result("a.params"));
        cache.flush();
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn compute_runs_only_on_miss() {
        let cache = ParamFileCache::default();
        let key = CacheKey::new(false, None, ["//a:t"]);
        let mut calls = 0;
        for _ in 0..3 {
            cache
                .get_or_try_insert_with::<()>(key, || {
                    calls += 1;
                    Ok(result("a.params"))
                })
                .unwrap();
        }
        assert_eq!(calls, 1);
    }
}
