//! Content-addressed cache of evaluated plugin values.
//!
//! Entries are keyed by [`ContentFingerprint`] and never evicted. The cache
//! also hands out per-key [`KeyGuard`]s so that concurrent loaders of the
//! same content prepare and evaluate it at most once.

use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex, PoisonError};

use tracing::trace;

use crate::engine::PluginValue;
use crate::fingerprint::ContentFingerprint;

/// Thread-safe map from content fingerprint to plugin value.
#[derive(Debug, Default)]
pub struct PluginCache {
    entries: Mutex<HashMap<ContentFingerprint, PluginValue>>,
    in_flight: Mutex<HashSet<ContentFingerprint>>,
    released: Condvar,
}

impl PluginCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a value.
    #[must_use]
    pub fn get(&self, key: &ContentFingerprint) -> Option<PluginValue> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Store a value, replacing any previous entry for `key`.
    pub fn set(&self, key: ContentFingerprint, value: PluginValue) {
        trace!(fingerprint = %key, "caching plugin value");
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
    }

    /// Whether a value is stored for `key`.
    #[must_use]
    pub fn contains(&self, key: &ContentFingerprint) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Number of cached values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim the right to produce the value for `key`.
    ///
    /// Blocks while another caller holds the guard for the same key. The
    /// claim is released when the guard is dropped, whether or not a value
    /// was stored.
    pub fn lock_key(&self, key: ContentFingerprint) -> KeyGuard<'_> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        while in_flight.contains(&key) {
            trace!(fingerprint = %key, "waiting for in-flight load");
            in_flight = self
                .released
                .wait(in_flight)
                .unwrap_or_else(PoisonError::into_inner);
        }
        in_flight.insert(key);
        KeyGuard { cache: self, key }
    }
}

/// Exclusive claim on one fingerprint, released on drop.
#[derive(Debug)]
#[must_use = "the key is released as soon as the guard is dropped"]
pub struct KeyGuard<'a> {
    cache: &'a PluginCache,
    key: ContentFingerprint,
}

impl KeyGuard<'_> {
    /// The claimed fingerprint.
    #[must_use]
    pub fn key(&self) -> &ContentFingerprint {
        &self.key
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.cache
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
        self.cache.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::engine::{Method, PluginObject};
    use crate::error::PluginResult;
    use crate::fingerprint::hash_arguments;

    #[derive(Debug)]
    struct Unit;

    impl PluginObject for Unit {
        fn type_name(&self) -> &str {
            "Unit"
        }

        fn methods(&self) -> Vec<Method> {
            Vec::new()
        }

        fn invoke(
            &self,
            _method: &str,
            _args: Vec<serde_json::Value>,
        ) -> PluginResult<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    #[test]
    fn test_get_set() {
        let cache = PluginCache::new();
        let key = hash_arguments(["a"]);
        assert!(cache.is_empty());
        assert!(cache.get(&key).is_none());

        let value: PluginValue = Arc::new(Unit);
        cache.set(key, Arc::clone(&value));

        assert!(cache.contains(&key));
        assert_eq!(cache.len(), 1);
        let hit = cache.get(&key).unwrap();
        assert!(Arc::ptr_eq(&hit, &value));
    }

    #[test]
    fn test_set_replaces() {
        let cache = PluginCache::new();
        let key = hash_arguments(["a"]);
        cache.set(key, Arc::new(Unit));
        let second: PluginValue = Arc::new(Unit);
        cache.set(key, Arc::clone(&second));

        assert_eq!(cache.len(), 1);
        assert!(Arc::ptr_eq(&cache.get(&key).unwrap(), &second));
    }

    #[test]
    fn test_lock_key_excludes_same_key() {
        let cache = PluginCache::new();
        let key = hash_arguments(["a"]);
        let first_released = AtomicBool::new(false);

        std::thread::scope(|s| {
            let guard = cache.lock_key(key);
            let waiter = s.spawn(|| {
                let _guard = cache.lock_key(key);
                first_released.load(Ordering::SeqCst)
            });

            std::thread::sleep(Duration::from_millis(50));
            first_released.store(true, Ordering::SeqCst);
            drop(guard);

            assert!(waiter.join().unwrap());
        });
    }

    #[test]
    fn test_lock_key_allows_other_keys() {
        let cache = PluginCache::new();
        let _a = cache.lock_key(hash_arguments(["a"]));
        let b = cache.lock_key(hash_arguments(["b"]));
        assert_eq!(*b.key(), hash_arguments(["b"]));
    }
}
