//! Staleness-tracked cache backing `local_only` decisions when the broker
//! is disconnected.
//!
//! Dual timestamps: wall clock for display, monotonic for staleness, so NTP
//! steps and DST never flip freshness verdicts.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One cached value with its timestamps and threshold.
#[derive(Debug, Clone)]
pub struct CachedEntry<T> {
    pub data: T,
    /// Wall-clock capture time, for operator display.
    pub cached_at_wall: DateTime<Utc>,
    cached_at_mono: Instant,
    stale_threshold: Duration,
}

impl<T> CachedEntry<T> {
    pub fn age(&self) -> Duration {
        self.cached_at_mono.elapsed()
    }

    pub fn is_stale(&self) -> bool {
        self.age() > self.stale_threshold
    }
}

/// Key-value cache with built-in staleness detection.
pub struct StalenessCache<T> {
    entries: HashMap<String, CachedEntry<T>>,
    default_threshold: Duration,
}

impl<T> StalenessCache<T> {
    pub fn new(default_threshold_ms: u64) -> Self {
        Self {
            entries: HashMap::new(),
            default_threshold: Duration::from_millis(default_threshold_ms),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, data: T) {
        self.set_with_threshold(key, data, self.default_threshold);
    }

    pub fn set_with_threshold(&mut self, key: impl Into<String>, data: T, threshold: Duration) {
        self.entries.insert(
            key.into(),
            CachedEntry {
                data,
                cached_at_wall: Utc::now(),
                cached_at_mono: Instant::now(),
                stale_threshold: threshold,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<&CachedEntry<T>> {
        self.entries.get(key)
    }

    /// `(data, is_stale)`; a missing key reads as `(None, true)`.
    pub fn get_if_fresh(&self, key: &str) -> (Option<&T>, bool) {
        match self.entries.get(key) {
            Some(entry) => (Some(&entry.data), entry.is_stale()),
            None => (None, true),
        }
    }

    pub fn clear(&mut self, key: Option<&str>) {
        match key {
            Some(k) => {
                self.entries.remove(k);
            }
            None => self.entries.clear(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_reads_fresh() {
        let mut cache = StalenessCache::new(30_000);
        cache.set("positions", vec![1, 2, 3]);
        let (data, stale) = cache.get_if_fresh("positions");
        assert_eq!(data, Some(&vec![1, 2, 3]));
        assert!(!stale);
    }

    #[test]
    fn missing_key_reads_stale() {
        let cache: StalenessCache<()> = StalenessCache::new(30_000);
        let (data, stale) = cache.get_if_fresh("absent");
        assert!(data.is_none());
        assert!(stale);
    }

    #[test]
    fn zero_threshold_is_immediately_stale() {
        let mut cache = StalenessCache::new(30_000);
        cache.set_with_threshold("k", 1u8, Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        let (_, stale) = cache.get_if_fresh("k");
        assert!(stale);
    }

    #[test]
    fn clear_single_and_all() {
        let mut cache = StalenessCache::new(30_000);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.clear(Some("a"));
        assert!(cache.get("a").is_none());
        assert_eq!(cache.len(), 1);
        cache.clear(None);
        assert!(cache.is_empty());
    }
}
