//! In-process counter store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{CounterStore, WindowCount};
use crate::error::StoreError;
use crate::ratelimit::key::CounterKey;
use crate::ratelimit::window::LimitConfig;

/// Count of units inside one window.
///
/// The window opens on the first hit and rolls over once its duration
/// has elapsed.
#[derive(Debug)]
struct WindowCounter {
    count: u64,
    window_start: Instant,
    /// Window length used by the last increment
    window: Duration,
}

impl WindowCounter {
    fn new(now: Instant, window: Duration) -> Self {
        Self {
            count: 0,
            window_start: now,
            window,
        }
    }

    /// Reset the window if it has expired.
    fn roll(&mut self, now: Instant, window: Duration) {
        self.window = window;
        if now.duration_since(self.window_start) >= window {
            self.count = 0;
            self.window_start = now;
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.window_start) >= self.window
    }

    fn reset_after(&self, now: Instant, window: Duration) -> Duration {
        let elapsed = now.duration_since(self.window_start);
        window.saturating_sub(elapsed)
    }
}

/// A counter store held in process memory.
///
/// Counters are sharded in a `DashMap`; the shard write lock taken by
/// `entry` serializes increment-and-check for a key.
#[derive(Debug, Default)]
pub struct MemoryStore {
    counters: DashMap<CounterKey, WindowCounter>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of active counters.
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    /// Clear all counters.
    pub fn clear(&self) {
        self.counters.clear();
    }

    /// Drop counters whose window has ended. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, counter| !counter.is_expired(now));
        let removed = before.saturating_sub(self.counters.len());
        if removed > 0 {
            debug!(removed = removed, "Dropped expired counters");
        }
        removed
    }

    /// Sweep expired counters every `every` until the store is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_cleanup(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                match store.upgrade() {
                    Some(store) => {
                        store.cleanup_expired();
                    }
                    None => break,
                }
            }
        })
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(
        &self,
        key: &CounterKey,
        cost: u64,
        limit: &LimitConfig,
    ) -> Result<WindowCount, StoreError> {
        let now = Instant::now();
        let mut counter = self.counters.entry(key.clone()).or_insert_with(|| {
            debug!(key = %key, limit = limit.max_count, "Creating new counter");
            WindowCounter::new(now, limit.window)
        });

        counter.roll(now, limit.window);

        let allowed = cost == 0 || counter.count.saturating_add(cost) <= limit.max_count;
        if allowed {
            counter.count += cost;
        }

        trace!(
            key = %key,
            cost = cost,
            count = counter.count,
            allowed = allowed,
            "Incremented memory counter"
        );

        Ok(WindowCount {
            count: counter.count,
            allowed,
            reset_after: counter.reset_after(now, limit.window),
        })
    }

    async fn peek(&self, key: &CounterKey, limit: &LimitConfig) -> Result<u64, StoreError> {
        let now = Instant::now();
        Ok(self
            .counters
            .get(key)
            .filter(|c| now.duration_since(c.window_start) < limit.window)
            .map(|c| c.count)
            .unwrap_or(0))
    }

    async fn reset(&self, key: &CounterKey, _limit: &LimitConfig) -> Result<(), StoreError> {
        self.counters.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LimitKind;
    use crate::ratelimit::window::TimeWindow;

    fn key(identifier: &str) -> CounterKey {
        CounterKey::new("test", LimitKind::Request, identifier)
    }

    #[tokio::test]
    async fn test_increment_within_limit() {
        let store = MemoryStore::new();
        let limit = LimitConfig::per(10, TimeWindow::Second);

        let count = store.increment(&key("u1"), 1, &limit).await.unwrap();
        assert!(count.allowed);
        assert_eq!(count.count, 1);
        assert_eq!(store.peek(&key("u1"), &limit).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_increment_exceeds_limit() {
        let store = MemoryStore::new();
        let limit = LimitConfig::per(5, TimeWindow::Second);

        for _ in 0..5 {
            assert!(store.increment(&key("u1"), 1, &limit).await.unwrap().allowed);
        }

        // The 6th request should be rejected
        let count = store.increment(&key("u1"), 1, &limit).await.unwrap();
        assert!(!count.allowed);
        assert_eq!(count.count, 5);
    }

    #[tokio::test]
    async fn test_denied_cost_is_not_recorded() {
        let store = MemoryStore::new();
        let limit = LimitConfig::per(10, TimeWindow::Minute);

        store.increment(&key("u1"), 8, &limit).await.unwrap();

        assert!(!store.increment(&key("u1"), 3, &limit).await.unwrap().allowed); // 8 + 3 = 11
        assert!(store.increment(&key("u1"), 2, &limit).await.unwrap().allowed); // 8 + 2 = 10
        assert_eq!(store.peek(&key("u1"), &limit).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_zero_cost_is_always_allowed() {
        let store = MemoryStore::new();
        let limit = LimitConfig::per(1, TimeWindow::Minute);

        store.increment(&key("u1"), 1, &limit).await.unwrap();
        let count = store.increment(&key("u1"), 0, &limit).await.unwrap();
        assert!(count.allowed);
        assert_eq!(count.count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_duration() {
        let store = MemoryStore::new();
        let limit = LimitConfig::per(2, TimeWindow::Minute);

        store.increment(&key("u1"), 2, &limit).await.unwrap();
        assert!(!store.increment(&key("u1"), 1, &limit).await.unwrap().allowed);

        tokio::time::advance(Duration::from_secs(30)).await;
        let count = store.increment(&key("u1"), 1, &limit).await.unwrap();
        assert!(!count.allowed);
        assert_eq!(count.reset_after, Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(store.peek(&key("u1"), &limit).await.unwrap(), 0);
        assert!(store.increment(&key("u1"), 1, &limit).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_identifiers_have_separate_counters() {
        let store = MemoryStore::new();
        let limit = LimitConfig::per(10, TimeWindow::Second);

        store.increment(&key("u1"), 5, &limit).await.unwrap();
        store.increment(&key("u2"), 3, &limit).await.unwrap();

        assert_eq!(store.peek(&key("u1"), &limit).await.unwrap(), 5);
        assert_eq!(store.peek(&key("u2"), &limit).await.unwrap(), 3);
        assert_eq!(store.counter_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_admit_exactly_one() {
        let store = Arc::new(MemoryStore::new());
        let limit = LimitConfig::per(5, TimeWindow::Minute);
        store.increment(&key("u1"), 4, &limit).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let limit = limit.clone();
            handles.push(tokio::spawn(async move {
                store.increment(&key("u1"), 1, &limit).await.unwrap().allowed
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn test_reset_and_clear() {
        let store = MemoryStore::new();
        let limit = LimitConfig::per(10, TimeWindow::Second);

        store.increment(&key("u1"), 1, &limit).await.unwrap();
        store.increment(&key("u2"), 1, &limit).await.unwrap();

        store.reset(&key("u1"), &limit).await.unwrap();
        assert_eq!(store.counter_count(), 1);

        store.clear();
        assert_eq!(store.counter_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_drops_only_expired_windows() {
        let store = MemoryStore::new();
        let short = LimitConfig::per(10, TimeWindow::Second);
        let long = LimitConfig::per(10, TimeWindow::Minute);

        store.increment(&key("idle"), 1, &short).await.unwrap();
        store.increment(&key("active"), 1, &long).await.unwrap();
        assert_eq!(store.cleanup_expired(), 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.cleanup_expired(), 1);
        assert_eq!(store.counter_count(), 1);
        assert_eq!(store.peek(&key("active"), &long).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_cleanup_sweeps_and_stops() {
        let store = Arc::new(MemoryStore::new());
        let limit = LimitConfig::per(10, TimeWindow::Second);
        let handle = store.spawn_cleanup(Duration::from_secs(5));

        store.increment(&key("u1"), 1, &limit).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.counter_count(), 0);

        drop(store);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(handle.is_finished());
    }
}
