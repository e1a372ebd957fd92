use std::future::Future;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::error::Result;

/// TTL cache in front of quota-limited provider endpoints.
/// Only successful responses are cached; errors always go back to the caller.
pub struct ResponseCache<T> {
    ttl: Duration,
    entries: DashMap<String, (Instant, T)>,
}

impl<T: Clone> ResponseCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        let entry = self.entries.get(key)?;
        let (stored_at, value) = entry.value();
        if stored_at.elapsed() < self.ttl {
            Some(value.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, key: &str, value: T) {
        self.entries.insert(key.to_string(), (Instant::now(), value));
    }

    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(hit) = self.get(key) {
            debug!(key, "provider cache hit");
            return Ok(hit);
        }
        let value = fetch().await?;
        self.insert(key, value.clone());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn second_fetch_within_ttl_is_served_from_cache() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let v = cache
                .get_or_fetch("odds_2025_1", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1u8, 2, 3])
                })
                .await
                .unwrap();
            assert_eq!(v, vec![1, 2, 3]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache: ResponseCache<u32> = ResponseCache::new(Duration::from_secs(60));
        let first = cache
            .get_or_fetch("k", || async { Err(AppError::SourceUnavailable("down".into())) })
            .await;
        assert!(first.is_err());
        assert!(cache.get("k").is_none());

        let second = cache.get_or_fetch("k", || async { Ok(7) }).await.unwrap();
        assert_eq!(second, 7);
    }

    #[test]
    fn expired_entries_are_ignored() {
        let cache = ResponseCache::new(Duration::from_millis(0));
        cache.insert("k", 1u32);
        assert!(cache.get("k").is_none());
    }
}
