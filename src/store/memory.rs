//! In-process counter store.
//!
//! Backs the engine in tests and single-instance deployments. Entries carry
//! an absolute expiry and are reaped lazily on access, so no background sweep
//! task is needed. Per-key atomicity comes from the map's entry API.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{GatekeeperError, Result};
use crate::types::now_ms;

use super::CounterStore;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    /// Epoch milliseconds after which the entry no longer exists.
    expires_at: i64,
}

impl Entry {
    fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

/// A `DashMap`-backed [`CounterStore`].
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries. Primarily useful for tests.
    pub fn len(&self) -> usize {
        let now = now_ms();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = now_ms();
        // The shard guard must be released before removing an expired entry.
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: now_ms() + ttl.as_millis() as i64,
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64> {
        let now = now_ms();
        let mut new_value = 0u64;
        let mut malformed = false;

        self.entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.is_expired(now) {
                    new_value = 1;
                    entry.value = "1".to_string();
                    entry.expires_at = now + ttl.as_millis() as i64;
                } else {
                    match entry.value.parse::<u64>() {
                        Ok(current) => {
                            new_value = current + 1;
                            entry.value = new_value.to_string();
                        }
                        Err(_) => malformed = true,
                    }
                }
            })
            .or_insert_with(|| {
                new_value = 1;
                Entry {
                    value: "1".to_string(),
                    expires_at: now + ttl.as_millis() as i64,
                }
            });

        if malformed {
            return Err(GatekeeperError::Store(format!(
                "non-numeric counter value at key {}",
                key
            )));
        }
        Ok(new_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("k", "v", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entry_is_gone() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("k", "v", Duration::from_millis(0))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("k", "v", Duration::from_secs(60))
            .await
            .unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);

        // Deleting an absent key is fine
        store.delete("absent").await.unwrap();
    }

    #[tokio::test]
    async fn test_incr_creates_then_increments() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        assert_eq!(store.incr_with_ttl("c", ttl).await.unwrap(), 1);
        assert_eq!(store.incr_with_ttl("c", ttl).await.unwrap(), 2);
        assert_eq!(store.incr_with_ttl("c", ttl).await.unwrap(), 3);
        assert_eq!(store.get("c").await.unwrap(), Some("3".to_string()));
    }

    #[tokio::test]
    async fn test_incr_resets_after_expiry() {
        let store = MemoryStore::new();
        store.incr_with_ttl("c", Duration::from_millis(0)).await.unwrap();
        // The window expired; the next increment starts a fresh one.
        assert_eq!(
            store.incr_with_ttl("c", Duration::from_secs(60)).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_incr_on_non_numeric_value_errors() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("c", "not-a-number", Duration::from_secs(60))
            .await
            .unwrap();
        let result = store.incr_with_ttl("c", Duration::from_secs(60)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_atomic() {
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store
                        .incr_with_ttl("c", Duration::from_secs(60))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.get("c").await.unwrap(), Some("400".to_string()));
    }
}
