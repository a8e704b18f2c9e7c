//! Shared counter store abstraction.
//!
//! All engine state is externalized to a low-latency key-value store so that
//! multiple service instances share a consistent view. The trait captures the
//! four primitives the engine needs; any backend offering them atomically
//! (Redis, Memcached, a counting sidecar) can sit behind it.
//!
//! ## Key patterns
//!
//! ```text
//! ratelimit:attempts:{identifier}:{endpoint}  → attempt window counter
//! ratelimit:block:{identifier}                → BlockRecord JSON
//! ratelimit:lockout:{identifier}              → LockoutState JSON
//! botd:timing:{identifier}                    → JSON array of timestamps (ms)
//! botd:pattern:{identifier}                   → JSON array of request samples
//! captcha:{challenge_id}                      → StoredChallenge JSON
//! captcha:failures:{identifier}               → failed-validation counter
//! ```

mod memory;

pub use memory::MemoryStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Trait for the shared counter store backing all engine state.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Fetch the value stored under `key`, if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key` with the given time-to-live.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically increment the counter under `key` and return the new value.
    ///
    /// An absent key is created at 1 with the given time-to-live; an existing
    /// key is incremented without disturbing its remaining lifetime, so the
    /// counter expires as a whole fixed window.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64>;
}

/// Attempt window counter key.
pub fn attempts_key(identifier: &str, endpoint: &str) -> String {
    format!("ratelimit:attempts:{}:{}", identifier, endpoint)
}

/// Active block record key.
pub fn block_key(identifier: &str) -> String {
    format!("ratelimit:block:{}", identifier)
}

/// Progressive lockout state key.
pub fn lockout_key(identifier: &str) -> String {
    format!("ratelimit:lockout:{}", identifier)
}

/// Timing analyzer history key.
pub fn timing_key(identifier: &str) -> String {
    format!("botd:timing:{}", identifier)
}

/// Pattern analyzer history key.
pub fn pattern_key(identifier: &str) -> String {
    format!("botd:pattern:{}", identifier)
}

/// Challenge record key.
pub fn challenge_key(challenge_id: &str) -> String {
    format!("captcha:{}", challenge_id)
}

/// Failed challenge validation counter key.
pub fn challenge_failures_key(identifier: &str) -> String {
    format!("captcha:failures:{}", identifier)
}
