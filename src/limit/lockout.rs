//! Progressive lockout for repeat offenders.
//!
//! Each time an identifier earns a new block, its lockout level rises and the
//! next block lasts `base * multiplier^level`, capped at a ceiling. Levels
//! reset after an idle span (24 hours by default). State lives in the shared
//! counter store so escalation follows the offender across instances.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LockoutConfig;
use crate::error::{GatekeeperError, Result};
use crate::store::{lockout_key, CounterStore};
use crate::types::now_ms;

/// Lockout state retention. Generous relative to the reset span so a level
/// is never lost while it could still matter.
const STATE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Persisted lockout state for one identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutState {
    /// Number of blocks imposed within the current escalation span
    pub level: u32,
    /// When the most recent block was imposed, epoch milliseconds
    pub last_lockout_at: i64,
}

/// Computes escalated block durations and tracks lockout levels.
pub struct ProgressiveLockout {
    store: Arc<dyn CounterStore>,
    config: LockoutConfig,
}

impl ProgressiveLockout {
    pub fn new(store: Arc<dyn CounterStore>, config: LockoutConfig) -> Self {
        Self { store, config }
    }

    /// The escalated duration for the next block on `identifier`.
    ///
    /// Level promotion is a separate step ([`Self::register_block`]); the
    /// read-then-write is deliberately non-atomic and may under-count by one
    /// under concurrent blocks, which is accepted.
    pub async fn escalated_duration(&self, identifier: &str, base: Duration) -> Result<Duration> {
        let ceiling = Duration::from_secs(self.config.max_duration_secs);
        if !self.config.enabled {
            return Ok(base.min(ceiling));
        }

        let level = self.current_level(identifier).await?;
        let factor = u64::from(self.config.multiplier).saturating_pow(level);
        let scaled_ms = (base.as_millis() as u64).saturating_mul(factor);
        let duration = Duration::from_millis(scaled_ms).min(ceiling);

        if level > 0 {
            debug!(
                identifier = %identifier,
                level = level,
                duration_ms = duration.as_millis() as u64,
                "Escalated block duration"
            );
        }
        Ok(duration)
    }

    /// Record that a new block was imposed, bumping the level.
    pub async fn register_block(&self, identifier: &str) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let level = self.current_level(identifier).await?;
        let state = LockoutState {
            level: level + 1,
            last_lockout_at: now_ms(),
        };
        let payload = serde_json::to_string(&state)
            .map_err(|e| GatekeeperError::Store(e.to_string()))?;
        self.store
            .set_with_ttl(&lockout_key(identifier), &payload, STATE_TTL)
            .await
    }

    /// The effective level: 0 when no state exists or the identifier has
    /// been quiet for longer than the reset span.
    async fn current_level(&self, identifier: &str) -> Result<u32> {
        let key = lockout_key(identifier);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(0);
        };

        match serde_json::from_str::<LockoutState>(&raw) {
            Ok(state) => {
                let idle_ms = now_ms() - state.last_lockout_at;
                if idle_ms > (self.config.reset_after_secs as i64).saturating_mul(1000) {
                    Ok(0)
                } else {
                    Ok(state.level)
                }
            }
            Err(e) => {
                // Never trust a malformed payload; drop it and start over.
                warn!(key = %key, error = %e, "Malformed lockout state; deleting");
                self.store.delete(&key).await?;
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn lockout(store: &Arc<MemoryStore>) -> ProgressiveLockout {
        ProgressiveLockout::new(Arc::clone(store) as Arc<dyn CounterStore>, LockoutConfig::default())
    }

    #[tokio::test]
    async fn test_first_block_uses_base_duration() {
        let store = Arc::new(MemoryStore::new());
        let lockout = lockout(&store);

        let base = Duration::from_secs(900);
        assert_eq!(
            lockout.escalated_duration("1.2.3.4", base).await.unwrap(),
            base
        );
    }

    #[tokio::test]
    async fn test_repeat_block_within_span_escalates() {
        let store = Arc::new(MemoryStore::new());
        let lockout = lockout(&store);
        let base = Duration::from_secs(900);

        lockout.register_block("1.2.3.4").await.unwrap();
        assert_eq!(
            lockout.escalated_duration("1.2.3.4", base).await.unwrap(),
            base * 2
        );

        lockout.register_block("1.2.3.4").await.unwrap();
        assert_eq!(
            lockout.escalated_duration("1.2.3.4", base).await.unwrap(),
            base * 4
        );
    }

    #[tokio::test]
    async fn test_escalation_capped_at_ceiling() {
        let store = Arc::new(MemoryStore::new());
        let config = LockoutConfig::default();
        let ceiling = Duration::from_secs(config.max_duration_secs);
        let lockout = ProgressiveLockout::new(
            Arc::clone(&store) as Arc<dyn CounterStore>,
            config,
        );

        // Force a deep level directly
        let state = LockoutState {
            level: 40,
            last_lockout_at: now_ms(),
        };
        store
            .set_with_ttl(
                &lockout_key("1.2.3.4"),
                &serde_json::to_string(&state).unwrap(),
                STATE_TTL,
            )
            .await
            .unwrap();

        let duration = lockout
            .escalated_duration("1.2.3.4", Duration::from_secs(900))
            .await
            .unwrap();
        assert_eq!(duration, ceiling);
    }

    #[tokio::test]
    async fn test_level_resets_after_idle_span() {
        let store = Arc::new(MemoryStore::new());
        let lockout = lockout(&store);
        let base = Duration::from_secs(900);

        // A lockout imposed 25 hours ago
        let state = LockoutState {
            level: 3,
            last_lockout_at: now_ms() - 25 * 3600 * 1000,
        };
        store
            .set_with_ttl(
                &lockout_key("1.2.3.4"),
                &serde_json::to_string(&state).unwrap(),
                STATE_TTL,
            )
            .await
            .unwrap();

        assert_eq!(
            lockout.escalated_duration("1.2.3.4", base).await.unwrap(),
            base
        );
    }

    #[tokio::test]
    async fn test_malformed_state_deleted_and_ignored() {
        let store = Arc::new(MemoryStore::new());
        let lockout = lockout(&store);
        store
            .set_with_ttl(&lockout_key("1.2.3.4"), "garbage", STATE_TTL)
            .await
            .unwrap();

        let base = Duration::from_secs(900);
        assert_eq!(
            lockout.escalated_duration("1.2.3.4", base).await.unwrap(),
            base
        );
        assert_eq!(store.get(&lockout_key("1.2.3.4")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disabled_lockout_never_escalates_or_writes() {
        let store = Arc::new(MemoryStore::new());
        let config = LockoutConfig {
            enabled: false,
            ..LockoutConfig::default()
        };
        let lockout =
            ProgressiveLockout::new(Arc::clone(&store) as Arc<dyn CounterStore>, config);
        let base = Duration::from_secs(900);

        lockout.register_block("1.2.3.4").await.unwrap();
        assert_eq!(
            lockout.escalated_duration("1.2.3.4", base).await.unwrap(),
            base
        );
        assert!(store.is_empty());
    }
}
