//! Rate limit rule configuration, caching, and resolution.
//!
//! Rules live in an external durable store and are read-through cached in
//! process with a fixed refresh interval. When no stored rule matches, a
//! small built-in default table applies.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RateLimitingConfig;
use crate::error::{GatekeeperError, Result};
use crate::types::IdentifierKind;

/// A single rate limit rule.
///
/// Immutable once loaded into the cache; the whole rule set is replaced on
/// refresh. A rule with neither `endpoint` nor `method` acts as a catch-all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Normalized endpoint pattern this rule applies to, if any
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Uppercase HTTP verb this rule applies to, if any
    #[serde(default)]
    pub method: Option<String>,
    /// Attempts allowed per window
    pub max_attempts: u32,
    /// Window duration in milliseconds
    pub window_ms: u64,
    /// Base block duration imposed once the quota is exhausted, milliseconds
    pub block_duration_ms: u64,
    /// Network addresses exempt from this rule
    #[serde(default)]
    pub skip_ips: HashSet<String>,
    /// Authenticated subject ids exempt from this rule
    #[serde(default)]
    pub skip_users: HashSet<String>,
    /// Inactive rules are ignored at cache build time
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl RateLimitRule {
    pub fn new(
        endpoint: Option<&str>,
        method: Option<&str>,
        max_attempts: u32,
        window_ms: u64,
        block_duration_ms: u64,
    ) -> Self {
        Self {
            endpoint: endpoint.map(str::to_string),
            method: method.map(str::to_string),
            max_attempts,
            window_ms,
            block_duration_ms,
            skip_ips: HashSet::new(),
            skip_users: HashSet::new(),
            active: true,
        }
    }

    /// The cache key for this rule: `"<method>:<endpoint>"` with absent
    /// parts left empty.
    pub fn cache_key(&self) -> String {
        format!(
            "{}:{}",
            self.method.as_deref().unwrap_or(""),
            self.endpoint.as_deref().unwrap_or("")
        )
    }

    /// Whether the identifier is on this rule's allowlist.
    pub fn is_skipped(&self, identifier: &str, kind: IdentifierKind) -> bool {
        match kind {
            IdentifierKind::Ip => self.skip_ips.contains(identifier),
            IdentifierKind::User => self.skip_users.contains(identifier),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_millis(self.block_duration_ms)
    }
}

/// Trait for the durable rule store.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Load the full current rule set.
    async fn load_rules(&self) -> Result<Vec<RateLimitRule>>;
}

/// A rule store over a fixed set of rules, optionally loaded from a YAML
/// file. Serves tests and file-driven deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticRuleStore {
    rules: Vec<RateLimitRule>,
}

impl StaticRuleStore {
    pub fn new(rules: Vec<RateLimitRule>) -> Self {
        Self { rules }
    }

    /// Load rules from a YAML file containing a list of rules.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: Vec<RateLimitRule> = serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Rules(format!("Failed to parse rules: {}", e)))?;
        Ok(Self::new(rules))
    }
}

#[async_trait]
impl RuleStore for StaticRuleStore {
    async fn load_rules(&self) -> Result<Vec<RateLimitRule>> {
        Ok(self.rules.clone())
    }
}

/// Built-in fallback quota table, keyed like the cache. Consulted when no
/// stored rule matches; the generic per-method ceilings come from
/// configuration.
fn default_rules(config: &RateLimitingConfig) -> HashMap<String, RateLimitRule> {
    let minute = 60_000;
    let mut table = vec![
        RateLimitRule::new(Some("/auth/signin"), Some("POST"), 5, 300_000, 900_000),
        RateLimitRule::new(Some("/auth/signup"), Some("POST"), 3, 600_000, 1_800_000),
        RateLimitRule::new(None, Some("GET"), config.default_get_per_minute, minute, minute),
        RateLimitRule::new(None, Some("POST"), config.default_post_per_minute, minute, minute),
        RateLimitRule::new(None, Some("DELETE"), config.default_delete_per_minute, minute, 900_000),
    ];
    // Optional global ceiling; without one, uncovered requests stay
    // ungoverned so the no-rule allow path applies.
    if config.global_per_minute > 0 {
        table.push(RateLimitRule::new(None, None, config.global_per_minute, minute, minute));
    } else if config.global_per_hour > 0 {
        table.push(RateLimitRule::new(None, None, config.global_per_hour, 3_600_000, 3_600_000));
    }
    table
        .into_iter()
        .map(|rule| (rule.cache_key(), rule))
        .collect()
}

struct CacheState {
    rules: HashMap<String, RateLimitRule>,
    last_refresh: Option<Instant>,
}

/// Read-through cache over a [`RuleStore`].
///
/// The cache holds the full rule set keyed by `"<method>:<endpoint>"` and is
/// refreshed when older than the configured interval. A refresh race between
/// concurrent checks is harmless: both replace the cache with equivalent
/// data. A failed refresh keeps the previous rule set.
pub struct RuleCache {
    store: Arc<dyn RuleStore>,
    state: RwLock<CacheState>,
    refresh_interval: Duration,
    defaults: HashMap<String, RateLimitRule>,
}

impl RuleCache {
    pub fn new(store: Arc<dyn RuleStore>, config: &RateLimitingConfig) -> Self {
        Self {
            store,
            state: RwLock::new(CacheState {
                rules: HashMap::new(),
                last_refresh: None,
            }),
            refresh_interval: Duration::from_secs(config.rule_refresh_interval_secs),
            defaults: default_rules(config),
        }
    }

    /// Resolve the applicable rule for an endpoint and method.
    ///
    /// Precedence: exact `"METHOD:endpoint"`, bare endpoint, bare
    /// `"METHOD:"`, then the built-in default table in the same order.
    pub async fn resolve(&self, endpoint: &str, method: &str) -> Option<RateLimitRule> {
        self.refresh_if_stale().await;

        let candidates = [
            format!("{}:{}", method, endpoint),
            format!(":{}", endpoint),
            format!("{}:", method),
            ":".to_string(),
        ];

        {
            let state = self.state.read();
            for key in &candidates {
                if let Some(rule) = state.rules.get(key) {
                    debug!(key = %key, "Resolved stored rate limit rule");
                    return Some(rule.clone());
                }
            }
        }

        for key in &candidates {
            if let Some(rule) = self.defaults.get(key) {
                debug!(key = %key, "Resolved default rate limit rule");
                return Some(rule.clone());
            }
        }

        None
    }

    /// Refresh the cached rule set if it is older than the refresh interval.
    async fn refresh_if_stale(&self) {
        let stale = {
            let state = self.state.read();
            match state.last_refresh {
                Some(at) => at.elapsed() >= self.refresh_interval,
                None => true,
            }
        };
        if !stale {
            return;
        }

        match self.store.load_rules().await {
            Ok(rules) => {
                let rules: HashMap<String, RateLimitRule> = rules
                    .into_iter()
                    .filter(|rule| rule.active)
                    .map(|rule| (rule.cache_key(), rule))
                    .collect();
                debug!(count = rules.len(), "Refreshed rate limit rule cache");
                let mut state = self.state.write();
                state.rules = rules;
                state.last_refresh = Some(Instant::now());
            }
            Err(e) => {
                // Keep serving the previous rule set.
                warn!(error = %e, "Rule refresh failed; keeping cached rules");
                let mut state = self.state.write();
                state.last_refresh = Some(Instant::now());
            }
        }
    }
}
