//! Core rate limit engine.
//!
//! Orchestrates the per-request governance decision: rule resolution,
//! allowlists, active blocks, fixed-window attempt counting, captcha
//! flagging, and progressive lockout. All state lives in the shared counter
//! store; the engine itself takes no lock across concurrent checks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, trace, warn};

use crate::audit::{AuditEvent, AuditKind, AuditSink};
use crate::config::GatekeeperConfig;
use crate::error::Result;
use crate::rules::{RateLimitRule, RuleCache, RuleStore};
use crate::store::{attempts_key, block_key, CounterStore};
use crate::types::{now_ms, RateLimitResult, RequestContext};

use super::lockout::ProgressiveLockout;

/// An active block on an identifier. Stored under `ratelimit:block:{id}`
/// with a TTL matching the block duration; `blocked_until` is authoritative
/// when store TTL resolution is coarse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRecord {
    /// When the block expires, epoch milliseconds
    pub blocked_until: i64,
    /// Why the block was imposed
    pub reason: String,
    /// The endpoint whose quota was exhausted
    pub endpoint: String,
    /// The method whose quota was exhausted
    pub method: String,
}

/// The rate limit engine.
///
/// Cheap to share behind an `Arc`; every public operation is safe to call
/// concurrently and from a cold start.
pub struct RateLimitEngine {
    store: Arc<dyn CounterStore>,
    rules: RuleCache,
    lockout: ProgressiveLockout,
    audit: Arc<dyn AuditSink>,
    config: GatekeeperConfig,
}

impl RateLimitEngine {
    pub fn new(
        store: Arc<dyn CounterStore>,
        rule_store: Arc<dyn RuleStore>,
        audit: Arc<dyn AuditSink>,
        config: GatekeeperConfig,
    ) -> Self {
        Self {
            rules: RuleCache::new(rule_store, &config.rate_limiting),
            lockout: ProgressiveLockout::new(Arc::clone(&store), config.lockout.clone()),
            store,
            audit,
            config,
        }
    }

    /// Decide whether a request may proceed.
    ///
    /// Counts attempts in a fixed window that resets wholesale when its TTL
    /// expires; up to twice the quota can cross a window boundary, which is
    /// accepted. Any infrastructure failure converts to an unconditional
    /// allow: availability of the protected API wins over strict
    /// enforcement.
    pub async fn check_rate_limit(&self, ctx: &RequestContext) -> RateLimitResult {
        if !self.config.enabled {
            return RateLimitResult::allow_unlimited();
        }

        match self.check_inner(ctx).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    error = %e,
                    identifier = %ctx.identifier,
                    endpoint = %ctx.endpoint,
                    "Rate limit check failed; failing open"
                );
                RateLimitResult::allow_unlimited()
            }
        }
    }

    async fn check_inner(&self, ctx: &RequestContext) -> Result<RateLimitResult> {
        trace!(
            identifier = %ctx.identifier,
            endpoint = %ctx.endpoint,
            method = %ctx.method,
            "Checking rate limit"
        );

        let rule = self.rules.resolve(&ctx.endpoint, &ctx.method).await;

        if let Some(ref rule) = rule {
            if rule.is_skipped(&ctx.identifier, ctx.identifier_kind) {
                self.emit(AuditKind::Skipped, ctx, json!({})).await;
                return Ok(RateLimitResult::allow_unlimited());
            }
        }

        // An unexpired block always takes precedence over fresh evaluation.
        if let Some(denied) = self.check_existing_block(ctx).await? {
            return Ok(denied);
        }

        let Some(rule) = rule else {
            self.emit(AuditKind::NoRule, ctx, json!({})).await;
            return Ok(RateLimitResult::allow_unlimited());
        };

        let key = attempts_key(&ctx.identifier, &ctx.endpoint);
        let count = self.read_count(&key).await?;

        if count >= u64::from(rule.max_attempts) {
            return self.impose_block(ctx, &rule, count).await;
        }

        // Flag the captcha before counting this attempt, so the caller can
        // gate the next request once the window nears exhaustion.
        let requires_captcha = self.config.captcha.enabled
            && rule.max_attempts > 0
            && (count as f64 / f64::from(rule.max_attempts))
                >= self.config.rate_limiting.captcha_threshold;

        self.store.incr_with_ttl(&key, rule.window()).await?;

        let remaining = rule.max_attempts - count as u32 - 1;
        let reset_at = (now_ms() + rule.window_ms as i64) / 1000;

        self.emit(
            AuditKind::Allowed,
            ctx,
            json!({"count": count + 1, "limit": rule.max_attempts, "requires_captcha": requires_captcha}),
        )
        .await;

        Ok(RateLimitResult {
            allowed: true,
            limit: rule.max_attempts,
            remaining,
            reset_at,
            retry_after_secs: None,
            blocked: false,
            blocked_until: None,
            requires_captcha,
            reason: None,
        })
    }

    /// Deny if an unexpired [`BlockRecord`] exists; clean up an expired or
    /// malformed one and continue.
    async fn check_existing_block(&self, ctx: &RequestContext) -> Result<Option<RateLimitResult>> {
        let key = block_key(&ctx.identifier);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };

        let record = match serde_json::from_str::<BlockRecord>(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(key = %key, error = %e, "Malformed block record; deleting");
                self.store.delete(&key).await?;
                return Ok(None);
            }
        };

        let now = now_ms();
        if record.blocked_until <= now {
            debug!(identifier = %ctx.identifier, "Block expired; removing");
            self.store.delete(&key).await?;
            return Ok(None);
        }

        let retry_after_secs = ((record.blocked_until - now) as u64).div_ceil(1000);
        self.emit(
            AuditKind::Denied,
            ctx,
            json!({"blocked_until": record.blocked_until, "reason": record.reason}),
        )
        .await;

        Ok(Some(RateLimitResult::denied_blocked(
            record.blocked_until / 1000,
            retry_after_secs,
            record.reason,
        )))
    }

    /// Write a new block with the escalated duration and bump the lockout
    /// level. Two requests crossing the threshold concurrently may both
    /// write; the writes converge on the same outcome.
    async fn impose_block(
        &self,
        ctx: &RequestContext,
        rule: &RateLimitRule,
        count: u64,
    ) -> Result<RateLimitResult> {
        let duration = self
            .lockout
            .escalated_duration(&ctx.identifier, rule.block_duration())
            .await?;
        let blocked_until = now_ms() + duration.as_millis() as i64;
        let reason = format!(
            "Rate limit exceeded for {} {}",
            ctx.method, ctx.endpoint
        );

        let record = BlockRecord {
            blocked_until,
            reason: reason.clone(),
            endpoint: ctx.endpoint.clone(),
            method: ctx.method.clone(),
        };
        let payload = serde_json::to_string(&record)
            .map_err(|e| crate::error::GatekeeperError::Store(e.to_string()))?;
        self.store
            .set_with_ttl(&block_key(&ctx.identifier), &payload, duration)
            .await?;
        self.lockout.register_block(&ctx.identifier).await?;

        debug!(
            identifier = %ctx.identifier,
            endpoint = %ctx.endpoint,
            duration_secs = duration.as_secs(),
            "Block imposed"
        );
        self.emit(
            AuditKind::Blocked,
            ctx,
            json!({"count": count, "limit": rule.max_attempts, "duration_secs": duration.as_secs()}),
        )
        .await;

        Ok(RateLimitResult::denied_blocked(
            blocked_until / 1000,
            duration.as_secs(),
            reason,
        ))
    }

    /// Current attempt count. A non-numeric payload is never trusted: it is
    /// logged, deleted, and treated as zero.
    async fn read_count(&self, key: &str) -> Result<u64> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(0);
        };
        match raw.parse::<u64>() {
            Ok(count) => Ok(count),
            Err(_) => {
                warn!(key = %key, value = %raw, "Malformed attempt counter; deleting");
                self.store.delete(key).await?;
                Ok(0)
            }
        }
    }

    async fn emit(&self, kind: AuditKind, ctx: &RequestContext, detail: serde_json::Value) {
        self.audit
            .record(AuditEvent::new(
                kind,
                &ctx.identifier,
                &ctx.endpoint,
                &ctx.method,
                detail,
            ))
            .await;
    }
}
