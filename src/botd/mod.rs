//! Bot detection engine.
//!
//! Four independent analyzers each produce a 0–100 score with structured
//! evidence; the engine fuses them into one bot-likelihood score by weighted
//! average over the analyzers that actually fired. All analyzers run on
//! every request so evidence accumulates even for low-risk traffic.

mod headers;
mod pattern;
mod timing;
mod user_agent;

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::audit::{AuditEvent, AuditKind, AuditSink};
use crate::config::BotDetectionConfig;
use crate::error::Result;
use crate::store::CounterStore;
use crate::types::{BotDetectionResult, RequestContext, SignalKind, SignalScore};

/// Analyzer weights used in aggregation. Renormalized over the analyzers
/// with a non-zero score, so one silent analyzer never dilutes the rest.
const WEIGHT_USER_AGENT: f64 = 0.4;
const WEIGHT_HEADERS: f64 = 0.2;
const WEIGHT_TIMING: f64 = 0.3;
const WEIGHT_PATTERN: f64 = 0.3;

/// Analyses scoring at or above this are persisted as audit events.
const AUDIT_SCORE_THRESHOLD: u8 = 50;

fn weight_of(kind: SignalKind) -> f64 {
    match kind {
        SignalKind::UserAgent => WEIGHT_USER_AGENT,
        SignalKind::Headers => WEIGHT_HEADERS,
        SignalKind::Timing => WEIGHT_TIMING,
        SignalKind::Pattern => WEIGHT_PATTERN,
    }
}

/// The bot detection engine. Stateless per call; rolling behavioral
/// histories live in the shared counter store.
pub struct BotDetector {
    store: Arc<dyn CounterStore>,
    audit: Arc<dyn AuditSink>,
    config: BotDetectionConfig,
}

impl BotDetector {
    pub fn new(
        store: Arc<dyn CounterStore>,
        audit: Arc<dyn AuditSink>,
        config: BotDetectionConfig,
    ) -> Self {
        Self {
            store,
            audit,
            config,
        }
    }

    /// Analyze one request and produce an aggregate bot verdict.
    ///
    /// A failure anywhere in the pipeline converts to the benign zero-score
    /// result, so a single analyzer bug can never block all traffic.
    pub async fn analyze_request(&self, ctx: &RequestContext) -> BotDetectionResult {
        if !self.config.enabled {
            return BotDetectionResult::benign();
        }

        match self.analyze_inner(ctx).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    error = %e,
                    identifier = %ctx.identifier,
                    "Bot analysis failed; treating as benign"
                );
                BotDetectionResult::benign()
            }
        }
    }

    async fn analyze_inner(&self, ctx: &RequestContext) -> Result<BotDetectionResult> {
        let signals = vec![
            user_agent::analyze(ctx.user_agent.as_deref()),
            headers::analyze(&ctx.headers),
            timing::analyze(self.store.as_ref(), &ctx.identifier).await?,
            pattern::analyze(
                self.store.as_ref(),
                &ctx.identifier,
                &ctx.endpoint,
                &ctx.method,
            )
            .await?,
        ];

        let score = aggregate(&signals);
        let detection_type = signals
            .iter()
            .filter(|signal| signal.score > 0)
            .map(|signal| signal.kind.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let result = BotDetectionResult {
            is_bot: score >= self.config.bot_threshold,
            score,
            detection_type,
            should_block: score >= self.config.block_threshold,
            signals,
        };

        debug!(
            identifier = %ctx.identifier,
            score = score,
            is_bot = result.is_bot,
            detection_type = %result.detection_type,
            "Bot analysis complete"
        );

        if score >= AUDIT_SCORE_THRESHOLD {
            self.audit
                .record(AuditEvent::new(
                    AuditKind::BotDetected,
                    &ctx.identifier,
                    &ctx.endpoint,
                    &ctx.method,
                    json!({
                        "score": score,
                        "is_bot": result.is_bot,
                        "should_block": result.should_block,
                        "detection_type": result.detection_type,
                    }),
                ))
                .await;
        }

        Ok(result)
    }
}

/// Weighted average over the analyzers that produced a non-zero score.
fn aggregate(signals: &[SignalScore]) -> u8 {
    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for signal in signals {
        if signal.score > 0 {
            let weight = weight_of(signal.kind);
            weighted += f64::from(signal.score) * weight;
            total_weight += weight;
        }
    }
    if total_weight == 0.0 {
        return 0;
    }
    (weighted / total_weight).round().min(100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::test_support::RecordingSink;
    use crate::store::MemoryStore;
    use crate::types::IdentifierKind;
    use std::collections::HashMap;

    fn detector() -> (BotDetector, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let detector = BotDetector::new(
            Arc::new(MemoryStore::new()),
            Arc::clone(&sink) as Arc<dyn AuditSink>,
            BotDetectionConfig::default(),
        );
        (detector, sink)
    }

    fn browser_ctx(identifier: &str) -> RequestContext {
        let headers: HashMap<String, String> = [
            "accept",
            "accept-language",
            "accept-encoding",
            "user-agent",
            "connection",
        ]
        .iter()
        .map(|name| (name.to_string(), "value".to_string()))
        .collect();
        RequestContext::new(identifier, IdentifierKind::Ip, "/home", "GET")
            .with_user_agent(
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36",
            )
            .with_headers(headers)
    }

    #[tokio::test]
    async fn test_ordinary_browser_is_benign() {
        let (detector, sink) = detector();
        let result = detector.analyze_request(&browser_ctx("1.2.3.4")).await;
        assert_eq!(result.score, 0);
        assert!(!result.is_bot);
        assert!(!result.should_block);
        assert!(result.detection_type.is_empty());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_automation_tool_is_bot() {
        let (detector, _) = detector();
        let ctx = RequestContext::new("1.2.3.4", IdentifierKind::Ip, "/home", "GET")
            .with_user_agent("curl/8.7.1");

        let result = detector.analyze_request(&ctx).await;
        // UA 95 (0.4) + bare headers 75 (0.2) → 88
        assert!(result.is_bot, "score was {}", result.score);
        assert!(result.score >= 75);
        assert!(result.detection_type.contains("user_agent"));
        assert!(result.detection_type.contains("headers"));
    }

    #[tokio::test]
    async fn test_hard_block_threshold() {
        let (detector, _) = detector();
        let mut headers = HashMap::new();
        headers.insert("x-selenium".to_string(), "1".to_string());
        headers.insert("x-bot".to_string(), "1".to_string());
        headers.insert("x-crawler".to_string(), "1".to_string());
        let ctx = RequestContext::new("1.2.3.4", IdentifierKind::Ip, "/home", "GET")
            .with_user_agent("python-requests/2.32.0")
            .with_headers(headers);

        let result = detector.analyze_request(&ctx).await;
        // UA 95 (0.4) + headers 100 (0.2) → 97
        assert!(result.should_block, "score was {}", result.score);
    }

    #[tokio::test]
    async fn test_analysis_is_deterministic_for_fixed_context() {
        let (detector, _) = detector();
        let ctx = RequestContext::new("1.2.3.4", IdentifierKind::Ip, "/home", "GET")
            .with_user_agent("curl/8.7.1");

        let first = detector.analyze_request(&ctx).await;
        let second = detector.analyze_request(&ctx).await;
        assert_eq!(first.score, second.score);
        assert_eq!(first.detection_type, second.detection_type);
    }

    #[tokio::test]
    async fn test_disabled_detector_is_benign() {
        let config = BotDetectionConfig {
            enabled: false,
            ..BotDetectionConfig::default()
        };
        let detector = BotDetector::new(
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingSink::default()),
            config,
        );
        let ctx = RequestContext::new("1.2.3.4", IdentifierKind::Ip, "/home", "GET")
            .with_user_agent("curl/8.7.1");

        let result = detector.analyze_request(&ctx).await;
        assert_eq!(result.score, 0);
        assert!(!result.is_bot);
    }

    #[tokio::test]
    async fn test_high_scores_emit_audit_events() {
        let (detector, sink) = detector();
        let ctx = RequestContext::new("1.2.3.4", IdentifierKind::Ip, "/home", "GET")
            .with_user_agent("curl/8.7.1");

        detector.analyze_request(&ctx).await;
        let kinds = sink.kinds();
        assert_eq!(kinds, vec![AuditKind::BotDetected]);
    }

    #[tokio::test]
    async fn test_store_failure_is_benign() {
        struct FailingStore;

        #[async_trait::async_trait]
        impl CounterStore for FailingStore {
            async fn get(&self, _key: &str) -> Result<Option<String>> {
                Err(crate::error::GatekeeperError::Store("down".into()))
            }
            async fn set_with_ttl(
                &self,
                _key: &str,
                _value: &str,
                _ttl: std::time::Duration,
            ) -> Result<()> {
                Err(crate::error::GatekeeperError::Store("down".into()))
            }
            async fn delete(&self, _key: &str) -> Result<()> {
                Err(crate::error::GatekeeperError::Store("down".into()))
            }
            async fn incr_with_ttl(&self, _key: &str, _ttl: std::time::Duration) -> Result<u64> {
                Err(crate::error::GatekeeperError::Store("down".into()))
            }
        }

        let detector = BotDetector::new(
            Arc::new(FailingStore),
            Arc::new(RecordingSink::default()),
            BotDetectionConfig::default(),
        );
        let ctx = RequestContext::new("1.2.3.4", IdentifierKind::Ip, "/home", "GET")
            .with_user_agent("curl/8.7.1");

        let result = detector.analyze_request(&ctx).await;
        assert_eq!(result.score, 0);
        assert!(!result.is_bot);
    }

    #[test]
    fn test_aggregate_renormalizes_weights() {
        let signals = vec![
            SignalScore {
                kind: SignalKind::UserAgent,
                score: 95,
                details: json!({}),
            },
            SignalScore {
                kind: SignalKind::Headers,
                score: 0,
                details: json!({}),
            },
            SignalScore {
                kind: SignalKind::Timing,
                score: 0,
                details: json!({}),
            },
            SignalScore {
                kind: SignalKind::Pattern,
                score: 0,
                details: json!({}),
            },
        ];
        // Only the user-agent fired, so its score carries through untouched
        assert_eq!(aggregate(&signals), 95);
    }

    #[test]
    fn test_aggregate_of_silence_is_zero() {
        let signals = vec![SignalScore {
            kind: SignalKind::Timing,
            score: 0,
            details: json!({}),
        }];
        assert_eq!(aggregate(&signals), 0);
    }
}
