//! Shared request and decision types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The kind of subject being governed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    /// A network address
    Ip,
    /// An authenticated subject id
    User,
}

/// Per-request context handed in by the enclosing service.
///
/// `endpoint` is expected to be a normalized path with dynamic segments
/// replaced by placeholders (e.g. `/assets/:id`); `method` an uppercase HTTP
/// verb; `headers` a pre-sanitized allow-listed subset with lowercase names.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub identifier: String,
    pub identifier_kind: IdentifierKind,
    pub endpoint: String,
    pub method: String,
    pub user_agent: Option<String>,
    pub headers: HashMap<String, String>,
}

impl RequestContext {
    pub fn new(
        identifier: impl Into<String>,
        identifier_kind: IdentifierKind,
        endpoint: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            identifier_kind,
            endpoint: endpoint.into(),
            method: method.into(),
            user_agent: None,
            headers: HashMap::new(),
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitResult {
    /// Whether the request may proceed
    pub allowed: bool,
    /// The quota applied (0 when no rule governs the request)
    pub limit: u32,
    /// Attempts left in the current window after this request
    pub remaining: u32,
    /// When the current window resets, epoch seconds
    pub reset_at: i64,
    /// Seconds until a denied caller may retry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    /// Whether the caller is under an active block
    pub blocked: bool,
    /// When an active block expires, epoch seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_until: Option<i64>,
    /// Whether a challenge must be solved before further requests
    #[serde(default)]
    pub requires_captcha: bool,
    /// Human-readable denial reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RateLimitResult {
    /// Unconditional allow with no quota attached. Used when governance is
    /// disabled, no rule matches, the identifier is allowlisted, or an
    /// infrastructure error forces a fail-open decision.
    pub fn allow_unlimited() -> Self {
        Self {
            allowed: true,
            limit: 0,
            remaining: 0,
            reset_at: 0,
            retry_after_secs: None,
            blocked: false,
            blocked_until: None,
            requires_captcha: false,
            reason: None,
        }
    }

    /// Denial due to an active block.
    pub fn denied_blocked(blocked_until: i64, retry_after_secs: u64, reason: String) -> Self {
        Self {
            allowed: false,
            limit: 0,
            remaining: 0,
            reset_at: blocked_until,
            retry_after_secs: Some(retry_after_secs),
            blocked: true,
            blocked_until: Some(blocked_until),
            requires_captcha: false,
            reason: Some(reason),
        }
    }
}

/// One analyzer's contribution to the bot score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalScore {
    pub kind: SignalKind,
    /// 0..=100
    pub score: u8,
    /// Structured evidence for this analyzer
    pub details: serde_json::Value,
}

/// The independent bot detection signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    UserAgent,
    Headers,
    Timing,
    Pattern,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::UserAgent => "user_agent",
            SignalKind::Headers => "headers",
            SignalKind::Timing => "timing",
            SignalKind::Pattern => "pattern",
        }
    }
}

/// Aggregate outcome of a bot analysis. Computed fresh per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotDetectionResult {
    /// Whether the aggregate score crossed the bot threshold
    pub is_bot: bool,
    /// Aggregate bot-likelihood score, 0..=100
    pub score: u8,
    /// Comma-joined list of analyzers that contributed a non-zero score
    pub detection_type: String,
    /// Whether the aggregate score crossed the hard-block threshold
    pub should_block: bool,
    /// Per-analyzer evidence
    pub signals: Vec<SignalScore>,
}

impl BotDetectionResult {
    /// The benign result: zero score, no signals. Returned when detection is
    /// disabled or an internal failure forces a fail-open outcome.
    pub fn benign() -> Self {
        Self {
            is_bot: false,
            score: 0,
            detection_type: String::new(),
            should_block: false,
            signals: Vec::new(),
        }
    }
}

/// Current epoch time in milliseconds.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_unlimited_shape() {
        let result = RateLimitResult::allow_unlimited();
        assert!(result.allowed);
        assert_eq!(result.limit, 0);
        assert_eq!(result.remaining, 0);
        assert!(!result.blocked);
        assert!(!result.requires_captcha);
    }

    #[test]
    fn test_denied_blocked_shape() {
        let result = RateLimitResult::denied_blocked(1_700_000_000, 900, "blocked".into());
        assert!(!result.allowed);
        assert!(result.blocked);
        assert_eq!(result.retry_after_secs, Some(900));
        assert_eq!(result.blocked_until, Some(1_700_000_000));
    }

    #[test]
    fn test_result_serializes_without_empty_options() {
        let json = serde_json::to_string(&RateLimitResult::allow_unlimited()).unwrap();
        assert!(!json.contains("retry_after_secs"));
        assert!(!json.contains("reason"));
    }
}
