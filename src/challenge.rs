//! Human-verification challenges.
//!
//! Issues short-lived arithmetic puzzles to high-risk callers and validates
//! the answers. A challenge is bound to the identifier it was issued to and
//! destroyed on first successful validation. Repeated validation failures
//! feed a counter the caller's policy can use to force a challenge on
//! subsequent requests.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditKind, AuditSink};
use crate::config::CaptchaConfig;
use crate::error::{GatekeeperError, Result};
use crate::store::{challenge_failures_key, challenge_key, CounterStore};
use crate::types::now_ms;

const FAILURE_TTL: Duration = Duration::from_secs(3600);
/// Recent failures at which a challenge becomes mandatory.
const REQUIRED_FAILURE_COUNT: u64 = 3;

const REASON_NOT_FOUND: &str = "Challenge not found or expired";
const REASON_INVALID: &str = "Invalid challenge";
const REASON_WRONG_ANSWER: &str = "Incorrect answer";

/// A freshly issued challenge, returned to the caller for presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    /// Opaque challenge token
    pub id: String,
    pub question: String,
    pub answer: String,
    /// Epoch milliseconds
    pub expires_at: i64,
}

/// The server-side challenge record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChallenge {
    answer: String,
    identifier: String,
    created_at: i64,
}

/// Result of a validation attempt. Never an error: expiry, identifier
/// mismatch, and wrong answers are all ordinary outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeOutcome {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ChallengeOutcome {
    fn valid() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn invalid(reason: &str) -> Self {
        Self {
            valid: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// Issues and validates human-verification challenges.
pub struct ChallengeService {
    store: Arc<dyn CounterStore>,
    audit: Arc<dyn AuditSink>,
    config: CaptchaConfig,
}

impl ChallengeService {
    pub fn new(
        store: Arc<dyn CounterStore>,
        audit: Arc<dyn AuditSink>,
        config: CaptchaConfig,
    ) -> Self {
        Self {
            store,
            audit,
            config,
        }
    }

    /// Mint a new challenge for `identifier`. Returns `None` when the
    /// feature is disabled.
    pub async fn generate_challenge(&self, identifier: &str) -> Result<Option<Challenge>> {
        if !self.config.enabled {
            return Ok(None);
        }

        // Subtraction is ordered so the result is never negative.
        let (question, answer) = {
            let mut rng = rand::thread_rng();
            let a: i32 = rng.gen_range(1..=10);
            let b: i32 = rng.gen_range(1..=10);
            if rng.gen_bool(0.5) {
                (format!("What is {} + {}?", a, b), (a + b).to_string())
            } else {
                let (hi, lo) = (a.max(b), a.min(b));
                (format!("What is {} - {}?", hi, lo), (hi - lo).to_string())
            }
        };

        let id = Uuid::new_v4().simple().to_string();
        let ttl = Duration::from_secs(self.config.ttl_secs);
        let record = StoredChallenge {
            answer: answer.clone(),
            identifier: identifier.to_string(),
            created_at: now_ms(),
        };
        let payload =
            serde_json::to_string(&record).map_err(|e| GatekeeperError::Store(e.to_string()))?;
        self.store
            .set_with_ttl(&challenge_key(&id), &payload, ttl)
            .await?;

        debug!(identifier = %identifier, challenge_id = %id, "Challenge issued");
        self.audit
            .record(AuditEvent::new(
                AuditKind::ChallengeIssued,
                identifier,
                "",
                "",
                json!({"challenge_id": id}),
            ))
            .await;

        Ok(Some(Challenge {
            id,
            question,
            answer,
            expires_at: now_ms() + (self.config.ttl_secs as i64) * 1000,
        }))
    }

    /// Validate an answer against a previously issued challenge.
    ///
    /// Infrastructure failures fail open (valid), consistent with every
    /// other engine boundary.
    pub async fn validate_challenge(
        &self,
        challenge_id: &str,
        answer: &str,
        identifier: &str,
    ) -> ChallengeOutcome {
        match self.validate_inner(challenge_id, answer, identifier).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    error = %e,
                    challenge_id = %challenge_id,
                    "Challenge validation failed; failing open"
                );
                ChallengeOutcome::valid()
            }
        }
    }

    async fn validate_inner(
        &self,
        challenge_id: &str,
        answer: &str,
        identifier: &str,
    ) -> Result<ChallengeOutcome> {
        let key = challenge_key(challenge_id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(ChallengeOutcome::invalid(REASON_NOT_FOUND));
        };

        let record = match serde_json::from_str::<StoredChallenge>(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(key = %key, error = %e, "Malformed challenge record; deleting");
                self.store.delete(&key).await?;
                return Ok(ChallengeOutcome::invalid(REASON_NOT_FOUND));
            }
        };

        // A token replayed under a different identity is rejected without
        // leaking whether the answer was right.
        if record.identifier != identifier {
            self.emit_failed(identifier, challenge_id, "identifier_mismatch")
                .await;
            return Ok(ChallengeOutcome::invalid(REASON_INVALID));
        }

        if record.answer.trim().eq_ignore_ascii_case(answer.trim()) {
            // Single use: destroy on first success.
            self.store.delete(&key).await?;
            self.audit
                .record(AuditEvent::new(
                    AuditKind::ChallengeSolved,
                    identifier,
                    "",
                    "",
                    json!({"challenge_id": challenge_id}),
                ))
                .await;
            return Ok(ChallengeOutcome::valid());
        }

        // Wrong answer: the record stays (bounded by its own TTL) and the
        // failure counter feeds the forced-challenge policy.
        self.store
            .incr_with_ttl(&challenge_failures_key(identifier), FAILURE_TTL)
            .await?;
        self.emit_failed(identifier, challenge_id, "wrong_answer").await;
        Ok(ChallengeOutcome::invalid(REASON_WRONG_ANSWER))
    }

    /// Whether policy should force a challenge for `identifier` based on
    /// recent validation failures. Fails open to `false`.
    pub async fn is_challenge_required(&self, identifier: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        let key = challenge_failures_key(identifier);
        match self.store.get(&key).await {
            Ok(Some(raw)) => raw
                .parse::<u64>()
                .map(|count| count >= REQUIRED_FAILURE_COUNT)
                .unwrap_or(false),
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, identifier = %identifier, "Failure counter unavailable");
                false
            }
        }
    }

    async fn emit_failed(&self, identifier: &str, challenge_id: &str, cause: &str) {
        self.audit
            .record(AuditEvent::new(
                AuditKind::ChallengeFailed,
                identifier,
                "",
                "",
                json!({"challenge_id": challenge_id, "cause": cause}),
            ))
            .await;
    }
}
