//! Audit event interface.
//!
//! Every governance decision emits a fire-and-forget audit event. Durable
//! persistence of these events is an external collaborator's concern; the
//! engine only defines the interface and ships a tracing-backed default so
//! decisions are always observable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::types::now_ms;

/// Category of a governance decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Request allowed within quota
    Allowed,
    /// Request denied, quota exhausted
    Denied,
    /// New block imposed
    Blocked,
    /// Identifier allowlisted by the matching rule
    Skipped,
    /// No rule governs the endpoint
    NoRule,
    /// Bot analysis crossed the reporting threshold
    BotDetected,
    /// Challenge issued
    ChallengeIssued,
    /// Challenge solved
    ChallengeSolved,
    /// Challenge validation failed
    ChallengeFailed,
}

/// A single audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    /// Epoch milliseconds
    pub at: i64,
    pub kind: AuditKind,
    pub identifier: String,
    pub endpoint: String,
    pub method: String,
    /// Structured decision evidence
    pub detail: serde_json::Value,
}

impl AuditEvent {
    pub fn new(
        kind: AuditKind,
        identifier: &str,
        endpoint: &str,
        method: &str,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: now_ms(),
            kind,
            identifier: identifier.to_string(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            detail,
        }
    }
}

/// Sink for audit events.
///
/// Recording is infallible at the call site: a sink that persists events
/// externally must swallow its own failures rather than disturb the decision
/// path.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Default sink that emits each event as a structured log line.
#[derive(Debug, Default)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, event: AuditEvent) {
        info!(
            kind = ?event.kind,
            identifier = %event.identifier,
            endpoint = %event.endpoint,
            method = %event.method,
            detail = %event.detail,
            "Governance audit event"
        );
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;

    /// Sink that captures events for assertions.
    #[derive(Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<AuditEvent>>,
    }

    impl RecordingSink {
        pub fn events(&self) -> Vec<AuditEvent> {
            self.events.lock().clone()
        }

        pub fn kinds(&self) -> Vec<AuditKind> {
            self.events.lock().iter().map(|e| e.kind).collect()
        }
    }

    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn record(&self, event: AuditEvent) {
            self.events.lock().push(event);
        }
    }
}
