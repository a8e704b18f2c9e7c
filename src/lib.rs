//! Gatekeeper - Adaptive Request-Governance Engine
//!
//! This crate implements a rate-limiting and automated-abuse-detection layer
//! that sits in front of an HTTP API. Per request it decides whether to
//! allow, throttle, challenge, or block the caller, fusing static
//! per-endpoint quotas, behavioral bot scoring, and escalating lockouts.
//! All state is externalized to a shared counter store so multiple service
//! instances share a consistent view; on any infrastructure failure the
//! engine fails open.

pub mod audit;
pub mod botd;
pub mod challenge;
pub mod config;
pub mod error;
pub mod limit;
pub mod rules;
pub mod store;
pub mod types;

pub use audit::{AuditEvent, AuditKind, AuditSink, LogAuditSink};
pub use botd::BotDetector;
pub use challenge::{Challenge, ChallengeOutcome, ChallengeService};
pub use config::GatekeeperConfig;
pub use error::{GatekeeperError, Result};
pub use limit::RateLimitEngine;
pub use rules::{RateLimitRule, RuleStore, StaticRuleStore};
pub use store::{CounterStore, MemoryStore};
pub use types::{BotDetectionResult, IdentifierKind, RateLimitResult, RequestContext};
