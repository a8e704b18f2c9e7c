//! Access-pattern signal analyzer.
//!
//! Tracks which endpoints an identifier touches and flags endpoint scanning,
//! tight repetition of a single operation, and probing of administrative
//! paths.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::error::Result;
use crate::store::{pattern_key, CounterStore};
use crate::types::{now_ms, SignalKind, SignalScore};

const MAX_SAMPLES: usize = 50;
const MIN_SAMPLES: usize = 5;
const HISTORY_TTL: Duration = Duration::from_secs(3600);

const SCAN_DISTINCT_ENDPOINTS: usize = 20;
const SCORE_SCANNING: u32 = 60;

const REPEAT_WINDOW: usize = 10;
const REPEAT_THRESHOLD: usize = 7;
const SCORE_REPETITION: u32 = 50;

const ADMIN_RECENT_THRESHOLD: usize = 5;
const SCORE_ADMIN_PROBING: u32 = 80;

/// Path prefixes reserved for administrative surfaces.
const ADMIN_PATH_PREFIXES: &[&str] = &["/admin", "/internal", "/wp-admin"];

/// One recorded request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RequestSample {
    pub endpoint: String,
    pub method: String,
    pub ts: i64,
}

/// Record the current request and score the identifier's access pattern.
pub async fn analyze(
    store: &dyn CounterStore,
    identifier: &str,
    endpoint: &str,
    method: &str,
) -> Result<SignalScore> {
    let key = pattern_key(identifier);
    let mut samples: Vec<RequestSample> = match store.get(&key).await? {
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(key = %key, error = %e, "Malformed pattern history; deleting");
                store.delete(&key).await?;
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    samples.push(RequestSample {
        endpoint: endpoint.to_string(),
        method: method.to_string(),
        ts: now_ms(),
    });
    if samples.len() > MAX_SAMPLES {
        let excess = samples.len() - MAX_SAMPLES;
        samples.drain(..excess);
    }

    let payload = serde_json::to_string(&samples)
        .map_err(|e| crate::error::GatekeeperError::Store(e.to_string()))?;
    store.set_with_ttl(&key, &payload, HISTORY_TTL).await?;

    let (score, details) = score_samples(&samples);
    Ok(SignalScore {
        kind: SignalKind::Pattern,
        score,
        details,
    })
}

/// Score a request history (chronological). Pure.
pub(crate) fn score_samples(samples: &[RequestSample]) -> (u8, serde_json::Value) {
    if samples.len() < MIN_SAMPLES {
        return (0, json!({"samples": samples.len()}));
    }

    let mut score: u32 = 0;
    let mut signals = Vec::new();

    let distinct: HashSet<&str> = samples.iter().map(|s| s.endpoint.as_str()).collect();
    if distinct.len() > SCAN_DISTINCT_ENDPOINTS {
        score += SCORE_SCANNING;
        signals.push("scanning");
    }

    let recent = &samples[samples.len().saturating_sub(REPEAT_WINDOW)..];
    let mut operation_counts: HashMap<(&str, &str), usize> = HashMap::new();
    for sample in recent {
        *operation_counts
            .entry((sample.method.as_str(), sample.endpoint.as_str()))
            .or_insert(0) += 1;
    }
    if operation_counts.values().any(|count| *count > REPEAT_THRESHOLD) {
        score += SCORE_REPETITION;
        signals.push("repetition");
    }

    let admin_hits = recent
        .iter()
        .filter(|sample| {
            ADMIN_PATH_PREFIXES
                .iter()
                .any(|prefix| sample.endpoint.starts_with(prefix))
        })
        .count();
    if admin_hits > ADMIN_RECENT_THRESHOLD {
        score += SCORE_ADMIN_PROBING;
        signals.push("admin_probing");
    }

    let details = json!({
        "samples": samples.len(),
        "distinct_endpoints": distinct.len(),
        "admin_hits_recent": admin_hits,
        "signals": signals,
    });
    (score.min(100) as u8, details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn sample(endpoint: &str, method: &str) -> RequestSample {
        RequestSample {
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            ts: now_ms(),
        }
    }

    #[test]
    fn test_too_few_samples_scores_zero() {
        let samples: Vec<_> = (0..4).map(|i| sample(&format!("/p/{}", i), "GET")).collect();
        assert_eq!(score_samples(&samples).0, 0);
    }

    #[test]
    fn test_endpoint_scanning() {
        let samples: Vec<_> = (0..25)
            .map(|i| sample(&format!("/api/resource/{}", i), "GET"))
            .collect();
        let (score, details) = score_samples(&samples);
        assert_eq!(score, 60);
        assert_eq!(details["distinct_endpoints"], 25);
    }

    #[test]
    fn test_tight_repetition() {
        let samples: Vec<_> = (0..10).map(|_| sample("/auth/signin", "POST")).collect();
        let (score, details) = score_samples(&samples);
        assert_eq!(score, 50);
        assert!(details["signals"]
            .as_array()
            .unwrap()
            .iter()
            .any(|s| s == "repetition"));
    }

    #[test]
    fn test_admin_probing() {
        let mut samples: Vec<_> = (0..4).map(|i| sample(&format!("/p/{}", i), "GET")).collect();
        for i in 0..6 {
            samples.push(sample(&format!("/admin/users/{}", i), "GET"));
        }
        let (score, details) = score_samples(&samples);
        assert_eq!(score, 80);
        assert_eq!(details["admin_hits_recent"], 6);
    }

    #[test]
    fn test_varied_browsing_scores_zero() {
        let pages = ["/home", "/search", "/items/:id", "/cart", "/checkout", "/home"];
        let samples: Vec<_> = pages.iter().map(|p| sample(p, "GET")).collect();
        assert_eq!(score_samples(&samples).0, 0);
    }

    #[test]
    fn test_signals_stack() {
        // 21+ distinct endpoints, then a tight repeat of an admin endpoint
        let mut samples: Vec<_> = (0..22)
            .map(|i| sample(&format!("/api/resource/{}", i), "GET"))
            .collect();
        for _ in 0..9 {
            samples.push(sample("/admin/settings", "POST"));
        }
        let (score, _) = score_samples(&samples);
        // scanning (60) + repetition (50) + admin probing (80), capped
        assert_eq!(score, 100);
    }

    #[tokio::test]
    async fn test_analyze_accumulates_and_trims() {
        let store = MemoryStore::new();
        for i in 0..(MAX_SAMPLES + 5) {
            analyze(&store, "1.2.3.4", &format!("/p/{}", i % 3), "GET")
                .await
                .unwrap();
        }
        let raw = store.get(&pattern_key("1.2.3.4")).await.unwrap().unwrap();
        let samples: Vec<RequestSample> = serde_json::from_str(&raw).unwrap();
        assert_eq!(samples.len(), MAX_SAMPLES);
    }

    #[tokio::test]
    async fn test_malformed_history_restarts() {
        let store = MemoryStore::new();
        store
            .set_with_ttl(&pattern_key("1.2.3.4"), "[1,2,", HISTORY_TTL)
            .await
            .unwrap();

        let signal = analyze(&store, "1.2.3.4", "/home", "GET").await.unwrap();
        assert_eq!(signal.score, 0);
    }
}
