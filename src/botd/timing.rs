//! Timing signal analyzer.
//!
//! Keeps a short rolling history of request timestamps per identifier in the
//! counter store and scores inter-arrival regularity, speed, and bursts.
//! Humans are noisy; automation is metronomic.

use std::time::Duration;

use serde_json::json;
use tracing::warn;

use crate::error::Result;
use crate::store::{timing_key, CounterStore};
use crate::types::{now_ms, SignalKind, SignalScore};

const MAX_SAMPLES: usize = 20;
const MIN_SAMPLES: usize = 3;
const HISTORY_TTL: Duration = Duration::from_secs(600);

/// Variance below this (ms²) with a sub-5s mean interval reads as machine
/// regularity.
const REGULARITY_VARIANCE_MS2: f64 = 100.0;
const REGULARITY_MAX_MEAN_MS: f64 = 5000.0;
const SCORE_TOO_REGULAR: u32 = 70;

const FAST_MEAN_MS: f64 = 500.0;
const SCORE_TOO_FAST: u32 = 60;

const BURST_WINDOW: usize = 10;
const BURST_SPAN_MS: i64 = 10_000;
const SCORE_BURST: u32 = 50;

/// Record the current request and score the identifier's timing history.
pub async fn analyze(store: &dyn CounterStore, identifier: &str) -> Result<SignalScore> {
    let key = timing_key(identifier);
    let mut samples: Vec<i64> = match store.get(&key).await? {
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(key = %key, error = %e, "Malformed timing history; deleting");
                store.delete(&key).await?;
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    samples.push(now_ms());
    if samples.len() > MAX_SAMPLES {
        let excess = samples.len() - MAX_SAMPLES;
        samples.drain(..excess);
    }

    let payload = serde_json::to_string(&samples)
        .map_err(|e| crate::error::GatekeeperError::Store(e.to_string()))?;
    store.set_with_ttl(&key, &payload, HISTORY_TTL).await?;

    let (score, details) = score_samples(&samples);
    Ok(SignalScore {
        kind: SignalKind::Timing,
        score,
        details,
    })
}

/// Score a timestamp history (epoch ms, ascending). Pure.
pub(crate) fn score_samples(samples: &[i64]) -> (u8, serde_json::Value) {
    if samples.len() < MIN_SAMPLES {
        return (0, json!({"samples": samples.len()}));
    }

    let intervals: Vec<f64> = samples
        .windows(2)
        .map(|pair| (pair[1] - pair[0]) as f64)
        .collect();
    let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
    let variance = intervals
        .iter()
        .map(|interval| (interval - mean).powi(2))
        .sum::<f64>()
        / intervals.len() as f64;

    let mut score: u32 = 0;
    let mut signals = Vec::new();

    if variance < REGULARITY_VARIANCE_MS2 && mean < REGULARITY_MAX_MEAN_MS {
        score += SCORE_TOO_REGULAR;
        signals.push("too_regular");
    }
    if mean < FAST_MEAN_MS {
        score += SCORE_TOO_FAST;
        signals.push("too_fast");
    }
    if samples.len() >= BURST_WINDOW {
        let span = samples[samples.len() - 1] - samples[samples.len() - BURST_WINDOW];
        if span < BURST_SPAN_MS {
            score += SCORE_BURST;
            signals.push("burst");
        }
    }

    let details = json!({
        "samples": samples.len(),
        "mean_interval_ms": mean,
        "variance_ms2": variance,
        "signals": signals,
    });
    (score.min(100) as u8, details)
}
