//! Header signal analyzer.
//!
//! Works over the pre-sanitized, lowercase-named header subset handed in by
//! the enclosing service. Evidence accumulates additively and the final
//! score is capped.

use std::collections::HashMap;

use serde_json::json;

use crate::types::{SignalKind, SignalScore};

/// Headers only automation frameworks inject.
const AUTOMATION_HEADERS: &[&str] = &[
    "x-automation",
    "x-bot",
    "x-crawler",
    "x-scraper",
    "x-selenium",
    "x-phantom",
    "x-puppeteer",
];

/// Headers virtually every human browser sends.
const COMMON_BROWSER_HEADERS: &[&str] = &[
    "accept",
    "accept-language",
    "accept-encoding",
    "user-agent",
    "connection",
];

const SCORE_NO_HEADERS: u32 = 10;
const SCORE_PER_AUTOMATION_HEADER: u32 = 40;
const SCORE_MISSING_COMMON: u32 = 30;
const SCORE_TOO_MANY: u32 = 25;
const SCORE_TOO_FEW: u32 = 35;

const MISSING_COMMON_THRESHOLD: usize = 2;
const MAX_PLAUSIBLE_COUNT: usize = 50;
const MIN_PLAUSIBLE_COUNT: usize = 5;

/// Score a request's header set. Pure.
pub fn analyze(headers: &HashMap<String, String>) -> SignalScore {
    let mut score: u32 = 0;
    let mut evidence = Vec::new();

    if headers.is_empty() {
        score += SCORE_NO_HEADERS;
        evidence.push(json!({"no_headers": true}));
    }

    let automation: Vec<&str> = AUTOMATION_HEADERS
        .iter()
        .copied()
        .filter(|name| headers.contains_key(*name))
        .collect();
    if !automation.is_empty() {
        score += SCORE_PER_AUTOMATION_HEADER * automation.len() as u32;
        evidence.push(json!({"automation_headers": automation}));
    }

    let missing: Vec<&str> = COMMON_BROWSER_HEADERS
        .iter()
        .copied()
        .filter(|name| !headers.contains_key(*name))
        .collect();
    if missing.len() > MISSING_COMMON_THRESHOLD {
        score += SCORE_MISSING_COMMON;
        evidence.push(json!({"missing_common_headers": missing}));
    }

    if headers.len() > MAX_PLAUSIBLE_COUNT {
        score += SCORE_TOO_MANY;
        evidence.push(json!({"header_count": headers.len()}));
    } else if headers.len() < MIN_PLAUSIBLE_COUNT {
        score += SCORE_TOO_FEW;
        evidence.push(json!({"header_count": headers.len()}));
    }

    SignalScore {
        kind: SignalKind::Headers,
        score: score.min(100) as u8,
        details: json!(evidence),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_of(names: &[&str]) -> HashMap<String, String> {
        names
            .iter()
            .map(|name| (name.to_string(), "value".to_string()))
            .collect()
    }

    fn browser_headers() -> HashMap<String, String> {
        headers_of(&[
            "accept",
            "accept-language",
            "accept-encoding",
            "user-agent",
            "connection",
            "referer",
        ])
    }

    #[test]
    fn test_full_browser_header_set_scores_zero() {
        assert_eq!(analyze(&browser_headers()).score, 0);
    }

    #[test]
    fn test_empty_headers_accumulate_all_absence_evidence() {
        // no headers (10) + missing common (30) + too few (35)
        assert_eq!(analyze(&HashMap::new()).score, 75);
    }

    #[test]
    fn test_automation_header_adds_40_each() {
        let mut headers = browser_headers();
        headers.insert("x-selenium".to_string(), "1".to_string());
        assert_eq!(analyze(&headers).score, 40);

        headers.insert("x-bot".to_string(), "1".to_string());
        assert_eq!(analyze(&headers).score, 80);
    }

    #[test]
    fn test_score_is_capped_at_100() {
        let mut headers = HashMap::new();
        for name in AUTOMATION_HEADERS {
            headers.insert(name.to_string(), "1".to_string());
        }
        assert_eq!(analyze(&headers).score, 100);
    }

    #[test]
    fn test_sparse_headers() {
        // user-agent only: missing > 2 common (30) + fewer than 5 (35)
        let headers = headers_of(&["user-agent"]);
        assert_eq!(analyze(&headers).score, 65);
    }

    #[test]
    fn test_absurd_header_count() {
        let names: Vec<String> = (0..60).map(|i| format!("x-header-{}", i)).collect();
        let mut headers: HashMap<String, String> = names
            .into_iter()
            .map(|name| (name, "v".to_string()))
            .collect();
        for name in COMMON_BROWSER_HEADERS {
            headers.insert(name.to_string(), "v".to_string());
        }
        assert_eq!(analyze(&headers).score, 25);
    }
}
