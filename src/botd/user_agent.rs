//! User-agent signal analyzer.

use serde_json::json;

use crate::types::{SignalKind, SignalScore};

/// Substrings identifying known automation tools.
const AUTOMATION_TOOLS: &[&str] = &[
    "curl",
    "wget",
    "python-requests",
    "python-urllib",
    "scrapy",
    "httpclient",
    "okhttp",
    "go-http-client",
    "java/",
    "libwww",
    "aiohttp",
    "postmanruntime",
    "bot",
    "crawler",
    "spider",
];

/// Substrings identifying headless or driven browsers.
const HEADLESS_BROWSERS: &[&str] = &[
    "headlesschrome",
    "headlessfirefox",
    "phantomjs",
    "slimerjs",
    "selenium",
    "webdriver",
    "puppeteer",
    "playwright",
];

/// Substrings every mainstream human browser agent carries at least one of.
const BROWSER_MARKERS: &[&str] = &["mozilla", "chrome", "safari", "firefox", "edge", "opera"];

const SCORE_MISSING: u8 = 30;
const SCORE_AUTOMATION: u8 = 95;
const SCORE_HEADLESS: u8 = 85;
const SCORE_TOO_SHORT: u8 = 60;
const SCORE_TOO_LONG: u8 = 40;
const SCORE_NO_BROWSER_MARKER: u8 = 50;

const MIN_PLAUSIBLE_LEN: usize = 10;
const MAX_PLAUSIBLE_LEN: usize = 1000;

/// Score a user agent string. Pure; the strongest matching heuristic wins.
pub fn analyze(user_agent: Option<&str>) -> SignalScore {
    let (score, details) = match user_agent {
        None => (SCORE_MISSING, json!({"missing": true})),
        Some(agent) => score_agent(agent),
    };
    SignalScore {
        kind: SignalKind::UserAgent,
        score,
        details,
    }
}

fn score_agent(agent: &str) -> (u8, serde_json::Value) {
    let lower = agent.to_lowercase();

    if let Some(token) = AUTOMATION_TOOLS.iter().find(|t| lower.contains(**t)) {
        return (SCORE_AUTOMATION, json!({"automation_tool": token}));
    }
    if let Some(token) = HEADLESS_BROWSERS.iter().find(|t| lower.contains(**t)) {
        return (SCORE_HEADLESS, json!({"headless_browser": token}));
    }
    if agent.len() < MIN_PLAUSIBLE_LEN {
        return (SCORE_TOO_SHORT, json!({"length": agent.len()}));
    }
    if agent.len() > MAX_PLAUSIBLE_LEN {
        return (SCORE_TOO_LONG, json!({"length": agent.len()}));
    }
    if !BROWSER_MARKERS.iter().any(|m| lower.contains(m)) {
        return (SCORE_NO_BROWSER_MARKER, json!({"no_browser_marker": true}));
    }
    (0, json!({}))
}
