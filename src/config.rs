//! Configuration management for Gatekeeper.

use serde::{Deserialize, Serialize};

/// Main configuration for the Gatekeeper engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Global enable flag. When false, every check allows unconditionally.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Bot detection configuration
    #[serde(default)]
    pub bot_detection: BotDetectionConfig,

    /// Challenge (captcha) configuration
    #[serde(default)]
    pub captcha: CaptchaConfig,

    /// Progressive lockout configuration
    #[serde(default)]
    pub lockout: LockoutConfig,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            rate_limiting: RateLimitingConfig::default(),
            bot_detection: BotDetectionConfig::default(),
            captcha: CaptchaConfig::default(),
            lockout: LockoutConfig::default(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Rule cache refresh interval in seconds
    #[serde(default = "default_rule_refresh_interval")]
    pub rule_refresh_interval_secs: u64,

    /// Fraction of the quota at which a captcha becomes required
    #[serde(default = "default_captcha_threshold")]
    pub captcha_threshold: f64,

    /// Default per-minute ceiling for GET requests without a stored rule
    #[serde(default = "default_get_per_minute")]
    pub default_get_per_minute: u32,

    /// Default per-minute ceiling for POST requests without a stored rule
    #[serde(default = "default_post_per_minute")]
    pub default_post_per_minute: u32,

    /// Default per-minute ceiling for DELETE requests without a stored rule
    #[serde(default = "default_delete_per_minute")]
    pub default_delete_per_minute: u32,

    /// Global per-minute ceiling for requests no other rule covers.
    /// 0 disables the ceiling, leaving such requests ungoverned.
    #[serde(default)]
    pub global_per_minute: u32,

    /// Global per-hour ceiling for requests no other rule covers. Applied
    /// only when the per-minute ceiling is off. 0 disables it.
    #[serde(default)]
    pub global_per_hour: u32,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            rule_refresh_interval_secs: default_rule_refresh_interval(),
            captcha_threshold: default_captcha_threshold(),
            default_get_per_minute: default_get_per_minute(),
            default_post_per_minute: default_post_per_minute(),
            default_delete_per_minute: default_delete_per_minute(),
            global_per_minute: 0,
            global_per_hour: 0,
        }
    }
}

fn default_rule_refresh_interval() -> u64 {
    60
}

fn default_captcha_threshold() -> f64 {
    0.8
}

fn default_get_per_minute() -> u32 {
    100
}

fn default_post_per_minute() -> u32 {
    50
}

fn default_delete_per_minute() -> u32 {
    10
}

/// Bot detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotDetectionConfig {
    /// Whether bot detection runs at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Aggregate score at which a request is classified as a bot
    #[serde(default = "default_bot_threshold")]
    pub bot_threshold: u8,

    /// Aggregate score at which a request is denied outright
    #[serde(default = "default_block_threshold")]
    pub block_threshold: u8,
}

impl Default for BotDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            bot_threshold: default_bot_threshold(),
            block_threshold: default_block_threshold(),
        }
    }
}

fn default_bot_threshold() -> u8 {
    75
}

fn default_block_threshold() -> u8 {
    90
}

/// Challenge (captcha) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaConfig {
    /// Whether challenges are issued at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Challenge lifetime in seconds
    #[serde(default = "default_captcha_ttl")]
    pub ttl_secs: u64,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            ttl_secs: default_captcha_ttl(),
        }
    }
}

fn default_captcha_ttl() -> u64 {
    300
}

/// Progressive lockout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutConfig {
    /// Whether block durations escalate for repeat offenders
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Escalation multiplier applied per lockout level
    #[serde(default = "default_lockout_multiplier")]
    pub multiplier: u32,

    /// Ceiling on any single block duration, in seconds
    #[serde(default = "default_max_lockout_secs")]
    pub max_duration_secs: u64,

    /// Idle span after which the lockout level resets, in seconds
    #[serde(default = "default_lockout_reset_secs")]
    pub reset_after_secs: u64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            multiplier: default_lockout_multiplier(),
            max_duration_secs: default_max_lockout_secs(),
            reset_after_secs: default_lockout_reset_secs(),
        }
    }
}

fn default_lockout_multiplier() -> u32 {
    2
}

fn default_max_lockout_secs() -> u64 {
    7 * 24 * 3600
}

fn default_lockout_reset_secs() -> u64 {
    24 * 3600
}

impl GatekeeperConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: GatekeeperConfig = serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::GatekeeperError::Config(e.to_string()))?;
        Ok(config)
    }
}
