//! Configuration schema for Pandu.

use serde::{Deserialize, Serialize};

/// Root config for a Pandu deployment.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PanduConfig {
    #[serde(default, rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

impl PanduConfig {
    /// Start building a config programmatically with defaults applied.
    pub fn builder() -> PanduConfigBuilder {
        PanduConfigBuilder::new()
    }
}

/// Builder for assembling a `PanduConfig` in code.
#[derive(Debug, Default, Clone)]
pub struct PanduConfigBuilder {
    config: PanduConfig,
}

impl PanduConfigBuilder {
    /// Create a new builder seeded with default config values.
    pub fn new() -> Self {
        Self {
            config: PanduConfig::default(),
        }
    }

    /// Replace the conversation memory configuration.
    pub fn memory(mut self, memory: MemoryConfig) -> Self {
        self.config.memory = memory;
        self
    }

    /// Replace the rate limit configuration.
    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    /// Replace the background maintenance configuration.
    pub fn maintenance(mut self, maintenance: MaintenanceConfig) -> Self {
        self.config.maintenance = maintenance;
        self
    }

    /// Finalize and return the built `PanduConfig`.
    pub fn build(self) -> PanduConfig {
        self.config
    }
}

/// Rolling conversation memory settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryConfig {
    /// Exchanges (user + assistant turn pairs) retained per session.
    #[serde(default = "default_max_exchanges")]
    pub max_exchanges: usize,
    /// Seconds of inactivity before a session is evicted.
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
    /// Number of most recent turns rendered into the prompt context.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    /// Optional cap on stored characters per turn.
    #[serde(default)]
    pub max_turn_chars: Option<usize>,
    /// Chance that a `record` call also runs an idle purge.
    #[serde(default = "default_purge_probability")]
    pub purge_probability: f64,
    #[serde(default = "default_user_label")]
    pub user_label: String,
    #[serde(default = "default_assistant_label")]
    pub assistant_label: String,
    /// Trailing marker appended after the transcript.
    #[serde(default = "default_question_marker")]
    pub question_marker: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_exchanges: default_max_exchanges(),
            idle_ttl_secs: default_idle_ttl_secs(),
            context_window: default_context_window(),
            max_turn_chars: None,
            purge_probability: default_purge_probability(),
            user_label: default_user_label(),
            assistant_label: default_assistant_label(),
            question_marker: default_question_marker(),
        }
    }
}

fn default_max_exchanges() -> usize {
    10
}

/// Thirty minutes.
fn default_idle_ttl_secs() -> u64 {
    30 * 60
}

fn default_context_window() -> usize {
    8
}

/// Default chance of an opportunistic purge on the request path.
fn default_purge_probability() -> f64 {
    0.1
}

fn default_user_label() -> String {
    "User".to_string()
}

fn default_assistant_label() -> String {
    "Assistant".to_string()
}

fn default_question_marker() -> String {
    "Current question: ".to_string()
}

/// Admission control settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub algorithm: RateAlgorithm,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_block_secs")]
    pub block_secs: u64,
    /// Chance that an `admit` call also runs a stale purge.
    #[serde(default = "default_purge_probability")]
    pub purge_probability: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            algorithm: RateAlgorithm::default(),
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
            block_secs: default_block_secs(),
            purge_probability: default_purge_probability(),
        }
    }
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_requests() -> u32 {
    10
}

/// Five minutes.
fn default_block_secs() -> u64 {
    5 * 60
}

/// Counting strategy used by the rate guard.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateAlgorithm {
    /// Fixed window that resets once the window has elapsed. O(1) state per
    /// key; admits up to twice the limit across a window boundary.
    #[default]
    FixedWindow,
    /// Timestamp log of recent requests, counted over a trailing window.
    SlidingLog,
}

impl RateAlgorithm {
    /// Return the config spelling of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            RateAlgorithm::FixedWindow => "fixed_window",
            RateAlgorithm::SlidingLog => "sliding_log",
        }
    }
}

/// Background sweeper settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaintenanceConfig {
    /// Seconds between purge sweeps; 0 disables the sweeper.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_sweep_interval_secs() -> u64 {
    5 * 60
}
