//! Transport configuration.
//!
//! Usually read from a TOML file; every field has a default, so an empty
//! document is a valid configuration (apart from the URL, which must be set
//! before connecting).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use termlink_core::{LinkError, LinkResult};
use termlink_guard::{SanitizerConfig, SecurityLevel, SecurityOverrides};

use crate::connection::BackoffPolicy;
use crate::registry::DEFAULT_OUTPUT_BUFFER_CHUNKS;

/// Top-level transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Remote host endpoint (`ws://` or `wss://`).
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Keepalive ping interval in seconds (0 = disabled).
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// How long `create_session` and `close_session` wait for the host.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Output chunks buffered per detached session.
    #[serde(default = "default_output_buffer_chunks")]
    pub output_buffer_chunks: usize,

    #[serde(default)]
    pub security: SecurityConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            reconnect: ReconnectConfig::default(),
            ping_interval_secs: default_ping_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            output_buffer_chunks: default_output_buffer_chunks(),
            security: SecurityConfig::default(),
        }
    }
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_output_buffer_chunks() -> usize {
    DEFAULT_OUTPUT_BUFFER_CHUNKS
}

/// `[reconnect]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Reconnect attempts before giving up; `None` retries forever.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fraction of each delay that may be shaved off at random, in `[0, 0.5]`.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_attempts() -> Option<u32> {
    Some(5)
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30000
}
fn default_jitter() -> f64 {
    0.2
}

impl ReconnectConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.base_delay_ms),
            max: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }
}

/// `[security]` section: a preset name plus any overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub level: SecurityLevel,
    #[serde(flatten)]
    pub overrides: SecurityOverrides,
}

impl SecurityConfig {
    pub fn sanitizer_config(&self) -> SanitizerConfig {
        SanitizerConfig {
            level: self.level,
            overrides: self.overrides.clone(),
            ..Default::default()
        }
    }
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> LinkResult<Self> {
        toml::from_str(content).map_err(|e| LinkError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> LinkResult<String> {
        toml::to_string_pretty(self).map_err(|e| LinkError::Config(e.to_string()))
    }

    pub fn validate(&self) -> LinkResult<()> {
        let lower = self.url.to_lowercase();
        if !(lower.starts_with("ws://") || lower.starts_with("wss://")) {
            return Err(LinkError::Config(format!(
                "unsupported URL: {:?} (expected ws:// or wss://)",
                self.url
            )));
        }
        let r = &self.reconnect;
        if r.base_delay_ms == 0 {
            return Err(LinkError::Config("reconnect.base_delay_ms must be > 0".into()));
        }
        if r.max_delay_ms < r.base_delay_ms {
            return Err(LinkError::Config(
                "reconnect.max_delay_ms must be >= reconnect.base_delay_ms".into(),
            ));
        }
        if !(0.0..=0.5).contains(&r.jitter) {
            return Err(LinkError::Config("reconnect.jitter must be within [0, 0.5]".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(LinkError::Config("request_timeout_secs must be > 0".into()));
        }
        if self.output_buffer_chunks == 0 {
            return Err(LinkError::Config("output_buffer_chunks must be > 0".into()));
        }
        Ok(())
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub(crate) fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }
}
