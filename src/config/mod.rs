use garde::Validate;
use serde::Deserialize;
use std::time::Duration;

use crate::services::orchestrator::OrchestratorConfig;
use crate::services::transport::{poll::PollPolicy, push::ReconnectPolicy};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ClientConfig {
    /// Backend API root (e.g., "http://localhost:5000/api").
    #[serde(default = "default_api_base_url")]
    #[garde(custom(http_url))]
    pub api_base_url: String,

    /// Root for the push event stream. Falls back to `api_base_url`.
    #[serde(default)]
    #[garde(custom(optional_http_url))]
    pub events_base_url: Option<String>,

    /// Session token attached as a bearer token to every request.
    #[serde(default)]
    #[garde(skip)]
    pub auth_token: Option<String>,

    /// Selfie size ceiling in MiB
    #[serde(default = "default_max_upload_mib")]
    #[garde(range(min = 1, max = 100))]
    pub max_upload_mib: u64,

    #[serde(default = "default_poll_interval_ms")]
    #[garde(range(min = 1, max = 60_000))]
    pub poll_interval_ms: u64,

    /// 22 attempts at 2 s is roughly 45 seconds of polling.
    #[serde(default = "default_max_poll_attempts")]
    #[garde(range(min = 1, max = 1_000))]
    pub max_poll_attempts: u32,

    #[serde(default = "default_true")]
    #[garde(skip)]
    pub push_enabled: bool,

    #[serde(default = "default_push_reconnect_attempts")]
    #[garde(range(max = 50))]
    pub push_reconnect_attempts: u32,

    #[serde(default = "default_push_reconnect_delay_ms")]
    #[garde(range(max = 60_000))]
    pub push_reconnect_delay_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    #[garde(range(min = 1, max = 300))]
    pub request_timeout_secs: u64,
}

fn default_api_base_url() -> String {
    "http://localhost:5000/api".to_string()
}

fn default_max_upload_mib() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_max_poll_attempts() -> u32 {
    22
}

fn default_true() -> bool {
    true
}

fn default_push_reconnect_attempts() -> u32 {
    5
}

fn default_push_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn http_url(value: &str, _ctx: &()) -> garde::Result {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(garde::Error::new("must be an http(s) URL"))
    }
}

fn optional_http_url(value: &Option<String>, ctx: &()) -> garde::Result {
    match value {
        Some(url) => http_url(url, ctx),
        None => Ok(()),
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            events_base_url: None,
            auth_token: None,
            max_upload_mib: default_max_upload_mib(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
            push_enabled: true,
            push_reconnect_attempts: default_push_reconnect_attempts(),
            push_reconnect_delay_ms: default_push_reconnect_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Base URL for the push channel, without a trailing slash.
    pub fn events_base_url(&self) -> &str {
        self.events_base_url
            .as_deref()
            .unwrap_or(&self.api_base_url)
            .trim_end_matches('/')
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_poll_attempts,
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.push_reconnect_attempts,
            delay: Duration::from_millis(self.push_reconnect_delay_ms),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            poll: self.poll_policy(),
            reconnect: self.reconnect_policy(),
            push_enabled: self.push_enabled,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}
