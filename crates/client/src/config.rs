//! Client configuration from environment variables.

use std::time::Duration;

use railwatch_shared::channel_path;
use thiserror::Error;
use url::Url;

use crate::ws::{ReconnectConfig, TransportConfig};

pub const ENV_WS_URL: &str = "RAILWATCH_WS_URL";
pub const ENV_API_URL: &str = "RAILWATCH_API_URL";
pub const ENV_HEARTBEAT_SECS: &str = "RAILWATCH_HEARTBEAT_SECS";
pub const ENV_POLL_MS: &str = "RAILWATCH_POLL_MS";
pub const ENV_RECONNECT_BASE_MS: &str = "RAILWATCH_RECONNECT_BASE_MS";
pub const ENV_RECONNECT_MAX_ATTEMPTS: &str = "RAILWATCH_RECONNECT_MAX_ATTEMPTS";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{var} is not a valid URL: {reason}")]
    InvalidUrl { var: &'static str, reason: String },
    #[error("{var} must be a positive integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Base host of the realtime channel, `ws://` or `wss://`.
    pub ws_base_url: String,
    /// Base URL of the authoritative REST API.
    pub api_base_url: String,
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ws_base_url: "ws://localhost:8080".to_string(),
            api_base_url: "http://localhost:8080".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            poll_interval: Duration::from_millis(4000),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Parse configuration from the process environment.
    ///
    /// Environment variables:
    /// - `RAILWATCH_WS_URL`: base host of the realtime channel (required)
    /// - `RAILWATCH_API_URL`: REST base URL (default: "http://localhost:8080")
    /// - `RAILWATCH_HEARTBEAT_SECS`: heartbeat interval (default: 30)
    /// - `RAILWATCH_POLL_MS`: reconciliation poll interval (default: 4000)
    /// - `RAILWATCH_RECONNECT_BASE_MS`: first reconnect delay (default: 3000)
    /// - `RAILWATCH_RECONNECT_MAX_ATTEMPTS`: reconnect cap (default: 5)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let ws_raw = lookup(ENV_WS_URL)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(ENV_WS_URL))?;
        let ws_base_url = String::from(parse_ws_url(ws_raw.trim())?);

        let api_base_url = lookup(ENV_API_URL)
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.api_base_url);

        let heartbeat_interval = parse_number(&lookup, ENV_HEARTBEAT_SECS)?
            .map(Duration::from_secs)
            .unwrap_or(defaults.heartbeat_interval);
        let poll_interval = parse_number(&lookup, ENV_POLL_MS)?
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);
        let base_delay = parse_number(&lookup, ENV_RECONNECT_BASE_MS)?
            .map(Duration::from_millis)
            .unwrap_or(defaults.reconnect.base_delay);
        let max_attempts = match parse_number(&lookup, ENV_RECONNECT_MAX_ATTEMPTS)? {
            Some(n) => u32::try_from(n).map_err(|_| ConfigError::InvalidNumber {
                var: ENV_RECONNECT_MAX_ATTEMPTS,
                value: n.to_string(),
            })?,
            None => defaults.reconnect.max_attempts,
        };

        Ok(Self {
            ws_base_url,
            api_base_url,
            heartbeat_interval,
            poll_interval,
            reconnect: ReconnectConfig {
                max_attempts,
                base_delay,
            },
        })
    }

    /// Full channel URL for a session, e.g. `wss://host/ws/charges/alice`.
    pub fn channel_url(&self, session_key: &str) -> Result<String, ConfigError> {
        Url::parse(&self.ws_base_url)
            .and_then(|base| base.join(&channel_path(session_key)))
            .map(String::from)
            .map_err(|e| ConfigError::InvalidUrl {
                var: ENV_WS_URL,
                reason: e.to_string(),
            })
    }

    pub fn transport_config(&self, session_key: &str) -> Result<TransportConfig, ConfigError> {
        Ok(TransportConfig {
            url: self.channel_url(session_key)?,
            heartbeat_interval: self.heartbeat_interval,
            reconnect: self.reconnect.clone(),
        })
    }
}

fn parse_ws_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        var: ENV_WS_URL,
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "ws" | "wss") || url.cannot_be_a_base() {
        return Err(ConfigError::InvalidUrl {
            var: ENV_WS_URL,
            reason: format!("expected a ws:// or wss:// URL, got '{}'", raw),
        });
    }
    Ok(url)
}

fn parse_number(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(ConfigError::InvalidNumber { var, value: raw }),
        Ok(n) => Ok(Some(n)),
    }
}
