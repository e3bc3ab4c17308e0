//! Client configuration parsed from environment variables.

use std::path::PathBuf;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_FROM_NUMBER: &str = "web-client";
const HOME_DIR_NAME: &str = ".vyapar";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid base URL: {0} (expected http:// or https://)")]
    InvalidBaseUrl(String),
    #[error("could not resolve a home directory; set VYAPAR_HOME")]
    NoHomeDir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub home: PathBuf,
    pub timeouts: Timeouts,
    pub from_number: String,
    pub mic_file: Option<PathBuf>,
}

impl ClientConfig {
    /// Build typed client config from environment variables.
    ///
    /// Optional:
    /// - `VYAPAR_BASE_URL`: default `http://127.0.0.1:8000`
    /// - `VYAPAR_HOME`: default `~/.vyapar`
    /// - `VYAPAR_REQUEST_TIMEOUT_SECS`: default 60
    /// - `VYAPAR_CONNECT_TIMEOUT_SECS`: default 10
    /// - `VYAPAR_FROM_NUMBER`: sender id attached to voice uploads
    /// - `VYAPAR_MIC_FILE`: audio file standing in for the microphone
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL has no http(s) scheme or no home
    /// directory can be resolved.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = normalize_base_url(
            &std::env::var("VYAPAR_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        )?;
        let home = match std::env::var_os("VYAPAR_HOME") {
            Some(raw) if !raw.is_empty() => PathBuf::from(raw),
            _ => dirs::home_dir().ok_or(ConfigError::NoHomeDir)?.join(HOME_DIR_NAME),
        };
        let timeouts = Timeouts {
            request_secs: env_parse_u64("VYAPAR_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse_u64("VYAPAR_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        let from_number = std::env::var("VYAPAR_FROM_NUMBER")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FROM_NUMBER.to_string());
        let mic_file = std::env::var_os("VYAPAR_MIC_FILE")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Ok(Self { base_url, home, timeouts, from_number, mic_file })
    }

    /// Replace the base URL, validating it the same way as `from_env`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL has no http(s) scheme.
    pub fn with_base_url(mut self, raw: &str) -> Result<Self, ConfigError> {
        self.base_url = normalize_base_url(raw)?;
        Ok(self)
    }
}

/// Trim whitespace and trailing slashes; reject anything without an http(s) scheme.
pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.to_string())
    } else {
        Err(ConfigError::InvalidBaseUrl(raw.to_string()))
    }
}

fn env_parse_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
