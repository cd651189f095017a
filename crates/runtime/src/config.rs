//! Agent configuration loaded from YAML, with environment overrides.

use repeater_core::net::is_supported_proxy;
use repeater_core::Headers;
use repeater_runners::http::default_whitelist_mimes;
use repeater_runners::{HttpRunnerOptions, WsRunnerOptions};
use repeater_transport::ChannelOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const ENV_TOKEN: &str = "REPEATER_TOKEN";
pub const ENV_SERVER_URI: &str = "REPEATER_SERVER_URI";
pub const ENV_PROXY_URL: &str = "REPEATER_PROXY_URL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Config file is empty")]
    Empty,

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeaterConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub requests: RequestsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub uri: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_reconnect_delay_max_ms")]
    pub reconnect_delay_max_ms: u64,
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_deploy_timeout_ms")]
    pub deploy_timeout_ms: u64,
    #[serde(default)]
    pub proxy_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestsConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_ws_timeout_ms")]
    pub ws_timeout_ms: u64,
    /// KB; `-1` disables truncation.
    #[serde(default = "default_max_content_length")]
    pub max_content_length: i64,
    #[serde(default = "default_whitelist_mimes")]
    pub whitelist_mimes: Vec<String>,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub reuse_connection: bool,
    #[serde(default = "default_max_sockets")]
    pub max_sockets: usize,
    #[serde(default)]
    pub headers: Headers,
}

impl Default for RequestsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            ws_timeout_ms: default_ws_timeout_ms(),
            max_content_length: default_max_content_length(),
            whitelist_mimes: default_whitelist_mimes(),
            proxy_url: None,
            reuse_connection: false,
            max_sockets: default_max_sockets(),
            headers: Headers::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_reconnect_delay_ms() -> u64 {
    1_000
}
fn default_reconnect_delay_max_ms() -> u64 {
    86_400_000
}
fn default_reconnect_attempts() -> u32 {
    20
}
fn default_ping_interval_ms() -> u64 {
    10_000
}
fn default_deploy_timeout_ms() -> u64 {
    60_000
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_ws_timeout_ms() -> u64 {
    5_000
}
fn default_max_content_length() -> i64 {
    100
}
fn default_max_sockets() -> usize {
    100
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Load, override from the environment and validate a YAML config file.
///
/// # Errors
/// Returns error if the file is missing, empty, not valid YAML or fails
/// validation.
pub fn load_config(path: impl AsRef<Path>) -> Result<RepeaterConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }

    let content = std::fs::read_to_string(path)?;
    let mut config = RepeaterConfig::from_yaml(&content)?;
    config.apply_overrides(|name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
}

impl RepeaterConfig {
    /// Parse without validating.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Err(ConfigError::Empty);
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Replace file values with the ones `lookup` finds for
    /// `REPEATER_TOKEN`, `REPEATER_SERVER_URI` and `REPEATER_PROXY_URL`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(token) = set(ENV_TOKEN) {
            self.server.token = token;
        }
        if let Some(uri) = set(ENV_SERVER_URI) {
            self.server.uri = uri;
        }
        if let Some(proxy) = set(ENV_PROXY_URL) {
            self.requests.proxy_url = Some(proxy);
        }
    }

    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let uri = self.server_uri()?;
        if !matches!(uri.scheme(), "ws" | "wss" | "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "server.uri must use ws, wss, http or https, got {}",
                uri.scheme()
            )));
        }
        if self.server.token.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "server.token is required (or set {})",
                ENV_TOKEN
            )));
        }
        for (field, value) in [
            ("server.connect_timeout_ms", self.server.connect_timeout_ms),
            ("server.ping_interval_ms", self.server.ping_interval_ms),
            ("server.deploy_timeout_ms", self.server.deploy_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", field)));
            }
        }
        if self.server.reconnect_delay_ms > self.server.reconnect_delay_max_ms {
            return Err(ConfigError::Invalid(
                "server.reconnect_delay_ms must not exceed server.reconnect_delay_max_ms".into(),
            ));
        }
        if self.requests.max_content_length < -1 {
            return Err(ConfigError::Invalid(
                "requests.max_content_length must be -1 or a size in KB".into(),
            ));
        }
        if self.requests.max_sockets == 0 {
            return Err(ConfigError::Invalid("requests.max_sockets must be positive".into()));
        }
        parse_proxy("server.proxy_url", self.server.proxy_url.as_deref())?;
        parse_proxy("requests.proxy_url", self.requests.proxy_url.as_deref())?;
        Ok(())
    }

    fn server_uri(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.server.uri)
            .map_err(|e| ConfigError::Invalid(format!("server.uri {:?}: {}", self.server.uri, e)))
    }

    pub fn channel_options(&self) -> Result<ChannelOptions, ConfigError> {
        let server = &self.server;
        let mut options = ChannelOptions::new(self.server_uri()?, server.token.clone());
        options.connect_timeout = Duration::from_millis(server.connect_timeout_ms);
        options.reconnect_delay = Duration::from_millis(server.reconnect_delay_ms);
        options.reconnect_delay_max = Duration::from_millis(server.reconnect_delay_max_ms);
        options.reconnect_attempts = server.reconnect_attempts;
        options.ping_interval = Duration::from_millis(server.ping_interval_ms);
        options.deploy_timeout = Duration::from_millis(server.deploy_timeout_ms);
        options.proxy_url = parse_proxy("server.proxy_url", server.proxy_url.as_deref())?;
        Ok(options)
    }

    pub fn http_runner_options(&self) -> Result<HttpRunnerOptions, ConfigError> {
        let requests = &self.requests;
        Ok(HttpRunnerOptions {
            timeout: Duration::from_millis(requests.timeout_ms),
            max_content_length: requests.max_content_length,
            whitelist_mimes: requests.whitelist_mimes.clone(),
            proxy_url: parse_proxy("requests.proxy_url", requests.proxy_url.as_deref())?,
            reuse_connection: requests.reuse_connection,
            max_sockets: requests.max_sockets,
            headers: requests.headers.clone(),
        })
    }

    pub fn ws_runner_options(&self) -> Result<WsRunnerOptions, ConfigError> {
        let requests = &self.requests;
        Ok(WsRunnerOptions {
            timeout: Duration::from_millis(requests.ws_timeout_ms),
            proxy_url: parse_proxy("requests.proxy_url", requests.proxy_url.as_deref())?,
            headers: requests.headers.clone(),
        })
    }
}

fn parse_proxy(field: &str, value: Option<&str>) -> Result<Option<Url>, ConfigError> {
    let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    let url = Url::parse(value)
        .map_err(|e| ConfigError::Invalid(format!("{} {:?}: {}", field, value, e)))?;
    if !is_supported_proxy(&url) {
        return Err(ConfigError::Invalid(format!(
            "{} must be a socks4, socks5 or socks5h URL, got {}",
            field,
            url.scheme()
        )));
    }
    Ok(Some(url))
}
