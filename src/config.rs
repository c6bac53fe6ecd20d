//! Configuration parsing and validation for chatrelay.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use std::path::Path;
use std::time::Duration;

/// Convention env var consulted when `auth.api_key` is not set in the file.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Convention env var consulted when `upstream.default_model` is not set in the file.
pub const MODEL_ENV: &str = "OPENAI_MODEL";

/// Root configuration structure.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub auth: AuthConfig,
    pub errors: ErrorPolicy,
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8080")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Upstream chat-completion service.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL, `/chat/completions` is appended (e.g., "https://ai-gateway.vercel.sh/v1")
    pub base_url: String,
    /// Model used when the caller does not name one
    pub default_model: String,
    pub connect_timeout_secs: u64,
    /// Total budget for one upstream call including the streamed body
    pub stream_timeout_secs: Option<u64>,
}

fn default_base_url() -> String {
    "https://ai-gateway.vercel.sh/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn stream_timeout(&self) -> Option<Duration> {
        self.stream_timeout_secs.map(Duration::from_secs)
    }

    /// Full URL of the streaming completion endpoint.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_model: default_model(),
            connect_timeout_secs: default_connect_timeout(),
            stream_timeout_secs: None,
        }
    }
}

/// Credential configuration.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Static API key. Required for the relay to accept chat requests.
    pub api_key: Option<ApiKey>,
    /// Env var holding a per-request bearer token (e.g., "OIDC_TOKEN").
    /// When set, this token is sent upstream instead of `api_key`.
    pub token_env: Option<String>,
}

/// What the client sees when the upstream breaks mid-stream.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPolicy {
    /// Forward the upstream error text verbatim in the `error` frame.
    /// When false a fixed message is sent and the detail is only logged.
    #[serde(default = "default_true")]
    pub expose_upstream_detail: bool,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            expose_upstream_detail: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// Only accessible via `.expose_secret()` so every read is grep-auditable.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// How the API key was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Key was a literal string in config (no ${} references)
    Literal,
    /// Key contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Key was picked up from the convention env var (holds var name)
    Convention(String),
    /// No key available
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(var) => write!(f, "convention ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for '{field}': {message}")]
    EnvVar {
        var: String,
        field: String,
        message: String,
    },
}

/// Raw `[upstream]` section. `base_url` may contain `${VAR}` references.
#[derive(Deserialize, Default)]
pub struct RawUpstreamConfig {
    base_url: Option<String>,
    default_model: Option<String>,
    connect_timeout_secs: Option<u64>,
    stream_timeout_secs: Option<u64>,
}

/// Raw `[auth]` section. `api_key` may contain `${VAR}` references.
#[derive(Deserialize, Default)]
pub struct RawAuthConfig {
    api_key: Option<String>,
    token_env: Option<String>,
}

/// Raw configuration deserialized directly from TOML, before env expansion.
#[derive(Deserialize, Default)]
pub struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    upstream: RawUpstreamConfig,
    #[serde(default)]
    auth: RawAuthConfig,
    #[serde(default)]
    errors: ErrorPolicy,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string (e.g., `${SCHEME}://${HOST}/v1`).
/// Fails on first missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(input: &str, field: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            field: field.to_string(),
            message: format!("Unclosed '${{' in config value for '{}'", field),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                field: field.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            field: field.to_string(),
            message: format!("Environment variable '{}' is not set", var_name),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Load `.env.local` then `.env` from the working directory.
///
/// Variables already present in the process environment win, so the
/// first file to define a name takes precedence over the second.
pub fn load_dotenv_files() {
    for file in [".env.local", ".env"] {
        match dotenvy::from_filename(file) {
            Ok(path) => tracing::debug!(path = %path.display(), "Loaded env file"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(file = file, error = %e, "Failed to load env file"),
        }
    }
}

impl Config {
    /// Convert raw (deserialized) config to final config using `lookup` for
    /// `${VAR}` expansion and convention fallbacks.
    ///
    /// - `auth.api_key` containing `${VAR}`: expanded, source = `EnvExpanded`
    /// - literal `auth.api_key`: wrapped directly, source = `Literal`
    /// - absent: `OPENAI_API_KEY` if set, source = `Convention`, else `None`
    /// - absent `upstream.default_model`: `OPENAI_MODEL` if set, else built-in default
    pub fn from_raw_with<F>(raw: RawConfig, lookup: F) -> Result<(Self, KeySource), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (api_key, key_source) = match raw.auth.api_key {
            Some(ref raw_key) if raw_key.contains("${") => {
                let expanded = expand_env_vars_with(raw_key, "auth.api_key", &lookup)?;
                (Some(ApiKey::from(expanded)), KeySource::EnvExpanded)
            }
            Some(ref raw_key) => (Some(ApiKey::from(raw_key.as_str())), KeySource::Literal),
            None => match lookup(API_KEY_ENV).filter(|v| !v.is_empty()) {
                Some(value) => (
                    Some(ApiKey::from(value)),
                    KeySource::Convention(API_KEY_ENV.to_string()),
                ),
                None => (None, KeySource::None),
            },
        };

        let base_url = match raw.upstream.base_url {
            Some(url) => expand_env_vars_with(&url, "upstream.base_url", &lookup)?,
            None => default_base_url(),
        };

        let default_model = raw
            .upstream
            .default_model
            .or_else(|| lookup(MODEL_ENV).filter(|v| !v.is_empty()))
            .unwrap_or_else(default_model);

        let config = Config {
            server: raw.server,
            upstream: UpstreamConfig {
                base_url,
                default_model,
                connect_timeout_secs: raw
                    .upstream
                    .connect_timeout_secs
                    .unwrap_or_else(default_connect_timeout),
                stream_timeout_secs: raw.upstream.stream_timeout_secs,
            },
            auth: AuthConfig {
                api_key,
                token_env: raw.auth.token_env.filter(|v| !v.is_empty()),
            },
            errors: raw.errors,
            logging: raw.logging,
        };

        config.validate()?;
        Ok((config, key_source))
    }

    /// Convert raw config using the real process environment.
    pub fn from_raw(raw: RawConfig) -> Result<(Self, KeySource), ConfigError> {
        Self::from_raw_with(raw, |name| std::env::var(name).ok())
    }

    /// Parse configuration from a TOML string using the process environment.
    pub fn parse_str(content: &str) -> Result<(Self, KeySource), ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
        Self::from_raw(raw)
    }

    /// Load configuration from a TOML file with environment variable expansion.
    ///
    /// A missing file is not an error: defaults plus convention env vars apply.
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<(Self, KeySource), ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Self::from_raw(RawConfig::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::parse_str(&content)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.upstream.base_url;
        if url.is_empty() {
            return Err(ConfigError::Validation(
                "upstream.base_url is empty".to_string(),
            ));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "upstream.base_url '{}' must start with http:// or https://",
                url
            )));
        }
        if self.upstream.default_model.trim().is_empty() {
            return Err(ConfigError::Validation(
                "upstream.default_model is empty".to_string(),
            ));
        }
        Ok(())
    }
}
