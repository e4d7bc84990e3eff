// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client configuration and configuration file loading.
//!
//! # Loading Pipeline
//!
//! 1. Read the file and pick the format from its extension
//! 2. Resolve `${VAR}` / `${VAR:default}` placeholders
//! 3. Parse TOML, YAML or JSON into [`ClientConfig`]
//! 4. Apply `UASUB_*` environment overrides
//! 5. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! UASUB_ENDPOINT=opc.tcp://plant-sim:4842
//! UASUB_REQUEST_TIMEOUT_MS=2000
//! UASUB_CONNECT_TIMEOUT_MS=5000
//! UASUB_USERNAME=operator
//! UASUB_PASSWORD=secret
//! ```

use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ClientError, ClientResult, ConfigurationError};
use crate::types::{Credentials, Endpoint};

// =============================================================================
// ClientConfig
// =============================================================================

/// Client configuration.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use uasub_core::config::ClientConfig;
///
/// let config = ClientConfig::builder()
///     .endpoint("opc.tcp://localhost:4842")
///     .request_timeout(Duration::from_secs(2))
///     .build()
///     .unwrap();
/// assert_eq!(config.request_timeout, Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Default endpoint used by `ConnectionManager::connect_configured`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,

    /// Credentials presented with the configured endpoint.
    #[serde(default)]
    pub credentials: Credentials,

    /// Deadline for opening the channel.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Deadline for each request/response round trip.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Time budget for a single handler invocation.
    #[serde(default = "default_handler_timeout", with = "humantime_serde")]
    pub handler_timeout: Duration,

    /// Capacity of each per-subscription delivery queue.
    #[serde(default = "default_dispatch_queue_capacity")]
    pub dispatch_queue_capacity: usize,

    /// Whether `resolve_by_id` checks that the node exists.
    #[serde(default = "default_true")]
    pub verify_node_existence: bool,

    /// Reconnect policy for `connect`.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Subscription settings and limits.
    #[serde(default)]
    pub subscription: SubscriptionSettings,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_handler_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_dispatch_queue_capacity() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            credentials: Credentials::Anonymous,
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            handler_timeout: default_handler_timeout(),
            dispatch_queue_capacity: default_dispatch_queue_capacity(),
            verify_node_existence: true,
            retry: RetryConfig::default(),
            subscription: SubscriptionSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Validates this configuration.
    pub fn validate(&self) -> ClientResult<()> {
        if let Some(endpoint) = &self.endpoint {
            endpoint.validate()?;
        }

        for (field, value) in [
            ("connect_timeout", self.connect_timeout),
            ("request_timeout", self.request_timeout),
            ("handler_timeout", self.handler_timeout),
        ] {
            if value.is_zero() {
                return Err(invalid(field, "must be greater than 0"));
            }
        }

        if self.dispatch_queue_capacity == 0 {
            return Err(invalid("dispatch_queue_capacity", "must be greater than 0"));
        }

        self.subscription.validate()
    }
}

fn invalid(field: &str, reason: &str) -> ClientError {
    ClientError::configuration(ConfigurationError::invalid_value(field, reason))
}

// =============================================================================
// ClientConfigBuilder
// =============================================================================

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Sets the default endpoint.
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = Some(Endpoint::new(url));
        self
    }

    /// Sets the default endpoint with security settings.
    pub fn endpoint_config(mut self, endpoint: Endpoint) -> Self {
        self.config.endpoint = Some(endpoint);
        self
    }

    /// Sets username/password credentials.
    pub fn username(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Credentials::user_name(username, password);
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Sets the handler timeout.
    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.config.handler_timeout = timeout;
        self
    }

    /// Sets the per-subscription delivery queue capacity.
    pub fn dispatch_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.dispatch_queue_capacity = capacity;
        self
    }

    /// Enables or disables the existence check in `resolve_by_id`.
    pub fn verify_node_existence(mut self, verify: bool) -> Self {
        self.config.verify_node_existence = verify;
        self
    }

    /// Sets the reconnect policy.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Sets the subscription settings.
    pub fn subscription(mut self, settings: SubscriptionSettings) -> Self {
        self.config.subscription = settings;
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> ClientResult<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// =============================================================================
// SubscriptionSettings
// =============================================================================

/// Subscription parameters and client-side limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// Smallest accepted sampling interval.
    #[serde(default = "default_min_interval", with = "humantime_serde")]
    pub min_interval: Duration,

    /// Largest accepted sampling interval.
    #[serde(default = "default_max_interval", with = "humantime_serde")]
    pub max_interval: Duration,

    /// Maximum number of server subscriptions per session.
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions: usize,

    /// Lifetime count requested from the server.
    #[serde(default = "default_lifetime_count")]
    pub lifetime_count: u32,

    /// Keep-alive count requested from the server.
    #[serde(default = "default_keepalive_count")]
    pub keepalive_count: u32,

    /// Subscription priority.
    #[serde(default)]
    pub priority: u8,

    /// Server-side queue size of each monitored item.
    #[serde(default = "default_queue_size")]
    pub queue_size: u32,
}

fn default_min_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_max_interval() -> Duration {
    Duration::from_secs(3600)
}

fn default_max_subscriptions() -> usize {
    64
}

fn default_lifetime_count() -> u32 {
    60
}

fn default_keepalive_count() -> u32 {
    10
}

fn default_queue_size() -> u32 {
    10
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            min_interval: default_min_interval(),
            max_interval: default_max_interval(),
            max_subscriptions: default_max_subscriptions(),
            lifetime_count: default_lifetime_count(),
            keepalive_count: default_keepalive_count(),
            priority: 0,
            queue_size: default_queue_size(),
        }
    }
}

impl SubscriptionSettings {
    /// Returns `true` if the interval is within the accepted bounds.
    pub fn accepts(&self, interval: Duration) -> bool {
        interval >= self.min_interval && interval <= self.max_interval
    }

    /// Validates the settings.
    pub fn validate(&self) -> ClientResult<()> {
        if self.min_interval.is_zero() {
            return Err(invalid("subscription.min_interval", "must be greater than 0"));
        }
        if self.min_interval > self.max_interval {
            return Err(invalid(
                "subscription.max_interval",
                "must not be smaller than min_interval",
            ));
        }
        if self.max_subscriptions == 0 {
            return Err(invalid("subscription.max_subscriptions", "must be greater than 0"));
        }
        if self.keepalive_count == 0 || self.lifetime_count < self.keepalive_count * 3 {
            return Err(invalid(
                "subscription.lifetime_count",
                "must be at least three times keepalive_count",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// RetryStrategy / RetryConfig
// =============================================================================

/// Strategy for reconnect delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Fixed delay between attempts.
    Fixed,

    /// Linear backoff (delay * attempt).
    Linear,

    /// Exponential backoff (delay * 2^attempt).
    #[default]
    Exponential,
}

impl RetryStrategy {
    /// Calculates the delay for a given attempt.
    pub fn delay(&self, base_delay: Duration, attempt: u32) -> Duration {
        match self {
            Self::Fixed => base_delay,
            Self::Linear => base_delay.saturating_mul(attempt + 1),
            Self::Exponential => base_delay.saturating_mul(2u32.saturating_pow(attempt)),
        }
    }
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => write!(f, "Fixed"),
            Self::Linear => write!(f, "Linear"),
            Self::Exponential => write!(f, "Exponential"),
        }
    }
}

/// Reconnect policy applied by `ConnectionManager::connect`.
///
/// Only retryable connection errors are retried. Timeouts and
/// authentication or version failures surface immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between attempts.
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,

    /// Upper bound for any delay.
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Backoff strategy.
    #[serde(default)]
    pub strategy: RetryStrategy,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            strategy: RetryStrategy::Exponential,
        }
    }
}

impl RetryConfig {
    /// Creates a retry configuration with the given retry count.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Disables retries.
    pub fn no_retry() -> Self {
        Self::new(0)
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the strategy.
    pub fn with_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Calculates the delay before retry number `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.strategy.delay(self.base_delay, attempt).min(self.max_delay)
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Configuration file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML.
    Toml,
    /// YAML.
    Yaml,
    /// JSON.
    Json,
}

impl ConfigFormat {
    /// Detects the format from a file extension.
    pub fn from_path(path: &Path) -> ClientResult<Self> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .as_deref()
        {
            Some("toml") => Ok(Self::Toml),
            Some("yaml") | Some("yml") => Ok(Self::Yaml),
            Some("json") => Ok(Self::Json),
            _ => Err(ClientError::configuration(ConfigurationError::parse(
                path.display().to_string(),
                "unsupported extension, expected .toml, .yaml, .yml or .json",
            ))),
        }
    }
}

// =============================================================================
// ConfigLoader
// =============================================================================

/// Loads [`ClientConfig`] from files or strings.
///
/// ```no_run
/// use uasub_core::config::ConfigLoader;
///
/// let config = ConfigLoader::new().load("uasub.toml").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_prefix: String,
    resolve_env_vars: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader with the `UASUB` environment prefix.
    pub fn new() -> Self {
        Self {
            env_prefix: "UASUB".to_string(),
            resolve_env_vars: true,
        }
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables placeholder resolution and env overrides.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Loads configuration from a file.
    pub fn load(&self, path: impl AsRef<Path>) -> ClientResult<ClientConfig> {
        let path = path.as_ref();
        let origin = path.display().to_string();

        if !path.exists() {
            return Err(ClientError::configuration(ConfigurationError::file_not_found(
                origin,
            )));
        }

        let format = ConfigFormat::from_path(path)?;
        let content = fs::read_to_string(path)
            .map_err(|e| ClientError::configuration(ConfigurationError::io(&origin, e)))?;

        info!(path = %origin, "Loading client configuration");
        self.load_str_named(&content, format, &origin)
    }

    /// Loads configuration from a string.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ClientResult<ClientConfig> {
        self.load_str_named(content, format, "<string>")
    }

    fn load_str_named(
        &self,
        content: &str,
        format: ConfigFormat,
        origin: &str,
    ) -> ClientResult<ClientConfig> {
        let content = if self.resolve_env_vars {
            resolve_env_placeholders(content)
        } else {
            content.to_string()
        };

        let mut config = parse_str(&content, format)
            .map_err(|message| ClientError::configuration(ConfigurationError::parse(origin, message)))?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&self, config: &mut ClientConfig) -> ClientResult<()> {
        let var = |suffix: &str| env::var(format!("{}_{}", self.env_prefix, suffix)).ok();

        if let Some(url) = var("ENDPOINT") {
            debug!(endpoint = %url, "Endpoint overridden from environment");
            match config.endpoint.as_mut() {
                Some(endpoint) => endpoint.url = url,
                None => config.endpoint = Some(Endpoint::new(url)),
            }
        }
        if let Some(ms) = var("REQUEST_TIMEOUT_MS") {
            config.request_timeout = parse_millis("REQUEST_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = var("CONNECT_TIMEOUT_MS") {
            config.connect_timeout = parse_millis("CONNECT_TIMEOUT_MS", &ms)?;
        }
        if let Some(username) = var("USERNAME") {
            let password = var("PASSWORD").unwrap_or_default();
            config.credentials = Credentials::user_name(username, password);
        }

        Ok(())
    }
}

fn parse_millis(field: &str, value: &str) -> ClientResult<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| invalid(field, "expected milliseconds"))
}

fn parse_str(content: &str, format: ConfigFormat) -> Result<ClientConfig, String> {
    match format {
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Yaml => ::config::Config::builder()
            .add_source(::config::File::from_str(content, ::config::FileFormat::Yaml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| e.to_string()),
    }
}

/// Resolves `${VAR}` and `${VAR:default}` placeholders.
///
/// Unknown variables without a default are left untouched.
fn resolve_env_placeholders(content: &str) -> String {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find('}') else {
            result.push_str(&rest[start..]);
            return result;
        };

        let body = &after[..end];
        let (name, default) = match body.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (body, None),
        };

        match (env::var(name), default) {
            (Ok(value), _) => result.push_str(&value),
            (Err(_), Some(default)) => result.push_str(default),
            (Err(_), None) => {
                result.push_str("${");
                result.push_str(body);
                result.push('}');
            }
        }

        rest = &after[end + 1..];
    }

    result.push_str(rest);
    result
}

/// Loads configuration from a file with default loader settings.
pub fn load_config(path: impl AsRef<Path>) -> ClientResult<ClientConfig> {
    ConfigLoader::new().load(path)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TOML: &str = r#"
connect_timeout = "3s"
request_timeout = "750ms"
verify_node_existence = false

[endpoint]
url = "opc.tcp://localhost:4842"

[retry]
max_retries = 1
base_delay = "10ms"
strategy = "fixed"

[subscription]
min_interval = "50ms"
"#;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert!(config.verify_node_existence);
    }

    #[test]
    fn test_builder_validation() {
        assert!(ClientConfig::builder()
            .request_timeout(Duration::ZERO)
            .build()
            .is_err());
        assert!(ClientConfig::builder().endpoint("tcp://nope").build().is_err());
        assert!(ClientConfig::builder()
            .dispatch_queue_capacity(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_subscription_settings_bounds() {
        let settings = SubscriptionSettings::default();
        assert!(settings.accepts(Duration::from_millis(500)));
        assert!(!settings.accepts(Duration::ZERO));
        assert!(!settings.accepts(Duration::from_secs(7200)));

        let bad = SubscriptionSettings {
            min_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_retry_delays() {
        let base = Duration::from_millis(100);
        assert_eq!(RetryStrategy::Fixed.delay(base, 3), base);
        assert_eq!(RetryStrategy::Linear.delay(base, 2), Duration::from_millis(300));
        assert_eq!(RetryStrategy::Exponential.delay(base, 2), Duration::from_millis(400));

        let config = RetryConfig::new(5)
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(3));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(3));
        assert_eq!(RetryConfig::no_retry().max_retries, 0);
    }

    #[test]
    fn test_load_toml_from_str() {
        let config = ConfigLoader::new()
            .with_env_vars(false)
            .load_from_str(TOML, ConfigFormat::Toml)
            .unwrap();

        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.request_timeout, Duration::from_millis(750));
        assert!(!config.verify_node_existence);
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.strategy, RetryStrategy::Fixed);
        assert_eq!(config.subscription.min_interval, Duration::from_millis(50));
        assert_eq!(
            config.endpoint.map(|e| e.url),
            Some("opc.tcp://localhost:4842".to_string())
        );
    }

    #[test]
    fn test_load_json_from_str() {
        let json = r#"{ "request_timeout": "2s", "credentials": { "type": "user_name", "username": "op", "password": "pw" } }"#;
        let config = ConfigLoader::new()
            .with_env_vars(false)
            .load_from_str(json, ConfigFormat::Json)
            .unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.credentials, Credentials::user_name("op", "pw"));
    }

    #[test]
    fn test_load_file() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        file.write_all(TOML.as_bytes()).unwrap();

        let config = ConfigLoader::new()
            .with_env_prefix("UASUB_TEST_LOAD_FILE")
            .load(file.path())
            .unwrap();
        assert_eq!(config.retry.max_retries, 1);
    }

    #[test]
    fn test_file_not_found() {
        let err = ConfigLoader::new().load("/nonexistent/uasub.toml").unwrap_err();
        assert!(matches!(
            err,
            ClientError::Configuration(ConfigurationError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")).unwrap(), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.YML")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")).unwrap(), ConfigFormat::Json);
        assert!(ConfigFormat::from_path(Path::new("a.ini")).is_err());
    }

    #[test]
    fn test_env_placeholder_with_default() {
        let resolved = resolve_env_placeholders("url = \"${UASUB_TEST_UNSET_VAR:opc.tcp://h:1}\"");
        assert_eq!(resolved, "url = \"opc.tcp://h:1\"");

        let untouched = resolve_env_placeholders("x = \"${UASUB_TEST_UNSET_VAR}\" ${unterminated");
        assert_eq!(untouched, "x = \"${UASUB_TEST_UNSET_VAR}\" ${unterminated");
    }

    #[test]
    fn test_env_override() {
        env::set_var("UASUB_TEST_OVERRIDE_ENDPOINT", "opc.tcp://override:4840");
        env::set_var("UASUB_TEST_OVERRIDE_REQUEST_TIMEOUT_MS", "1500");

        let config = ConfigLoader::new()
            .with_env_prefix("UASUB_TEST_OVERRIDE")
            .load_from_str(TOML, ConfigFormat::Toml)
            .unwrap();

        assert_eq!(
            config.endpoint.map(|e| e.url),
            Some("opc.tcp://override:4840".to_string())
        );
        assert_eq!(config.request_timeout, Duration::from_millis(1500));
    }
}
