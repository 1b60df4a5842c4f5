//! Configuration Builder
//!
//! Fluent builder for Garmin client configuration, plus environment loading.

use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::{ConfigurationError, GarminError};
use crate::resilience::{CircuitBreakerConfig, RateLimiterConfig, ResilienceConfig, RetryConfig};
use crate::types::GarminConfig;

/// Garmin configuration builder.
#[derive(Default)]
pub struct GarminConfigBuilder {
    config: GarminConfig,
}

impl GarminConfigBuilder {
    /// Create new configuration builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    /// Set API path prefix.
    pub fn api_path(mut self, api_path: impl Into<String>) -> Self {
        self.config.api_path = api_path.into();
        self
    }

    /// Set account e-mail.
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.config.oauth.email = Some(email.into());
        self
    }

    /// Set account password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.oauth.password = Some(SecretString::new(password.into()));
        self
    }

    /// Set auth helper interpreter.
    pub fn python_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.oauth.python_path = path.into();
        self
    }

    /// Set auth helper script.
    pub fn auth_helper_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.oauth.auth_helper_path = path.into();
        self
    }

    /// Set token storage directory.
    pub fn token_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.oauth.token_storage_path = path.into();
        self
    }

    /// Enable or disable the expiring-token gate.
    pub fn auto_refresh(mut self, enable: bool) -> Self {
        self.config.oauth.auto_refresh = enable;
        self
    }

    /// Set refresh threshold.
    pub fn refresh_threshold(mut self, threshold: Duration) -> Self {
        self.config.oauth.refresh_threshold = threshold;
        self
    }

    /// Set connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.http.connect_timeout = timeout;
        self
    }

    /// Set request timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.http.read_timeout = timeout;
        self
    }

    /// Set idle connections kept per host.
    pub fn max_connections_per_host(mut self, max: usize) -> Self {
        self.config.http.max_connections_per_host = max;
        self
    }

    /// Enable or disable request outcome logging.
    pub fn logging_enabled(mut self, enable: bool) -> Self {
        self.config.http.logging_enabled = enable;
        self
    }

    /// Set user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.http.user_agent = user_agent.into();
        self
    }

    /// Set circuit breaker configuration.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.resilience.circuit_breaker = config;
        self
    }

    /// Set rate limiter configuration.
    pub fn rate_limiter(mut self, config: RateLimiterConfig) -> Self {
        self.config.resilience.rate_limiter = config;
        self
    }

    /// Set retry configuration.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.config.resilience.retry = config;
        self
    }

    /// Set all resilience configuration at once.
    pub fn resilience(mut self, config: ResilienceConfig) -> Self {
        self.config.resilience = config;
        self
    }

    /// Load overrides from `GARMIN_*` environment variables.
    pub fn from_env(self) -> Result<Self, GarminError> {
        self.from_lookup(|key| std::env::var(key).ok())
    }

    /// Load overrides from an arbitrary variable source.
    ///
    /// Recognized variables:
    ///
    /// - `GARMIN_BASE_URL`, `GARMIN_API_PATH`
    /// - `GARMIN_EMAIL`, `GARMIN_PASSWORD`
    /// - `GARMIN_PYTHON_PATH`, `GARMIN_AUTH_HELPER_PATH`, `GARMIN_TOKEN_STORAGE_PATH`
    /// - `GARMIN_AUTO_REFRESH`, `GARMIN_REFRESH_THRESHOLD_SECS`
    /// - `GARMIN_HTTP_LOGGING`, `GARMIN_USER_AGENT`
    /// - `GARMIN_CIRCUIT_BREAKER_ENABLED`, `GARMIN_RATE_LIMITER_ENABLED`,
    ///   `GARMIN_RETRY_ENABLED`
    /// - `GARMIN_RATE_LIMIT_PER_PERIOD`, `GARMIN_RETRY_MAX_ATTEMPTS`
    pub fn from_lookup<F>(mut self, lookup: F) -> Result<Self, GarminError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = &mut self.config;

        if let Some(v) = lookup("GARMIN_BASE_URL") {
            config.base_url = v;
        }
        if let Some(v) = lookup("GARMIN_API_PATH") {
            config.api_path = v;
        }
        if let Some(v) = lookup("GARMIN_EMAIL") {
            config.oauth.email = Some(v);
        }
        if let Some(v) = lookup("GARMIN_PASSWORD") {
            config.oauth.password = Some(SecretString::new(v));
        }
        if let Some(v) = lookup("GARMIN_PYTHON_PATH") {
            config.oauth.python_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("GARMIN_AUTH_HELPER_PATH") {
            config.oauth.auth_helper_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("GARMIN_TOKEN_STORAGE_PATH") {
            config.oauth.token_storage_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("GARMIN_AUTO_REFRESH") {
            config.oauth.auto_refresh = parse_bool("GARMIN_AUTO_REFRESH", &v)?;
        }
        if let Some(v) = lookup("GARMIN_REFRESH_THRESHOLD_SECS") {
            config.oauth.refresh_threshold =
                Duration::from_secs(parse_number("GARMIN_REFRESH_THRESHOLD_SECS", &v)?);
        }
        if let Some(v) = lookup("GARMIN_HTTP_LOGGING") {
            config.http.logging_enabled = parse_bool("GARMIN_HTTP_LOGGING", &v)?;
        }
        if let Some(v) = lookup("GARMIN_USER_AGENT") {
            config.http.user_agent = v;
        }
        if let Some(v) = lookup("GARMIN_CIRCUIT_BREAKER_ENABLED") {
            config.resilience.circuit_breaker.enabled =
                parse_bool("GARMIN_CIRCUIT_BREAKER_ENABLED", &v)?;
        }
        if let Some(v) = lookup("GARMIN_RATE_LIMITER_ENABLED") {
            config.resilience.rate_limiter.enabled = parse_bool("GARMIN_RATE_LIMITER_ENABLED", &v)?;
        }
        if let Some(v) = lookup("GARMIN_RETRY_ENABLED") {
            config.resilience.retry.enabled = parse_bool("GARMIN_RETRY_ENABLED", &v)?;
        }
        if let Some(v) = lookup("GARMIN_RATE_LIMIT_PER_PERIOD") {
            config.resilience.rate_limiter.limit_for_period =
                parse_number("GARMIN_RATE_LIMIT_PER_PERIOD", &v)?;
        }
        if let Some(v) = lookup("GARMIN_RETRY_MAX_ATTEMPTS") {
            config.resilience.retry.max_attempts = parse_number("GARMIN_RETRY_MAX_ATTEMPTS", &v)?;
        }

        Ok(self)
    }

    /// Build the Garmin configuration.
    pub fn build(self) -> Result<GarminConfig, GarminError> {
        validate(&self.config)?;
        Ok(self.config)
    }
}

fn invalid(message: impl Into<String>) -> GarminError {
    GarminError::Configuration(ConfigurationError::InvalidConfig {
        message: message.into(),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, GarminError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(format!("{} must be a boolean, got {:?}", name, value))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, GarminError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(format!("{} must be a number, got {:?}", name, value)))
}

/// Validate a configuration.
pub fn validate(config: &GarminConfig) -> Result<(), GarminError> {
    let url = Url::parse(&config.base_url).map_err(|_| {
        GarminError::Configuration(ConfigurationError::InvalidUrl {
            url: config.base_url.clone(),
        })
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(GarminError::Configuration(ConfigurationError::InvalidUrl {
            url: config.base_url.clone(),
        }));
    }

    if config.oauth.python_path.as_os_str().is_empty() {
        return Err(GarminError::Configuration(
            ConfigurationError::MissingRequired {
                field: "oauth.python_path".to_string(),
            },
        ));
    }
    if config.oauth.auth_helper_path.as_os_str().is_empty() {
        return Err(GarminError::Configuration(
            ConfigurationError::MissingRequired {
                field: "oauth.auth_helper_path".to_string(),
            },
        ));
    }

    let cb = &config.resilience.circuit_breaker;
    for (name, rate) in [
        ("failure_rate_threshold", cb.failure_rate_threshold),
        ("slow_call_rate_threshold", cb.slow_call_rate_threshold),
    ] {
        if !(rate > 0.0 && rate <= 100.0) {
            return Err(invalid(format!(
                "circuit_breaker.{} must be in (0, 100], got {}",
                name, rate
            )));
        }
    }
    if cb.sliding_window_size == 0 || cb.minimum_number_of_calls == 0 {
        return Err(invalid(
            "circuit_breaker window size and minimum calls must be positive",
        ));
    }

    let rl = &config.resilience.rate_limiter;
    if rl.limit_for_period == 0 || rl.limit_refresh_period.is_zero() {
        return Err(invalid(
            "rate_limiter limit and refresh period must be positive",
        ));
    }

    let retry = &config.resilience.retry;
    if retry.max_attempts == 0 {
        return Err(invalid("retry.max_attempts must be at least 1"));
    }
    if retry.multiplier < 1.0 {
        return Err(invalid("retry.multiplier must be at least 1.0"));
    }
    if !(0.0..=1.0).contains(&retry.jitter) {
        return Err(invalid("retry.jitter must be in [0, 1]"));
    }

    Ok(())
}

/// Create a new Garmin configuration builder.
pub fn garmin_config() -> GarminConfigBuilder {
    GarminConfigBuilder::new()
}

impl GarminConfig {
    /// Create a configuration builder.
    pub fn builder() -> GarminConfigBuilder {
        GarminConfigBuilder::new()
    }

    /// Create a configuration from `GARMIN_*` environment variables over defaults.
    pub fn from_env() -> Result<Self, GarminError> {
        GarminConfigBuilder::new().from_env()?.build()
    }

    /// Validate this configuration.
    pub fn validate(&self) -> Result<(), GarminError> {
        validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_builder_defaults() {
        let config = garmin_config().build().unwrap();

        assert_eq!(config.base_url, "https://connect.garmin.com");
        assert_eq!(config.resilience.retry.max_attempts, 3);
        assert_eq!(config.resilience.rate_limiter.limit_for_period, 100);
        assert_eq!(config.resilience.circuit_breaker.sliding_window_size, 100);
        assert_eq!(config.oauth.refresh_threshold, Duration::from_secs(300));
    }

    #[test]
    fn test_builder_sets_fields() {
        let config = garmin_config()
            .base_url("https://connect.garmin.cn")
            .email("runner@example.com")
            .password("pw")
            .auto_refresh(false)
            .logging_enabled(true)
            .retry(RetryConfig::disabled())
            .build()
            .unwrap();

        assert_eq!(config.base_url, "https://connect.garmin.cn");
        assert_eq!(config.oauth.email.as_deref(), Some("runner@example.com"));
        assert_eq!(config.oauth.password.unwrap().expose_secret(), "pw");
        assert!(!config.oauth.auto_refresh);
        assert!(config.http.logging_enabled);
        assert!(!config.resilience.retry.enabled);
    }

    #[test]
    fn test_builder_rejects_invalid_url() {
        let result = garmin_config().base_url("ftp://connect.garmin.com").build();
        assert!(matches!(
            result,
            Err(GarminError::Configuration(ConfigurationError::InvalidUrl { .. }))
        ));

        assert!(garmin_config().base_url("not a url").build().is_err());
    }

    #[test]
    fn test_builder_rejects_invalid_policies() {
        let result = garmin_config()
            .retry(RetryConfig {
                max_attempts: 0,
                ..Default::default()
            })
            .build();
        assert!(result.is_err());

        let result = garmin_config()
            .circuit_breaker(CircuitBreakerConfig {
                failure_rate_threshold: 150.0,
                ..Default::default()
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_lookup() {
        let config = garmin_config()
            .from_lookup(env(&[
                ("GARMIN_EMAIL", "runner@example.com"),
                ("GARMIN_PASSWORD", "pw"),
                ("GARMIN_TOKEN_STORAGE_PATH", "/tmp/garmin"),
                ("GARMIN_REFRESH_THRESHOLD_SECS", "600"),
                ("GARMIN_CIRCUIT_BREAKER_ENABLED", "false"),
                ("GARMIN_RETRY_MAX_ATTEMPTS", "5"),
            ]))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(config.oauth.email.as_deref(), Some("runner@example.com"));
        assert_eq!(config.oauth.token_storage_path, PathBuf::from("/tmp/garmin"));
        assert_eq!(config.oauth.refresh_threshold, Duration::from_secs(600));
        assert!(!config.resilience.circuit_breaker.enabled);
        assert_eq!(config.resilience.retry.max_attempts, 5);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let result = garmin_config().from_lookup(env(&[("GARMIN_AUTO_REFRESH", "maybe")]));
        assert!(result.is_err());

        let result = garmin_config().from_lookup(env(&[("GARMIN_RETRY_MAX_ATTEMPTS", "three")]));
        assert!(result.is_err());
    }
}
