//! Configuration Types
//!
//! Garmin client configuration types.

use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;

use crate::resilience::ResilienceConfig;

/// Default base URL (international). China accounts use `https://connect.garmin.cn`.
pub const DEFAULT_BASE_URL: &str = "https://connect.garmin.com";

/// Default API path prefix.
pub const DEFAULT_API_PATH: &str = "/connectapi";

/// File name of the durable token record inside the storage directory.
pub const TOKEN_FILE_NAME: &str = "garmin-tokens.json";

/// Garmin client configuration.
#[derive(Clone, Debug)]
pub struct GarminConfig {
    /// Base URL for Garmin Connect.
    pub base_url: String,
    /// API path prefix appended to the base URL.
    pub api_path: String,
    /// Credential configuration.
    pub oauth: OAuthConfig,
    /// HTTP client configuration.
    pub http: HttpConfig,
    /// Circuit breaker, rate limiter and retry configuration.
    pub resilience: ResilienceConfig,
}

impl Default for GarminConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_path: DEFAULT_API_PATH.to_string(),
            oauth: OAuthConfig::default(),
            http: HttpConfig::default(),
            resilience: ResilienceConfig::default(),
        }
    }
}

impl GarminConfig {
    /// Base URL joined with the API path prefix.
    pub fn api_base_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.api_path.trim_matches('/')
        )
    }

    /// Full URL for an API path.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base_url(), path.trim_start_matches('/'))
    }
}

/// Credential acquisition and storage configuration.
#[derive(Clone)]
pub struct OAuthConfig {
    /// Account e-mail passed to the auth helper.
    pub email: Option<String>,
    /// Account password passed to the auth helper.
    pub password: Option<SecretString>,
    /// Interpreter used to run the auth helper.
    pub python_path: PathBuf,
    /// Path to the auth helper script.
    pub auth_helper_path: PathBuf,
    /// Directory holding the durable token record.
    pub token_storage_path: PathBuf,
    /// Refuse to dispatch with a token inside the refresh threshold.
    pub auto_refresh: bool,
    /// Lead time before expiry at which the session token is due for renewal.
    pub refresh_threshold: Duration,
}

impl OAuthConfig {
    /// Path of the durable token record.
    pub fn token_file(&self) -> PathBuf {
        self.token_storage_path.join(TOKEN_FILE_NAME)
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            email: None,
            password: None,
            python_path: PathBuf::from("python3"),
            auth_helper_path: PathBuf::from("java_auth_helper.py"),
            token_storage_path: home.join(".garmin").join("tokens"),
            auto_refresh: true,
            refresh_threshold: Duration::from_secs(300),
        }
    }
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("python_path", &self.python_path)
            .field("auth_helper_path", &self.auth_helper_path)
            .field("token_storage_path", &self.token_storage_path)
            .field("auto_refresh", &self.auto_refresh)
            .field("refresh_threshold", &self.refresh_threshold)
            .finish()
    }
}

/// HTTP client configuration.
#[derive(Clone, Debug)]
pub struct HttpConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout.
    pub read_timeout: Duration,
    /// Idle connections kept per host.
    pub max_connections_per_host: usize,
    /// Log request outcomes at debug level.
    pub logging_enabled: bool,
    /// User agent string.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            max_connections_per_host: 10,
            logging_enabled: false,
            user_agent: "GarminConnectRustClient/1.0".to_string(),
        }
    }
}
