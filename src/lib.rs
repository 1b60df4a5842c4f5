//! Garmin Connect Integration Module
//!
//! Authenticated, resilient request pipeline for the Garmin Connect API.
//!
//! # Features
//!
//! - Credential acquisition through an external SSO helper program
//! - Credential store with write-through JSON persistence
//! - Sliding-window circuit breaker, fixed-window rate limiter and backoff retry
//! - Request executor with an authentication gate and typed error mapping
//!
//! # Example
//!
//! ```rust,ignore
//! use integrations_garmin::{garmin_config, GarminClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = garmin_config()
//!         .email("runner@example.com")
//!         .password("secret")
//!         .auth_helper_path("/opt/garmin/java_auth_helper.py")
//!         .build()?;
//!
//!     let client = GarminClient::new(config)?;
//!     if !client.is_authenticated() {
//!         client.authenticate().await?;
//!     }
//!
//!     let profile: serde_json::Value = client
//!         .executor()
//!         .get("userprofile-service/socialProfile")
//!         .await?;
//!     println!("{}", profile["displayName"]);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `types`: Credential data model, configuration and clock
//! - `error`: Error taxonomy and transport error mapping
//! - `token`: Credential store and durable persistence
//! - `auth`: Auth helper boundary and credential acquirer
//! - `resilience`: Circuit breaker, rate limiter, retry and their composition
//! - `core`: HTTP transport
//! - `builders`: Fluent configuration builder and environment loading
//! - `client`: Request executor and the `GarminClient` composition root
//! - `observability`: Tracing subscriber setup

pub mod auth;
pub mod builders;
pub mod client;
pub mod core;
pub mod error;
pub mod observability;
pub mod resilience;
pub mod token;
pub mod types;

// Re-export main client
pub use client::{ApiRequest, GarminClient, GarminClientBuilder, RequestExecutor};

// Re-export builders
pub use builders::{garmin_config, GarminConfigBuilder};

// Re-export errors
pub use error::{
    ClientErrorKind, ConfigurationError, GarminError, GarminResult, StorageError, TransportError,
};

// Re-export types
pub use types::{
    // Config
    GarminConfig, HttpConfig, OAuthConfig,
    // Token
    PrimaryCredential, SessionCredential, TokenRecord,
    // Clock
    Clock, ManualClock, SystemClock,
};

// Re-export credential management
pub use auth::{AcquiredCredentials, AuthHelper, CredentialAcquirer, HelperOutput, ProcessAuthHelper};
pub use token::{CredentialStore, FileTokenPersistence, InMemoryTokenPersistence, TokenPersistence};

// Re-export core components
pub use self::core::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, MockHttpTransport, ReqwestHttpTransport,
};

// Re-export resilience
pub use resilience::{
    // Retry
    BackoffRetryPolicy, NoRetry, RetryConfig, RetryPolicy, RetryStats,
    // Circuit Breaker
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState, NoOpCircuitBreaker,
    SlidingWindowCircuitBreaker,
    // Rate Limiter
    FixedWindowRateLimiter, RateLimiter, RateLimiterConfig, RateLimiterStats, UnlimitedRateLimiter,
    // Pipeline
    ResilienceConfig, ResiliencePipeline, ResilienceStats,
};

// Re-export observability
pub use observability::{init_tracing, LogConfig, LogFormat, LogLevel};
