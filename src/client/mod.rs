//! Garmin Client
//!
//! Composition root wiring the credential store, acquirer, resilience policies and
//! transport into one client.

pub mod executor;

pub use executor::{ApiRequest, RequestExecutor};

use secrecy::SecretString;
use std::sync::Arc;
use tracing::info;

use crate::auth::{AcquiredCredentials, AuthHelper, CredentialAcquirer, ProcessAuthHelper};
use crate::builders::config::validate;
use crate::core::{HttpTransport, ReqwestHttpTransport};
use crate::error::GarminResult;
use crate::resilience::{ResiliencePipeline, ResilienceStats};
use crate::token::{CredentialStore, FileTokenPersistence, TokenPersistence};
use crate::types::{Clock, GarminConfig, SystemClock};

/// Garmin Connect client.
pub struct GarminClient {
    config: GarminConfig,
    store: Arc<CredentialStore>,
    acquirer: CredentialAcquirer,
    executor: RequestExecutor,
}

impl GarminClient {
    /// Create a client with default components.
    pub fn new(config: GarminConfig) -> GarminResult<Self> {
        GarminClientBuilder::new().config(config).build()
    }

    /// Create a client configured from `GARMIN_*` environment variables.
    pub fn from_env() -> GarminResult<Self> {
        Self::new(GarminConfig::from_env()?)
    }

    /// Create a new client builder.
    pub fn builder() -> GarminClientBuilder {
        GarminClientBuilder::new()
    }

    /// Authenticate with the configured e-mail and password.
    pub async fn authenticate(&self) -> GarminResult<AcquiredCredentials> {
        self.acquirer
            .acquire(
                self.config.oauth.email.as_deref(),
                self.config.oauth.password.as_ref(),
            )
            .await
    }

    /// Authenticate with explicit credentials.
    pub async fn authenticate_with(
        &self,
        email: &str,
        password: &SecretString,
    ) -> GarminResult<AcquiredCredentials> {
        self.acquirer.acquire(Some(email), Some(password)).await
    }

    /// Forget all credentials, including the durable record.
    pub fn logout(&self) {
        self.store.clear();
        info!("Logged out of Garmin Connect");
    }

    /// Check if a usable session credential is present.
    pub fn is_authenticated(&self) -> bool {
        self.store.has_valid_session()
    }

    /// Request executor.
    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Credential store.
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Client configuration.
    pub fn config(&self) -> &GarminConfig {
        &self.config
    }

    /// Snapshot of resilience policy statistics.
    pub fn resilience_stats(&self) -> ResilienceStats {
        self.executor.pipeline().stats()
    }
}

impl std::fmt::Debug for GarminClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GarminClient")
            .field("config", &self.config)
            .field("executor", &self.executor)
            .finish()
    }
}

/// Builder for the Garmin client.
#[derive(Default)]
pub struct GarminClientBuilder {
    config: Option<GarminConfig>,
    transport: Option<Arc<dyn HttpTransport>>,
    auth_helper: Option<Arc<dyn AuthHelper>>,
    persistence: Option<Arc<dyn TokenPersistence>>,
    clock: Option<Arc<dyn Clock>>,
    pipeline: Option<ResiliencePipeline>,
}

impl GarminClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration.
    pub fn config(mut self, config: GarminConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a custom HTTP transport.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom auth helper.
    pub fn auth_helper(mut self, helper: Arc<dyn AuthHelper>) -> Self {
        self.auth_helper = Some(helper);
        self
    }

    /// Use a custom token persistence backend.
    pub fn persistence(mut self, persistence: Arc<dyn TokenPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Use a custom clock for credential expiry.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use pre-built resilience policies.
    pub fn pipeline(mut self, pipeline: ResiliencePipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Build the client.
    pub fn build(self) -> GarminResult<GarminClient> {
        let config = self.config.unwrap_or_default();
        validate(&config)?;

        let persistence = self.persistence.unwrap_or_else(|| {
            Arc::new(FileTokenPersistence::new(config.oauth.token_file()))
        });
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let store = Arc::new(
            CredentialStore::new(persistence)
                .with_clock(clock)
                .with_refresh_threshold(config.oauth.refresh_threshold)
                .with_auto_refresh(config.oauth.auto_refresh),
        );

        let helper = self
            .auth_helper
            .unwrap_or_else(|| Arc::new(ProcessAuthHelper::from_config(&config.oauth)));
        let acquirer = CredentialAcquirer::new(helper, store.clone());

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestHttpTransport::new(&config.http)?),
        };

        let pipeline = self
            .pipeline
            .unwrap_or_else(|| ResiliencePipeline::new(&config.resilience));

        let executor = RequestExecutor::new(&config, store.clone(), transport, pipeline);

        Ok(GarminClient {
            config,
            store,
            acquirer,
            executor,
        })
    }
}
