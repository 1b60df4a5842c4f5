//! Request Executor
//!
//! Sends authenticated requests to Garmin Connect through the resilience pipeline.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::error::{GarminError, GarminResult};
use crate::resilience::ResiliencePipeline;
use crate::token::CredentialStore;
use crate::types::{GarminConfig, SessionCredential};

/// Request against a path below the API base URL.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl ApiRequest {
    /// Create a request without body.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    /// Attach a JSON-encoded body.
    pub fn with_json<B: Serialize + ?Sized>(mut self, body: &B) -> GarminResult<Self> {
        let json = serde_json::to_string(body)
            .map_err(|e| GarminError::unexpected(format!("failed to encode request body: {}", e)))?;
        self.body = Some(json);
        Ok(self)
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Authenticated, resilient request executor.
///
/// Holds no per-call state; every call reads the credential store and shares the
/// policy instances with all other callers.
pub struct RequestExecutor {
    store: Arc<CredentialStore>,
    transport: Arc<dyn HttpTransport>,
    pipeline: ResiliencePipeline,
    api_base_url: String,
    user_agent: String,
    logging_enabled: bool,
}

impl RequestExecutor {
    /// Create a new executor.
    pub fn new(
        config: &GarminConfig,
        store: Arc<CredentialStore>,
        transport: Arc<dyn HttpTransport>,
        pipeline: ResiliencePipeline,
    ) -> Self {
        Self {
            store,
            transport,
            pipeline,
            api_base_url: config.api_base_url(),
            user_agent: config.http.user_agent.clone(),
            logging_enabled: config.http.logging_enabled,
        }
    }

    /// Resilience pipeline used by this executor.
    pub fn pipeline(&self) -> &ResiliencePipeline {
        &self.pipeline
    }

    /// Full URL for an API path; absolute URLs pass through.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.api_base_url, path.trim_start_matches('/'))
        }
    }

    /// Usable session for the next attempt.
    fn authorize(&self) -> GarminResult<SessionCredential> {
        self.store.usable_session()
    }

    fn build_request(&self, request: &ApiRequest, url: &str, session: &SessionCredential) -> HttpRequest {
        let mut http = HttpRequest::new(request.method, url)
            .with_header("Authorization", session.authorization_header())
            .with_header("User-Agent", self.user_agent.clone())
            .with_header("Accept", "application/json");

        if let Some(body) = &request.body {
            http = http.with_json_body(body.clone());
        }
        for (name, value) in &request.headers {
            http = http.with_header(name.clone(), value.clone());
        }
        http
    }

    /// Send a request and return the raw response.
    pub async fn execute(&self, request: ApiRequest) -> GarminResult<HttpResponse> {
        let url = self.url_for(&request.path);
        let transport = self.transport.as_ref();
        let started = Instant::now();

        let result = self
            .pipeline
            .execute_guarded(
                || self.authorize(),
                |session| {
                    let http = self.build_request(&request, &url, &session);
                    async move {
                        transport
                            .send(http)
                            .await
                            .map_err(GarminError::from_transport)
                    }
                },
            )
            .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(response) => {
                if self.logging_enabled {
                    debug!(
                        method = %request.method,
                        path = %request.path,
                        status = response.status,
                        elapsed_ms,
                        "Request succeeded"
                    );
                }
            }
            Err(error) => {
                warn!(
                    method = %request.method,
                    path = %request.path,
                    error_code = error.error_code(),
                    status = ?error.status(),
                    elapsed_ms,
                    error = %error,
                    "Request failed"
                );
            }
        }

        result
    }

    /// Send a request and decode the JSON response body.
    pub async fn execute_json<T: DeserializeOwned>(&self, request: ApiRequest) -> GarminResult<T> {
        let response = self.execute(request).await?;
        decode(&response.body)
    }

    /// GET a JSON resource.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> GarminResult<T> {
        self.execute_json(ApiRequest::get(path)).await
    }

    /// POST a JSON body and decode the JSON response.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> GarminResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute_json(ApiRequest::post(path).with_json(body)?).await
    }

    /// POST without a body and decode the JSON response.
    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> GarminResult<T> {
        self.execute_json(ApiRequest::post(path)).await
    }

    /// PUT a JSON body and decode the JSON response.
    pub async fn put<B, T>(&self, path: &str, body: &B) -> GarminResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute_json(ApiRequest::put(path).with_json(body)?).await
    }

    /// DELETE a resource and decode the JSON response.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> GarminResult<T> {
        self.execute_json(ApiRequest::delete(path)).await
    }

    /// DELETE a resource, discarding the response body.
    pub async fn delete_no_content(&self, path: &str) -> GarminResult<()> {
        self.execute(ApiRequest::delete(path)).await.map(|_| ())
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> GarminResult<T> {
    // Empty bodies decode as JSON null so `()` and `Option<T>` targets work.
    let body = if body.trim().is_empty() { "null" } else { body };
    serde_json::from_str(body)
        .map_err(|e| GarminError::unexpected(format!("failed to decode response body: {}", e)))
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("api_base_url", &self.api_base_url)
            .field("user_agent", &self.user_agent)
            .field("logging_enabled", &self.logging_enabled)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}
