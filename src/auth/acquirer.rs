//! Credential Acquirer
//!
//! Runs the auth helper, extracts the token payload from its output and stores the
//! resulting credentials.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::helper::AuthHelper;
use crate::error::GarminError;
use crate::token::CredentialStore;
use crate::types::{PrimaryCredential, SessionCredential};

/// Credentials obtained from one helper run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquiredCredentials {
    pub primary: Option<PrimaryCredential>,
    pub session: Option<SessionCredential>,
}

#[derive(Debug, Deserialize)]
struct HelperPayload {
    #[serde(default)]
    oauth1: Option<PrimaryPayload>,
    #[serde(default)]
    oauth2: Option<SessionPayload>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PrimaryPayload {
    token: String,
    token_secret: String,
}

#[derive(Debug, Deserialize)]
struct SessionPayload {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

/// First well-formed JSON object in `output`, tolerating text before and after it.
pub fn locate_payload(output: &str) -> Option<Value> {
    output.match_indices('{').find_map(|(start, _)| {
        serde_json::Deserializer::from_str(&output[start..])
            .into_iter::<Value>()
            .next()
            .and_then(Result::ok)
            .filter(Value::is_object)
    })
}

/// Parse helper output into credentials, resolving relative expiry against `now`.
pub fn parse_helper_output(
    output: &str,
    now: DateTime<Utc>,
) -> Result<AcquiredCredentials, GarminError> {
    let value = locate_payload(output)
        .ok_or_else(|| GarminError::authentication("no JSON payload in auth helper output"))?;

    let payload: HelperPayload = serde_json::from_value(value).map_err(|e| {
        GarminError::authentication(format!("invalid auth helper payload: {}", e))
    })?;

    if let Some(message) = payload.error {
        return Err(GarminError::authentication(format!(
            "auth helper reported an error: {}",
            message
        )));
    }

    if payload.status.as_deref() == Some("needs_mfa") {
        let detail = payload
            .message
            .unwrap_or_else(|| "multi-factor authentication required".to_string());
        return Err(GarminError::authentication(format!(
            "interactive verification required: {}",
            detail
        )));
    }

    if payload.oauth1.is_none() && payload.oauth2.is_none() {
        return Err(GarminError::authentication(
            "auth helper payload contains no credentials",
        ));
    }

    let primary = payload
        .oauth1
        .map(|p| PrimaryCredential::new(p.token, p.token_secret));

    let session = payload
        .oauth2
        .map(|s| -> Result<SessionCredential, GarminError> {
            let mut session = SessionCredential::new(s.access_token);
            session.refresh_token = s.refresh_token;
            session.token_type = s.token_type;
            session.scope = s.scope;
            if let Some(seconds) = s.expires_in {
                let expires_at = chrono::Duration::try_seconds(seconds)
                    .and_then(|delta| now.checked_add_signed(delta))
                    .ok_or_else(|| {
                        GarminError::authentication(format!(
                            "expires_in out of range: {}",
                            seconds
                        ))
                    })?;
                session.expires_at = Some(expires_at);
            }
            Ok(session)
        })
        .transpose()?;

    Ok(AcquiredCredentials { primary, session })
}

const MAX_LOGGED_OUTPUT: usize = 512;

/// Helper output safe to log: lines that may carry a JSON payload are dropped and
/// the rest is truncated.
fn redact_output(output: &str) -> String {
    let kept: Vec<&str> = output
        .lines()
        .map(|line| if line.contains('{') { "[redacted]" } else { line })
        .collect();
    let joined = kept.join("\n");
    match joined.char_indices().nth(MAX_LOGGED_OUTPUT) {
        Some((cut, _)) => format!("{}...", &joined[..cut]),
        None => joined,
    }
}

/// Obtains credentials from the auth helper and stores them.
pub struct CredentialAcquirer {
    helper: Arc<dyn AuthHelper>,
    store: Arc<CredentialStore>,
}

impl CredentialAcquirer {
    /// Create an acquirer around an injected helper.
    pub fn new(helper: Arc<dyn AuthHelper>, store: Arc<CredentialStore>) -> Self {
        Self { helper, store }
    }

    /// Run the helper once and store whatever credentials it returned.
    ///
    /// Fails when identity or secret is absent, the helper exits non-zero, or its
    /// output carries no usable payload. Never retried.
    pub async fn acquire(
        &self,
        identity: Option<&str>,
        secret: Option<&SecretString>,
    ) -> Result<AcquiredCredentials, GarminError> {
        let identity = identity.filter(|i| !i.trim().is_empty());
        let secret = secret.filter(|s| !s.expose_secret().is_empty());

        let (Some(identity), Some(secret)) = (identity, secret) else {
            return Err(GarminError::authentication(
                "email and password must be configured to authenticate",
            ));
        };

        info!(identity, "Authenticating with Garmin Connect");

        let output = self.helper.run(identity, secret).await?;

        if !output.success {
            error!(
                exit_code = ?output.exit_code,
                output_bytes = output.output.len(),
                "Auth helper failed"
            );
            debug!(output = %redact_output(&output.output), "Auth helper output");
            return Err(GarminError::authentication(format!(
                "auth helper exited with status {}",
                output
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            )));
        }

        let acquired = parse_helper_output(&output.output, self.store.clock().now())
            .inspect_err(|e| warn!(error = %e, "Rejected auth helper output"))?;

        if let Some(primary) = &acquired.primary {
            self.store.store_primary(primary.clone());
        }
        if let Some(session) = &acquired.session {
            self.store.store_session(session.clone());
        }

        info!(
            primary = acquired.primary.is_some(),
            session = acquired.session.is_some(),
            "Authenticated and stored credentials"
        );

        Ok(acquired)
    }
}

#[cfg(test)]
mod tests {
    use super::super::helper::{HelperOutput, MockAuthHelper};
    use super::*;
    use crate::types::ManualClock;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn secret() -> SecretString {
        SecretString::new("pw".to_string())
    }

    fn acquirer(helper: MockAuthHelper) -> (CredentialAcquirer, Arc<CredentialStore>) {
        let store = Arc::new(
            CredentialStore::in_memory().with_clock(Arc::new(ManualClock::new(now()))),
        );
        (CredentialAcquirer::new(Arc::new(helper), store.clone()), store)
    }

    #[test]
    fn test_locate_payload_skips_leading_text() {
        let output = "INFO logging in\n{not json}\n{\"oauth2\":{\"access_token\":\"abc\"}}\ntrailing";
        let value = locate_payload(output).unwrap();
        assert_eq!(value["oauth2"]["access_token"], "abc");
    }

    #[test]
    fn test_redact_output_drops_payload_lines() {
        let output = "login failed\n{\"oauth2\":{\"access_token\":\"secret-abc\"}}\nexit";
        let logged = redact_output(output);

        assert!(!logged.contains("secret-abc"));
        assert_eq!(logged, "login failed\n[redacted]\nexit");
    }

    #[test]
    fn test_redact_output_truncates() {
        let logged = redact_output(&"x".repeat(2000));
        assert_eq!(logged.len(), MAX_LOGGED_OUTPUT + 3);
        assert!(logged.ends_with("..."));
    }

    #[test]
    fn test_locate_payload_none_without_object() {
        assert!(locate_payload("no braces here").is_none());
        assert!(locate_payload("{ broken").is_none());
    }

    #[test]
    fn test_parse_full_payload() {
        let output = r#"{"oauth1":{"token":"t","token_secret":"s"},
            "oauth2":{"access_token":"abc","refresh_token":"r","token_type":"Bearer",
                      "expires_in":3600,"scope":"CONNECT_READ"}}"#;

        let acquired = parse_helper_output(output, now()).unwrap();

        assert_eq!(acquired.primary, Some(PrimaryCredential::new("t", "s")));
        let session = acquired.session.unwrap();
        assert_eq!(session.refresh_token.as_deref(), Some("r"));
        assert_eq!(session.scope.as_deref(), Some("CONNECT_READ"));
        assert_eq!(session.expires_at, Some(now() + chrono::Duration::seconds(3600)));
    }

    #[test]
    fn test_parse_without_expires_in_never_expires() {
        let acquired =
            parse_helper_output(r#"{"oauth2":{"access_token":"abc"}}"#, now()).unwrap();
        assert!(acquired.session.unwrap().expires_at.is_none());
        assert!(acquired.primary.is_none());
    }

    #[test]
    fn test_parse_status_payloads() {
        let mfa = parse_helper_output(r#"{"status":"needs_mfa"}"#, now()).unwrap_err();
        assert!(mfa.to_string().contains("interactive verification"));

        let err = parse_helper_output(r#"{"error":"bad password"}"#, now()).unwrap_err();
        assert!(err.to_string().contains("bad password"));

        let empty = parse_helper_output("{}", now()).unwrap_err();
        assert!(empty.to_string().contains("no credentials"));
    }

    #[test]
    fn test_parse_schema_mismatch() {
        let result = parse_helper_output(r#"{"oauth1":{"token":"t"}}"#, now());
        assert!(matches!(result, Err(GarminError::Authentication { .. })));
    }

    #[tokio::test]
    async fn test_acquire_stores_session_with_expiry() {
        let mut helper = MockAuthHelper::new();
        helper
            .expect_run()
            .withf(|identity, _| identity == "runner@example.com")
            .times(1)
            .returning(|_, _| {
                Ok(HelperOutput::success(
                    "Logging in...\n{\"oauth2\":{\"access_token\":\"abc\",\"expires_in\":60}}",
                ))
            });
        let (acquirer, store) = acquirer(helper);

        acquirer
            .acquire(Some("runner@example.com"), Some(&secret()))
            .await
            .unwrap();

        let session = store.get_session().unwrap();
        assert_eq!(session.access_token, "abc");
        assert_eq!(session.expires_at, Some(now() + chrono::Duration::seconds(60)));
        assert!(store.get_primary().is_none());
    }

    #[tokio::test]
    async fn test_acquire_requires_identity_and_secret() {
        let mut helper = MockAuthHelper::new();
        helper.expect_run().times(0);
        let (acquirer, _) = acquirer(helper);

        assert!(acquirer.acquire(None, Some(&secret())).await.is_err());
        assert!(acquirer.acquire(Some("a"), None).await.is_err());
        assert!(acquirer
            .acquire(Some(""), Some(&secret()))
            .await
            .unwrap_err()
            .needs_reauth());
    }

    #[tokio::test]
    async fn test_acquire_non_zero_exit_fails_without_storing() {
        let mut helper = MockAuthHelper::new();
        helper.expect_run().returning(|_, _| {
            Ok(HelperOutput::failure(
                1,
                "{\"oauth2\":{\"access_token\":\"abc\"}}",
            ))
        });
        let (acquirer, store) = acquirer(helper);

        let error = acquirer
            .acquire(Some("a"), Some(&secret()))
            .await
            .unwrap_err();

        assert!(error.to_string().contains("exited with status 1"));
        assert!(store.snapshot().is_empty());
    }
}
