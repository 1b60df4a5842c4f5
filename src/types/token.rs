//! Token Types
//!
//! Primary (OAuth1) and session (OAuth2) credentials plus the durable record that
//! holds both slots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default token type used when the provider did not report one.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// `now > expires_at`; a missing expiry never expires.
fn expired_at(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.map(|exp| now > exp).unwrap_or(false)
}

/// `now + threshold > expires_at`; a missing expiry is never due.
fn expiring_soon_at(
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    threshold: Duration,
) -> bool {
    let Some(exp) = expires_at else {
        return false;
    };

    let shifted = chrono::Duration::from_std(threshold)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta));

    match shifted {
        Some(deadline) => deadline > exp,
        // Threshold beyond the representable range: everything is due.
        None => true,
    }
}

/// Long-lived token/secret pair used for the legacy signing step.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryCredential {
    /// OAuth1 token.
    pub token: String,
    /// OAuth1 token secret.
    pub token_secret: String,
    /// Absolute expiry, if the provider reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PrimaryCredential {
    /// Create a primary credential without expiry.
    pub fn new(token: impl Into<String>, token_secret: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            token_secret: token_secret.into(),
            expires_at: None,
        }
    }

    /// Set the absolute expiry.
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Check if the credential is expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check expiry against an explicit instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        expired_at(self.expires_at, now)
    }

    /// Check if the credential expires within `threshold`.
    pub fn is_expiring_soon(&self, threshold: Duration) -> bool {
        self.is_expiring_soon_at(Utc::now(), threshold)
    }

    /// Check if the credential expires within `threshold` of `now`.
    pub fn is_expiring_soon_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        expiring_soon_at(self.expires_at, now, threshold)
    }
}

impl std::fmt::Debug for PrimaryCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimaryCredential")
            .field("token", &"[REDACTED]")
            .field("token_secret", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Short-lived bearer token plus optional refresh token and scope.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredential {
    /// OAuth2 access token.
    pub access_token: String,
    /// OAuth2 refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Token type (usually "Bearer").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Granted scope, space separated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Absolute expiry, if the provider reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionCredential {
    /// Create a session credential with only an access token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: None,
            scope: None,
            expires_at: None,
        }
    }

    /// Set the refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Set the token type.
    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = Some(token_type.into());
        self
    }

    /// Set the scope.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Set the absolute expiry.
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Check if the credential is expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check expiry against an explicit instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        expired_at(self.expires_at, now)
    }

    /// Check if the credential expires within `threshold`.
    pub fn is_expiring_soon(&self, threshold: Duration) -> bool {
        self.is_expiring_soon_at(Utc::now(), threshold)
    }

    /// Check if the credential expires within `threshold` of `now`.
    pub fn is_expiring_soon_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        expiring_soon_at(self.expires_at, now, threshold)
    }

    /// Check if has refresh token.
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Format as Authorization header value.
    pub fn authorization_header(&self) -> String {
        format!(
            "{} {}",
            self.token_type.as_deref().unwrap_or(DEFAULT_TOKEN_TYPE),
            self.access_token
        )
    }
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredential")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Durable record holding both credential slots.
///
/// Field names are part of the on-disk format.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth1_token: Option<PrimaryCredential>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth2_token: Option<SessionCredential>,
}

impl TokenRecord {
    /// Check if neither slot is populated.
    pub fn is_empty(&self) -> bool {
        self.oauth1_token.is_none() && self.oauth2_token.is_none()
    }
}
