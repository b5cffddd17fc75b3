//! Service-account authentication for the Google Calendar API.
//!
//! A signed RS256 assertion is exchanged at the key's `token_uri` for a
//! short-lived bearer token, which is cached until shortly before it expires.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::traits::{CalendarError, TokenSource};

pub const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before the token actually expires.
const EXPIRY_SKEW_SECS: i64 = 60;
/// Upper bound on a lifetime reported by the token endpoint.
const MAX_TOKEN_LIFETIME_SECS: i64 = 24 * 3600;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.into()
}

/// The fields of a service-account key file this crate needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl ServiceAccountKey {
    pub fn from_json(raw: &str) -> Result<Self, CalendarError> {
        serde_json::from_str(raw).map_err(|e| CalendarError::Credentials(e.to_string()))
    }

    pub async fn from_file(path: &Path) -> Result<Self, CalendarError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            CalendarError::Credentials(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Build the signed assertion presented to the token endpoint.
    pub fn assertion(&self, scope: &str, now: DateTime<Utc>) -> Result<String, CalendarError> {
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| CalendarError::Credentials(format!("invalid private key: {e}")))?;
        jsonwebtoken::encode(&header, &claims, &key)
            .map_err(|e| CalendarError::Credentials(format!("failed to sign assertion: {e}")))
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Token source backed by a service-account key file on disk.
///
/// The key is re-read on every refresh so rotated keys are picked up without a restart.
pub struct ServiceAccountTokenSource {
    key_path: PathBuf,
    scope: String,
    client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenSource {
    pub fn new(key_path: PathBuf, client: reqwest::Client) -> Self {
        Self {
            key_path,
            scope: CALENDAR_SCOPE.to_string(),
            client,
            cached: Mutex::new(None),
        }
    }

    async fn fetch_token(&self) -> Result<CachedToken, CalendarError> {
        let key = ServiceAccountKey::from_file(&self.key_path).await?;
        let now = Utc::now();
        let assertion = key.assertion(&self.scope, now)?;

        let response = self
            .client
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| CalendarError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CalendarError::Auth {
                status: status.as_u16(),
                message: super::summarize_error_body(&body),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CalendarError::MalformedResponse(e.to_string()))?;
        let lifetime = token
            .expires_in
            .unwrap_or(ASSERTION_LIFETIME_SECS)
            .clamp(0, MAX_TOKEN_LIFETIME_SECS);
        tracing::debug!(client = %key.client_email, lifetime, "calendar access token refreshed");

        Ok(CachedToken {
            token: token.access_token,
            expires_at: now + Duration::seconds(lifetime),
        })
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    async fn access_token(&self) -> Result<String, CalendarError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Utc::now() + Duration::seconds(EXPIRY_SKEW_SECS) < token.expires_at {
                return Ok(token.token.clone());
            }
        }

        let fresh = self.fetch_token().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    fn name(&self) -> &str {
        "service_account"
    }
}

/// Fixed bearer token, for pre-minted credentials and tests.
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<String, CalendarError> {
        Ok(self.token.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}
