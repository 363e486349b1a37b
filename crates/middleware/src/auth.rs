//! Bearer token providers
//!
//! The connectivity layer never acquires tokens itself; it asks a
//! [`TokenProvider`] for one before every platform call and invalidates it
//! when the platform answers 401.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::AuthError;
use wflink_metadata::AuthConfig;

/// Tokens are refreshed this long before the endpoint says they expire
const REFRESH_MARGIN: Duration = Duration::from_secs(30);
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current bearer token; an empty string means "send no Authorization header"
    async fn token(&self) -> Result<String, AuthError>;

    /// Drop any cached token so the next call fetches a fresh one
    fn invalidate(&self);
}

/// Fixed token (or none at all)
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn anonymous() -> Self {
        Self::new("")
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String, AuthError> {
        Ok(self.token.clone())
    }

    fn invalidate(&self) {}
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    refresh_at: Option<Instant>,
}

/// OAuth2 client-credentials grant with an in-process token cache
pub struct ClientCredentialsProvider {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<CachedToken>>,
    // Set by invalidate(), which cannot take the async lock
    stale: AtomicBool,
}

impl ClientCredentialsProvider {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let http = Client::builder()
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Request(e.to_string()))?;
        Ok(Self {
            http,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cached: Mutex::new(None),
            stale: AtomicBool::new(false),
        })
    }

    async fn fetch(&self) -> Result<CachedToken, AuthError> {
        debug!(url = %self.token_url, client_id = %self.client_id, "Requesting access token");

        let resp = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        if body.access_token.is_empty() {
            return Err(AuthError::InvalidResponse("empty access_token".to_string()));
        }

        let refresh_at = body.expires_in.map(|secs| {
            Instant::now() + Duration::from_secs(secs).saturating_sub(REFRESH_MARGIN)
        });
        info!(expires_in = ?body.expires_in, "Obtained access token");

        Ok(CachedToken {
            value: body.access_token,
            refresh_at,
        })
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsProvider {
    async fn token(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;

        if self.stale.swap(false, Ordering::AcqRel) {
            *cached = None;
        }

        if let Some(token) = cached.as_ref() {
            let fresh = token.refresh_at.map(|t| Instant::now() < t).unwrap_or(true);
            if fresh {
                return Ok(token.value.clone());
            }
        }

        let token = self.fetch().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    fn invalidate(&self) {
        debug!("Access token invalidated");
        self.stale.store(true, Ordering::Release);
    }
}

/// Build the provider described by the auth section of the settings
pub fn token_provider_from_config(config: &AuthConfig) -> Result<Arc<dyn TokenProvider>, AuthError> {
    let provider: Arc<dyn TokenProvider> = match config {
        AuthConfig::Anonymous => Arc::new(StaticTokenProvider::anonymous()),
        AuthConfig::Static { token } => Arc::new(StaticTokenProvider::new(token.clone())),
        AuthConfig::ClientCredentials {
            token_url,
            client_id,
            client_secret,
        } => Arc::new(ClientCredentialsProvider::new(
            token_url.clone(),
            client_id.clone(),
            client_secret.clone(),
        )?),
    };
    Ok(provider)
}
