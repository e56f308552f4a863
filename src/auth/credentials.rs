//! OAuth2 credential lifecycle: code exchange, lazy refresh and persistence.

use crate::auth::token_store::{StoredToken, TokenStore};
use crate::config::OAuthConfig;
use crate::error::{DriveError, Result};
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::sync::RwLock;
use tokio::sync::Mutex;

/// Token response from the OAuth2 token endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: i64,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    scope: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// In-memory credential record.
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub client_id: String,
    pub expiry: DateTime<Utc>,
    pub token_endpoint: String,
    pub token_type: String,
    pub scope: String,
}

impl Credentials {
    pub fn is_valid(&self) -> bool {
        Utc::now() < self.expiry
    }

    fn to_stored(&self) -> StoredToken {
        StoredToken {
            access_token: self.access_token.clone(),
            expiry: self.expiry,
            token_type: self.token_type.clone(),
            scope: self.scope.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

/// Process-wide owner of the access token. Every authenticated backend call
/// goes through [`CredentialManager::authorize`].
pub struct CredentialManager {
    client: Client,
    config: OAuthConfig,
    store: TokenStore,
    state: RwLock<Option<Credentials>>,
    refresh_lock: Mutex<()>,
}

impl CredentialManager {
    /// Manager without credentials; `exchange_code` must run before use.
    pub fn new(config: OAuthConfig, store: TokenStore) -> Self {
        Self {
            client: Client::new(),
            config,
            store,
            state: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Restore a manager from the persisted record for this client.
    ///
    /// Returns `Ok(None)` when nothing is stored, or the stored token is
    /// expired and cannot be refreshed.
    pub fn from_disk(config: OAuthConfig, store: TokenStore) -> Result<Option<Self>> {
        let stored = match store.load_tokens(&config.client_id)? {
            Some(stored) => stored,
            None => return Ok(None),
        };
        if !stored.is_usable() {
            info!("Stored credentials expired without refresh token, login required");
            return Ok(None);
        }

        let credentials = Credentials {
            access_token: stored.access_token,
            refresh_token: stored.refresh_token.filter(|t| !t.is_empty()),
            client_id: config.client_id.clone(),
            expiry: stored.expiry,
            token_endpoint: config.token_endpoint.clone(),
            token_type: stored.token_type,
            scope: stored.scope,
        };
        info!("Restored credentials, expires on {}", credentials.expiry);

        let manager = Self::new(config, store);
        *manager.write_state() = Some(credentials);
        Ok(Some(manager))
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    pub fn oauth_config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Snapshot of the current credentials, if any.
    pub fn credentials(&self) -> Option<Credentials> {
        self.read_state().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read_state().is_some()
    }

    /// Exchange an authorization code for an access/refresh token pair.
    pub async fn exchange_code(&self, code: &str) -> Result<()> {
        info!("Exchanging authorization code for client_id={}", self.config.client_id);
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code", code),
        ];

        let response = self
            .client
            .post(&self.config.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| DriveError::AuthError(format!("token exchange failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::AuthError(format!(
                "token exchange failed with status {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| DriveError::AuthError(format!("failed to parse token response: {}", e)))?;
        self.store_token(token);
        Ok(())
    }

    /// Make sure the held access token is valid, refreshing it if needed.
    ///
    /// Concurrent callers that find the token expired serialize on the
    /// refresh lock; only the first one performs the network call.
    pub async fn ensure_valid(&self) -> Result<()> {
        if self.current_valid().is_some() {
            return Ok(());
        }

        let _guard = self.refresh_lock.lock().await;
        if self.current_valid().is_some() {
            return Ok(());
        }

        let refresh_token = self
            .read_state()
            .as_ref()
            .and_then(|c| c.refresh_token.clone())
            .ok_or(DriveError::SessionExpired)?;

        info!("Access token expired, refreshing");
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("refresh_token", refresh_token.as_str()),
        ];
        let response = self
            .client
            .post(&self.config.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| DriveError::Transport(format!("token refresh failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Token refresh rejected with status {}: {}", status, body);
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    DriveError::SessionExpired
                }
                s if s.is_server_error() => {
                    DriveError::Transport(format!("token endpoint returned {}", s))
                }
                s => DriveError::AuthError(format!("token refresh failed with status {}", s)),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| DriveError::AuthError(format!("failed to parse refresh response: {}", e)))?;
        self.store_token(token);
        Ok(())
    }

    /// Attach a bearer token to the request, refreshing first if needed.
    pub async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.access_token().await?;
        Ok(request.bearer_auth(token))
    }

    /// Currently valid access token.
    pub async fn access_token(&self) -> Result<String> {
        self.ensure_valid().await?;
        self.current_valid().ok_or(DriveError::SessionExpired)
    }

    fn current_valid(&self) -> Option<String> {
        self.read_state()
            .as_ref()
            .filter(|c| c.is_valid())
            .map(|c| c.access_token.clone())
    }

    fn store_token(&self, token: TokenResponse) {
        let expiry = Utc::now() + Duration::seconds(token.expires_in);
        let credentials = {
            let mut state = self.write_state();
            // a refresh response may omit the refresh token, keep the old one
            let refresh_token = token
                .refresh_token
                .filter(|t| !t.is_empty())
                .or_else(|| state.as_ref().and_then(|c| c.refresh_token.clone()));
            let credentials = Credentials {
                access_token: token.access_token,
                refresh_token,
                client_id: self.config.client_id.clone(),
                expiry,
                token_endpoint: self.config.token_endpoint.clone(),
                token_type: token.token_type,
                scope: token.scope,
            };
            *state = Some(credentials.clone());
            credentials
        };
        info!("Stored token, expires on {}", expiry);

        // a failed disk write only costs a login after restart
        if let Err(e) = self
            .store
            .save_tokens(&self.config.client_id, &credentials.to_stored())
        {
            warn!("Failed to store token to disk: {}", e);
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, Option<Credentials>> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, Option<Credentials>> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}
