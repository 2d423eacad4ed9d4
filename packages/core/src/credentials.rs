//! Credential broker for the content platform.
//!
//! Holds one access credential per account, refreshes proactively inside
//! a safety margin of expiry, and surfaces a typed
//! `ReauthorizationRequired` failure when the refresh credential itself
//! is rejected; that is the single condition allowed to auto-pause a test.
//!
//! The broker's in-memory cache is shared by every rotation and poll
//! task, so all reads and refreshes happen under one async mutex; two
//! tasks racing on an expired credential produce one refresh, not two.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::rotation::error::RotationError;

/// Minutes before expiry at which a credential is refreshed proactively.
const EXPIRY_MARGIN_MINUTES: i64 = 5;

#[derive(Debug, Clone)]
pub struct AccessCredential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessCredential {
    /// `true` when the token is already unusable or will be within the
    /// safety margin.
    pub fn is_expiring(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at <= now + margin
    }
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("no stored credential for account {account_id}")]
    NotFound { account_id: String },

    #[error("refresh rejected: {message}")]
    RefreshRejected { message: String },

    #[error("credential endpoint unreachable: {message}")]
    Network { message: String },

    #[error("credential storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Narrow interface to wherever credentials durably live.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_credential(
        &self,
        account_id: &str,
    ) -> Result<Option<AccessCredential>, CredentialError>;

    /// Exchange the stored refresh credential for a new access
    /// credential. A rejected exchange means human re-authorization.
    async fn refresh_credential(&self, account_id: &str)
        -> Result<AccessCredential, CredentialError>;

    async fn save_credential(
        &self,
        account_id: &str,
        credential: &AccessCredential,
    ) -> Result<(), CredentialError>;
}

/// Per-account credential cache with proactive refresh.
pub struct CredentialBroker {
    store: Arc<dyn CredentialStore>,
    cache: Mutex<HashMap<String, AccessCredential>>,
    expiry_margin: Duration,
}

impl CredentialBroker {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
            expiry_margin: Duration::minutes(EXPIRY_MARGIN_MINUTES),
        }
    }

    /// A valid access token for `account_id`, refreshing first if the
    /// cached or stored credential is within the expiry margin.
    pub async fn access_token(&self, account_id: &str) -> Result<String, RotationError> {
        let now = Utc::now();
        let mut cache = self.cache.lock().await;

        if let Some(credential) = cache.get(account_id) {
            if !credential.is_expiring(now, self.expiry_margin) {
                return Ok(credential.access_token.clone());
            }
        }

        let stored = self
            .store
            .get_credential(account_id)
            .await
            .map_err(|err| self.map_error(account_id, err))?;

        if let Some(credential) = stored {
            if !credential.is_expiring(now, self.expiry_margin) {
                let token = credential.access_token.clone();
                cache.insert(account_id.to_string(), credential);
                return Ok(token);
            }
        }

        let refreshed = self.refresh_locked(account_id, &mut cache).await?;
        Ok(refreshed)
    }

    /// Unconditionally refresh, used after a 401 from the platform.
    pub async fn force_refresh(&self, account_id: &str) -> Result<String, RotationError> {
        let mut cache = self.cache.lock().await;
        self.refresh_locked(account_id, &mut cache).await
    }

    async fn refresh_locked(
        &self,
        account_id: &str,
        cache: &mut HashMap<String, AccessCredential>,
    ) -> Result<String, RotationError> {
        let credential = self
            .store
            .refresh_credential(account_id)
            .await
            .map_err(|err| self.map_error(account_id, err))?;

        self.store
            .save_credential(account_id, &credential)
            .await
            .map_err(|err| self.map_error(account_id, err))?;

        tracing::info!(
            "Refreshed platform credential for account {} (expires {})",
            account_id,
            credential.expires_at
        );

        let token = credential.access_token.clone();
        cache.insert(account_id.to_string(), credential);
        Ok(token)
    }

    fn map_error(&self, account_id: &str, err: CredentialError) -> RotationError {
        match err {
            CredentialError::NotFound { .. } | CredentialError::RefreshRejected { .. } => {
                RotationError::reauthorization_required(account_id)
            }
            CredentialError::Network { message } => RotationError::transient(message),
            CredentialError::Storage(source) => RotationError::Persistence(source),
        }
    }
}

// ---- SQLite-backed store ----------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

/// Credential store persisting to the `platform_credentials` table and
/// exchanging refresh tokens against the platform's token endpoint.
pub struct SqliteCredentialStore {
    pool: SqlitePool,
    http: reqwest::Client,
    token_url: String,
}

impl SqliteCredentialStore {
    pub fn new(pool: SqlitePool, token_url: String) -> Self {
        Self {
            pool,
            http: reqwest::Client::new(),
            token_url,
        }
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn get_credential(
        &self,
        account_id: &str,
    ) -> Result<Option<AccessCredential>, CredentialError> {
        let row = sqlx::query(
            "SELECT access_token, refresh_token, expires_at
             FROM platform_credentials WHERE account_id = ?",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        let credential = row.and_then(|row| {
            let access_token: String = row.try_get("access_token").ok()?;
            let refresh_token: String = row.try_get("refresh_token").ok()?;
            let expires_raw: String = row.try_get("expires_at").ok()?;
            let expires_at = DateTime::parse_from_rfc3339(&expires_raw)
                .ok()?
                .with_timezone(&Utc);
            Some(AccessCredential {
                access_token,
                refresh_token,
                expires_at,
            })
        });

        Ok(credential)
    }

    async fn refresh_credential(
        &self,
        account_id: &str,
    ) -> Result<AccessCredential, CredentialError> {
        let existing = self.get_credential(account_id).await?.ok_or_else(|| {
            CredentialError::NotFound {
                account_id: account_id.to_string(),
            }
        })?;

        let response = self
            .http
            .post(&self.token_url)
            .json(&serde_json::json!({
                "grant_type": "refresh_token",
                "refresh_token": &existing.refresh_token,
            }))
            .send()
            .await
            .map_err(|err| CredentialError::Network {
                message: err.to_string(),
            })?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::RefreshRejected {
                message: format!("token endpoint returned HTTP {}: {}", status, body),
            });
        }
        if !status.is_success() {
            return Err(CredentialError::Network {
                message: format!("token endpoint returned HTTP {}", status),
            });
        }

        let token: TokenResponse =
            response
                .json()
                .await
                .map_err(|err| CredentialError::Network {
                    message: format!("token response parse failed: {}", err),
                })?;

        let expires_in = token.expires_in.unwrap_or(3600);
        Ok(AccessCredential {
            access_token: token.access_token,
            // Some platforms rotate the refresh token, some omit it.
            refresh_token: token.refresh_token.unwrap_or(existing.refresh_token),
            expires_at: Utc::now() + Duration::seconds(expires_in),
        })
    }

    async fn save_credential(
        &self,
        account_id: &str,
        credential: &AccessCredential,
    ) -> Result<(), CredentialError> {
        sqlx::query(
            "INSERT INTO platform_credentials (account_id, access_token, refresh_token, expires_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(account_id) DO UPDATE SET
               access_token = excluded.access_token,
               refresh_token = excluded.refresh_token,
               expires_at = excluded.expires_at",
        )
        .bind(account_id)
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(credential.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
