//! OAuth 2.0 token lifecycle.
//!
//! The token record persists to disk (`data/ls_token.json`) and is reloaded
//! on startup. A token counts as valid until five minutes before its expiry;
//! past that, a refresh is attempted and a fresh issuance is the fallback.
//! Refresh is single-flight: the store's mutex is held across the whole
//! refresh, so concurrent callers wait and then read the new token.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::endpoints;
use crate::error::{BrokerError, BrokerResult};

/// Slack before expiry at which a token stops counting as valid.
const EXPIRY_SLACK_SECS: i64 = 5 * 60;
/// Token issuance timeout.
const ISSUE_TIMEOUT_SECS: u64 = 10;
/// Fallback lifetime when the venue omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 86_400;

/// Persisted token record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenRecord {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - chrono::Duration::seconds(EXPIRY_SLACK_SECS)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Disk-persisted OAuth token store with single-flight refresh.
pub struct TokenStore {
    http: reqwest::Client,
    base_url: String,
    appkey: String,
    appsecretkey: String,
    token_path: PathBuf,
    record: Mutex<Option<TokenRecord>>,
}

impl TokenStore {
    pub fn new(
        appkey: impl Into<String>,
        appsecretkey: impl Into<String>,
        token_path: impl AsRef<Path>,
    ) -> BrokerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(ISSUE_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            base_url: endpoints::BASE_URL.to_string(),
            appkey: appkey.into(),
            appsecretkey: appsecretkey.into(),
            token_path: token_path.as_ref().to_path_buf(),
            record: Mutex::new(None),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Load the persisted record; revalidate it (refresh, then reissue on
    /// failure) when inside the expiry slack.
    pub async fn initialize(&self) -> BrokerResult<()> {
        let mut guard = self.record.lock().await;

        if let Some(record) = self.load_from_disk() {
            if record.is_valid_at(Utc::now()) {
                info!("loaded valid token from disk");
                *guard = Some(record);
                return Ok(());
            }
            info!("persisted token is stale, revalidating");
            *guard = Some(record);
            return self.renew_locked(&mut guard).await;
        }

        self.renew_locked(&mut guard).await
    }

    /// The single public token accessor. Never returns a token within five
    /// minutes of its stored expiry.
    pub async fn get_valid_token(&self) -> BrokerResult<String> {
        let mut guard = self.record.lock().await;

        if let Some(record) = guard.as_ref() {
            if record.is_valid_at(Utc::now()) {
                return Ok(record.access_token.clone());
            }
        }

        self.renew_locked(&mut guard).await?;
        Ok(guard
            .as_ref()
            .expect("renew_locked populated the record")
            .access_token
            .clone())
    }

    /// Refresh if possible, issue fresh otherwise. Caller holds the lock, so
    /// this is the single-flight critical section.
    async fn renew_locked(
        &self,
        guard: &mut tokio::sync::MutexGuard<'_, Option<TokenRecord>>,
    ) -> BrokerResult<()> {
        let refresh_token = guard.as_ref().and_then(|r| r.refresh_token.clone());

        let record = match refresh_token {
            Some(refresh) => match self.refresh(&refresh).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "token refresh failed, issuing a fresh token");
                    self.issue().await?
                }
            },
            None => self.issue().await?,
        };

        self.persist(&record);
        **guard = Some(record);
        Ok(())
    }

    async fn issue(&self) -> BrokerResult<TokenRecord> {
        let params = [
            ("grant_type", "client_credentials"),
            ("appkey", self.appkey.as_str()),
            ("appsecretkey", self.appsecretkey.as_str()),
            ("scope", "oob"),
        ];
        self.token_request(&params).await
    }

    async fn refresh(&self, refresh_token: &str) -> BrokerResult<TokenRecord> {
        let params = [
            ("grant_type", "refresh_token"),
            ("appkey", self.appkey.as_str()),
            ("appsecretkey", self.appsecretkey.as_str()),
            ("refresh_token", refresh_token),
        ];
        self.token_request(&params).await
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> BrokerResult<TokenRecord> {
        let url = format!("{}{}", self.base_url, endpoints::OAUTH_TOKEN);
        let response = self.http.post(&url).form(params).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Auth {
                message: format!("token endpoint answered {status}: {body}"),
            });
        }

        let payload: TokenResponse = response.json().await?;
        let expires_in = payload.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let record = TokenRecord {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token,
            token_type: payload.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in),
        };
        info!(expires_in, "access token obtained");
        Ok(record)
    }

    /// Revoke the current token and clear state.
    pub async fn revoke(&self) -> BrokerResult<bool> {
        let mut guard = self.record.lock().await;
        let Some(record) = guard.take() else {
            warn!("no token to revoke");
            return Ok(false);
        };

        let url = format!("{}{}", self.base_url, endpoints::OAUTH_REVOKE);
        let params = [
            ("appkey", self.appkey.as_str()),
            ("appsecretkey", self.appsecretkey.as_str()),
            ("token", record.access_token.as_str()),
        ];
        let response = self.http.post(&url).form(&params).send().await?;
        let revoked = response.status().is_success();
        if revoked {
            let _ = std::fs::remove_file(&self.token_path);
            info!("token revoked");
        }
        Ok(revoked)
    }

    fn load_from_disk(&self) -> Option<TokenRecord> {
        let raw = std::fs::read_to_string(&self.token_path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, path = ?self.token_path, "failed to parse token file");
                None
            }
        }
    }

    fn persist(&self, record: &TokenRecord) {
        if let Some(parent) = self.token_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(record) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(&self.token_path, raw) {
                    warn!(error = %e, path = ?self.token_path, "failed to persist token");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize token record"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(expires_in_secs: i64) -> TokenRecord {
        TokenRecord {
            access_token: "tok".into(),
            refresh_token: None,
            token_type: "Bearer".into(),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
        }
    }

    #[test]
    fn test_validity_honours_five_minute_slack() {
        assert!(record(EXPIRY_SLACK_SECS + 60).is_valid_at(Utc::now()));
        // Inside the slack window: no longer valid.
        assert!(!record(EXPIRY_SLACK_SECS - 60).is_valid_at(Utc::now()));
        assert!(!record(-10).is_valid_at(Utc::now()));
    }

    #[tokio::test]
    async fn test_valid_cached_token_returned_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new("key", "secret", dir.path().join("token.json")).unwrap();
        *store.record.lock().await = Some(record(3600));

        let token = store.get_valid_token().await.unwrap();
        assert_eq!(token, "tok");
    }

    #[tokio::test]
    async fn test_disk_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let store = TokenStore::new("key", "secret", &path).unwrap();

        store.persist(&record(3600));
        let loaded = store.load_from_disk().unwrap();
        assert_eq!(loaded.access_token, "tok");
        assert_eq!(loaded.token_type, "Bearer");
    }
}
