//! OAuth credentials for the YouTube Data API.
//!
//! Client secrets come from Google's client JSON; the OAuth client must be
//! of the "TVs and Limited Input devices" type, the only kind the device
//! flow accepts.  The token is kept on disk as JSON; an expired token is
//! refreshed when a refresh token exists.  When there is no token, or the
//! refresh is rejected, the device authorization flow runs and blocks until
//! the operator approves (or denies) on another device.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEVICE_CODE_URL: &str = "https://oauth2.googleapis.com/device/code";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Full YouTube scope; covers `playlistItems.delete` and is one of the
/// scopes the device flow allows.
pub const SCOPE: &str = "https://www.googleapis.com/auth/youtube";

const DEVICE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
/// Refresh this long before the recorded expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to read client secrets {path:?}: {source}")]
    Secrets {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed client secrets {path:?}: {reason}")]
    SecretsFormat { path: PathBuf, reason: String },
    #[error("oauth request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("oauth endpoint rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("authorization was denied")]
    Denied,
    #[error("device code expired before authorization")]
    Expired,
    #[error("no usable credentials, authorization required")]
    NotAuthorized,
    #[error("failed to persist token to {path:?}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

#[derive(Deserialize)]
struct SecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub async fn load(path: &Path) -> Result<Self, AuthError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| AuthError::Secrets {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(path, &raw)
    }

    fn parse(path: &Path, raw: &str) -> Result<Self, AuthError> {
        let format_err = |reason: String| AuthError::SecretsFormat {
            path: path.to_path_buf(),
            reason,
        };
        let file: SecretsFile = serde_json::from_str(raw).map_err(|e| format_err(e.to_string()))?;
        file.installed
            .or(file.web)
            .ok_or_else(|| format_err("expected an \"installed\" or \"web\" section".to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl StoredToken {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - chrono::Duration::seconds(EXPIRY_MARGIN_SECS) > now
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    #[serde(alias = "verification_uri")]
    verification_url: String,
    expires_in: u64,
    #[serde(default = "default_interval")]
    interval: u64,
}

fn default_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
}

/// Owns the current token and keeps it valid.
pub struct TokenManager {
    http: reqwest::Client,
    secrets: ClientSecrets,
    token_path: PathBuf,
    device_url: String,
    token: Mutex<Option<StoredToken>>,
}

impl TokenManager {
    pub fn new(http: reqwest::Client, secrets: ClientSecrets, token_path: PathBuf) -> Self {
        Self {
            http,
            secrets,
            token_path,
            device_url: DEVICE_CODE_URL.to_string(),
            token: Mutex::new(None),
        }
    }

    pub fn with_device_url(mut self, url: impl Into<String>) -> Self {
        self.device_url = url.into();
        self
    }

    #[cfg(test)]
    pub(crate) async fn seeded(self, token: StoredToken) -> Self {
        *self.token.lock().await = Some(token);
        self
    }

    /// Reads secrets and any persisted token.  An unreadable token file is
    /// treated as absent.
    pub async fn load(
        http: reqwest::Client,
        secrets_path: &Path,
        token_path: PathBuf,
    ) -> Result<Self, AuthError> {
        let secrets = ClientSecrets::load(secrets_path).await?;
        let stored = match tokio::fs::read_to_string(&token_path).await {
            Ok(raw) => match serde_json::from_str::<StoredToken>(&raw) {
                Ok(token) => Some(token),
                Err(e) => {
                    warn!("ignoring unreadable token file {:?}: {}", token_path, e);
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("failed to read token file {:?}: {}", token_path, e);
                None
            }
        };
        let manager = Self::new(http, secrets, token_path);
        *manager.token.lock().await = stored;
        Ok(manager)
    }

    /// Tries the persisted token, refreshing it when expired.  Returns
    /// false when only the interactive flow can produce a token, including
    /// when the refresh token was revoked or has expired.
    pub async fn try_stored(&self) -> Result<bool, AuthError> {
        let mut guard = self.token.lock().await;
        let refresh = match guard.as_ref() {
            Some(token) if token.is_fresh(Utc::now()) => return Ok(true),
            Some(StoredToken {
                refresh_token: Some(refresh),
                ..
            }) => refresh.clone(),
            _ => return Ok(false),
        };
        let token = match self.refresh(&refresh).await {
            Ok(token) => token,
            Err(e) => {
                warn!("failed to refresh credentials: {}", e);
                return Ok(false);
            }
        };
        self.persist(&token).await?;
        *guard = Some(token);
        Ok(true)
    }

    /// Runs the device flow and stores the granted token.
    pub async fn acquire(&self) -> Result<(), AuthError> {
        let mut guard = self.token.lock().await;
        let token = self.device_flow().await?;
        self.persist(&token).await?;
        *guard = Some(token);
        Ok(())
    }

    /// Current access token, refreshed when close to expiry.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        let mut guard = self.token.lock().await;
        let refresh = match guard.as_ref() {
            Some(token) if token.is_fresh(Utc::now()) => return Ok(token.access_token.clone()),
            Some(token) => token
                .refresh_token
                .clone()
                .ok_or(AuthError::NotAuthorized)?,
            None => return Err(AuthError::NotAuthorized),
        };
        let token = self.refresh(&refresh).await?;
        self.persist(&token).await?;
        let access = token.access_token.clone();
        *guard = Some(token);
        Ok(access)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<StoredToken, AuthError> {
        debug!("refreshing access token");
        let response = self
            .http
            .post(&self.secrets.token_uri)
            .form(&[
                ("client_id", self.secrets.client_id.as_str()),
                ("client_secret", self.secrets.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        let granted: TokenResponse = response.json().await?;
        info!("access token refreshed");
        Ok(into_stored(granted, Some(refresh_token.to_string())))
    }

    async fn device_flow(&self) -> Result<StoredToken, AuthError> {
        let response = self
            .http
            .post(&self.device_url)
            .form(&[
                ("client_id", self.secrets.client_id.as_str()),
                ("scope", SCOPE),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        let device: DeviceCodeResponse = response.json().await?;
        warn!(
            "authorization required: visit {} and enter code {}",
            device.verification_url, device.user_code
        );

        let deadline = tokio::time::Instant::now() + Duration::from_secs(device.expires_in);
        let mut interval = Duration::from_secs(device.interval);
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(AuthError::Expired);
            }
            tokio::time::sleep(interval).await;

            let response = self
                .http
                .post(&self.secrets.token_uri)
                .form(&[
                    ("client_id", self.secrets.client_id.as_str()),
                    ("client_secret", self.secrets.client_secret.as_str()),
                    ("device_code", device.device_code.as_str()),
                    ("grant_type", DEVICE_GRANT),
                ])
                .send()
                .await?;
            let status = response.status();
            if status.is_success() {
                let granted: TokenResponse = response.json().await?;
                info!("device authorization granted");
                return Ok(into_stored(granted, None));
            }

            let body = response.text().await.unwrap_or_default();
            let code = serde_json::from_str::<OAuthErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or_default();
            match code.as_str() {
                "authorization_pending" => debug!("waiting for device authorization"),
                "slow_down" => interval += Duration::from_secs(5),
                "access_denied" => return Err(AuthError::Denied),
                "expired_token" => return Err(AuthError::Expired),
                _ => {
                    return Err(AuthError::Rejected {
                        status: status.as_u16(),
                        body,
                    })
                }
            }
        }
    }

    async fn persist(&self, token: &StoredToken) -> Result<(), AuthError> {
        let persist_err = |source| AuthError::Persist {
            path: self.token_path.clone(),
            source,
        };
        if let Some(parent) = self.token_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(persist_err)?;
        }
        let json = serde_json::to_string_pretty(token)
            .map_err(|e| persist_err(std::io::Error::other(e)))?;
        tokio::fs::write(&self.token_path, json)
            .await
            .map_err(persist_err)
    }
}

fn into_stored(granted: TokenResponse, previous_refresh: Option<String>) -> StoredToken {
    StoredToken {
        access_token: granted.access_token,
        refresh_token: granted.refresh_token.or(previous_refresh),
        expires_at: Utc::now() + chrono::Duration::seconds(granted.expires_in),
    }
}
