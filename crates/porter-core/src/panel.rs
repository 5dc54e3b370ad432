//! Authenticated client for the VPN panel REST API
//!
//! Exchanges admin credentials for a bearer token and retries a request
//! exactly once after re-authenticating when the panel answers 401. The
//! token lives inside the client instance behind a mutex; concurrent
//! refreshes serialize, and a redundant re-login is harmless.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

/// Account lifecycle state as reported by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Disabled,
    Limited,
    Expired,
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
            Self::Limited => "limited",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// User record returned by the panel. Read-only from the bot's perspective
/// and never cached; tolerant of missing fields.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountRecord {
    pub username: String,
    #[serde(default)]
    pub status: AccountStatus,
    /// Bytes consumed so far.
    #[serde(default)]
    pub used_traffic: u64,
    /// Byte cap; 0 or absent means unlimited.
    #[serde(default)]
    pub data_limit: Option<u64>,
    /// Unix expiry timestamp; absent means unlimited.
    #[serde(default)]
    pub expire: Option<i64>,
    #[serde(default)]
    pub subscription_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

impl AccountRecord {
    /// Data limit with the 0-means-unlimited sentinel folded in.
    pub fn limit(&self) -> Option<u64> {
        self.data_limit.filter(|l| *l > 0)
    }
}

/// Subscription details for config delivery.
#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    pub url: String,
    pub links: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TokenReply {
    access_token: String,
}

/// Panel API client. One instance (and one underlying connection pool) is
/// shared for the process lifetime.
pub struct PanelClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
    token: Mutex<Option<String>>,
}

impl std::fmt::Debug for PanelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish()
    }
}

impl PanelClient {
    /// Create a client for the panel at `base_url`. Requests are bounded at
    /// 15 seconds.
    pub fn new(base_url: &str, username: String, password: String) -> Result<Self> {
        Url::parse(base_url).with_context(|| format!("invalid panel URL: {base_url}"))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            password,
            token: Mutex::new(None),
        })
    }

    /// Fetch a user. `Ok(None)` means the panel definitively knows no such
    /// user; transport and authorization failures are errors.
    pub async fn get_user(&self, username: &str) -> Result<Option<AccountRecord>> {
        let path = format!("/api/user/{username}");
        match self.fetch(Method::GET, &path, None).await? {
            Some(value) => {
                let record: AccountRecord =
                    serde_json::from_value(value).context("unexpected user payload shape")?;
                debug!("retrieved user record for {username}");
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Create a user with the given data cap and lifetime.
    pub async fn create_user(
        &self,
        username: &str,
        data_limit: u64,
        expire_days: u32,
    ) -> Result<Option<AccountRecord>> {
        let expire = Utc::now().timestamp() + i64::from(expire_days) * 86_400;
        let body = serde_json::json!({
            "username": username,
            "data_limit": data_limit,
            "expire": expire,
            "status": "active",
            "proxies": {"vless": {}, "vmess": {}},
            "inbounds": {"vless": [], "vmess": []},
        });

        match self.fetch(Method::POST, "/api/user", Some(body)).await? {
            Some(value) => {
                info!("created panel user {username}");
                Ok(Some(serde_json::from_value(value).context("unexpected user payload shape")?))
            }
            None => Ok(None),
        }
    }

    /// Modify arbitrary fields of a user.
    pub async fn modify_user(&self, username: &str, fields: Value) -> Result<Option<AccountRecord>> {
        let path = format!("/api/user/{username}");
        match self.fetch(Method::PUT, &path, Some(fields)).await? {
            Some(value) => {
                info!("modified panel user {username}");
                Ok(Some(serde_json::from_value(value).context("unexpected user payload shape")?))
            }
            None => Ok(None),
        }
    }

    /// Reset a user's traffic counter.
    pub async fn reset_traffic(&self, username: &str) -> Result<Option<AccountRecord>> {
        let path = format!("/api/user/{username}/reset");
        match self.fetch(Method::POST, &path, None).await? {
            Some(value) => {
                info!("reset traffic for panel user {username}");
                Ok(Some(serde_json::from_value(value).context("unexpected user payload shape")?))
            }
            None => Ok(None),
        }
    }

    /// Subscription link for a user, derived from the user record.
    pub async fn get_subscription(&self, username: &str) -> Result<Option<SubscriptionInfo>> {
        let Some(record) = self.get_user(username).await? else {
            return Ok(None);
        };
        Ok(record.subscription_url.map(|url| SubscriptionInfo {
            url,
            links: record.links,
        }))
    }

    /// Whether the panel answers at all. Used by the status command.
    pub async fn check_connection(&self) -> bool {
        match self.fetch(Method::GET, "/api/system", None).await {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                error!("panel connectivity check failed: {e:#}");
                false
            }
        }
    }

    // ── auth + transport ──

    /// Exchange admin credentials for a bearer token.
    async fn login(&self) -> Result<String> {
        let url = format!("{}/api/admin/token", self.base_url);
        let form = [
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
        ];

        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .context("panel login request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("panel login failed with status {status}");
        }

        let reply: TokenReply = response
            .json()
            .await
            .context("invalid token reply from panel")?;
        info!("authenticated with panel at {}", self.base_url);
        Ok(reply.access_token)
    }

    /// Current token, logging in first if none is cached.
    async fn cached_or_login(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let token = self.login().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    /// Force a fresh login. Holding the lock across the login serializes
    /// concurrent 401-triggered refreshes.
    async fn refresh_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        let token = self.login().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    async fn issue(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        token: &str,
    ) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method.clone(), &url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }
        request
            .send()
            .await
            .with_context(|| format!("panel request {method} {path} failed"))
    }

    /// Send an authenticated request, re-authenticating and retrying exactly
    /// once if the token is rejected.
    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Response> {
        let token = self.cached_or_login().await?;
        let response = self.issue(&method, path, body, &token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!("panel token rejected, re-authenticating");
        let token = self.refresh_token().await?;
        self.issue(&method, path, body, &token).await
    }

    /// Authenticated request returning the JSON body. 404 maps to `Ok(None)`;
    /// a second 401 and any other non-2xx status are errors.
    async fn fetch(&self, method: Method, path: &str, body: Option<Value>) -> Result<Option<Value>> {
        let response = self.send(method, path, body.as_ref()).await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::UNAUTHORIZED {
            bail!("panel rejected credentials for {path} after re-authentication");
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("panel request {path} failed: {status} {text}");
            bail!("panel request {path} returned {status}");
        }

        let value = response
            .json()
            .await
            .context("invalid JSON from panel")?;
        Ok(Some(value))
    }

    /// Seed the token cache, bypassing login. Test hook.
    #[cfg(test)]
    pub(crate) async fn prime_token(&self, token: &str) {
        *self.token.lock().await = Some(token.to_string());
    }
}
