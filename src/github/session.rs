//! Rate-aware session on the GitHub REST API.
//!
//! `ApiSession` wraps an `Octocrab` instance and issues raw GET requests so
//! that response headers stay visible. After every successful request it
//! refreshes the cached [`RateState`]; before every request it consults the
//! [`RateLimitPolicy`] and, if the quota is nearly exhausted, sleeps until the
//! reset.
//!
//! The session is mutated only by [`ApiSession::request`] (rate state) and
//! [`ApiSession::set_credentials`] (authorization header, clears rate state).

use chrono::Utc;
use octocrab::Octocrab;
use serde_json::Value;
use tracing::{debug, warn};

use super::error::ApiError;
use super::rate::{RateLimitPolicy, RateState};
use super::{ApiClient, ApiResponse};
use crate::config::{ConfigError, CrawlerConfig, DEFAULT_API_BASE};

const ACCEPT_JSON: &str = "application/vnd.github+json";

/// Settings for building a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// API root, e.g. `https://api.github.com`.
    pub api_base: String,
    pub token: Option<String>,
    pub rate_policy: RateLimitPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token: None,
            rate_policy: RateLimitPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Reads the session settings from the crawler configuration.
    pub fn from_config(config: &CrawlerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            api_base: config.api_base().to_string(),
            token: config.github_token().map(String::from),
            rate_policy: RateLimitPolicy {
                sleep_when_exhausted: config.rate_sleep()?,
                threshold: config.rate_threshold()?,
                safety_margin: config.rate_margin()?,
            },
        })
    }
}

/// A GitHub API session with rate tracking.
pub struct ApiSession {
    client: Octocrab,
    api_base: String,
    has_token: bool,
    rate: RateState,
    policy: RateLimitPolicy,
}

impl ApiSession {
    /// Creates a session; authenticated if the config carries a token.
    pub fn new(config: SessionConfig) -> Result<Self, ApiError> {
        let client = build_client(&config.api_base, config.token.as_deref())?;
        Ok(Self {
            client,
            api_base: config.api_base,
            has_token: config.token.is_some(),
            rate: RateState::default(),
            policy: config.rate_policy,
        })
    }

    /// Remaining quota as last reported, or `None` if unknown.
    pub fn rate(&self) -> Option<u64> {
        self.rate.remaining()
    }

    /// When the quota replenishes, or `None` if unknown.
    pub fn rate_reset_time(&self) -> Option<chrono::DateTime<Utc>> {
        self.rate.reset_at()
    }

    pub fn is_authenticated(&self) -> bool {
        self.has_token
    }

    /// Replaces the credential for all subsequent requests.
    ///
    /// The new credential has its own quota, so the cached rate state is
    /// cleared until the next response reports it.
    pub fn set_credentials(&mut self, token: impl Into<String>) -> Result<(), ApiError> {
        let token = token.into();
        self.client = build_client(&self.api_base, Some(&token))?;
        self.has_token = true;
        self.rate.clear();
        Ok(())
    }

    /// GETs a path relative to the API base (a leading `/` is added if missing).
    pub async fn request_api(&mut self, path: &str) -> Result<ApiResponse, ApiError> {
        let url = if path.starts_with('/') {
            format!("{}{}", self.api_base, path)
        } else {
            format!("{}/{}", self.api_base, path)
        };
        self.request(&url).await
    }

    /// GETs an absolute URL (or a path, resolved against the API base).
    ///
    /// # Errors
    ///
    /// - transport failures and non-2xx responses, categorized per [`ApiError`]
    /// - a contract error if a successful response lacks rate headers
    /// - a permanent error if the body is not JSON
    pub async fn request(&mut self, url: &str) -> Result<ApiResponse, ApiError> {
        self.wait_for_quota().await;

        debug!(url, "GET");
        let response = self
            .client
            ._get(url.to_string())
            .await
            .map_err(|e| ApiError::from_octocrab(e).with_url(url))?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = self
            .client
            .body_to_string(response)
            .await
            .map_err(|e| ApiError::from_octocrab(e).with_url(url))?;

        if !status.is_success() {
            self.rate.observe_if_present(&headers);
            return Err(ApiError::from_status(status.as_u16(), &text).with_url(url));
        }

        self.rate.observe(&headers).map_err(|e| e.with_url(url))?;

        let body: Value = serde_json::from_str(&text).map_err(|e| {
            ApiError::permanent(format!("response body is not JSON: {}", e)).with_url(url)
        })?;

        Ok(ApiResponse {
            body,
            headers,
            text,
        })
    }

    async fn wait_for_quota(&self) {
        let Some(wait) = self.policy.wait_duration(&self.rate, Utc::now()) else {
            return;
        };
        warn!(
            remaining = ?self.rate.remaining(),
            reset_at = ?self.rate.reset_at(),
            wait_secs = wait.as_secs(),
            "Rate limit nearly exhausted, sleeping until reset"
        );
        tokio::time::sleep(wait).await;
    }
}

impl ApiClient for ApiSession {
    async fn get(&mut self, url: &str) -> Result<ApiResponse, ApiError> {
        self.request(url).await
    }

    fn rate(&self) -> Option<u64> {
        ApiSession::rate(self)
    }

    fn rate_reset_time(&self) -> Option<chrono::DateTime<Utc>> {
        ApiSession::rate_reset_time(self)
    }
}

impl std::fmt::Debug for ApiSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSession")
            .field("api_base", &self.api_base)
            .field("authenticated", &self.has_token)
            .field("rate", &self.rate)
            .finish_non_exhaustive()
    }
}

/// Selects aws-lc-rs as the process-wide rustls provider.
///
/// Both rustls backends end up compiled in (octocrab enables `ring`, the AWS
/// SDK `aws-lc-rs`), and rustls will not choose between them on its own. A
/// provider that is already installed is kept.
pub fn install_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
}

fn build_client(api_base: &str, token: Option<&str>) -> Result<Octocrab, ApiError> {
    install_crypto_provider();
    let mut builder = Octocrab::builder()
        .base_uri(api_base)
        .map_err(|e| ApiError::permanent(format!("invalid API base {}: {}", api_base, e)))?
        .add_header(http::header::ACCEPT, ACCEPT_JSON.to_string());
    if let Some(token) = token {
        builder = builder.personal_token(token.to_string());
    }
    builder.build().map_err(ApiError::from_octocrab)
}
