//! GitHub API access with rate-limit tracking.
//!
//! Key features:
//! - Raw GETs via octocrab so rate-limit headers are visible
//! - Cached remaining-quota / reset-time, cleared on credential change
//! - Optional sleep until the quota resets when it runs low
//! - Errors categorized as transient, permanent, or contract violations

mod error;
mod rate;
mod session;

use std::future::Future;

use chrono::{DateTime, Utc};
use http::HeaderMap;
use serde_json::Value;

pub use error::{ApiError, ApiErrorKind};
pub use rate::{RATE_REMAINING_HEADER, RATE_RESET_HEADER, RateLimitPolicy, RateState};
pub use session::{ApiSession, SessionConfig, install_crypto_provider};

/// A decoded API response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub body: Value,
    pub headers: HeaderMap,
    /// The body exactly as received.
    pub text: String,
}

/// Issues GET requests against the code-hosting API.
///
/// [`ApiSession`] is the production implementation; the dispatcher is generic
/// over this trait so tests can substitute canned responses.
pub trait ApiClient {
    /// GET an absolute URL.
    fn get(&mut self, url: &str) -> impl Future<Output = Result<ApiResponse, ApiError>> + Send;

    /// Remaining quota as last observed, if known.
    fn rate(&self) -> Option<u64>;

    /// When the quota replenishes, if known.
    fn rate_reset_time(&self) -> Option<DateTime<Utc>>;
}
