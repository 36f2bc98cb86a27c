//! GitHub API error types.
//!
//! Errors are categorized so callers know what to do with the task that hit them:
//!
//! - **Transient** errors (5xx, rate limits, network failures) leave the task
//!   for redelivery.
//! - **Permanent** errors (most 4xx, undecodable bodies) will not improve on retry.
//! - **Contract** errors mean the API broke a promise the session relies on
//!   (e.g., rate-limit headers missing from a successful response). They stop
//!   the worker rather than being papered over with a default.

use std::fmt;
use thiserror::Error;

/// The kind of API error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Safe to retry later.
    Transient,

    /// Retrying will not help.
    Permanent,

    /// The upstream API violated the response contract.
    Contract,
}

impl ApiErrorKind {
    /// Returns true if this error may go away on redelivery.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ApiErrorKind::Transient)
    }
}

/// A categorized API error.
#[derive(Debug, Error)]
pub struct ApiError {
    pub kind: ApiErrorKind,

    /// The HTTP status code, if a response was received.
    pub status_code: Option<u16>,

    /// The URL that was requested, if known.
    pub url: Option<String>,

    pub message: String,

    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "API error")?;
        if let Some(code) = self.status_code {
            write!(f, " (HTTP {})", code)?;
        }
        if let Some(url) = &self.url {
            write!(f, " for {}", url)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl ApiError {
    fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            url: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Permanent, message)
    }

    pub fn contract(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Contract, message)
    }

    /// Attaches the requested URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Categorizes an octocrab transport error (no HTTP status available).
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let message = err.to_string();
        let kind = if is_network_error(&message) {
            ApiErrorKind::Transient
        } else {
            ApiErrorKind::Permanent
        };
        Self {
            kind,
            status_code: None,
            url: None,
            message,
            source: Some(err),
        }
    }

    /// Categorizes a non-success HTTP response.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = summarize_body(body);
        let kind = match status {
            429 => ApiErrorKind::Transient,
            403 if is_rate_limit_error(&message) => ApiErrorKind::Transient,
            code if (500..600).contains(&code) => ApiErrorKind::Transient,
            _ => ApiErrorKind::Permanent,
        };
        Self {
            kind,
            status_code: Some(status),
            url: None,
            message,
            source: None,
        }
    }

    pub fn is_contract_violation(&self) -> bool {
        self.kind == ApiErrorKind::Contract
    }
}

/// Pulls the `message` field out of a GitHub error body, falling back to the
/// (truncated) raw text.
fn summarize_body(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// Checks if an error message indicates a rate limit.
fn is_rate_limit_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("rate limit")
        || message_lower.contains("api rate")
        || message_lower.contains("secondary rate")
        || message_lower.contains("abuse detection")
}

/// Checks if an error message indicates a network-level error.
fn is_network_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("timeout")
        || message_lower.contains("connection")
        || message_lower.contains("network")
        || message_lower.contains("dns")
        || message_lower.contains("timed out")
        || message_lower.contains("hyper")
}
