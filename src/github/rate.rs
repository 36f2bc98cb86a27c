//! Rate-limit bookkeeping.
//!
//! GitHub reports the remaining request quota and the epoch second at which it
//! replenishes on every response (`x-ratelimit-remaining`, `x-ratelimit-reset`).
//! [`RateState`] caches the last observation; [`RateLimitPolicy`] decides
//! whether the next request should wait for the reset.
//!
//! A successful response without parseable rate headers is a contract
//! violation, not "unlimited": the error propagates to the caller.

use std::time::Duration;

use chrono::{DateTime, Utc};
use http::HeaderMap;

use super::error::ApiError;

pub const RATE_REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RATE_RESET_HEADER: &str = "x-ratelimit-reset";

/// Last observed quota for the current credential.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateState {
    remaining: Option<u64>,
    reset_at: Option<DateTime<Utc>>,
}

impl RateState {
    /// Remaining requests, or `None` if unknown.
    pub fn remaining(&self) -> Option<u64> {
        self.remaining
    }

    /// When the quota replenishes, or `None` if unknown.
    pub fn reset_at(&self) -> Option<DateTime<Utc>> {
        self.reset_at
    }

    /// Forgets everything; used when the credential changes.
    pub fn clear(&mut self) {
        *self = RateState::default();
    }

    /// Records the rate headers of a successful response.
    ///
    /// # Errors
    ///
    /// Returns a contract error if either header is missing or malformed. The
    /// cached state is left untouched in that case.
    pub fn observe(&mut self, headers: &HeaderMap) -> Result<(), ApiError> {
        let remaining: u64 = parse_header(headers, RATE_REMAINING_HEADER)?;
        let reset_secs: i64 = parse_header(headers, RATE_RESET_HEADER)?;
        let reset_at = DateTime::from_timestamp(reset_secs, 0).ok_or_else(|| {
            ApiError::contract(format!(
                "{} out of range: {}",
                RATE_RESET_HEADER, reset_secs
            ))
        })?;

        self.remaining = Some(remaining);
        self.reset_at = Some(reset_at);
        Ok(())
    }

    /// Like [`observe`](Self::observe), but ignores unusable headers.
    ///
    /// Error responses do not always carry rate headers.
    pub fn observe_if_present(&mut self, headers: &HeaderMap) {
        let mut candidate = *self;
        if candidate.observe(headers).is_ok() {
            *self = candidate;
        }
    }

    #[cfg(test)]
    pub(crate) fn set(&mut self, remaining: u64, reset_at: DateTime<Utc>) {
        self.remaining = Some(remaining);
        self.reset_at = Some(reset_at);
    }
}

fn parse_header<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Result<T, ApiError> {
    let raw = headers
        .get(name)
        .ok_or_else(|| ApiError::contract(format!("response is missing {}", name)))?;
    raw.to_str()
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| ApiError::contract(format!("unparseable {}: {:?}", name, raw)))
}

/// When to block before issuing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Sleep until the reset when the quota runs low.
    pub sleep_when_exhausted: bool,

    /// Remaining quota below which the session waits.
    pub threshold: u64,

    /// Extra time added after the reset instant.
    pub safety_margin: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            sleep_when_exhausted: false,
            threshold: 10,
            safety_margin: Duration::from_secs(5),
        }
    }
}

impl RateLimitPolicy {
    /// How long to wait before the next request, given the cached state.
    ///
    /// Returns `None` when the policy is off, the quota is unknown or above the
    /// threshold, or the reset (plus margin) is already in the past.
    pub fn wait_duration(&self, state: &RateState, now: DateTime<Utc>) -> Option<Duration> {
        if !self.sleep_when_exhausted {
            return None;
        }
        let remaining = state.remaining()?;
        if remaining >= self.threshold {
            return None;
        }
        let resume_at = state.reset_at()? + chrono::Duration::from_std(self.safety_margin).ok()?;
        (resume_at - now).to_std().ok().filter(|d| !d.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(remaining: &str, reset: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(RATE_REMAINING_HEADER, HeaderValue::from_str(remaining).unwrap());
        h.insert(RATE_RESET_HEADER, HeaderValue::from_str(reset).unwrap());
        h
    }

    #[test]
    fn observe_reads_both_headers() {
        let mut state = RateState::default();
        state.observe(&headers("4999", "1700000000")).unwrap();

        assert_eq!(state.remaining(), Some(4999));
        assert_eq!(
            state.reset_at(),
            DateTime::from_timestamp(1_700_000_000, 0)
        );
    }

    #[test]
    fn missing_header_is_a_contract_error() {
        let mut state = RateState::default();
        let mut h = HeaderMap::new();
        h.insert(RATE_REMAINING_HEADER, HeaderValue::from_static("10"));

        let err = state.observe(&h).unwrap_err();
        assert!(err.is_contract_violation());
        assert_eq!(state, RateState::default());
    }

    #[test]
    fn malformed_header_is_a_contract_error() {
        let mut state = RateState::default();
        let err = state.observe(&headers("lots", "1700000000")).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn observe_if_present_keeps_old_state_on_garbage() {
        let mut state = RateState::default();
        state.observe(&headers("5", "1700000000")).unwrap();
        state.observe_if_present(&HeaderMap::new());
        assert_eq!(state.remaining(), Some(5));

        state.observe_if_present(&headers("4", "1700000000"));
        assert_eq!(state.remaining(), Some(4));
    }

    #[test]
    fn clear_forgets_everything() {
        let mut state = RateState::default();
        state.observe(&headers("5", "1700000000")).unwrap();
        state.clear();
        assert_eq!(state.remaining(), None);
        assert_eq!(state.reset_at(), None);
    }

    #[test]
    fn no_wait_when_policy_disabled() {
        let now = Utc::now();
        let mut state = RateState::default();
        state.set(0, now + chrono::Duration::seconds(60));
        let policy = RateLimitPolicy::default();
        assert_eq!(policy.wait_duration(&state, now), None);
    }

    #[test]
    fn waits_until_reset_plus_margin_when_low() {
        let now = Utc::now();
        let mut state = RateState::default();
        state.set(3, now + chrono::Duration::seconds(60));
        let policy = RateLimitPolicy {
            sleep_when_exhausted: true,
            threshold: 10,
            safety_margin: Duration::from_secs(5),
        };
        assert_eq!(
            policy.wait_duration(&state, now),
            Some(Duration::from_secs(65))
        );
    }

    #[test]
    fn no_wait_above_threshold_or_unknown() {
        let now = Utc::now();
        let policy = RateLimitPolicy {
            sleep_when_exhausted: true,
            ..RateLimitPolicy::default()
        };
        assert_eq!(policy.wait_duration(&RateState::default(), now), None);

        let mut state = RateState::default();
        state.set(10, now + chrono::Duration::seconds(60));
        assert_eq!(policy.wait_duration(&state, now), None);
    }

    #[test]
    fn no_wait_when_reset_has_passed() {
        let now = Utc::now();
        let mut state = RateState::default();
        state.set(0, now - chrono::Duration::seconds(60));
        let policy = RateLimitPolicy {
            sleep_when_exhausted: true,
            ..RateLimitPolicy::default()
        };
        assert_eq!(policy.wait_duration(&state, now), None);
    }
}
