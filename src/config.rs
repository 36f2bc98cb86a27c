//! Configuration from stage-prefixed environment variables.
//!
//! Every variable named `RAQ_CRAWLER_<STAGE>_<KEY>` contributes `<key>`
//! (lower-cased) to a flat key/value map. Components read the keys they need
//! through the typed accessors below; unknown keys are kept but ignored.
//!
//! | key                       | default                  |
//! |---------------------------|--------------------------|
//! | `github_token`            | none (anonymous)         |
//! | `msg_queue_address`       | required                 |
//! | `region_name`             | provider chain default   |
//! | `aws_id` / `aws_secret`   | provider chain default   |
//! | `api_base`                | `https://api.github.com` |
//! | `queue_wait_secs`         | 20                       |
//! | `visibility_timeout_secs` | 30                       |
//! | `rate_sleep`              | false                    |
//! | `rate_threshold`          | 10                       |
//! | `rate_margin_secs`        | 5                        |
//! | `ftp_address`             | none (upload to a dir)   |
//! | `ftp_user`/`ftp_password` | with `ftp_address`       |
//! | `ftp_target_dir`          | `ftp/raq/results`        |
//! | `upload_dir`              | required without ftp     |
//! | `upload_prefix`           | `raq/results`            |
//! | `unknown_task_policy`     | `skip`                   |

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Prefix shared by all crawler variables.
pub const ENV_PREFIX: &str = "RAQ_CRAWLER_";

/// Stage used when none is given on the command line.
pub const DEFAULT_STAGE: &str = "dev";

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const DEFAULT_QUEUE_WAIT_SECS: u64 = 20;
const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RATE_THRESHOLD: u64 = 10;
const DEFAULT_RATE_MARGIN_SECS: u64 = 5;
const DEFAULT_UPLOAD_PREFIX: &str = "raq/results";

/// Errors reading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing configuration key {key} (set {var})")]
    Missing { key: String, var: String },

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// What to do with a message whose task cannot be decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownTaskPolicy {
    /// Log, delete the message and keep working.
    #[default]
    Skip,
    /// Log, delete the message and stop the worker.
    Halt,
}

impl FromStr for UnknownTaskPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(UnknownTaskPolicy::Skip),
            "halt" => Ok(UnknownTaskPolicy::Halt),
            other => Err(format!("expected skip or halt, got {}", other)),
        }
    }
}

/// Flat, stage-scoped configuration map.
#[derive(Clone)]
pub struct CrawlerConfig {
    stage: String,
    values: BTreeMap<String, String>,
}

impl CrawlerConfig {
    /// Reads the configuration for `stage` from the process environment.
    pub fn from_env(stage: &str) -> Self {
        Self::from_vars(stage, std::env::vars())
    }

    /// Builds the configuration for `stage` from arbitrary variables.
    pub fn from_vars<I, K, V>(stage: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let prefix = Self::prefix_for(stage);
        let values = vars
            .into_iter()
            .filter_map(|(key, value)| {
                let name = key.as_ref().strip_prefix(&prefix)?;
                (!name.is_empty()).then(|| (name.to_ascii_lowercase(), value.into()))
            })
            .collect();

        CrawlerConfig {
            stage: stage.to_ascii_lowercase(),
            values,
        }
    }

    /// Returns the variable prefix for a stage, e.g. `RAQ_CRAWLER_DEV_`.
    pub fn prefix_for(stage: &str) -> String {
        format!("{}{}_", ENV_PREFIX, stage.to_ascii_uppercase())
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Raw lookup.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Raw lookup that fails when the key is absent.
    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::Missing {
            key: key.to_string(),
            var: format!("{}{}", Self::prefix_for(&self.stage), key.to_ascii_uppercase()),
        })
    }

    fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key: key.to_string(),
                value: raw.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    pub fn github_token(&self) -> Option<&str> {
        self.get("github_token").filter(|t| !t.is_empty())
    }

    pub fn queue_address(&self) -> Result<&str, ConfigError> {
        self.require("msg_queue_address")
    }

    pub fn region(&self) -> Option<&str> {
        self.get("region_name")
    }

    /// Static queue credentials, only when both halves are present.
    pub fn aws_credentials(&self) -> Option<(&str, &str)> {
        Some((self.get("aws_id")?, self.get("aws_secret")?))
    }

    /// API base URL without a trailing slash.
    pub fn api_base(&self) -> &str {
        self.get("api_base")
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
    }

    pub fn queue_wait(&self) -> Result<Duration, ConfigError> {
        self.parse_or("queue_wait_secs", DEFAULT_QUEUE_WAIT_SECS)
            .map(Duration::from_secs)
    }

    pub fn visibility_timeout(&self) -> Result<Duration, ConfigError> {
        self.parse_or("visibility_timeout_secs", DEFAULT_VISIBILITY_TIMEOUT_SECS)
            .map(Duration::from_secs)
    }

    pub fn rate_sleep(&self) -> Result<bool, ConfigError> {
        self.parse_or("rate_sleep", false)
    }

    pub fn rate_threshold(&self) -> Result<u64, ConfigError> {
        self.parse_or("rate_threshold", DEFAULT_RATE_THRESHOLD)
    }

    pub fn rate_margin(&self) -> Result<Duration, ConfigError> {
        self.parse_or("rate_margin_secs", DEFAULT_RATE_MARGIN_SECS)
            .map(Duration::from_secs)
    }

    pub fn upload_dir(&self) -> Result<PathBuf, ConfigError> {
        self.require("upload_dir").map(PathBuf::from)
    }

    pub fn upload_prefix(&self) -> &str {
        self.get("upload_prefix")
            .unwrap_or(DEFAULT_UPLOAD_PREFIX)
            .trim_matches('/')
    }

    pub fn unknown_task_policy(&self) -> Result<UnknownTaskPolicy, ConfigError> {
        self.parse_or("unknown_task_policy", UnknownTaskPolicy::default())
    }
}

fn is_secret(key: &str) -> bool {
    ["token", "secret", "password"]
        .iter()
        .any(|needle| key.contains(needle))
}

impl fmt::Debug for CrawlerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted: BTreeMap<&str, &str> = self
            .values
            .iter()
            .map(|(k, v)| {
                let shown = if is_secret(k) { "<redacted>" } else { v.as_str() };
                (k.as_str(), shown)
            })
            .collect();
        f.debug_struct("CrawlerConfig")
            .field("stage", &self.stage)
            .field("values", &redacted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(vars: &[(&str, &str)]) -> CrawlerConfig {
        CrawlerConfig::from_vars("test", vars.iter().map(|(k, v)| (*k, *v)))
    }

    #[test]
    fn picks_up_only_the_stage_prefix() {
        let cfg = config(&[
            ("RAQ_CRAWLER_TEST_GITHUB_TOKEN", "t0k"),
            ("RAQ_CRAWLER_DEV_GITHUB_TOKEN", "other"),
            ("RAQ_CRAWLER_TEST_", "empty-name"),
            ("PATH", "/bin"),
        ]);
        assert_eq!(cfg.github_token(), Some("t0k"));
        assert_eq!(cfg.stage(), "test");
        assert_eq!(cfg.get(""), None);
    }

    #[test]
    fn keys_are_lowercased() {
        let cfg = config(&[("RAQ_CRAWLER_TEST_MSG_QUEUE_ADDRESS", "https://sqs/q")]);
        assert_eq!(cfg.queue_address().unwrap(), "https://sqs/q");
    }

    #[test]
    fn missing_required_key_names_the_variable() {
        let err = config(&[]).queue_address().unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing {
                key: "msg_queue_address".to_string(),
                var: "RAQ_CRAWLER_TEST_MSG_QUEUE_ADDRESS".to_string(),
            }
        );
    }

    #[test]
    fn defaults_apply() {
        let cfg = config(&[]);
        assert_eq!(cfg.api_base(), DEFAULT_API_BASE);
        assert_eq!(cfg.queue_wait().unwrap(), Duration::from_secs(20));
        assert_eq!(cfg.visibility_timeout().unwrap(), Duration::from_secs(30));
        assert!(!cfg.rate_sleep().unwrap());
        assert_eq!(cfg.rate_threshold().unwrap(), 10);
        assert_eq!(cfg.upload_prefix(), "raq/results");
        assert_eq!(cfg.unknown_task_policy().unwrap(), UnknownTaskPolicy::Skip);
        assert_eq!(cfg.github_token(), None);
        assert_eq!(cfg.aws_credentials(), None);
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let cfg = config(&[("RAQ_CRAWLER_TEST_QUEUE_WAIT_SECS", "soon")]);
        assert!(matches!(
            cfg.queue_wait(),
            Err(ConfigError::Invalid { ref key, .. }) if key == "queue_wait_secs"
        ));
    }

    #[test]
    fn policy_parses_case_insensitively() {
        let cfg = config(&[("RAQ_CRAWLER_TEST_UNKNOWN_TASK_POLICY", "HALT")]);
        assert_eq!(cfg.unknown_task_policy().unwrap(), UnknownTaskPolicy::Halt);

        let cfg = config(&[("RAQ_CRAWLER_TEST_UNKNOWN_TASK_POLICY", "panic")]);
        assert!(cfg.unknown_task_policy().is_err());
    }

    #[test]
    fn api_base_trailing_slash_is_trimmed() {
        let cfg = config(&[("RAQ_CRAWLER_TEST_API_BASE", "http://localhost:8080/")]);
        assert_eq!(cfg.api_base(), "http://localhost:8080");
    }

    #[test]
    fn aws_credentials_need_both_halves() {
        let cfg = config(&[("RAQ_CRAWLER_TEST_AWS_ID", "id")]);
        assert_eq!(cfg.aws_credentials(), None);

        let cfg = config(&[
            ("RAQ_CRAWLER_TEST_AWS_ID", "id"),
            ("RAQ_CRAWLER_TEST_AWS_SECRET", "s"),
        ]);
        assert_eq!(cfg.aws_credentials(), Some(("id", "s")));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let cfg = config(&[
            ("RAQ_CRAWLER_TEST_GITHUB_TOKEN", "hunter2"),
            ("RAQ_CRAWLER_TEST_AWS_SECRET", "s3cr3t"),
            ("RAQ_CRAWLER_TEST_REGION_NAME", "us-east-1"),
        ]);
        let shown = format!("{:?}", cfg);
        assert!(!shown.contains("hunter2"));
        assert!(!shown.contains("s3cr3t"));
        assert!(shown.contains("us-east-1"));
    }
}
