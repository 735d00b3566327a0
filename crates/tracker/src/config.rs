//! Tracker configuration.
//!
//! Hosts either build a [`TrackerConfig`] with the builder methods or read it
//! from `DOCENT_*` environment variables with [`TrackerConfig::from_env`].

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use crate::backoff::PollBackoff;
use crate::error::ConfigError;

pub const ENV_API_URL: &str = "DOCENT_API_URL";
pub const ENV_AUTH_TOKEN: &str = "DOCENT_AUTH_TOKEN";
pub const ENV_JOB_DB: &str = "DOCENT_JOB_DB";
pub const ENV_POLL_TIMEOUT_SECS: &str = "DOCENT_POLL_TIMEOUT_SECS";
pub const ENV_POLL_MAX_FAILURES: &str = "DOCENT_POLL_MAX_FAILURES";
pub const ENV_POLL_TIMEOUT_POLICY: &str = "DOCENT_POLL_TIMEOUT_POLICY";

const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Where the timeout deadline of a polling run is measured from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// From the job's `created_at`; resuming after a reload keeps the clock.
    #[default]
    SinceCreated,
    /// From each `start_polling` call.
    PerSession,
}

/// Limits of a polling run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub backoff: PollBackoff,
    /// Hard ceiling for one job's polling.
    pub timeout: Duration,
    /// Consecutive failed probes tolerated before giving up.
    pub max_consecutive_failures: u32,
    pub timeout_policy: TimeoutPolicy,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            backoff: PollBackoff::default(),
            timeout: Duration::from_secs(5 * 60),
            max_consecutive_failures: 10,
            timeout_policy: TimeoutPolicy::default(),
        }
    }
}

impl PollSettings {
    pub fn with_backoff(mut self, backoff: PollBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max.max(1);
        self
    }

    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout_policy = policy;
        self
    }
}

/// Location of the durable job store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StoreLocation {
    /// `{data_dir}/docent/jobs.db`
    #[default]
    Default,
    Path(PathBuf),
    /// Run on the in-memory fallback only.
    Disabled,
}

impl StoreLocation {
    /// Resolve to a file path; `None` when persistence is disabled.
    pub fn resolve(&self) -> anyhow::Result<Option<PathBuf>> {
        match self {
            StoreLocation::Default => default_db_path().map(Some),
            StoreLocation::Path(path) => Ok(Some(path.clone())),
            StoreLocation::Disabled => Ok(None),
        }
    }
}

/// Full tracker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Backend base URL, without the `/api/...` suffix.
    pub api_url: String,
    pub auth_token: Option<String>,
    pub store: StoreLocation,
    pub poll: PollSettings,
    /// Per-request timeout of a status probe.
    pub request_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            auth_token: None,
            store: StoreLocation::default(),
            poll: PollSettings::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl TrackerConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_store(mut self, store: StoreLocation) -> Self {
        self.store = store;
        self
    }

    pub fn with_poll(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, falling back to defaults for
    /// unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_API_URL) {
            reqwest::Url::parse(&url)
                .map_err(|e| ConfigError::invalid(ENV_API_URL, &url, e.to_string()))?;
            config.api_url = url;
        } else {
            tracing::warn!("{ENV_API_URL} not set; using {DEFAULT_API_URL}");
        }

        config.auth_token = lookup(ENV_AUTH_TOKEN).filter(|t| !t.is_empty());

        if let Some(db) = lookup(ENV_JOB_DB) {
            config.store = match db.trim() {
                "" => StoreLocation::Default,
                "off" | "memory" => StoreLocation::Disabled,
                path => StoreLocation::Path(PathBuf::from(path)),
            };
        }

        if let Some(secs) = lookup(ENV_POLL_TIMEOUT_SECS) {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|_| {
                    ConfigError::invalid(ENV_POLL_TIMEOUT_SECS, &secs, "expected seconds")
                })?;
            config.poll.timeout = Duration::from_secs(secs);
        }

        if let Some(max) = lookup(ENV_POLL_MAX_FAILURES) {
            let parsed: u32 = max
                .trim()
                .parse()
                .map_err(|_| {
                    ConfigError::invalid(ENV_POLL_MAX_FAILURES, &max, "expected a count")
                })?;
            if parsed == 0 {
                return Err(ConfigError::invalid(ENV_POLL_MAX_FAILURES, &max, "must be at least 1"));
            }
            config.poll.max_consecutive_failures = parsed;
        }

        if let Some(policy) = lookup(ENV_POLL_TIMEOUT_POLICY) {
            config.poll.timeout_policy = match policy.trim() {
                "created" => TimeoutPolicy::SinceCreated,
                "session" => TimeoutPolicy::PerSession,
                _ => {
                    return Err(ConfigError::invalid(
                        ENV_POLL_TIMEOUT_POLICY,
                        &policy,
                        "expected `created` or `session`",
                    ));
                }
            };
        }

        Ok(config)
    }
}

/// Resolve the default path of the job database: `{data_dir}/docent/jobs.db`.
fn default_db_path() -> anyhow::Result<PathBuf> {
    let mut dir = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS app data directory")?;

    dir.push("docent");
    dir.push("jobs.db");
    Ok(dir)
}
