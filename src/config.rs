//! Session configuration: defaults, environment overrides and validation.

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::serialization::DEFAULT_MEDIA_TYPE;
use crate::transport::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use crate::user_agent::default_user_agent;

/// Environment variable overriding the connect timeout, in seconds.
pub const ENV_CONNECT_TIMEOUT_SECS: &str = "REQUESTOR_CONNECT_TIMEOUT_SECS";
/// Environment variable overriding the read timeout, in seconds.
pub const ENV_READ_TIMEOUT_SECS: &str = "REQUESTOR_READ_TIMEOUT_SECS";
/// Environment variable setting the default request timeout, in milliseconds.
pub const ENV_TIMEOUT_MS: &str = "REQUESTOR_TIMEOUT_MS";
/// Environment variable overriding the User-Agent.
pub const ENV_USER_AGENT: &str = "REQUESTOR_USER_AGENT";

const MAX_TIMEOUT_SECS: u64 = 3600;
const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(MAX_TIMEOUT_SECS);

/// Invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is outside its allowed range.
    #[error("Invalid config value for `{key}`: {value}. Expected range: {expected}")]
    OutOfRange {
        /// Setting name.
        key: &'static str,
        /// Offending value, as given.
        value: String,
        /// Allowed range.
        expected: &'static str,
    },

    /// A value could not be parsed.
    #[error("Invalid config value for `{key}`: '{value}' is not a valid {expected}")]
    Unparsable {
        /// Setting name.
        key: &'static str,
        /// Offending value, as given.
        value: String,
        /// Expected format.
        expected: &'static str,
    },

    /// The user agent is empty or not a valid header value.
    #[error("Invalid config value for `user_agent`: '{0}'")]
    UserAgent(String),
}

/// Settings shared by every request of a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// TCP connect timeout of the HTTP client.
    pub connect_timeout: Duration,
    /// Overall timeout of the HTTP client for one exchange.
    pub read_timeout: Duration,
    /// Default per-request deadline; `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// Default wait before each dispatch cycle.
    pub request_delay: Duration,
    /// User-Agent sent with every request.
    pub user_agent: String,
    /// Default `Accept` and `Content-Type` media type.
    pub media_type: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            request_timeout: None,
            request_delay: Duration::ZERO,
            user_agent: default_user_agent(),
            media_type: DEFAULT_MEDIA_TYPE.to_string(),
        }
    }
}

impl SessionConfig {
    /// Defaults overlaid with the `REQUESTOR_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Unparsable`] when a variable is set to a value
    /// that is not a number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(secs) = parse_var(&lookup, ENV_CONNECT_TIMEOUT_SECS, "connect_timeout")? {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, ENV_READ_TIMEOUT_SECS, "read_timeout")? {
            config.read_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var(&lookup, ENV_TIMEOUT_MS, "request_timeout")? {
            config.request_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(user_agent) = lookup(ENV_USER_AGENT) {
            config.user_agent = user_agent;
        }
        debug!(?config, "session configuration loaded");
        Ok(config)
    }

    /// Checks every value against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_secs("connect_timeout", self.connect_timeout)?;
        check_secs("read_timeout", self.read_timeout)?;
        if let Some(timeout) = self.request_timeout
            && (timeout.is_zero() || timeout > MAX_REQUEST_TIMEOUT)
        {
            return Err(ConfigError::OutOfRange {
                key: "request_timeout",
                value: format!("{}ms", timeout.as_millis()),
                expected: "1..=3600000 ms",
            });
        }
        if self.request_delay > MAX_REQUEST_TIMEOUT {
            return Err(ConfigError::OutOfRange {
                key: "request_delay",
                value: format!("{}ms", self.request_delay.as_millis()),
                expected: "0..=3600000 ms",
            });
        }
        if self.user_agent.trim().is_empty()
            || reqwest::header::HeaderValue::from_str(&self.user_agent).is_err()
        {
            return Err(ConfigError::UserAgent(self.user_agent.clone()));
        }
        Ok(())
    }
}

fn parse_var(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    key: &'static str,
) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Unparsable {
            key,
            value: raw,
            expected: "non-negative integer",
        })
}

fn check_secs(key: &'static str, value: Duration) -> Result<(), ConfigError> {
    if (1..=MAX_TIMEOUT_SECS).contains(&value.as_secs()) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            key,
            value: format!("{}s", value.as_secs()),
            expected: "1..=3600",
        })
    }
}
