//! Provider-wide configuration consumed by the request pipeline.
//!
//! Loading this from a provider block and resolving defaults happens outside
//! this crate; [`Config`] only carries the values the transports and the
//! request executor read.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Per-attempt HTTP timeout used when `request_timeout` is zero.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// How long a batcher waits before sending, unless configured.
pub const DEFAULT_BATCH_SEND_INTERVAL: Duration = Duration::from_secs(10);

/// Settings shared by every call made with one provider configuration.
///
/// # Examples
///
/// ```
/// use provider_transport::Config;
/// use std::time::Duration;
///
/// let config: Config = serde_json::from_str(r#"{
///     "user_agent": "my-provider/1.0",
///     "billing_project": "billing-project",
///     "user_project_override": true,
///     "request_timeout": "1m30s",
///     "batching": { "send_after": "5s", "enable_batching": false }
/// }"#).unwrap();
///
/// assert_eq!(config.http_timeout(), Duration::from_secs(90));
/// assert!(!config.batching.enable_batching);
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sent as `User-Agent` when a call does not supply its own.
    pub user_agent: String,

    /// Attached to every request as `X-Goog-Request-Reason`.
    pub request_reason: Option<String>,

    /// Project billed for quota when `user_project_override` is set.
    pub billing_project: Option<String>,

    /// Whether to send `X-Goog-User-Project` at all.
    pub user_project_override: bool,

    /// Bound on a single HTTP round trip. Zero selects [`DEFAULT_HTTP_TIMEOUT`].
    #[serde(deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,

    /// Settings for the request batchers.
    pub batching: BatchingConfig,

    /// A pre-acquired OAuth access token.
    pub access_token: Option<String>,
}

impl Config {
    /// The per-attempt HTTP timeout.
    pub fn http_timeout(&self) -> Duration {
        if self.request_timeout.is_zero() {
            DEFAULT_HTTP_TIMEOUT
        } else {
            self.request_timeout
        }
    }
}

/// How request batchers coalesce calls.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// How long to collect requests before sending a batch.
    #[serde(deserialize_with = "deserialize_duration")]
    pub send_after: Duration,
    /// Whether batching is enabled at all.
    pub enable_batching: bool,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            send_after: DEFAULT_BATCH_SEND_INTERVAL,
            enable_batching: true,
        }
    }
}

impl BatchingConfig {
    /// Builds a batching config from raw provider values, keeping defaults for
    /// anything absent or empty.
    ///
    /// # Errors
    ///
    /// Returns an error if `send_after` is not a valid duration such as `"10s"`.
    pub fn expand(send_after: Option<&str>, enable_batching: Option<bool>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = send_after.filter(|raw| !raw.trim().is_empty()) {
            config.send_after = parse_duration(raw).map_err(|e| {
                Error::ConfigurationError(format!(
                    "unable to parse duration from 'send_after' value {:?}: {}",
                    raw, e
                ))
            })?;
        }
        if let Some(enable) = enable_batching {
            config.enable_batching = enable;
        }

        Ok(config)
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

/// Parses durations like `"10s"`, `"1m30s"`, `"500ms"` or `"2h"`.
///
/// Units are `ns`, `us`, `ms`, `s`, `m` and `h`; every number needs a unit
/// except a bare `"0"`.
pub fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty duration string".to_string());
    }
    if raw == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = raw;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("expected a number at {:?}", rest));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid number: {}", &rest[..digits]))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let part = match unit {
            "ns" => Duration::from_nanos(value),
            "us" | "µs" => Duration::from_micros(value),
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.saturating_mul(60)),
            "h" => Duration::from_secs(value.saturating_mul(3600)),
            "" => return Err(format!("missing unit in duration {:?}", raw)),
            other => return Err(format!("unknown duration unit: {}", other)),
        };
        total = total
            .checked_add(part)
            .ok_or_else(|| format!("duration overflow in {:?}", raw))?;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_errors() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("10 parsecs").is_err());
        assert!(parse_duration("5d").is_err());
    }

    #[test]
    fn test_parse_duration_overflow_is_an_error() {
        assert!(parse_duration("18446744073709551615s1s")
            .unwrap_err()
            .contains("overflow"));
        assert!(parse_duration("18446744073709551615s18446744073709551615s").is_err());

        let err = BatchingConfig::expand(Some("18446744073709551615s1s"), None).unwrap_err();
        assert!(err.to_string().contains("send_after"));

        let config: std::result::Result<Config, _> =
            serde_json::from_str(r#"{ "request_timeout": "18446744073709551615s1s" }"#);
        assert!(config.is_err());
    }

    #[test]
    fn test_expand_batching_config_defaults() {
        let config = BatchingConfig::expand(None, None).unwrap();
        assert_eq!(config, BatchingConfig::default());
        assert_eq!(config.send_after, Duration::from_secs(10));
        assert!(config.enable_batching);

        let config = BatchingConfig::expand(Some(""), Some(false)).unwrap();
        assert_eq!(config.send_after, Duration::from_secs(10));
        assert!(!config.enable_batching);
    }

    #[test]
    fn test_expand_batching_config_rejects_bad_duration() {
        let err = BatchingConfig::expand(Some("soon"), None).unwrap_err();
        assert!(err.to_string().contains("send_after"));
    }

    #[test]
    fn test_http_timeout_falls_back_when_zero() {
        assert_eq!(Config::default().http_timeout(), DEFAULT_HTTP_TIMEOUT);

        let config = Config {
            request_timeout: Duration::from_secs(30),
            ..Config::default()
        };
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
    }
}
