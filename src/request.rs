//! The logical request handed to [`Client::send_request`](crate::Client::send_request).

use crate::error::{Error, Result};
use crate::predicates::SharedPredicate;
use http::Method;
use serde_json::{Map, Value};
use std::time::Duration;
use url::Url;

/// Retry budget for a call that does not choose its own.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Retry budget used when a call explicitly passes a zero timeout.
pub const FALLBACK_REQUEST_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Which project, if any, to bill for quota via `X-Goog-User-Project`.
///
/// Only consulted when the provider enables `user_project_override`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum QuotaProject {
    /// Send no quota project header.
    #[default]
    Unset,
    /// Bill the named project.
    Project(String),
    /// Send the header with an empty value, overriding any layer default.
    ///
    /// Identity lookups need this: the userinfo endpoint rejects requests
    /// that name a billing project.
    NoOverride,
}

impl From<&str> for QuotaProject {
    fn from(project: &str) -> Self {
        if project.is_empty() {
            QuotaProject::Unset
        } else {
            QuotaProject::Project(project.to_string())
        }
    }
}

impl From<String> for QuotaProject {
    fn from(project: String) -> Self {
        QuotaProject::from(project.as_str())
    }
}

/// Everything needed for one logical JSON API call.
///
/// Built fresh for every call and dropped once the response is decoded.
#[derive(Clone)]
pub struct SendRequestOptions {
    /// The HTTP method.
    pub method: Method,
    /// Quota attribution for this call.
    pub project: QuotaProject,
    /// The request URL, before `alt=json` is appended.
    pub raw_url: String,
    /// `User-Agent` for this call; empty falls back to the configured one.
    pub user_agent: String,
    /// JSON object sent as the request body.
    pub body: Option<Map<String, Value>>,
    /// Wall-clock budget for all attempts. Zero means one hour.
    pub timeout: Duration,
    /// Call-specific retry predicates, tried after the defaults.
    pub error_retry_predicates: Vec<SharedPredicate>,
}

impl SendRequestOptions {
    /// Creates options with the default five-minute budget.
    pub fn new(method: Method, raw_url: impl Into<String>) -> Self {
        Self {
            method,
            project: QuotaProject::Unset,
            raw_url: raw_url.into(),
            user_agent: String::new(),
            body: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            error_retry_predicates: Vec::new(),
        }
    }

    pub fn with_project(mut self, project: impl Into<QuotaProject>) -> Self {
        self.project = project.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_body(mut self, body: Map<String, Value>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds a call-specific retry predicate.
    pub fn with_retry_predicate(mut self, predicate: SharedPredicate) -> Self {
        self.error_retry_predicates.push(predicate);
        self
    }

    /// The retry budget, with zero mapped to [`FALLBACK_REQUEST_TIMEOUT`].
    pub fn effective_timeout(&self) -> Duration {
        if self.timeout.is_zero() {
            FALLBACK_REQUEST_TIMEOUT
        } else {
            self.timeout
        }
    }
}

impl std::fmt::Debug for SendRequestOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendRequestOptions")
            .field("method", &self.method)
            .field("project", &self.project)
            .field("raw_url", &self.raw_url)
            .field("user_agent", &self.user_agent)
            .field("has_body", &self.body.is_some())
            .field("timeout", &self.timeout)
            .field("error_retry_predicates", &self.error_retry_predicates.len())
            .finish()
    }
}

/// Appends query parameters to `raw_url`, keeping any that are already there.
///
/// # Errors
///
/// Returns an error if `raw_url` is not a valid absolute URL.
///
/// # Examples
///
/// ```
/// use provider_transport::add_query_params;
///
/// let url = add_query_params("https://example.com/v1/things?pageToken=abc", &[("alt", "json")]).unwrap();
/// assert_eq!(url.as_str(), "https://example.com/v1/things?pageToken=abc&alt=json");
/// ```
pub fn add_query_params(raw_url: &str, params: &[(&str, &str)]) -> Result<Url> {
    let mut url = Url::parse(raw_url).map_err(Error::InvalidUrl)?;
    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params {
            pairs.append_pair(key, value);
        }
    }
    Ok(url)
}
