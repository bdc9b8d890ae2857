//! Layered HTTP transports.
//!
//! Every outbound call goes through a chain of [`Transport`] layers, each of
//! which wraps the next one in:
//!
//! 1. [`HeaderTransport`] injects default headers the request did not set.
//! 2. [`RetryTransport`] re-sends the request while failures are retryable.
//! 3. [`LoggingTransport`] records each attempt at debug level.
//! 4. [`AuthTransport`] attaches credentials and talks to the network.
//!
//! [`build_pipeline`] assembles the chain from a [`Config`].

use crate::config::Config;
use crate::error::{ApiError, Error, Result};
use crate::predicates::SharedPredicate;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use http::HeaderMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Budget the retry layer uses when none is configured.
pub const DEFAULT_RETRY_TRANSPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Header attributing a request to a reason, for audit logs.
pub const REQUEST_REASON_HEADER: &str = "x-goog-request-reason";

/// Header selecting the project billed for quota.
pub const USER_PROJECT_HEADER: &str = "x-goog-user-project";

/// Executes one HTTP exchange.
///
/// Layers hold the next inner transport and delegate to it. A layer must hand
/// back the request and response it does not need to change untouched.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the response, whatever its status.
    async fn round_trip(&self, request: reqwest::Request) -> Result<reqwest::Response>;
}

/// Supplies bearer tokens for outgoing requests.
///
/// Acquiring and refreshing tokens happens elsewhere; this is the boundary.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns the token to attach, or `None` to send the request unauthenticated.
    async fn token(&self) -> Result<Option<String>>;
}

/// A fixed access token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(REDACTED)")
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<Option<String>> {
        Ok(Some(self.0.clone()))
    }
}

/// Sends requests without credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl TokenSource for NoAuth {
    async fn token(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// The innermost layer: attaches credentials and performs the network call.
///
/// The HTTP client's timeout bounds a single round trip; exceeding it yields a
/// network timeout error, which the retry layers classify like any other error.
pub struct AuthTransport {
    http_client: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
}

impl AuthTransport {
    /// Creates the base transport with a per-attempt timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self::with_client(http_client, tokens))
    }

    /// Uses an already configured HTTP client.
    pub fn with_client(http_client: reqwest::Client, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            http_client,
            tokens,
        }
    }
}

#[async_trait]
impl Transport for AuthTransport {
    async fn round_trip(&self, mut request: reqwest::Request) -> Result<reqwest::Response> {
        if !request.headers().contains_key(AUTHORIZATION) {
            if let Some(token) = self.tokens.token().await? {
                let mut value = HeaderValue::try_from(format!("Bearer {}", token)).map_err(|e| {
                    Error::ConfigurationError(format!("Invalid access token: {}", e))
                })?;
                value.set_sensitive(true);
                request.headers_mut().insert(AUTHORIZATION, value);
            }
        }

        Ok(self.http_client.execute(request).await?)
    }
}

/// Logs every request and response passing through it.
///
/// Headers are logged at debug level with credentials redacted; request bodies
/// only at trace level. Nothing here affects what is sent or returned.
pub struct LoggingTransport {
    name: String,
    inner: Arc<dyn Transport>,
}

impl LoggingTransport {
    /// `name` identifies the API family in log lines.
    pub fn new(name: impl Into<String>, inner: Arc<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }
}

/// Returns a copy of `headers` with credential values replaced.
pub fn redact_headers(headers: &HeaderMap) -> HeaderMap {
    let mut redacted = headers.clone();
    for (name, value) in redacted.iter_mut() {
        if name == AUTHORIZATION || value.is_sensitive() {
            *value = HeaderValue::from_static("REDACTED");
        }
    }
    redacted
}

#[async_trait]
impl Transport for LoggingTransport {
    async fn round_trip(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        let method = request.method().clone();
        let url = request.url().clone();

        tracing::debug!(
            api = %self.name,
            method = %method,
            url = %url,
            headers = ?redact_headers(request.headers()),
            "Sending HTTP request"
        );
        if let Some(body) = request.body().and_then(|body| body.as_bytes()) {
            tracing::trace!(
                api = %self.name,
                body = %String::from_utf8_lossy(body),
                "HTTP request body"
            );
        }

        let start_time = Instant::now();
        match self.inner.round_trip(request).await {
            Ok(response) => {
                tracing::debug!(
                    api = %self.name,
                    method = %method,
                    url = %url,
                    status = response.status().as_u16(),
                    latency_ms = start_time.elapsed().as_millis(),
                    headers = ?redact_headers(response.headers()),
                    "Received HTTP response"
                );
                Ok(response)
            }
            Err(e) => {
                tracing::debug!(
                    api = %self.name,
                    method = %method,
                    url = %url,
                    error = %e,
                    latency_ms = start_time.elapsed().as_millis(),
                    "HTTP request failed"
                );
                Err(e)
            }
        }
    }
}

/// Re-sends requests while the failure is retryable and the budget lasts.
///
/// Non-2xx responses are turned into [`ApiError`]s for classification. When the
/// final outcome is a response, it is handed back with its status, headers,
/// and body intact. Requests whose body cannot be cloned are sent once.
#[derive(Clone)]
pub struct RetryTransport {
    inner: Arc<dyn Transport>,
    policy: Arc<RetryPolicy>,
    extras: Vec<SharedPredicate>,
    budget: Duration,
}

impl RetryTransport {
    /// Wraps `inner`, retrying with the policy's default predicates.
    pub fn new(inner: Arc<dyn Transport>, policy: Arc<RetryPolicy>) -> Self {
        Self {
            inner,
            policy,
            extras: Vec::new(),
            budget: DEFAULT_RETRY_TRANSPORT_TIMEOUT,
        }
    }

    /// Sets the wall-clock budget for one request's attempts.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Returns a copy of this layer that also retries on `extras`.
    ///
    /// The inner transport and default predicates are shared with `self`.
    pub fn with_additional_predicates(
        &self,
        extras: impl IntoIterator<Item = SharedPredicate>,
    ) -> Self {
        let mut copy = self.clone();
        copy.extras.extend(extras);
        copy
    }
}

#[async_trait]
impl Transport for RetryTransport {
    async fn round_trip(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        let body = match request.body() {
            None => None,
            Some(body) => match body.as_bytes() {
                Some(bytes) => Some(bytes.to_vec()),
                None => {
                    tracing::debug!(url = %request.url(), "Request body is not replayable, sending once");
                    return self.inner.round_trip(request).await;
                }
            },
        };
        let method = request.method().clone();
        let url = request.url().clone();
        let headers = request.headers().clone();
        let timeout = request.timeout().copied();
        let version = request.version();
        drop(request);

        let inner = &self.inner;
        let outcome = self
            .policy
            .retry(self.budget, &self.extras, || {
                let mut attempt = reqwest::Request::new(method.clone(), url.clone());
                *attempt.headers_mut() = headers.clone();
                *attempt.timeout_mut() = timeout;
                *attempt.version_mut() = version;
                if let Some(body) = &body {
                    *attempt.body_mut() = Some(body.clone().into());
                }
                async move {
                    let response = inner.round_trip(attempt).await?;
                    if response.status().is_success() {
                        Ok(response)
                    } else {
                        Err(Error::Api(ApiError::from_response(response).await))
                    }
                }
            })
            .await;

        match outcome {
            Ok(response) => Ok(response),
            Err(Error::Api(err)) => Ok(err.into_response()),
            Err(e) => Err(e),
        }
    }
}

/// The outermost layer: adds default headers to requests that lack them.
///
/// A header the request already carries always wins over the default.
pub struct HeaderTransport {
    inner: Arc<dyn Transport>,
    headers: HeaderMap,
}

impl HeaderTransport {
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self {
            inner,
            headers: HeaderMap::new(),
        }
    }

    /// Sets a default header, replacing any previous default for `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn set(&mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<()> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// The defaults this layer injects.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

#[async_trait]
impl Transport for HeaderTransport {
    async fn round_trip(&self, mut request: reqwest::Request) -> Result<reqwest::Response> {
        for (name, value) in &self.headers {
            if !request.headers().contains_key(name) {
                request.headers_mut().insert(name.clone(), value.clone());
            }
        }
        self.inner.round_trip(request).await
    }
}

/// The assembled transport chain.
///
/// `retry` is kept so callers can derive copies with call-specific predicates
/// while sharing everything beneath it.
#[derive(Clone)]
pub struct Pipeline {
    transport: Arc<dyn Transport>,
    retry: RetryTransport,
    default_headers: HeaderMap,
}

impl Pipeline {
    /// The outermost layer.
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// Rebuilds the outer layers over a retry layer that also honors `extras`.
    pub fn with_additional_retries(&self, extras: impl IntoIterator<Item = SharedPredicate>) -> Self {
        let retry = self.retry.with_additional_predicates(extras);
        let mut headers = HeaderTransport::new(Arc::new(retry.clone()));
        headers.headers = self.default_headers.clone();

        Self {
            transport: Arc::new(headers),
            retry,
            default_headers: self.default_headers.clone(),
        }
    }
}

/// Builds header → retry → logging → `base` from `config`.
///
/// `X-Goog-Request-Reason` is set from `request_reason`, and
/// `X-Goog-User-Project` from `billing_project` when `user_project_override`
/// is enabled.
///
/// # Errors
///
/// Returns an error if a configured header value is invalid.
pub fn build_pipeline(
    config: &Config,
    base: Arc<dyn Transport>,
    policy: Arc<RetryPolicy>,
    retry_budget: Duration,
) -> Result<Pipeline> {
    let logging: Arc<dyn Transport> = Arc::new(LoggingTransport::new("Google", base));
    let retry = RetryTransport::new(logging, policy).with_budget(retry_budget);

    let mut headers = HeaderTransport::new(Arc::new(retry.clone()));
    if let Some(reason) = config.request_reason.as_deref().filter(|r| !r.is_empty()) {
        headers.set(REQUEST_REASON_HEADER, reason)?;
    }
    if config.user_project_override {
        if let Some(project) = config.billing_project.as_deref().filter(|p| !p.is_empty()) {
            headers.set(USER_PROJECT_HEADER, project)?;
        }
    }

    let default_headers = headers.headers().clone();
    Ok(Pipeline {
        transport: Arc::new(headers),
        retry,
        default_headers,
    })
}
