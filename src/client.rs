//! The JSON request executor.
//!
//! [`Client`] owns the transport pipeline and the retry policy for one provider
//! configuration. [`Client::send_request`] performs a single logical JSON call:
//! it builds the request, drives it through the bounded retry loop, and decodes
//! the response body. Use [`ClientBuilder`] to configure and create clients.

use crate::{
    config::Config,
    error::{ApiError, Error, Result},
    predicates::SharedPredicate,
    request::{add_query_params, QuotaProject, SendRequestOptions},
    retry::RetryPolicy,
    transport::{
        build_pipeline, AuthTransport, NoAuth, Pipeline, StaticToken, TokenSource, Transport,
        DEFAULT_RETRY_TRANSPORT_TIMEOUT, USER_PROJECT_HEADER,
    },
};
use http::header::{CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Where [`Client::current_user_email`] looks up the caller's identity.
pub const DEFAULT_USER_INFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// Executes JSON API calls through the resilient transport pipeline.
///
/// The client is cheap to clone and meant to be shared: everything it holds is
/// immutable after [`ClientBuilder::build`].
///
/// # Examples
///
/// ```no_run
/// use provider_transport::{Client, Config, SendRequestOptions};
/// use provider_transport::predicates::{iam_member_missing, shared};
/// use http::Method;
///
/// # async fn example() -> Result<(), provider_transport::Error> {
/// let client = Client::builder()
///     .config(Config {
///         user_agent: "my-provider/1.0".to_string(),
///         ..Config::default()
///     })
///     .build()?;
///
/// let options = SendRequestOptions::new(
///     Method::GET,
///     "https://bigquery.googleapis.com/bigquery/v2/projects/p/datasets/d",
/// )
/// .with_project("p")
/// .with_retry_predicate(shared(iam_member_missing));
///
/// if let Some(dataset) = client.send_request(options).await? {
///     println!("etag: {:?}", dataset.get("etag"));
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    pipeline: Pipeline,
    policy: Arc<RetryPolicy>,
    config: Config,
    user_info_url: String,
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The provider configuration this client was built from.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The shared retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    /// The outermost transport layer, for raw HTTP calls that should still get
    /// default headers and retries.
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.inner.pipeline.transport()
    }

    /// Returns a client whose transport also retries on `extras`.
    ///
    /// The extras apply inside the pipeline's retry layer, so they cover raw
    /// calls through [`Client::transport`] and every `send_request` made with
    /// the returned client, on top of any per-call predicates.
    pub fn with_additional_retries(&self, extras: impl IntoIterator<Item = SharedPredicate>) -> Self {
        Client {
            inner: Arc::new(ClientInner {
                pipeline: self.inner.pipeline.with_additional_retries(extras),
                policy: Arc::clone(&self.inner.policy),
                config: self.inner.config.clone(),
                user_info_url: self.inner.user_info_url.clone(),
            }),
        }
    }

    /// Performs one logical JSON API call.
    ///
    /// `alt=json` is appended to the URL, and the call is retried while failures
    /// are retryable under `defaults ++ options.error_retry_predicates` and the
    /// budget (`options.timeout`, zero meaning one hour) lasts.
    ///
    /// Returns `Ok(None)` for `204 No Content`, otherwise the decoded JSON object.
    ///
    /// # Errors
    ///
    /// - [`Error::Api`] for a non-2xx response that was not retried (or whose
    ///   retries ran out of budget).
    /// - [`Error::DeserializationFailed`] if a 2xx body is not a JSON object.
    ///   This is never retried.
    /// - Network, URL and configuration errors as they occur.
    pub async fn send_request(&self, options: SendRequestOptions) -> Result<Option<Map<String, Value>>> {
        let headers = self.request_headers(&options)?;
        let timeout = options.effective_timeout();
        let url = add_query_params(&options.raw_url, &[("alt", "json")])?;
        let body = options
            .body
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| Error::SerializationFailed(e.to_string()))?;

        let start_time = Instant::now();
        let transport = &self.inner.pipeline.transport();
        let response = self
            .inner
            .policy
            .retry(timeout, &options.error_retry_predicates, || {
                let mut request = reqwest::Request::new(options.method.clone(), url.clone());
                *request.headers_mut() = headers.clone();
                if let Some(body) = &body {
                    *request.body_mut() = Some(body.clone().into());
                }

                tracing::debug!(method = %options.method, url = %url, "Executing HTTP request");
                async move {
                    let response = transport.round_trip(request).await?;
                    if response.status().is_success() {
                        Ok(response)
                    } else {
                        Err(Error::Api(ApiError::from_response(response).await))
                    }
                }
            })
            .await
            .inspect_err(|e| {
                tracing::warn!(
                    error = %e,
                    method = %options.method,
                    url = %url,
                    "Request failed"
                );
            })?;

        Self::decode_response(response, start_time.elapsed()).await
    }

    fn request_headers(&self, options: &SendRequestOptions) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        let user_agent = if options.user_agent.is_empty() {
            &self.inner.config.user_agent
        } else {
            &options.user_agent
        };
        if !user_agent.is_empty() {
            let value = HeaderValue::try_from(user_agent.as_str())
                .map_err(|e| Error::ConfigurationError(format!("Invalid user agent: {}", e)))?;
            headers.insert(USER_AGENT, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if self.inner.config.user_project_override {
            match &options.project {
                QuotaProject::Project(project) => {
                    let value = HeaderValue::try_from(project.as_str()).map_err(|e| {
                        Error::ConfigurationError(format!("Invalid project: {}", e))
                    })?;
                    headers.insert(USER_PROJECT_HEADER, value);
                }
                QuotaProject::NoOverride => {
                    headers.insert(USER_PROJECT_HEADER, HeaderValue::from_static(""));
                }
                QuotaProject::Unset => {}
            }
        }

        Ok(headers)
    }

    async fn decode_response(
        response: reqwest::Response,
        latency: Duration,
    ) -> Result<Option<Map<String, Value>>> {
        let status = response.status();

        tracing::debug!(
            status = status.as_u16(),
            latency_ms = latency.as_millis(),
            "Received HTTP response"
        );

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let raw_body = response.text().await?;
        match serde_json::from_str::<Map<String, Value>>(&raw_body) {
            Ok(data) => Ok(Some(data)),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    raw_response = %raw_body,
                    "Failed to deserialize response"
                );

                Err(Error::DeserializationFailed {
                    raw_response: raw_body,
                    serde_error: e.to_string(),
                    status,
                })
            }
        }
    }

    /// Looks up the email of the identity the client authenticates as.
    ///
    /// The call never names a billing project, since the userinfo endpoint
    /// rejects one.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails or the response has no `email`.
    pub async fn current_user_email(&self, user_agent: &str) -> Result<String> {
        let options = SendRequestOptions::new(Method::GET, self.inner.user_info_url.clone())
            .with_project(QuotaProject::NoOverride)
            .with_user_agent(user_agent);

        let body = self
            .send_request(options)
            .await
            .map_err(|e| e.context("error retrieving userinfo for your provider credentials"))?;

        body.as_ref()
            .and_then(|body| body.get("email"))
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| {
                Error::UnexpectedResponse(
                    "error retrieving email from userinfo. email was nil in the response."
                        .to_string(),
                )
            })
    }

    /// Logs which identity is making API calls. Failures are logged, not returned.
    pub async fn log_identity(&self, user_agent: &str) {
        match self.current_user_email(user_agent).await {
            Ok(email) => tracing::info!(email = %email, "Using identity for API calls"),
            Err(e) => tracing::info!(
                error = %e,
                "Could not determine identity; is the userinfo.email scope enabled?"
            ),
        }
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use provider_transport::{ClientBuilder, Config, StaticToken};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), provider_transport::Error> {
/// let client = ClientBuilder::new()
///     .config(Config {
///         request_reason: Some("change-1234".to_string()),
///         request_timeout: Duration::from_secs(60),
///         ..Config::default()
///     })
///     .token_source(Arc::new(StaticToken::new("ya29.token")))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    config: Config,
    tokens: Option<Arc<dyn TokenSource>>,
    base_transport: Option<Arc<dyn Transport>>,
    retry_policy: Option<RetryPolicy>,
    retry_transport_timeout: Duration,
    user_info_url: String,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            tokens: None,
            base_transport: None,
            retry_policy: None,
            retry_transport_timeout: DEFAULT_RETRY_TRANSPORT_TIMEOUT,
            user_info_url: DEFAULT_USER_INFO_URL.to_string(),
        }
    }

    /// Sets the provider configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets where access tokens come from.
    ///
    /// Defaults to `config.access_token` if present, otherwise no credentials.
    pub fn token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Replaces the innermost transport. Credentials and the per-attempt
    /// timeout then become that transport's responsibility.
    pub fn base_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.base_transport = Some(transport);
        self
    }

    /// Sets the retry policy shared by the retry transport and `send_request`.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Sets the wall-clock budget of the retry transport layer.
    pub fn retry_transport_timeout(mut self, timeout: Duration) -> Self {
        self.retry_transport_timeout = timeout;
        self
    }

    /// Sets the userinfo endpoint used by [`Client::current_user_email`].
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn user_info_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.user_info_url = Url::parse(url.as_ref())?.to_string();
        Ok(self)
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or a configured
    /// header value is invalid.
    pub fn build(self) -> Result<Client> {
        let base = match self.base_transport {
            Some(base) => base,
            None => {
                let tokens = self.tokens.unwrap_or_else(|| match &self.config.access_token {
                    Some(token) => Arc::new(StaticToken::new(token.clone())),
                    None => Arc::new(NoAuth),
                });
                Arc::new(AuthTransport::new(self.config.http_timeout(), tokens)?)
            }
        };

        let policy = Arc::new(self.retry_policy.unwrap_or_default());
        let pipeline = build_pipeline(
            &self.config,
            base,
            Arc::clone(&policy),
            self.retry_transport_timeout,
        )?;

        Ok(Client {
            inner: Arc::new(ClientInner {
                pipeline,
                policy,
                config: self.config,
                user_info_url: self.user_info_url,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
