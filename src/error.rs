//! Error types for outbound API calls.
//!
//! Besides the crate-wide [`Error`] enum, this module defines the two structured
//! error shapes that retry predicates inspect: [`ApiError`], built from a non-2xx
//! HTTP response, and [`RpcStatus`], an RPC status that may carry a retry-delay
//! hint. Every error keeps its cause chain reachable through
//! [`std::error::Error::source`] so classification can look past wrappers.

use http::{HeaderMap, StatusCode};
use std::fmt;
use std::time::Duration;

/// The main error type for outbound API calls.
///
/// Intermediate, retried failures are never surfaced through this type; callers
/// only see the error that ended the retry loop.
///
/// # Examples
///
/// ```no_run
/// use provider_transport::{Client, Error, SendRequestOptions};
/// use http::Method;
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder().build()?;
/// let options = SendRequestOptions::new(Method::GET, "https://example.com/v1/things");
///
/// match client.send_request(options).await {
///     Ok(Some(body)) => println!("Success: {:?}", body),
///     Ok(None) => println!("No content"),
///     Err(Error::Api(err)) => eprintln!("API error {}: {}", err.code(), err.body),
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A network-level error occurred (connection failed, timed out, reset, etc.).
    ///
    /// This wraps the underlying `reqwest::Error`; the I/O error that caused it, if
    /// any, is further down the cause chain.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// An I/O error surfaced outside of the HTTP client.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server answered with a non-2xx HTTP status code.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// An RPC-style call failed with a status.
    #[error(transparent)]
    Status(#[from] RpcStatus),

    /// A long-running operation finished with an error.
    #[error(transparent)]
    Operation(#[from] OperationError),

    /// Failed to deserialize a 2xx response body.
    ///
    /// Never retried: the request already succeeded at the transport level.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// Failed to serialize the request body.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// Invalid configuration was provided (bad header value, malformed duration, etc.).
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The response was well-formed but lacked something the caller needed.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Another error, annotated with what was being attempted.
    #[error("{context}: {source}")]
    Context {
        /// What was being attempted
        context: String,
        /// The underlying error
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wraps this error with a description of what was being attempted.
    ///
    /// The original error stays in the cause chain, so retry classification
    /// still sees it.
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the structured API error, looking through any context wrappers.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Error::Api(err) => Some(err),
            Error::Context { source, .. } => source.api_error(),
            _ => None,
        }
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::DeserializationFailed { status, .. } => Some(*status),
            _ => self.api_error().map(|err| err.status),
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => self.api_error().map(|err| err.body.as_str()),
        }
    }
}

/// A specialized `Result` type for outbound API calls.
pub type Result<T> = std::result::Result<T, Error>;

/// A structured error built from a non-2xx HTTP response.
///
/// Several predicates pattern-match on substrings of `body`; this mirrors the
/// upstream APIs' error-message conventions, which are not otherwise documented.
#[derive(thiserror::Error, Debug, Clone)]
#[error("HTTP error {status}: {body}")]
pub struct ApiError {
    /// The HTTP status code
    pub status: StatusCode,
    /// The raw response body
    pub body: String,
    /// The response headers
    pub headers: HeaderMap,
}

impl ApiError {
    /// Creates an API error from a status code and response body.
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Consumes a response, reading its body into an `ApiError`.
    ///
    /// A body that cannot be read is recorded as empty; the status code is what
    /// matters most for classification.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();

        Self {
            status,
            body,
            headers,
        }
    }

    /// Returns the numeric status code.
    pub fn code(&self) -> u16 {
        self.status.as_u16()
    }

    /// Rebuilds an HTTP response carrying this error's status, headers, and body.
    pub(crate) fn into_response(self) -> reqwest::Response {
        let mut response = http::Response::new(self.body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        reqwest::Response::from(response)
    }
}

/// Canonical RPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl RpcCode {
    /// Maps a wire value to a code; anything unrecognized becomes `Unknown`.
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => RpcCode::Ok,
            1 => RpcCode::Cancelled,
            3 => RpcCode::InvalidArgument,
            4 => RpcCode::DeadlineExceeded,
            5 => RpcCode::NotFound,
            6 => RpcCode::AlreadyExists,
            7 => RpcCode::PermissionDenied,
            8 => RpcCode::ResourceExhausted,
            9 => RpcCode::FailedPrecondition,
            10 => RpcCode::Aborted,
            11 => RpcCode::OutOfRange,
            12 => RpcCode::Unimplemented,
            13 => RpcCode::Internal,
            14 => RpcCode::Unavailable,
            15 => RpcCode::DataLoss,
            16 => RpcCode::Unauthenticated,
            _ => RpcCode::Unknown,
        }
    }
}

impl fmt::Display for RpcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A detail attached to an RPC status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusDetail {
    /// Server-provided hint on how long to wait before retrying.
    RetryInfo {
        /// Whole seconds of the delay
        seconds: i64,
        /// Nanosecond part of the delay
        nanos: i32,
    },
    /// Any detail type this crate does not interpret.
    Other {
        /// The detail's type URL
        type_url: String,
    },
}

/// An error returned by an RPC-style API.
#[derive(thiserror::Error, Debug, Clone)]
#[error("rpc error: code = {code} desc = {message}")]
pub struct RpcStatus {
    /// The status code
    pub code: RpcCode,
    /// The status message
    pub message: String,
    /// Attached details
    pub details: Vec<StatusDetail>,
}

impl RpcStatus {
    /// Creates a status without details.
    pub fn new(code: RpcCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Vec::new(),
        }
    }

    /// Attaches a detail to the status.
    pub fn with_detail(mut self, detail: StatusDetail) -> Self {
        self.details.push(detail);
        self
    }

    /// Returns the delay from the first `RetryInfo` detail, if any.
    ///
    /// Negative components are treated as zero.
    pub fn retry_delay(&self) -> Option<Duration> {
        self.details.iter().find_map(|detail| match detail {
            StatusDetail::RetryInfo { seconds, nanos } => Some(
                Duration::from_secs((*seconds).max(0) as u64)
                    + Duration::from_nanos((*nanos).max(0) as u64),
            ),
            StatusDetail::Other { .. } => None,
        })
    }
}

/// The error a long-running operation reports once it is done.
///
/// Operation APIs report either a single status code and message, or (Cloud
/// SQL) a list of per-item error codes; both land here.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("operation failed with code {code}: {message}")]
pub struct OperationError {
    /// The operation's status code
    pub code: i32,
    /// The operation's status message
    pub message: String,
    /// Per-item error codes, in the order reported
    pub error_codes: Vec<String>,
}

impl OperationError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            error_codes: Vec::new(),
        }
    }

    /// Appends a per-item error code.
    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_codes.push(code.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_operation_error_display() {
        let err = Error::from(
            OperationError::new(3, "Failed to retrieve function source code")
                .with_error_code("INVALID_ARGUMENT"),
        );
        assert_eq!(
            err.to_string(),
            "operation failed with code 3: Failed to retrieve function source code"
        );
    }

    #[test]
    fn test_context_keeps_api_error_reachable() {
        let err = Error::from(ApiError::new(StatusCode::CONFLICT, "operationInProgress"))
            .context("updating instance");

        assert_eq!(err.status(), Some(StatusCode::CONFLICT));
        assert_eq!(err.raw_response(), Some("operationInProgress"));
        assert!(err.to_string().starts_with("updating instance: HTTP error 409"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_api_error_into_response_preserves_parts() {
        let mut err = ApiError::new(StatusCode::NOT_FOUND, "missing");
        err.headers
            .insert("x-trace", http::HeaderValue::from_static("abc"));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get("x-trace").unwrap(), "abc");
    }

    #[test]
    fn test_retry_delay_uses_first_retry_info() {
        let status = RpcStatus::new(RpcCode::Unavailable, "try later")
            .with_detail(StatusDetail::Other {
                type_url: "type.googleapis.com/google.rpc.DebugInfo".to_string(),
            })
            .with_detail(StatusDetail::RetryInfo {
                seconds: 1,
                nanos: 500_000_000,
            })
            .with_detail(StatusDetail::RetryInfo {
                seconds: 9,
                nanos: 0,
            });

        assert_eq!(status.retry_delay(), Some(Duration::from_millis(1500)));
        assert_eq!(RpcStatus::new(RpcCode::Internal, "").retry_delay(), None);
    }

    #[test]
    fn test_rpc_code_from_unknown_value() {
        assert_eq!(RpcCode::from_i32(14), RpcCode::Unavailable);
        assert_eq!(RpcCode::from_i32(99), RpcCode::Unknown);
    }
}
