//! Error-classification predicates.
//!
//! A predicate inspects one link of an error's cause chain and decides whether
//! it describes a transient condition worth retrying. Predicates are pure: they
//! never log, block, or panic. The retry engine in [`crate::retry`] walks the
//! chain, asks each predicate in turn, and logs whichever one matches first.
//!
//! [`default_predicates`] returns the set applied to every call. The remaining
//! predicates cover eventual-consistency races on specific API surfaces and are
//! meant to be passed as per-call extras.
//!
//! # Examples
//!
//! ```
//! use provider_transport::predicates::{is_common_retryable_error_code, Cause, Verdict};
//! use provider_transport::ApiError;
//! use http::StatusCode;
//!
//! let err = ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "backend unavailable");
//! let verdict = is_common_retryable_error_code(&Cause::Api(&err));
//! assert!(verdict.is_retryable());
//! assert_eq!(verdict.reason(), "Retryable error code 503");
//! ```

use crate::error::{ApiError, Error, OperationError, RpcCode, RpcStatus};
use regex::Regex;
use std::borrow::Cow;
use std::error::Error as StdError;
use std::io;
use std::sync::LazyLock;
use std::sync::Arc;

/// A borrowed view of one link in an error's cause chain.
///
/// Predicates match on the variant they care about and ignore the rest.
#[derive(Debug, Clone, Copy)]
pub enum Cause<'a> {
    /// A request-level error from the HTTP client.
    Network(&'a reqwest::Error),
    /// An operating-system or stream error.
    Io(&'a io::Error),
    /// A non-2xx HTTP response.
    Api(&'a ApiError),
    /// An RPC status.
    Status(&'a RpcStatus),
    /// A failed long-running operation.
    Operation(&'a OperationError),
    /// Anything else, including this crate's own wrapping variants.
    Other(&'a (dyn StdError + 'static)),
}

impl<'a> Cause<'a> {
    /// Classifies a single error value (not its sources).
    pub fn of(err: &'a (dyn StdError + 'static)) -> Self {
        let own = err
            .downcast_ref::<Error>()
            .or_else(|| err.downcast_ref::<Box<Error>>().map(|boxed| boxed.as_ref()));
        if let Some(own) = own {
            // Wrapping variants are left as `Other`: their payload is the next link.
            return match own {
                Error::Api(api) => Cause::Api(api),
                Error::Status(status) => Cause::Status(status),
                Error::Operation(op) => Cause::Operation(op),
                _ => Cause::Other(err),
            };
        }

        if let Some(e) = err.downcast_ref::<reqwest::Error>() {
            Cause::Network(e)
        } else if let Some(e) = err.downcast_ref::<io::Error>() {
            Cause::Io(e)
        } else if let Some(e) = err.downcast_ref::<ApiError>() {
            Cause::Api(e)
        } else if let Some(e) = err.downcast_ref::<RpcStatus>() {
            Cause::Status(e)
        } else if let Some(e) = err.downcast_ref::<OperationError>() {
            Cause::Operation(e)
        } else {
            Cause::Other(err)
        }
    }

    /// Returns the underlying error value.
    pub fn error(&self) -> &'a (dyn StdError + 'static) {
        match *self {
            Cause::Network(e) => e,
            Cause::Io(e) => e,
            Cause::Api(e) => e,
            Cause::Status(e) => e,
            Cause::Operation(e) => e,
            Cause::Other(e) => e,
        }
    }

    fn api(&self) -> Option<&'a ApiError> {
        match *self {
            Cause::Api(e) => Some(e),
            _ => None,
        }
    }
}

/// The outcome of evaluating a predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The error is transient; the reason is logged when a retry happens.
    Retryable(Cow<'static, str>),
    /// The predicate does not recognize this error.
    NotRetryable,
}

impl Verdict {
    /// Creates a retryable verdict.
    pub fn retryable(reason: impl Into<Cow<'static, str>>) -> Self {
        Verdict::Retryable(reason.into())
    }

    /// Returns `true` if the error should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Verdict::Retryable(_))
    }

    /// Returns the human-readable justification, or `""` when not retryable.
    pub fn reason(&self) -> &str {
        match self {
            Verdict::Retryable(reason) => reason,
            Verdict::NotRetryable => "",
        }
    }
}

/// Trait for deciding whether one link of a failed call's cause chain is transient.
///
/// Any `Fn(&Cause<'_>) -> Verdict` is a predicate, so plain functions work.
///
/// # Examples
///
/// ```
/// use provider_transport::predicates::{Cause, RetryPredicate, Verdict};
///
/// fn is_locked(cause: &Cause<'_>) -> Verdict {
///     match cause {
///         Cause::Api(err) if err.code() == 423 => Verdict::retryable("resource locked"),
///         _ => Verdict::NotRetryable,
///     }
/// }
///
/// let predicate: &dyn RetryPredicate = &is_locked;
/// # let _ = predicate;
/// ```
pub trait RetryPredicate: Send + Sync {
    /// Evaluates a single link of the cause chain.
    fn check(&self, cause: &Cause<'_>) -> Verdict;
}

impl<F> RetryPredicate for F
where
    F: Fn(&Cause<'_>) -> Verdict + Send + Sync,
{
    fn check(&self, cause: &Cause<'_>) -> Verdict {
        self(cause)
    }
}

/// A predicate that can be shared between threads and transport layers.
pub type SharedPredicate = Arc<dyn RetryPredicate>;

/// Wraps a predicate for sharing.
pub fn shared<P>(predicate: P) -> SharedPredicate
where
    P: RetryPredicate + 'static,
{
    Arc::new(predicate)
}

/// The predicates applied to every outbound call.
///
/// Covers network blips, common overload status codes, and the few
/// eventual-consistency races that are safe to retry everywhere.
pub fn default_predicates() -> Vec<SharedPredicate> {
    vec![
        // Network errors, usually wrapped by a request-level error.
        shared(is_network_temporary_error),
        shared(is_network_timeout_error),
        shared(is_io_eof_error),
        shared(is_connection_reset_network_error),
        shared(is_common_retryable_error_code),
        // Historically scoped to Cloud SQL but kept global.
        shared(is_409_operation_in_progress_error),
        // GCE subnetworks are briefly unready after some operations.
        shared(is_subnetwork_unready_error),
        // GCE reports some read rate limits as 403 instead of 429.
        shared(is_403_quota_exceeded_per_minute_error),
    ]
}

fn chain_io<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a io::Error> {
    std::iter::successors(err.source(), |e| (*e).source())
        .find_map(|e| e.downcast_ref::<io::Error>())
}

/// The error behind `cause`, unless it is one of this crate's errors.
///
/// Crate errors can echo a response body in their message, so substring checks
/// meant for transport errors must not look at them.
fn foreign_error<'a>(cause: &Cause<'a>) -> Option<&'a (dyn StdError + 'static)> {
    match *cause {
        Cause::Network(err) => Some(err),
        Cause::Io(err) => Some(err),
        Cause::Other(err)
            if err.downcast_ref::<Error>().is_none() && err.downcast_ref::<Box<Error>>().is_none() =>
        {
            Some(err)
        }
        _ => None,
    }
}

fn is_temporary_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
    )
}

fn api_matches(cause: &Cause<'_>, code: u16, body: impl FnOnce(&str) -> bool) -> bool {
    cause
        .api()
        .is_some_and(|err| err.code() == code && body(&err.body))
}

fn api_matches_lowercase(cause: &Cause<'_>, code: u16, needles: &[&str]) -> bool {
    api_matches(cause, code, |body| {
        let body = body.to_lowercase();
        needles.iter().any(|needle| body.contains(needle))
    })
}

/// Retries I/O errors the operating system marks as transient.
pub fn is_network_temporary_error(cause: &Cause<'_>) -> Verdict {
    let temporary = match *cause {
        Cause::Io(err) => is_temporary_kind(err.kind()),
        Cause::Network(err) => chain_io(err).is_some_and(|io| is_temporary_kind(io.kind())),
        _ => false,
    };

    if temporary {
        Verdict::retryable("marked as temporary")
    } else {
        Verdict::NotRetryable
    }
}

/// Retries request and socket timeouts.
pub fn is_network_timeout_error(cause: &Cause<'_>) -> Verdict {
    let timed_out = match *cause {
        Cause::Network(err) => err.is_timeout(),
        Cause::Io(err) => err.kind() == io::ErrorKind::TimedOut,
        _ => false,
    };

    if timed_out {
        Verdict::retryable("marked as timeout")
    } else {
        Verdict::NotRetryable
    }
}

// Wording hyper uses when a connection drops mid-response.
const INCOMPLETE_MESSAGE: &str = "connection closed before message completed";

/// Retries a body or connection that ended before the message was complete.
pub fn is_io_eof_error(cause: &Cause<'_>) -> Verdict {
    let eof = match *cause {
        Cause::Io(err) => err.kind() == io::ErrorKind::UnexpectedEof,
        Cause::Network(err) => {
            chain_io(err).is_some_and(|io| io.kind() == io::ErrorKind::UnexpectedEof)
                || std::iter::successors(err.source(), |e| (*e).source())
                    .any(|e| e.to_string().contains(INCOMPLETE_MESSAGE))
        }
        Cause::Other(_) => {
            foreign_error(cause).is_some_and(|err| err.to_string().contains(INCOMPLETE_MESSAGE))
        }
        _ => false,
    };

    if eof {
        Verdict::retryable("Got unexpected EOF")
    } else {
        Verdict::NotRetryable
    }
}

const CONNECTION_RESET_BY_PEER: &str = ": connection reset by peer";

/// Retries connections the remote end reset.
pub fn is_connection_reset_network_error(cause: &Cause<'_>) -> Verdict {
    let err = cause.error();
    let reset = match *cause {
        Cause::Io(io) => io.kind() == io::ErrorKind::ConnectionReset,
        _ => false,
    } || foreign_error(cause).is_some_and(|err| {
        err.to_string()
            .to_lowercase()
            .ends_with(CONNECTION_RESET_BY_PEER)
    });

    if reset {
        Verdict::retryable(format!("reset connection error: {err}"))
    } else {
        Verdict::NotRetryable
    }
}

/// Retries 429, 500, 502 and 503 responses.
pub fn is_common_retryable_error_code(cause: &Cause<'_>) -> Verdict {
    match cause.api() {
        Some(err) if matches!(err.code(), 429 | 500 | 502 | 503) => {
            Verdict::retryable(format!("Retryable error code {}", err.code()))
        }
        _ => Verdict::NotRetryable,
    }
}

/// Retries 409s caused by concurrent calls, which some APIs (Cloud SQL) report
/// only through the `operationInProgress` reason in the body.
pub fn is_409_operation_in_progress_error(cause: &Cause<'_>) -> Verdict {
    if api_matches(cause, 409, |body| body.contains("operationInProgress")) {
        Verdict::retryable("Operation still in progress")
    } else {
        Verdict::NotRetryable
    }
}

/// Retries operations on a subnetwork that is still settling.
pub fn is_subnetwork_unready_error(cause: &Cause<'_>) -> Verdict {
    if api_matches(cause, 400, |body| {
        body.contains("resourceNotReady") && body.contains("subnetworks")
    }) {
        Verdict::retryable("Subnetwork not ready")
    } else {
        Verdict::NotRetryable
    }
}

static QUOTA_PER_MINUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Quota exceeded for quota metric '(?P<metric>.*)' and limit '(?P<limit>.* per minute)' of service",
    )
    .expect("quota pattern is valid")
});

/// Retries per-minute quota errors that the backend mislabels as 403.
pub fn is_403_quota_exceeded_per_minute_error(cause: &Cause<'_>) -> Verdict {
    let Some(err) = cause.api().filter(|err| err.code() == 403) else {
        return Verdict::NotRetryable;
    };

    match QUOTA_PER_MINUTE.captures(&err.body) {
        Some(captures) => {
            let limit = captures.name("limit").map_or("", |m| m.as_str());
            Verdict::retryable(format!("Waiting for quota limit {limit} to refresh"))
        }
        None => Verdict::NotRetryable,
    }
}

const FINGERPRINT_FAIL_ERRORS: &[&str] = &[
    "Invalid fingerprint.",
    "Supplied fingerprint does not match current metadata fingerprint.",
];

/// Retries a 412 caused by a stale fingerprint.
pub fn is_fingerprint_error(cause: &Cause<'_>) -> Verdict {
    if api_matches(cause, 412, |body| {
        FINGERPRINT_FAIL_ERRORS.iter().any(|msg| body.contains(msg))
    }) {
        Verdict::retryable("fingerprint mismatch")
    } else {
        Verdict::NotRetryable
    }
}

/// Retries while a permission granted in the same apply propagates.
pub fn iam_member_missing(cause: &Cause<'_>) -> Verdict {
    if api_matches(cause, 400, |body| body.contains("permission")) {
        Verdict::retryable("Waiting for IAM member permissions to propagate.")
    } else {
        Verdict::NotRetryable
    }
}

/// Retries Pub/Sub topic creation in a project whose org policy has not propagated.
pub fn pubsub_topic_project_not_ready(cause: &Cause<'_>) -> Verdict {
    if api_matches(cause, 400, |body| body.contains("retry this operation")) {
        Verdict::retryable(
            "Waiting for Pubsub topic's project to properly initialize with organization policy",
        )
    } else {
        Verdict::NotRetryable
    }
}

/// Retries Cloud SQL 409s, except when the instance already exists.
pub fn is_sql_operation_in_progress_error(cause: &Cause<'_>) -> Verdict {
    if api_matches(cause, 409, |body| !body.contains("instanceAlreadyExists")) {
        Verdict::retryable("Waiting for other concurrent Cloud SQL operations to finish")
    } else {
        Verdict::NotRetryable
    }
}

/// Retries when the same service is already being activated or deactivated.
pub fn service_usage_service_being_activated(cause: &Cause<'_>) -> Verdict {
    if api_matches(cause, 400, |body| {
        body.contains("Another activation or deactivation is in progress")
    }) {
        Verdict::retryable("Waiting for same service activation/deactivation to finish")
    } else {
        Verdict::NotRetryable
    }
}

/// Retries BigQuery's edit quota, reported as a 403.
pub fn is_bigquery_iam_quota_error(cause: &Cause<'_>) -> Verdict {
    if api_matches_lowercase(cause, 403, &["exceeded rate limits"]) {
        Verdict::retryable("Waiting for Bigquery edit quota to refresh")
    } else {
        Verdict::NotRetryable
    }
}

/// Retries concurrent edits to a monitoring resource.
pub fn is_monitoring_concurrent_edit_error(cause: &Cause<'_>) -> Verdict {
    if api_matches_lowercase(
        cause,
        409,
        &["too many concurrent edits", "could not fulfill the request"],
    ) {
        Verdict::retryable("Waiting for other Monitoring changes to finish")
    } else {
        Verdict::NotRetryable
    }
}

/// The common retryable codes, minus 429 (Filestore quota errors are permanent).
pub fn is_not_filestore_quota_error(cause: &Cause<'_>) -> Verdict {
    if cause.api().is_some_and(|err| err.code() == 429) {
        return Verdict::NotRetryable;
    }
    is_common_retryable_error_code(cause)
}

/// Retries App Engine concurrent operations and service-agent propagation.
pub fn is_app_engine_retryable_error(cause: &Cause<'_>) -> Verdict {
    if api_matches_lowercase(cause, 409, &["operation is already in progress"]) {
        Verdict::retryable("Waiting for other concurrent App Engine changes to finish")
    } else if api_matches_lowercase(cause, 404, &["unable to retrieve p4sa"]) {
        Verdict::retryable("Waiting for P4SA propagation to GAIA")
    } else {
        Verdict::NotRetryable
    }
}

/// Retries reads of a key version whose material is still being generated.
pub fn is_crypto_key_versions_pending_generation(cause: &Cause<'_>) -> Verdict {
    if api_matches(cause, 400, |body| body.contains("PENDING_GENERATION")) {
        Verdict::retryable("Waiting for pending key generation")
    } else {
        Verdict::NotRetryable
    }
}

/// Retries any 404 for an operation known to be briefly invisible after creation.
#[derive(Debug, Clone)]
pub struct NotFoundRetryable {
    op_type: String,
}

impl NotFoundRetryable {
    /// `op_type` describes the operation, and appears in the retry reason.
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
        }
    }
}

impl RetryPredicate for NotFoundRetryable {
    fn check(&self, cause: &Cause<'_>) -> Verdict {
        match cause.api() {
            Some(err) if err.code() == 404 => {
                Verdict::retryable(format!("Retry 404s for {}", self.op_type))
            }
            _ => Verdict::NotRetryable,
        }
    }
}

/// Retries updates to a job that is mid state transition.
pub fn is_dataflow_job_update_retryable_error(cause: &Cause<'_>) -> Verdict {
    if api_matches(cause, 404, |body| body.contains("in RUNNING OR DRAINING state")) {
        Verdict::retryable("Waiting for job to be in a valid state")
    } else {
        Verdict::NotRetryable
    }
}

pub fn is_peering_operation_in_progress(cause: &Cause<'_>) -> Verdict {
    if api_matches(cause, 400, |body| {
        body.contains("There is a peering operation in progress")
    }) {
        Verdict::retryable("Waiting peering operation to complete")
    } else {
        Verdict::NotRetryable
    }
}

pub fn datastore_index_409_contention(cause: &Cause<'_>) -> Verdict {
    if api_matches(cause, 409, |body| body.contains("too much contention")) {
        Verdict::retryable("too much contention - waiting for less activity")
    } else {
        Verdict::NotRetryable
    }
}

pub fn iap_client_409_operation(cause: &Cause<'_>) -> Verdict {
    if api_matches_lowercase(cause, 409, &["operation was aborted"]) {
        Verdict::retryable("operation was aborted possibly due to concurrency issue - retrying")
    } else {
        Verdict::NotRetryable
    }
}

pub fn healthcare_dataset_not_initialized(cause: &Cause<'_>) -> Verdict {
    if api_matches_lowercase(cause, 404, &["dataset not initialized"]) {
        Verdict::retryable("dataset not initialized - retrying")
    } else {
        Verdict::NotRetryable
    }
}

/// Retries a Cloud SQL operation whose first reported error is `INTERNAL_ERROR`.
///
/// Some SQL resources fail this way transiently, so the retry is optimistic.
pub fn is_sql_internal_error(cause: &Cause<'_>) -> Verdict {
    match *cause {
        Cause::Operation(op) if op.error_codes.first().is_some_and(|code| code == "INTERNAL_ERROR") => {
            Verdict::retryable(
                "Received an internal error, which is sometimes retryable for some SQL resources. Optimistically retrying.",
            )
        }
        _ => Verdict::NotRetryable,
    }
}

/// Retries a Cloud Functions deploy that could not fetch its source from storage yet.
pub fn is_cloud_functions_source_code_error(cause: &Cause<'_>) -> Verdict {
    match *cause {
        Cause::Operation(op)
            if op.code == 3 && op.message == "Failed to retrieve function source code" =>
        {
            Verdict::retryable("Retry on Function failing to pull code from GCS")
        }
        _ => Verdict::NotRetryable,
    }
}

/// Retries a create that collides with a resource still being deleted in the
/// background.
pub fn is_cloud_run_creation_conflict(cause: &Cause<'_>) -> Verdict {
    if api_matches(cause, 409, |_| true) {
        Verdict::retryable("saw a 409 - waiting until background deletion completes")
    } else {
        Verdict::NotRetryable
    }
}

/// Retries an IAM policy write that raced with a service account deletion.
///
/// A user-supplied account that never existed triggers this too, so call sites
/// should short-circuit when the policy etag has not changed.
pub fn iam_service_account_not_found(cause: &Cause<'_>) -> Verdict {
    if api_matches(cause, 400, |body| {
        body.contains("Service account") && body.contains("does not exist")
    }) {
        Verdict::retryable("service account not found in IAM")
    } else {
        Verdict::NotRetryable
    }
}

/// Retries RPC failures that carry a non-zero retry-delay hint.
///
/// The hint only decides retryability; it does not size the sleep.
pub fn is_bigtable_retryable_error(cause: &Cause<'_>) -> Verdict {
    match *cause {
        Cause::Status(status)
            if status.code != RpcCode::Ok
                && status.retry_delay().is_some_and(|delay| !delay.is_zero()) =>
        {
            Verdict::retryable("Bigtable operation failed with a retryable error, will retry")
        }
        _ => Verdict::NotRetryable,
    }
}

pub fn is_apigee_retryable_error(cause: &Cause<'_>) -> Verdict {
    if api_matches_lowercase(cause, 400, &["the resource is locked by another operation"]) {
        Verdict::retryable("Waiting for other concurrent operations to finish")
    } else {
        Verdict::NotRetryable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatusDetail;
    use http::StatusCode;

    fn api(code: u16, body: &str) -> ApiError {
        ApiError::new(StatusCode::from_u16(code).unwrap(), body)
    }

    fn check(predicate: impl RetryPredicate, err: &ApiError) -> Verdict {
        predicate.check(&Cause::Api(err))
    }

    #[test]
    fn test_unrelated_error_is_not_retryable() {
        let unrelated = io::Error::new(io::ErrorKind::NotFound, "no such file");
        let cause = Cause::Io(&unrelated);
        let teapot = api(418, "short and stout");

        for predicate in default_predicates() {
            let verdict = predicate.check(&cause);
            assert_eq!(verdict, Verdict::NotRetryable);
            assert_eq!(verdict.reason(), "");
            assert!(!predicate.check(&Cause::Api(&teapot)).is_retryable());
        }
    }

    #[test]
    fn test_common_retryable_error_codes() {
        for code in [429, 500, 502, 503] {
            let verdict = check(is_common_retryable_error_code, &api(code, ""));
            assert_eq!(verdict.reason(), format!("Retryable error code {code}"));
        }
        for code in [400, 401, 403, 404, 501, 504] {
            assert!(!check(is_common_retryable_error_code, &api(code, "")).is_retryable());
        }
    }

    #[test]
    fn test_network_predicates_on_io_errors() {
        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "deadline");
        assert_eq!(
            is_network_timeout_error(&Cause::Io(&timed_out)).reason(),
            "marked as timeout"
        );
        assert!(is_network_temporary_error(&Cause::Io(&timed_out)).is_retryable());

        let eof = io::Error::from(io::ErrorKind::UnexpectedEof);
        assert_eq!(is_io_eof_error(&Cause::Io(&eof)).reason(), "Got unexpected EOF");

        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert!(!is_network_temporary_error(&Cause::Io(&refused)).is_retryable());
        assert!(!is_network_timeout_error(&Cause::Io(&refused)).is_retryable());
    }

    #[test]
    fn test_connection_reset_by_kind_and_suffix() {
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(is_connection_reset_network_error(&Cause::Io(&reset))
            .reason()
            .starts_with("reset connection error"));

        let wrapped = io::Error::new(
            io::ErrorKind::Other,
            "read tcp 10.0.0.1:5000->10.0.0.2:443: connection reset by peer",
        );
        assert!(is_connection_reset_network_error(&Cause::Io(&wrapped)).is_retryable());

        let other = io::Error::new(io::ErrorKind::Other, "connection reset by peer happened");
        assert!(!is_connection_reset_network_error(&Cause::Io(&other)).is_retryable());
    }

    #[derive(Debug)]
    struct TransportFailure(&'static str);

    impl std::fmt::Display for TransportFailure {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.0)
        }
    }

    impl StdError for TransportFailure {}

    #[test]
    fn test_chain_io_finds_nested_io_error() {
        let err = Error::from(io::Error::from(io::ErrorKind::ConnectionAborted)).context("sending");
        assert_eq!(
            chain_io(&err).map(io::Error::kind),
            Some(io::ErrorKind::ConnectionAborted)
        );
        assert!(chain_io(&Error::from(api(500, ""))).is_none());
    }

    #[test]
    fn test_incomplete_message_is_eof() {
        let err = TransportFailure(INCOMPLETE_MESSAGE);
        assert!(is_io_eof_error(&Cause::of(&err)).is_retryable());
    }

    #[test]
    fn test_message_checks_ignore_wrapped_response_bodies() {
        let eof_body = Error::from(api(400, INCOMPLETE_MESSAGE)).context("creating instance");
        assert!(!is_io_eof_error(&Cause::of(&eof_body)).is_retryable());

        let reset_body =
            Error::from(api(400, "upstream: connection reset by peer")).context("creating instance");
        assert!(!is_connection_reset_network_error(&Cause::of(&reset_body)).is_retryable());
        let reset_api = api(400, "upstream: connection reset by peer");
        assert!(!is_connection_reset_network_error(&Cause::Api(&reset_api)).is_retryable());

        let reset = TransportFailure("read tcp 10.0.0.1:5000: connection reset by peer");
        assert!(is_connection_reset_network_error(&Cause::of(&reset)).is_retryable());
    }

    #[test]
    fn test_sql_internal_error() {
        let internal = OperationError::new(0, "").with_error_code("INTERNAL_ERROR");
        assert!(is_sql_internal_error(&Cause::Operation(&internal)).is_retryable());

        let later = OperationError::new(0, "")
            .with_error_code("QUOTA_EXCEEDED")
            .with_error_code("INTERNAL_ERROR");
        assert!(!is_sql_internal_error(&Cause::Operation(&later)).is_retryable());
        assert!(!is_sql_internal_error(&Cause::Operation(&OperationError::new(13, ""))).is_retryable());
    }

    #[test]
    fn test_cloud_functions_source_code_error() {
        let err = Error::from(OperationError::new(3, "Failed to retrieve function source code"));
        assert!(is_cloud_functions_source_code_error(&Cause::of(&err)).is_retryable());

        let other_code = OperationError::new(13, "Failed to retrieve function source code");
        assert!(!is_cloud_functions_source_code_error(&Cause::Operation(&other_code)).is_retryable());

        let other_message = OperationError::new(3, "Build failed");
        assert!(!is_cloud_functions_source_code_error(&Cause::Operation(&other_message)).is_retryable());
    }

    #[test]
    fn test_quota_exceeded_per_minute_reports_limit() {
        let err = api(
            403,
            "Quota exceeded for quota metric 'x' and limit 'y per minute' of service 'compute.googleapis.com'",
        );
        let verdict = check(is_403_quota_exceeded_per_minute_error, &err);
        assert!(verdict.is_retryable());
        assert!(verdict.reason().contains("y per minute"));

        let per_day = api(
            403,
            "Quota exceeded for quota metric 'x' and limit 'y per day' of service",
        );
        assert!(!check(is_403_quota_exceeded_per_minute_error, &per_day).is_retryable());

        let wrong_code = api(
            429,
            "Quota exceeded for quota metric 'x' and limit 'y per minute' of service",
        );
        assert!(!check(is_403_quota_exceeded_per_minute_error, &wrong_code).is_retryable());
    }

    #[test]
    fn test_operation_in_progress_and_subnetwork() {
        assert!(check(
            is_409_operation_in_progress_error,
            &api(409, r#"{"reason": "operationInProgress"}"#)
        )
        .is_retryable());
        assert!(!check(is_409_operation_in_progress_error, &api(409, "alreadyExists")).is_retryable());

        assert!(check(
            is_subnetwork_unready_error,
            &api(400, "resourceNotReady: projects/p/regions/r/subnetworks/s")
        )
        .is_retryable());
        assert!(!check(is_subnetwork_unready_error, &api(400, "resourceNotReady")).is_retryable());
    }

    #[test]
    fn test_domain_predicates_match_their_trigger() {
        let cases: Vec<(SharedPredicate, ApiError)> = vec![
            (shared(is_fingerprint_error), api(412, "Invalid fingerprint.")),
            (shared(iam_member_missing), api(400, "permission denied on resource")),
            (shared(pubsub_topic_project_not_ready), api(400, "please retry this operation")),
            (shared(is_sql_operation_in_progress_error), api(409, "busy")),
            (
                shared(service_usage_service_being_activated),
                api(400, "Another activation or deactivation is in progress"),
            ),
            (shared(is_bigquery_iam_quota_error), api(403, "Exceeded rate limits: too many")),
            (shared(is_monitoring_concurrent_edit_error), api(409, "Too many concurrent edits")),
            (shared(is_not_filestore_quota_error), api(503, "")),
            (shared(is_app_engine_retryable_error), api(404, "Unable to retrieve P4SA")),
            (shared(is_crypto_key_versions_pending_generation), api(400, "state PENDING_GENERATION")),
            (shared(NotFoundRetryable::new("job update")), api(404, "")),
            (
                shared(is_dataflow_job_update_retryable_error),
                api(404, "job must be in RUNNING OR DRAINING state"),
            ),
            (
                shared(is_peering_operation_in_progress),
                api(400, "There is a peering operation in progress"),
            ),
            (shared(datastore_index_409_contention), api(409, "too much contention")),
            (shared(iap_client_409_operation), api(409, "Operation was aborted")),
            (shared(healthcare_dataset_not_initialized), api(404, "Dataset not initialized")),
            (shared(is_cloud_run_creation_conflict), api(409, "")),
            (
                shared(iam_service_account_not_found),
                api(400, "Service account foo@bar does not exist."),
            ),
            (
                shared(is_apigee_retryable_error),
                api(400, "The resource is locked by another operation"),
            ),
        ];

        for (predicate, err) in &cases {
            let verdict = predicate.check(&Cause::Api(err));
            assert!(verdict.is_retryable(), "expected a match for {err}");
            assert!(!verdict.reason().is_empty());
        }
    }

    #[test]
    fn test_domain_predicates_reject_near_misses() {
        assert!(!check(is_fingerprint_error, &api(400, "Invalid fingerprint.")).is_retryable());
        assert!(!check(
            is_sql_operation_in_progress_error,
            &api(409, "instanceAlreadyExists")
        )
        .is_retryable());
        assert!(!check(is_not_filestore_quota_error, &api(429, "")).is_retryable());
        assert!(!check(NotFoundRetryable::new("x"), &api(400, "")).is_retryable());
        assert!(!check(iam_member_missing, &api(403, "permission")).is_retryable());
    }

    #[test]
    fn test_not_found_reason_names_operation() {
        let verdict = check(NotFoundRetryable::new("instance group update"), &api(404, ""));
        assert_eq!(verdict.reason(), "Retry 404s for instance group update");
    }

    #[test]
    fn test_bigtable_requires_retry_delay() {
        let with_delay = RpcStatus::new(RpcCode::Unavailable, "busy").with_detail(
            StatusDetail::RetryInfo {
                seconds: 0,
                nanos: 1_000,
            },
        );
        assert!(is_bigtable_retryable_error(&Cause::Status(&with_delay)).is_retryable());

        let without_delay = RpcStatus::new(RpcCode::Unavailable, "busy");
        assert!(!is_bigtable_retryable_error(&Cause::Status(&without_delay)).is_retryable());

        let zero_delay = RpcStatus::new(RpcCode::Unavailable, "busy")
            .with_detail(StatusDetail::RetryInfo { seconds: 0, nanos: 0 });
        assert!(!is_bigtable_retryable_error(&Cause::Status(&zero_delay)).is_retryable());

        let ok = RpcStatus::new(RpcCode::Ok, "")
            .with_detail(StatusDetail::RetryInfo { seconds: 1, nanos: 0 });
        assert!(!is_bigtable_retryable_error(&Cause::Status(&ok)).is_retryable());
    }

    #[test]
    fn test_cause_of_maps_crate_error_variants() {
        let err = Error::from(api(503, ""));
        assert!(matches!(Cause::of(&err), Cause::Api(e) if e.code() == 503));

        let boxed: Box<Error> = Box::new(Error::from(RpcStatus::new(RpcCode::Aborted, "")));
        assert!(matches!(Cause::of(&boxed), Cause::Status(_)));

        let io_err = Error::from(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(matches!(Cause::of(&io_err), Cause::Other(_)));
    }
}
