//! # provider-transport - Resilient outbound requests for a cloud provider plugin
//!
//! Every API call a provider makes goes through the same pipeline: default
//! headers are injected, transient failures are retried within a wall-clock
//! budget, traffic is logged with credentials redacted, and an authenticated
//! HTTP client performs the round trip. [`Client::send_request`] sits on top
//! and turns one logical JSON call into a decoded object or a structured error.
//!
//! ## Quick Start
//!
//! ```no_run
//! use provider_transport::{Client, Config, SendRequestOptions};
//! use http::Method;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), provider_transport::Error> {
//!     let client = Client::builder()
//!         .config(Config {
//!             user_agent: "my-provider/1.0".to_string(),
//!             billing_project: Some("billing-project".to_string()),
//!             user_project_override: true,
//!             ..Config::default()
//!         })
//!         .build()?;
//!
//!     let body = json!({ "name": "my-topic" });
//!     let options = SendRequestOptions::new(
//!         Method::PUT,
//!         "https://pubsub.googleapis.com/v1/projects/p/topics/my-topic",
//!     )
//!     .with_project("p")
//!     .with_body(body.as_object().cloned().unwrap_or_default())
//!     .with_timeout(Duration::from_secs(4 * 60));
//!
//!     match client.send_request(options).await? {
//!         Some(topic) => println!("Created {:?}", topic.get("name")),
//!         None => println!("No content"),
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Retries
//!
//! Whether an error is retried is decided by walking its cause chain against a
//! list of predicates: the defaults from
//! [`predicates::default_predicates`] first, then any the call adds. The first
//! match wins. Retries continue until the call's budget runs out, however many
//! attempts that takes.
//!
//! ```no_run
//! use provider_transport::{Client, SendRequestOptions};
//! use provider_transport::predicates::{iam_member_missing, shared, NotFoundRetryable};
//! use http::Method;
//!
//! # async fn example(client: Client) -> Result<(), provider_transport::Error> {
//! let options = SendRequestOptions::new(Method::GET, "https://example.googleapis.com/v1/thing")
//!     .with_retry_predicate(shared(iam_member_missing))
//!     .with_retry_predicate(shared(NotFoundRetryable::new("Create")));
//! client.send_request(options).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Non-2xx responses surface as [`ApiError`], keeping the status, headers and
//! raw body:
//!
//! ```no_run
//! use provider_transport::{Client, Error, SendRequestOptions};
//! use http::Method;
//!
//! # async fn example(client: Client) {
//! let options = SendRequestOptions::new(Method::GET, "https://example.googleapis.com/v1/thing");
//! match client.send_request(options).await {
//!     Ok(body) => println!("Success: {:?}", body),
//!     Err(Error::Api(e)) => eprintln!("API error {}: {}", e.code(), e.body),
//!     Err(Error::DeserializationFailed { raw_response, serde_error, status }) => {
//!         eprintln!("Failed to decode (status {}): {}", status, serde_error);
//!         eprintln!("  Raw response: {}", raw_response);
//!     }
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! # }
//! ```

mod client;
pub mod config;
mod error;
pub mod logging;
pub mod predicates;
pub mod request;
pub mod retry;
pub mod transport;

pub use client::{Client, ClientBuilder, DEFAULT_USER_INFO_URL};
pub use config::{BatchingConfig, Config};
pub use error::{ApiError, Error, OperationError, Result, RpcCode, RpcStatus, StatusDetail};
pub use predicates::{RetryPredicate, SharedPredicate, Verdict};
pub use request::{
    add_query_params, QuotaProject, SendRequestOptions, DEFAULT_REQUEST_TIMEOUT,
    FALLBACK_REQUEST_TIMEOUT,
};
pub use retry::{Backoff, RetryPolicy};
pub use transport::{NoAuth, StaticToken, TokenSource, Transport};
