//! Log filtering for the request pipeline.
//!
//! The HTTP stack underneath the transports is chatty about connection-pool
//! keep-alive and connection teardown. Those targets are muted unless the
//! requested verbosity is `TRACE`.

use tracing::Level;
use tracing_subscriber::EnvFilter;

const NOISY_TARGETS: &[&str] = &[
    "hyper_util::client::legacy::pool",
    "hyper_util::client::legacy::connect",
    "hyper::proto",
    "h2",
    "rustls",
];

/// Filter directives that silence keep-alive and teardown chatter.
///
/// Empty at `TRACE`, where everything is wanted.
pub fn noise_directives(verbosity: Level) -> Vec<String> {
    if verbosity == Level::TRACE {
        return Vec::new();
    }

    NOISY_TARGETS
        .iter()
        .map(|target| format!("{}=warn", target))
        .collect()
}

/// Builds an `EnvFilter` at `verbosity` with the noisy targets muted.
pub fn env_filter(verbosity: Level) -> EnvFilter {
    noise_directives(verbosity)
        .iter()
        .filter_map(|directive| directive.parse().ok())
        .fold(
            EnvFilter::new(verbosity.as_str().to_lowercase()),
            |filter, directive| filter.add_directive(directive),
        )
}

/// Installs a global fmt subscriber at `verbosity`.
///
/// Returns `false` if a global subscriber was already set.
pub fn init(verbosity: Level) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbosity))
        .try_init()
        .is_ok()
}
