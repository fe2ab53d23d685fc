//! Tracing subscriber installation for the daemon.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Variable holding the daemon's log filter.
pub const LOG_FILTER_VAR: &str = "TASKWRIGHT_LOG";

/// Filter used when neither `TASKWRIGHT_LOG` nor `RUST_LOG` is set.
pub const DEFAULT_LOG_FILTER: &str = "taskwright=info";

/// Builds the log filter from `TASKWRIGHT_LOG`, then `RUST_LOG`, then the
/// default.
///
/// Unparseable directives fall back to the default filter.
#[must_use]
pub fn log_filter(lookup: impl Fn(&str) -> Option<String>) -> EnvFilter {
    [LOG_FILTER_VAR, EnvFilter::DEFAULT_ENV]
        .into_iter()
        .filter_map(lookup)
        .find(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Installs a global `fmt` subscriber filtered by [`log_filter`].
///
/// Returns `false` when another subscriber was already installed.
#[must_use]
pub fn init_tracing() -> bool {
    tracing_subscriber::registry()
        .with(log_filter(|name| std::env::var(name).ok()))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}
