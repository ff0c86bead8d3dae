//! Structured logging initialization
//!
//! Logs go to stderr; stdout is reserved for command results.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Guard that keeps the tracing subscriber active.
/// Drop this at the end of main to flush logs.
pub struct LogGuard;

/// Initialize structured logging for a component.
///
/// The default level is INFO; `RUST_LOG` adds or overrides directives.
///
/// # Example
/// ```ignore
/// let _guard = init_logging("pg-admin");
/// info!("Starting up...");
/// ```
pub fn init_logging(component: &str) -> LogGuard {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    let format = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .try_init();

    tracing::debug!(component, "Logging initialized");

    LogGuard
}
