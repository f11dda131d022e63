//! Telemetry and Observability
//!
//! Sets up `tracing-subscriber` for structured logging. The effective level
//! is resolved in priority order: `RUST_LOG` env var, then the explicit
//! level (CLI flag or config), then "info". Debug builds get pretty
//! terminal output; release builds emit JSON with span context, which is
//! what the session logs are correlated against.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber once, after configuration is resolved.
///
/// Pass `None` to fall back to "info". A second call is a silent no-op, so
/// callers should resolve the CLI/config level first.
pub fn init(level: Option<&str>) {
    let level = level.unwrap_or("info");
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},loom_engine={level}")));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .ok();
    }
}
