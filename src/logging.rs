use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize structured logging at `info`, overridable through `RUST_LOG`
pub fn init_logging() {
    init_logging_with_config("info", false);
}

/// Initialize structured logging with an explicit default level and format
///
/// `RUST_LOG` still wins when set. Examples:
/// - `RUST_LOG=debug` - Debug level and above
/// - `RUST_LOG=volley=debug` - Debug level for this crate only
/// - `RUST_LOG=warn` - Warn level and above
pub fn init_logging_with_config(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_thread_ids(true))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_file(true),
            )
            .init();
    }
}
