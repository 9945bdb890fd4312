use crate::Environment;
use tracing::{debug, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Install color-eyre for binaries.
///
/// Shows file:line where errors occur and hides the environment section.
/// Safe to call multiple times.
pub fn install_color_eyre() {
    let _ = color_eyre::config::HookBuilder::default()
        .display_location_section(true)
        .display_env_section(false)
        .install();
}

/// Build the log filter: `RUST_LOG` wins, otherwise `default_directives`
/// in development and `warn` plus the same crate directives in production.
pub fn build_filter(environment: &Environment, default_directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if environment.is_production() {
            EnvFilter::new(format!("warn,{default_directives}"))
        } else {
            EnvFilter::new(default_directives)
        }
    })
}

/// Initialize tracing with environment-aware output and span trace capture.
///
/// - **Production** (`APP_ENV=production`): flattened JSON events without
///   module targets, for log aggregation.
/// - **Development** (default): pretty human-readable output.
///
/// Both include `tracing_error::ErrorLayer` so `eyre` reports carry span
/// traces. Calling this more than once (common in tests) is a no-op.
///
/// ```ignore
/// let environment = Environment::from_env();
/// core_config::tracing::init_tracing(&environment, "info,mail_queue=debug");
/// ```
pub fn init_tracing(environment: &Environment, default_directives: &str) {
    let filter = build_filter(environment, default_directives);

    let result = if environment.is_production() {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .flatten_event(true),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false)
                    .pretty(),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    };

    match result {
        Ok(_) => info!(environment = ?environment, "Tracing initialized"),
        Err(_) => debug!("Tracing already initialized, skipping re-initialization"),
    }
}
