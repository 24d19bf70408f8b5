use crate::Environment;
use tracing::{debug, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Default filter for development builds when `RUST_LOG` is unset.
const DEV_FILTER: &str = "info,cassandra_pool=debug";

/// Default filter for production builds when `RUST_LOG` is unset.
const PROD_FILTER: &str = "warn,cassandra_pool=info";

/// Install color-eyre with a project-standard configuration.
///
/// Call this early in main() before any fallible operations. Safe to call
/// multiple times.
pub fn install_color_eyre() {
    let _ = color_eyre::config::HookBuilder::default()
        .display_location_section(true)
        .display_env_section(false)
        .install();
}

/// Initialize tracing with environment-aware configuration and error span capture.
///
/// - **Production** (`APP_ENV=production`): JSON lines, no module targets.
/// - **Development** (default): pretty-printed, human-readable.
///
/// Both include `tracing_error::ErrorLayer` so eyre reports carry span traces.
/// `RUST_LOG` overrides the default filter (e.g. `cassandra_pool=trace` to see
/// every checkout and checkin).
///
/// Safe to call more than once; later calls are no-ops (common in tests).
pub fn init_tracing(environment: &Environment) {
    let is_production = environment.is_production();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if is_production {
            EnvFilter::new(PROD_FILTER)
        } else {
            EnvFilter::new(DEV_FILTER)
        }
    });

    let result = if is_production {
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
        Ok(_) => {
            info!(?environment, "Tracing initialized");
        }
        Err(_) => {
            debug!("Tracing already initialized, skipping re-initialization");
        }
    }
}
