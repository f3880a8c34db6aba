//! Plumbing shared by SunFleet binaries: the published sample record, its
//! payload encodings, the key layout, Zenoh session setup and logging.

pub mod config;
pub mod error;
pub mod keyexpr;
pub mod serialization;
pub mod session;
pub mod telemetry;

pub use config::{LogFormat, LoggingConfig, ZenohConfig, ZenohMode};
pub use error::{Error, Result};
pub use keyexpr::{KEY_PREFIX, KeySpace, PointKey};
pub use serialization::{Format, decode_auto};
pub use session::connect;
pub use telemetry::{TelemetryPoint, TelemetryValue};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `config.level`. Fails if a subscriber is already set
/// or the level is not a valid filter directive.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| Error::Config(format!("log level '{}': {e}", config.level)))?,
    };

    let output = match config.format {
        LogFormat::Text => fmt::layer().with_thread_names(true).boxed(),
        LogFormat::Json => fmt::layer().json().flatten_event(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("tracing: {e}")))
}
