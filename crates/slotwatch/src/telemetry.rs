//! Tracing setup for slotwatch binaries.

use anyhow::Result;
use slotconf::TelemetryConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter for the configured level, falling back to `info` when the
/// directive string does not parse.
pub fn env_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_new(&config.log_level).unwrap_or_else(|err| {
        eprintln!("invalid log filter {:?} ({err}), using info", config.log_level);
        EnvFilter::new("info")
    })
}

/// Install a fmt subscriber writing to stderr, so stdout stays clean for
/// JSON output. `RUST_LOG` has already been folded into `log_level` by the
/// config loader.
pub fn init(config: &TelemetryConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    tracing::debug!(filter = %config.log_level, "tracing initialized");
    Ok(())
}
