//! # Beacon Agent
//!
//! Command-line realtime client.
//!
//! ## Usage
//!
//! ```bash
//! # Run with beacon.toml from the working directory or a default path
//! BEACON_TOKEN=... beacon
//!
//! # Run with a specific config file
//! beacon --config /path/to/beacon.toml
//!
//! # Override settings with environment variables
//! BEACON__CHANNELS=news,alerts BEACON__CLIENT__DEBUG=true beacon
//!
//! # Publish from stdin
//! echo '{"type":"chat","payload":{"text":"hi"}}' | beacon
//! ```

mod config;
mod http;
mod metrics;
mod runner;
mod store;

use anyhow::{bail, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = match config_path()? {
        Some(path) => config::AgentConfig::from_file(path)?,
        None => config::AgentConfig::load()?,
    };

    // Initialize tracing
    let default_filter = if config.client.debug {
        "beacon=debug,beacon_core=debug,beacon_transport=debug"
    } else {
        "beacon=info,beacon_core=info,beacon_transport=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        environment = ?config.client.environment,
        channels = config.channels.len(),
        "Starting Beacon agent"
    );

    runner::run(config).await
}

/// Path given with `--config`, if any.
fn config_path() -> Result<Option<String>> {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => Ok(None),
        Some("--config" | "-c") => match args.next() {
            Some(path) => Ok(Some(path)),
            None => bail!("--config requires a path"),
        },
        Some(other) => bail!("Unknown argument: {}", other),
    }
}
