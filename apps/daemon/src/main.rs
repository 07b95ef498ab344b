//! printlink daemon entry point.

mod app;
mod host;

use std::path::PathBuf;

use printlink_bridge::Config;
use printlink_bridge::config::default_config_path;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let config_path = match std::env::args_os().nth(1) {
        Some(path) => PathBuf::from(path),
        None => default_config_path()?,
    };
    let config = Config::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "starting printlink"
    );

    // The websocket client builds its TLS config from the process default.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("printlink shut down cleanly");
    Ok(())
}
