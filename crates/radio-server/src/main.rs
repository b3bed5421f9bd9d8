//! `radio-server`: a synchronized broadcast over raw TCP.
//!
//! One shared clock, one growing buffer of encoded audio, and every listener hears the
//! same point of the broadcast. See `radio-proto` for the wire commands.

use anyhow::Result;
use clap::Parser;
use radio_server::cli::Args;
use radio_server::config::ServerConfig;
use radio_server::runtime;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,radio_server=info")
        }))
        .init();

    let cfg = match args.config.as_ref() {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    let config = args.apply(cfg).resolve()?;
    tracing::info!(
        ports = ?config.ports,
        host = %config.bind_host,
        tracks = config.tracks.len(),
        "starting radio-server"
    );

    runtime::run(config, true)
}
