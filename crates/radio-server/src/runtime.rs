//! Radio runtime helpers.
//!
//! Builds the engine, loads the startup playlist, and runs the clock, reaper and
//! accept loop until shutdown.

use std::net::TcpListener;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};

use crate::config::RadioConfig;
use crate::engine::Engine;
use crate::server;

/// Background workers started alongside the accept loop.
pub struct Workers {
    clock: JoinHandle<()>,
    reaper: JoinHandle<()>,
}

impl Workers {
    /// Start the clock and the watchdog reaper.
    pub fn spawn(engine: &Arc<Engine>) -> Result<Self> {
        let clock = {
            let engine = engine.clone();
            std::thread::Builder::new()
                .name("radio-clock".to_string())
                .spawn(move || engine.clock.run(engine.running_flag()))
                .context("spawn clock thread")?
        };
        let reaper = {
            let engine = engine.clone();
            std::thread::Builder::new()
                .name("radio-reaper".to_string())
                .spawn(move || {
                    engine
                        .watchdog
                        .run_reaper(engine.running_flag(), engine.config.reaper_interval)
                })
                .context("spawn reaper thread")?
        };
        Ok(Self { clock, reaper })
    }

    /// Wait for both workers; call after the engine has been stopped.
    pub fn join(self) {
        if self.clock.join().is_err() {
            tracing::error!("clock thread panicked");
        }
        if self.reaper.join().is_err() {
            tracing::error!("reaper thread panicked");
        }
    }
}

/// Build the engine and ingest the startup playlist before anything starts ticking.
pub fn prepare(config: &RadioConfig) -> Arc<Engine> {
    let engine = Arc::new(Engine::new(config.engine.clone()));
    let loaded = engine.load_tracks(&config.tracks);
    tracing::info!(
        loaded,
        requested = config.tracks.len(),
        blocks = engine.buffer.len(),
        bytes = engine.buffer.total_bytes(),
        total_s = engine.clock.total().as_secs(),
        "playlist loaded"
    );
    engine
}

/// Serve on an already-bound listener until the engine stops.
pub fn serve(engine: Arc<Engine>, listener: TcpListener) -> Result<()> {
    let workers = Workers::spawn(&engine)?;
    let result = server::serve(engine.clone(), listener);
    engine.stop();
    workers.join();
    result
}

/// Run the radio server: load, bind, then serve until Ctrl-C.
pub fn run(config: RadioConfig, install_ctrlc: bool) -> Result<()> {
    let engine = prepare(&config);
    let listener = server::bind_first(&config.bind_host, &config.ports)?;

    if install_ctrlc {
        let engine = engine.clone();
        ctrlc::set_handler(move || engine.stop()).context("install Ctrl-C handler")?;
    }

    serve(engine, listener)
}
