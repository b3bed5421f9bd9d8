//! Configuration loading and parsing.
//!
//! Defines the TOML server config schema and resolves it, with defaults, into the
//! values the runtime needs.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use radio_types::{PlaylistFile, TrackDescriptor};
use serde::Deserialize;

use crate::engine::EngineConfig;

/// Ports tried in order when none are configured.
pub const DEFAULT_PORTS: [u16; 3] = [8000, 8080, 8888];
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Top-level server configuration loaded from TOML. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Port preference list; the first bindable one wins.
    pub ports: Option<Vec<u16>>,
    /// Interface to bind, e.g. `0.0.0.0`.
    pub bind_host: Option<String>,
    /// Ingestion secret, inline.
    pub auth_key: Option<String>,
    /// Ingestion secret, read from a file (trimmed). Ignored if `auth_key` is set.
    pub auth_key_file: Option<String>,
    /// Playlist descriptor JSON loaded at startup.
    pub playlist: Option<String>,
    /// Transport block size in bytes.
    pub block_size: Option<usize>,
    /// Seconds without a heartbeat before a session is reaped.
    pub death_threshold_secs: Option<u64>,
    /// Reaper sweep interval in milliseconds.
    pub reaper_interval_ms: Option<u64>,
    /// Read timeout on each acknowledgement wait, in seconds.
    pub ack_timeout_secs: Option<u64>,
    /// Pause between an acknowledgement and the next block, in milliseconds.
    pub delivery_delay_ms: Option<u64>,
    /// Read timeout on the opening command, in seconds.
    pub command_timeout_secs: Option<u64>,
    /// Move the clock's loop point after every successful `TADD`.
    pub recompute_duration_on_ingest: Option<bool>,
}

/// Everything the runtime needs to start serving.
#[derive(Debug, Clone)]
pub struct RadioConfig {
    pub bind_host: String,
    pub ports: Vec<u16>,
    pub engine: EngineConfig,
    pub tracks: Vec<TrackDescriptor>,
}

impl ServerConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<ServerConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    /// Fill defaults, read the auth key and playlist, and validate.
    pub fn resolve(&self) -> Result<RadioConfig> {
        let defaults = EngineConfig::default();
        let block_size = self.block_size.unwrap_or(defaults.block_size);
        if block_size == 0 {
            return Err(anyhow!("block_size must be greater than zero"));
        }
        let ports = match self.ports.as_deref() {
            Some([]) | None => DEFAULT_PORTS.to_vec(),
            Some(ports) => ports.to_vec(),
        };
        let auth_key = match (self.auth_key.as_deref(), self.auth_key_file.as_deref()) {
            (Some(key), _) => non_empty(key),
            (None, Some(path)) => non_empty(&read_auth_key(Path::new(path))?),
            (None, None) => None,
        };
        if auth_key.is_none() {
            tracing::warn!("no auth key configured; TADD requests will be rejected");
        }
        let tracks = match self.playlist.as_deref() {
            Some(path) => load_playlist(Path::new(path))?,
            None => Vec::new(),
        };

        let secs = |v: Option<u64>, d: Duration| v.map(Duration::from_secs).unwrap_or(d);
        let millis = |v: Option<u64>, d: Duration| v.map(Duration::from_millis).unwrap_or(d);
        let engine = EngineConfig {
            block_size,
            auth_key,
            death_threshold: secs(self.death_threshold_secs, defaults.death_threshold),
            reaper_interval: millis(self.reaper_interval_ms, defaults.reaper_interval),
            ack_timeout: secs(self.ack_timeout_secs, defaults.ack_timeout),
            delivery_delay: millis(self.delivery_delay_ms, defaults.delivery_delay),
            command_timeout: secs(self.command_timeout_secs, defaults.command_timeout),
            recompute_duration_on_ingest: self
                .recompute_duration_on_ingest
                .unwrap_or(defaults.recompute_duration_on_ingest),
            ..defaults
        };
        if engine.ack_timeout.is_zero() || engine.command_timeout.is_zero() {
            return Err(anyhow!("ack and command timeouts must be non-zero"));
        }

        Ok(RadioConfig {
            bind_host: self
                .bind_host
                .clone()
                .unwrap_or_else(|| DEFAULT_BIND_HOST.to_string()),
            ports,
            engine,
            tracks,
        })
    }
}

fn non_empty(key: &str) -> Option<String> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Read the ingestion secret from a file.
pub fn read_auth_key(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read auth key {:?}", path))?;
    Ok(raw.trim().to_string())
}

/// Load a playlist descriptor (`{"tracks": [...]}`).
pub fn load_playlist(path: &Path) -> Result<Vec<TrackDescriptor>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read playlist {:?}", path))?;
    let file = serde_json::from_str::<PlaylistFile>(&raw)
        .with_context(|| format!("parse playlist {:?}", path))?;
    Ok(file.tracks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::temp_file;

    #[test]
    fn empty_config_resolves_to_defaults() {
        let resolved = ServerConfig::default().resolve().unwrap();
        assert_eq!(resolved.ports, DEFAULT_PORTS.to_vec());
        assert_eq!(resolved.bind_host, DEFAULT_BIND_HOST);
        assert_eq!(resolved.engine.block_size, 90_000);
        assert_eq!(resolved.engine.death_threshold, Duration::from_secs(100));
        assert_eq!(resolved.engine.reaper_interval, Duration::from_millis(50));
        assert!(resolved.engine.auth_key.is_none());
        assert!(resolved.tracks.is_empty());
    }

    #[test]
    fn toml_values_override_defaults() {
        let raw = r#"
            ports = [9000, 9001]
            auth_key = " s3cret "
            block_size = 4096
            death_threshold_secs = 30
            delivery_delay_ms = 0
            recompute_duration_on_ingest = true
        "#;
        let cfg: ServerConfig = toml::from_str(raw).unwrap();
        let resolved = cfg.resolve().unwrap();
        assert_eq!(resolved.ports, vec![9000, 9001]);
        assert_eq!(resolved.engine.auth_key.as_deref(), Some("s3cret"));
        assert_eq!(resolved.engine.block_size, 4096);
        assert_eq!(resolved.engine.death_threshold, Duration::from_secs(30));
        assert_eq!(resolved.engine.delivery_delay, Duration::ZERO);
        assert!(resolved.engine.recompute_duration_on_ingest);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<ServerConfig>("portz = [1]").is_err());
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let cfg = ServerConfig {
            block_size: Some(0),
            ..ServerConfig::default()
        };
        assert!(cfg.resolve().is_err());
    }

    #[test]
    fn auth_key_and_playlist_are_read_from_files() {
        let key = temp_file("authkey.txt", b"hunter2\n");
        let playlist = temp_file(
            "tracks.json",
            br#"{"bitrate": 128, "tracks": [{"title": "T", "author": "A", "length": 5, "path": "t.mp3"}]}"#,
        );
        let cfg = ServerConfig {
            auth_key_file: Some(key.display().to_string()),
            playlist: Some(playlist.display().to_string()),
            ..ServerConfig::default()
        };
        let resolved = cfg.resolve().unwrap();
        assert_eq!(resolved.engine.auth_key.as_deref(), Some("hunter2"));
        assert_eq!(resolved.tracks.len(), 1);
        assert_eq!(resolved.tracks[0].title, "T");
    }

    #[test]
    fn missing_playlist_is_an_error() {
        let cfg = ServerConfig {
            playlist: Some("/no/such/tracks.json".to_string()),
            ..ServerConfig::default()
        };
        let err = cfg.resolve().unwrap_err();
        assert!(format!("{err:#}").contains("read playlist"));
    }
}
