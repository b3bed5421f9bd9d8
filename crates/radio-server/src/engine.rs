//! Engine context shared by every worker thread.
//!
//! Built once at startup, handed to threads as `Arc<Engine>`, and torn down once when
//! the last worker exits.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use radio_types::TrackDescriptor;

use crate::clock::Clock;
use crate::frame_index;
use crate::media_buffer::{DEFAULT_BLOCK_SIZE, MediaBuffer};
use crate::playlist::{Playlist, Track};
use crate::watchdog::{DEFAULT_DEATH_THRESHOLD, DEFAULT_REAPER_INTERVAL, Watchdog};

/// Tunables resolved from the server config.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub block_size: usize,
    /// Secret for `TADD`. `None` rejects every ingestion request.
    pub auth_key: Option<String>,
    pub death_threshold: Duration,
    pub reaper_interval: Duration,
    /// Read timeout on each acknowledgement wait.
    pub ack_timeout: Duration,
    /// Pause between an acknowledgement and the next block.
    pub delivery_delay: Duration,
    /// Read timeout on the opening command.
    pub command_timeout: Duration,
    /// Sleep between accept polls while no connection is pending.
    pub accept_poll: Duration,
    /// Move the clock's wraparound point after each successful `TADD`.
    pub recompute_duration_on_ingest: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            auth_key: None,
            death_threshold: DEFAULT_DEATH_THRESHOLD,
            reaper_interval: DEFAULT_REAPER_INTERVAL,
            ack_timeout: Duration::from_secs(5),
            delivery_delay: Duration::from_millis(100),
            command_timeout: Duration::from_secs(5),
            accept_poll: Duration::from_millis(50),
            recompute_duration_on_ingest: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("ingestion key rejected")]
    Unauthorized,
    #[error("no such file {0:?}")]
    NotFound(PathBuf),
    #[error("read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of a successful ingestion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ingested {
    pub track_index: usize,
    pub blocks: Range<usize>,
}

pub struct Engine {
    pub config: EngineConfig,
    pub buffer: MediaBuffer,
    pub playlist: Playlist,
    pub clock: Clock,
    pub watchdog: Watchdog,
    running: AtomicBool,
    active_streams: AtomicUsize,
    /// Keeps each track's blocks contiguous and its playlist entry in the same order.
    ingest_lock: Mutex<()>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            buffer: MediaBuffer::new(config.block_size),
            playlist: Playlist::new(),
            clock: Clock::new(Duration::ZERO),
            watchdog: Watchdog::new(config.death_threshold),
            running: AtomicBool::new(true),
            active_streams: AtomicUsize::new(0),
            ingest_lock: Mutex::new(()),
            config,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn running_flag(&self) -> &AtomicBool {
        &self.running
    }

    /// Clear the running flag; every loop exits at its next check.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::Relaxed) {
            tracing::info!("engine shutdown requested");
        }
    }

    pub fn active_streams(&self) -> usize {
        self.active_streams.load(Ordering::Relaxed)
    }

    pub(crate) fn stream_started(&self) -> usize {
        self.active_streams.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn stream_ended(&self) -> usize {
        self.active_streams.fetch_sub(1, Ordering::Relaxed).saturating_sub(1)
    }

    /// Ingest the startup playlist, then fix the clock's wraparound point.
    ///
    /// Unreadable entries are logged and skipped. Returns the number loaded.
    pub fn load_tracks(&self, descriptors: &[TrackDescriptor]) -> usize {
        let mut loaded = 0;
        for desc in descriptors {
            tracing::info!(title = %desc.title, path = %desc.path, "loading track");
            match self.ingest(Track::from(desc)) {
                Ok(ingested) => {
                    tracing::debug!(
                        index = ingested.track_index,
                        blocks = ingested.blocks.len(),
                        "track loaded"
                    );
                    loaded += 1;
                }
                Err(e) => tracing::error!(path = %desc.path, "skipping track: {e}"),
            }
        }
        self.clock.recompute_total(&self.buffer);
        loaded
    }

    /// Append a track's file to the buffer, then its record to the playlist.
    pub fn ingest(&self, track: Track) -> Result<Ingested, IngestError> {
        let _guard = self.ingest_lock.lock().unwrap_or_else(|err| err.into_inner());
        let blocks = self.append_source(&track.source_path)?;
        let track_index = self.playlist.push(track);
        Ok(Ingested {
            track_index,
            blocks,
        })
    }

    /// Authenticated ingestion of a bare path, as requested by `TADD`.
    ///
    /// The request carries no metadata: the title is the file stem, the author is
    /// unknown, and the declared length is the scanned duration rounded up to seconds.
    pub fn add_track(&self, key: &str, path: &str) -> Result<Ingested, IngestError> {
        if self.config.auth_key.as_deref() != Some(key) {
            return Err(IngestError::Unauthorized);
        }
        let path = PathBuf::from(path);
        if !path.is_file() {
            return Err(IngestError::NotFound(path));
        }

        let _guard = self.ingest_lock.lock().unwrap_or_else(|err| err.into_inner());
        let blocks = self.append_source(&path)?;
        let scanned = frame_index::range_duration(&self.buffer, blocks.clone());
        let declared_length = scanned.as_secs() + u64::from(scanned.subsec_nanos() > 0);
        let track = Track {
            title: title_from_path(&path),
            author: "unknown".to_string(),
            declared_length,
            source_path: path,
        };
        let track_index = self.playlist.push(track);
        drop(_guard);

        if self.config.recompute_duration_on_ingest {
            self.clock.recompute_total(&self.buffer);
        }
        Ok(Ingested {
            track_index,
            blocks,
        })
    }

    fn append_source(&self, path: &Path) -> Result<Range<usize>, IngestError> {
        self.buffer.append_file(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                IngestError::NotFound(path.to_path_buf())
            } else {
                IngestError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })
    }
}

fn title_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
