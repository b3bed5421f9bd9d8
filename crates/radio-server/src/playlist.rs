//! Broadcast-order track list.

use std::path::PathBuf;
use std::time::Duration;

use radio_types::{NowPlaying, TrackDescriptor};

use crate::append_log::AppendLog;

/// A track as it sits in the broadcast. Immutable once ingested.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Track {
    pub title: String,
    pub author: String,
    /// Declared length in seconds, as supplied at ingestion.
    pub declared_length: u64,
    pub source_path: PathBuf,
}

impl From<&TrackDescriptor> for Track {
    fn from(desc: &TrackDescriptor) -> Self {
        Self {
            title: desc.title.clone(),
            author: desc.author.clone(),
            declared_length: desc.length,
            source_path: PathBuf::from(&desc.path),
        }
    }
}

/// Append-only playlist shared by every session; insertion order is broadcast order.
#[derive(Default)]
pub struct Playlist {
    tracks: AppendLog<Track>,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, track: Track) -> usize {
        self.tracks.push(track)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> + '_ {
        self.tracks.iter()
    }

    /// Sum of declared lengths in seconds.
    pub fn declared_total(&self) -> u64 {
        self.iter().map(|t| t.declared_length).sum()
    }

    /// The first track whose cumulative declared length reaches `radio_time`.
    ///
    /// `None` when the playlist is empty or `radio_time` is past every declared length.
    pub fn now_playing(&self, radio_time: Duration) -> Option<NowPlaying> {
        let mut cumulative = Duration::ZERO;
        for (index, track) in self.iter().enumerate() {
            let start = cumulative;
            cumulative += Duration::from_secs(track.declared_length);
            if cumulative >= radio_time {
                return Some(NowPlaying {
                    index,
                    title: track.title.clone(),
                    author: track.author.clone(),
                    length: track.declared_length,
                    elapsed: radio_time.saturating_sub(start).as_secs(),
                });
            }
        }
        None
    }
}
