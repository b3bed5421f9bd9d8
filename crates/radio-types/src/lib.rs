use serde::{Deserialize, Serialize};

/// One playlist entry as supplied to the server at startup.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackDescriptor {
    /// Display title.
    pub title: String,
    /// Display author/artist.
    pub author: String,
    /// Declared length in seconds. Authoritative for status lookups.
    pub length: u64,
    /// Path of the encoded audio file on the server host.
    pub path: String,
}

/// Playlist descriptor file (`{"tracks": [...]}`).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaylistFile {
    #[serde(default)]
    pub tracks: Vec<TrackDescriptor>,
}

/// Track currently on air, as reported by `STAT`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NowPlaying {
    /// Position of the track in broadcast order.
    pub index: usize,
    pub title: String,
    pub author: String,
    /// Declared length in seconds.
    pub length: u64,
    /// Seconds into this track, derived from declared lengths.
    pub elapsed: u64,
}

/// JSON payload of a `STAT` reply.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReport {
    /// Seconds within the looping broadcast.
    pub radio_time: u64,
    /// Seconds since the server started its clock.
    pub uptime: u64,
    pub current: NowPlaying,
}
