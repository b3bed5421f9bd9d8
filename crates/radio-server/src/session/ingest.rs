//! `TADD <key> <path>`: authenticated ingestion of a new track.
//!
//! Appending never blocks listeners. The clock keeps its old wraparound point until
//! the broadcast duration is recomputed.

use std::io::{self, Write};

use radio_proto::{Reply, write_reply};

use crate::engine::{Engine, IngestError};

/// Handle one `TADD` request and send the reply token.
pub fn serve(engine: &Engine, mut peer: impl Write, key: &str, path: &str) -> io::Result<Reply> {
    let reply = match engine.add_track(key, path) {
        Ok(ingested) => {
            tracing::info!(
                path,
                track = ingested.track_index,
                blocks = ingested.blocks.len(),
                "track added"
            );
            Reply::Added
        }
        Err(IngestError::Unauthorized) => {
            tracing::warn!(path, "track add rejected: bad key");
            Reply::Unauthorized
        }
        Err(e @ IngestError::NotFound(_)) => {
            tracing::warn!("track add failed: {e}");
            Reply::NotFound
        }
        Err(e @ IngestError::Io { .. }) => {
            tracing::error!("track add failed: {e}");
            Reply::NotFound
        }
    };
    write_reply(&mut peer, reply)?;
    Ok(reply)
}
