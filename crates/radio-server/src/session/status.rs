//! `STAT`: what is on air right now.

use std::io::{self, Write};

use radio_proto::{Reply, write_reply, write_status};
use radio_types::StatusReport;

use crate::engine::Engine;

/// Build the status report, or `None` when nothing in the playlist covers radio time.
pub fn report(engine: &Engine) -> Option<StatusReport> {
    let radio_time = engine.clock.radio_time();
    let current = engine.playlist.now_playing(radio_time)?;
    Some(StatusReport {
        radio_time: radio_time.as_secs(),
        uptime: engine.clock.up_time().as_secs(),
        current,
    })
}

/// Answer one `STAT` request with `NNNN` + JSON, or `NFND`.
pub fn serve(engine: &Engine, mut peer: impl Write) -> io::Result<()> {
    let Some(report) = report(engine) else {
        tracing::debug!(
            radio_s = engine.clock.radio_time().as_secs(),
            declared_s = engine.playlist.declared_total(),
            "radio time not covered by playlist"
        );
        return write_reply(&mut peer, Reply::NotFound);
    };
    let payload = serde_json::to_vec(&report).map_err(io::Error::other)?;
    write_status(&mut peer, &payload)
}
