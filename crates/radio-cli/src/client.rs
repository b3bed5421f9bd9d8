//! Blocking client for the radio wire protocol.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use radio_proto::{
    Command, MAX_COMMAND_LEN, RECV, Reply, StatusReply, read_status, read_token,
};
use radio_types::StatusReport;

/// Read timeout used for replies to `STAT` and `TADD`.
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

fn connect(server: &str, command: &Command) -> Result<TcpStream> {
    let encoded = command.encode();
    if encoded.len() > MAX_COMMAND_LEN {
        return Err(anyhow!("command exceeds {MAX_COMMAND_LEN} bytes"));
    }
    let mut stream =
        TcpStream::connect(server).with_context(|| format!("connect to {server}"))?;
    stream.set_nodelay(true).ok();
    stream.set_read_timeout(Some(REPLY_TIMEOUT))?;
    stream.write_all(&encoded)?;
    stream.flush()?;
    Ok(stream)
}

/// `STAT`: `None` when nothing is playing.
pub(crate) fn status(server: &str) -> Result<Option<StatusReport>> {
    let stream = connect(server, &Command::Status)?;
    match read_status(&stream).context("read status reply")? {
        StatusReply::NotFound => Ok(None),
        StatusReply::Playing(payload) => {
            let report = serde_json::from_slice(&payload).context("decode status payload")?;
            Ok(Some(report))
        }
    }
}

/// `TADD <key> <path>`: the path is resolved on the server host.
pub(crate) fn add_track(server: &str, key: &str, path: &str) -> Result<Reply> {
    if key.split_whitespace().count() != 1 || path.split_whitespace().count() != 1 {
        return Err(anyhow!("key and path must be single tokens without whitespace"));
    }
    let command = Command::AddTrack {
        key: key.to_string(),
        path: path.to_string(),
    };
    let stream = connect(server, &command)?;
    let token = read_token(&stream).context("read TADD reply")?;
    Ok(Reply::from_token(token)?)
}

/// Options for [`listen`].
#[derive(Clone, Debug)]
pub(crate) struct ListenOptions {
    /// Largest block the server sends; sizes the receive buffer.
    pub block_size: usize,
    /// Silence after partial data that ends a short block.
    pub block_gap: Duration,
    /// Stop after this many blocks.
    pub max_blocks: Option<u64>,
}

/// Totals for a finished `listen`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct ListenSummary {
    pub blocks: u64,
    pub bytes: u64,
}

/// `CONN`: copy blocks into `out`, acknowledging each one with `RECV`.
///
/// Returns when the server closes the stream or `max_blocks` is reached.
pub(crate) fn listen(server: &str, opts: &ListenOptions, out: &mut impl Write) -> Result<ListenSummary> {
    let mut stream = connect(server, &Command::Connect)?;
    stream.set_read_timeout(Some(opts.block_gap))?;
    let mut summary = ListenSummary::default();
    let mut buf = vec![0u8; opts.block_size.max(1)];

    while opts.max_blocks.is_none_or(|max| summary.blocks < max) {
        let len = read_block(&mut stream, &mut buf)?;
        if len == 0 {
            tracing::info!(blocks = summary.blocks, "server closed the stream");
            break;
        }
        out.write_all(&buf[..len])?;
        summary.blocks += 1;
        summary.bytes += len as u64;
        tracing::debug!(block = summary.blocks, len, "block received");
        if let Err(e) = stream.write_all(&RECV) {
            tracing::info!("stream ended while acknowledging: {e}");
            break;
        }
    }
    out.flush()?;
    Ok(summary)
}

/// Fill `buf` with one block. A block ends when `buf` is full, or when the peer goes
/// quiet after sending something. Returns 0 on EOF with nothing read.
fn read_block(mut peer: impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match peer.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_timeout(&e) => {
                if filled > 0 {
                    break;
                }
            }
            Err(e) => return Err(e).context("read block"),
        }
    }
    Ok(filled)
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
