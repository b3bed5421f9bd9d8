//! Shared protocol primitives for `radio-server` and `radio-cli`.
//!
//! Every connection opens with a single client command, sent in one write:
//! - `CONN`: join the live broadcast. The server sends one block, then waits for a
//!   `RECV` acknowledgement before sending the next one.
//! - `STAT`: ask what is playing. Reply is `NNNN` (4 ASCII decimal digits giving the
//!   payload length) followed by a JSON payload, or the bare token `NFND`.
//! - `TADD <key> <path>`: ingest a track. Reply is one of `TADD`, `AUTH`, `NFND`, `INVL`.
//!
//! Anything else is closed by the server without a reply.

use std::io::{self, Read, Write};

/// Workspace version plus git sha and build date, for both binaries' `--version`.
pub const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

/// Every token on the wire is four ASCII bytes.
pub const TOKEN_LEN: usize = 4;

pub const CONN: [u8; TOKEN_LEN] = *b"CONN";
pub const STAT: [u8; TOKEN_LEN] = *b"STAT";
pub const TADD: [u8; TOKEN_LEN] = *b"TADD";
pub const RECV: [u8; TOKEN_LEN] = *b"RECV";
pub const NFND: [u8; TOKEN_LEN] = *b"NFND";
pub const AUTH: [u8; TOKEN_LEN] = *b"AUTH";
pub const INVL: [u8; TOKEN_LEN] = *b"INVL";

/// Upper bound on the opening command read by the server.
pub const MAX_COMMAND_LEN: usize = 4096;

/// Largest payload expressible with a 4-digit length prefix.
pub const MAX_STATUS_LEN: usize = 9999;

/// Upper bound on one acknowledgement read.
pub const MAX_ACK_LEN: usize = 16;

/// Opening command sent by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `CONN`: stream the broadcast.
    Connect,
    /// `STAT`: now-playing status.
    Status,
    /// `TADD <key> <path>`: authenticated ingestion.
    AddTrack { key: String, path: String },
    /// `TADD` with the wrong number of tokens.
    MalformedAdd,
}

impl Command {
    /// Encode the command the way a client puts it on the wire.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Command::Connect => CONN.to_vec(),
            Command::Status => STAT.to_vec(),
            Command::AddTrack { key, path } => format!("TADD {key} {path}").into_bytes(),
            Command::MalformedAdd => TADD.to_vec(),
        }
    }
}

/// Short reply tokens sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Track ingested.
    Added,
    /// Wrong ingestion key.
    Unauthorized,
    /// Missing file, or nothing playing.
    NotFound,
    /// Malformed `TADD`.
    Invalid,
}

impl Reply {
    pub fn token(self) -> [u8; TOKEN_LEN] {
        match self {
            Reply::Added => TADD,
            Reply::Unauthorized => AUTH,
            Reply::NotFound => NFND,
            Reply::Invalid => INVL,
        }
    }

    pub fn from_token(token: [u8; TOKEN_LEN]) -> io::Result<Self> {
        match &token {
            b"TADD" => Ok(Reply::Added),
            b"AUTH" => Ok(Reply::Unauthorized),
            b"NFND" => Ok(Reply::NotFound),
            b"INVL" => Ok(Reply::Invalid),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown reply token {:?}", String::from_utf8_lossy(&token)),
            )),
        }
    }
}

/// Parse the opening command. `None` means unknown, which the server answers by closing.
pub fn parse_command(raw: &[u8]) -> Option<Command> {
    let text = std::str::from_utf8(raw).ok()?;
    let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    let tokens: Vec<&str> = text.split_whitespace().collect();
    match tokens.first().copied()? {
        "CONN" => Some(Command::Connect),
        "STAT" => Some(Command::Status),
        "TADD" => match tokens.as_slice() {
            [_, key, path] => Some(Command::AddTrack {
                key: (*key).to_string(),
                path: (*path).to_string(),
            }),
            _ => Some(Command::MalformedAdd),
        },
        _ => None,
    }
}

/// Write a bare reply token.
pub fn write_reply(mut w: impl Write, reply: Reply) -> io::Result<()> {
    w.write_all(&reply.token())?;
    w.flush()
}

/// Read exactly one 4-byte token.
pub fn read_token(mut r: impl Read) -> io::Result<[u8; TOKEN_LEN]> {
    let mut token = [0u8; TOKEN_LEN];
    r.read_exact(&mut token)?;
    Ok(token)
}

/// `true` when an acknowledgement read carries the `RECV` token anywhere in it.
pub fn is_ack(buf: &[u8]) -> bool {
    buf.windows(TOKEN_LEN).any(|w| w == RECV)
}

/// Encode a status payload as `NNNN` + payload.
pub fn encode_status(payload: &[u8]) -> io::Result<Vec<u8>> {
    if payload.len() > MAX_STATUS_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("status payload too large ({} bytes)", payload.len()),
        ));
    }
    let mut out = Vec::with_capacity(TOKEN_LEN + payload.len());
    out.extend_from_slice(format!("{:04}", payload.len()).as_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Write a length-prefixed status payload.
pub fn write_status(mut w: impl Write, payload: &[u8]) -> io::Result<()> {
    let frame = encode_status(payload)?;
    w.write_all(&frame)?;
    w.flush()
}

/// Decoded reply to `STAT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReply {
    Playing(Vec<u8>),
    NotFound,
}

/// Read a `STAT` reply: either `NFND` or `NNNN` + payload.
pub fn read_status(mut r: impl Read) -> io::Result<StatusReply> {
    let prefix = read_token(&mut r)?;
    if prefix == NFND {
        return Ok(StatusReply::NotFound);
    }
    let len = parse_length_prefix(prefix)?;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    Ok(StatusReply::Playing(payload))
}

fn parse_length_prefix(prefix: [u8; TOKEN_LEN]) -> io::Result<usize> {
    if !prefix.iter().all(u8::is_ascii_digit) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bad length prefix {:?}", String::from_utf8_lossy(&prefix)),
        ));
    }
    Ok(prefix
        .iter()
        .fold(0usize, |acc, d| acc * 10 + usize::from(d - b'0')))
}
