//! Per-connection protocol handlers.
//!
//! Each handler is generic over the peer so tests can drive it without sockets.

pub mod ingest;
pub mod status;
pub mod streaming;

use std::io;

/// `true` for the error kinds a socket read timeout surfaces as.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
