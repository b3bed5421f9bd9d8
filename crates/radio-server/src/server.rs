//! TCP front door: port selection, the accept loop, and command routing.

use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use radio_proto::{Command, MAX_COMMAND_LEN, Reply, parse_command, write_reply};

use crate::engine::Engine;
use crate::session::{self, is_timeout};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("no command before timeout")]
    Timeout,
    #[error("peer closed before sending a command")]
    Closed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Bind the first port in `ports` that is free on `host`.
///
/// Individual bind failures are logged and skipped; running out of ports is fatal.
pub fn bind_first(host: &str, ports: &[u16]) -> Result<TcpListener> {
    for &port in ports {
        match TcpListener::bind((host, port)) {
            Ok(listener) => {
                tracing::info!(host, port, "listening");
                return Ok(listener);
            }
            Err(e) => tracing::warn!(host, port, "bind failed: {e}"),
        }
    }
    Err(anyhow!("no bindable port on {host} in {ports:?}"))
}

/// Accept connections until the engine stops, one thread per connection.
///
/// The listener is polled non-blocking so the running flag is seen between connections.
pub fn serve(engine: Arc<Engine>, listener: TcpListener) -> Result<()> {
    listener.set_nonblocking(true)?;
    while engine.is_running() {
        match listener.accept() {
            Ok((stream, addr)) => spawn_connection(engine.clone(), stream, addr),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(engine.config.accept_poll);
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => {}
            Err(e) => tracing::warn!("accept error: {e}"),
        }
    }
    tracing::info!("accept loop stopped");
    Ok(())
}

fn spawn_connection(engine: Arc<Engine>, stream: TcpStream, addr: SocketAddr) {
    let spawned = std::thread::Builder::new()
        .name(format!("conn-{addr}"))
        .spawn(move || {
            if let Err(e) = handle_connection(&engine, stream, addr) {
                tracing::debug!(peer = %addr, "connection ended with error: {e:#}");
            }
        });
    if let Err(e) = spawned {
        tracing::error!(peer = %addr, "failed to spawn connection thread: {e}");
    }
}

/// Read the opening command and hand the connection to its session.
pub fn handle_connection(engine: &Engine, mut stream: TcpStream, addr: SocketAddr) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true).ok();
    stream.set_read_timeout(Some(engine.config.command_timeout))?;

    let raw = match read_command(&mut stream) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!(peer = %addr, "dropping connection: {e}");
            return Ok(());
        }
    };

    match parse_command(&raw) {
        Some(Command::Connect) => {
            stream.set_read_timeout(Some(engine.config.ack_timeout))?;
            stream.set_write_timeout(Some(engine.config.ack_timeout))?;
            let summary = session::streaming::serve(engine, &mut stream);
            tracing::debug!(peer = %addr, ?summary, "streaming session finished");
        }
        Some(Command::Status) => {
            tracing::debug!(peer = %addr, "status request");
            session::status::serve(engine, &mut stream)?;
        }
        Some(Command::AddTrack { key, path }) => {
            tracing::info!(peer = %addr, path = %path, "track add request");
            session::ingest::serve(engine, &mut stream, &key, &path)?;
        }
        Some(Command::MalformedAdd) => {
            tracing::debug!(peer = %addr, "malformed TADD");
            write_reply(&mut stream, Reply::Invalid)?;
        }
        None => {
            tracing::debug!(peer = %addr, "unknown command; closing");
        }
    }
    Ok(())
}

/// One bounded read of the opening command.
pub fn read_command(mut peer: impl Read) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = vec![0u8; MAX_COMMAND_LEN];
    loop {
        match peer.read(&mut buf) {
            Ok(0) => return Err(ProtocolError::Closed),
            Ok(n) => {
                buf.truncate(n);
                return Ok(buf);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_timeout(&e) => return Err(ProtocolError::Timeout),
            Err(e) => return Err(e.into()),
        }
    }
}
