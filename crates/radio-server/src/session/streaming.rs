//! `CONN`: pull-paced delivery of the broadcast to one listener.
//!
//! The session joins at the block holding the frame the clock currently points at,
//! then walks the buffer one block per `RECV`. It never has more than one
//! unacknowledged block in flight. Running off the end of the buffer wraps this
//! listener to block 0, independently of where the clock loops.

use std::io::{self, Read, Write};
use std::time::Instant;

use radio_proto::{MAX_ACK_LEN, is_ack};
use uuid::Uuid;

use crate::engine::Engine;
use crate::frame_index;
use crate::session::is_timeout;
use crate::watchdog::SessionId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Join,
    Deliver,
    AckWait,
    Closed,
    Dead,
}

/// How a streaming session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    /// Peer closed, rejected an ack, failed a write, or the engine stopped.
    Closed,
    /// Lease revoked by the watchdog.
    Dead,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSummary {
    pub id: SessionId,
    pub start_block: usize,
    pub blocks_sent: u64,
    pub end: StreamEnd,
}

pub struct StreamingSession<'e, S> {
    engine: &'e Engine,
    peer: S,
    id: SessionId,
    start_block: usize,
    cursor: usize,
    sent: u64,
}

impl<'e, S: Read + Write> StreamingSession<'e, S> {
    pub fn new(engine: &'e Engine, peer: S) -> Self {
        Self {
            engine,
            peer,
            id: Uuid::new_v4(),
            start_block: 0,
            cursor: 0,
            sent: 0,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn run(mut self) -> StreamSummary {
        let active = self.engine.stream_started();
        tracing::info!(session = %self.id, active, "stream connected");

        let mut state = State::Join;
        let end = loop {
            state = match state {
                State::Join => self.join(),
                State::Deliver => self.deliver(),
                State::AckWait => self.await_ack(),
                State::Closed => break StreamEnd::Closed,
                State::Dead => break StreamEnd::Dead,
            };
        };
        self.teardown(end)
    }

    fn join(&mut self) -> State {
        let engine = self.engine;
        engine.watchdog.register(self.id);
        let radio_time = engine.clock.radio_time();
        self.start_block = match frame_index::locate(&engine.buffer, radio_time) {
            Ok(frame) => {
                tracing::debug!(
                    session = %self.id,
                    radio_ms = radio_time.as_millis() as u64,
                    block = frame.block,
                    offset = frame.offset,
                    "joined mid-broadcast"
                );
                frame.block
            }
            Err(e) => {
                tracing::debug!(session = %self.id, "{e}; starting at first block");
                0
            }
        };
        self.cursor = self.start_block;
        State::Deliver
    }

    fn deliver(&mut self) -> State {
        let engine = self.engine;
        if !engine.is_running() {
            return State::Closed;
        }
        if !engine.watchdog.is_alive(self.id) {
            return State::Dead;
        }
        let len = engine.buffer.len();
        if len == 0 {
            tracing::info!(session = %self.id, "nothing to broadcast yet");
            return State::Closed;
        }
        if self.cursor >= len {
            tracing::debug!(session = %self.id, "end of buffer; wrapping to first block");
            self.cursor = 0;
        }
        let Some(block) = engine.buffer.block(self.cursor) else {
            return State::Closed;
        };
        if let Some(end) = self.send(block) {
            return end;
        }
        if !engine.watchdog.heartbeat(self.id) {
            return State::Dead;
        }
        tracing::trace!(session = %self.id, block = self.cursor, "block sent");
        self.cursor += 1;
        self.sent += 1;
        State::AckWait
    }

    /// Write one whole block. A write timeout resumes where it stopped while the session
    /// may still live; a peer that stays unwritable past the death threshold is dead even
    /// if it never got a first heartbeat.
    fn send(&mut self, block: &[u8]) -> Option<State> {
        let engine = self.engine;
        let stalled_since = Instant::now();
        let mut written = 0;
        while written < block.len() {
            match self.peer.write(&block[written..]) {
                Ok(0) => return Some(State::Closed),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if is_timeout(&e) => {
                    if !engine.is_running() {
                        return Some(State::Closed);
                    }
                    if !engine.watchdog.is_alive(self.id)
                        || stalled_since.elapsed() > engine.watchdog.death_threshold()
                    {
                        tracing::debug!(
                            session = %self.id,
                            block = self.cursor,
                            written,
                            "peer stopped reading"
                        );
                        return Some(State::Dead);
                    }
                }
                Err(e) => {
                    tracing::debug!(session = %self.id, block = self.cursor, "send failed: {e}");
                    return Some(State::Closed);
                }
            }
        }
        match self.peer.flush() {
            Ok(()) => None,
            Err(e) => {
                tracing::debug!(session = %self.id, "flush failed: {e}");
                Some(State::Closed)
            }
        }
    }

    fn await_ack(&mut self) -> State {
        let engine = self.engine;
        let mut buf = [0u8; MAX_ACK_LEN];
        match self.peer.read(&mut buf) {
            Ok(0) => State::Closed,
            Ok(n) if is_ack(&buf[..n]) => {
                if !engine.config.delivery_delay.is_zero() {
                    std::thread::sleep(engine.config.delivery_delay);
                }
                State::Deliver
            }
            Ok(n) => {
                tracing::debug!(
                    session = %self.id,
                    reply = %String::from_utf8_lossy(&buf[..n]),
                    "unexpected acknowledgement"
                );
                State::Closed
            }
            Err(e) if is_timeout(&e) => {
                if !engine.watchdog.is_alive(self.id) {
                    State::Dead
                } else if !engine.is_running() {
                    State::Closed
                } else {
                    State::AckWait
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => State::AckWait,
            Err(e) => {
                tracing::debug!(session = %self.id, "ack read failed: {e}");
                State::Closed
            }
        }
    }

    fn teardown(self, end: StreamEnd) -> StreamSummary {
        if let Err(e) = self.engine.watchdog.remove(self.id) {
            tracing::debug!("{e}");
        }
        let active = self.engine.stream_ended();
        match end {
            StreamEnd::Closed => tracing::info!(
                session = %self.id,
                sent = self.sent,
                active,
                "stream closed"
            ),
            StreamEnd::Dead => tracing::warn!(
                session = %self.id,
                sent = self.sent,
                active,
                "stream lease revoked; session torn down"
            ),
        }
        StreamSummary {
            id: self.id,
            start_block: self.start_block,
            blocks_sent: self.sent,
            end,
        }
    }
}

/// Run a streaming session to completion on `peer`.
pub fn serve<S: Read + Write>(engine: &Engine, peer: S) -> StreamSummary {
    StreamingSession::new(engine, peer).run()
}

#[cfg(test)]
pub(crate) mod test_peer {
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Event {
        Sent(Vec<u8>),
        Read(Vec<u8>),
    }

    /// In-memory peer that replays scripted reads and records every exchange in order.
    #[derive(Default)]
    pub(crate) struct ScriptedPeer {
        pub(crate) replies: VecDeque<io::Result<Vec<u8>>>,
        pub(crate) events: Vec<Event>,
        pub(crate) error_delay: Duration,
        /// Writes that time out before the peer accepts anything.
        pub(crate) write_stalls: usize,
        /// Largest write accepted at once; `0` accepts everything.
        pub(crate) write_limit: usize,
    }

    impl ScriptedPeer {
        pub(crate) fn acks(count: usize) -> Self {
            Self {
                replies: (0..count).map(|_| Ok(b"RECV".to_vec())).collect(),
                ..Self::default()
            }
        }

        pub(crate) fn sent(&self) -> Vec<Vec<u8>> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    Event::Sent(bytes) => Some(bytes.clone()),
                    Event::Read(_) => None,
                })
                .collect()
        }
    }

    impl Read for ScriptedPeer {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.replies.pop_front() {
                None => Ok(0),
                Some(Ok(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    self.events.push(Event::Read(bytes[..n].to_vec()));
                    Ok(n)
                }
                Some(Err(e)) => {
                    std::thread::sleep(self.error_delay);
                    Err(e)
                }
            }
        }
    }

    impl Write for ScriptedPeer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.write_stalls > 0 {
                self.write_stalls -= 1;
                std::thread::sleep(self.error_delay);
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            let n = match self.write_limit {
                0 => buf.len(),
                limit => buf.len().min(limit),
            };
            match self.events.last_mut() {
                Some(Event::Sent(pending)) => pending.extend_from_slice(&buf[..n]),
                _ => self.events.push(Event::Sent(buf[..n].to_vec())),
            }
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
