//! Transport adapter
//!
//! The protocol needs exactly one thing from its channel: atomic publish of
//! named messages with ordered consumption and a bounded-deadline receive.
//! Anything providing that (a pipe, a framed TCP stream, a queue) can sit
//! behind [`Transport`]. Two adapters ship here:
//!
//! - [`MailboxTransport`]: a one-slot-per-kind mailbox over a shared
//!   directory. Publishing is write-temp + fsync + rename, so a reader never
//!   observes a partially written message; consuming removes the slot.
//! - [`pair`]: an in-memory duplex built on channels, used by the tests and
//!   by same-process demos.

#![forbid(unsafe_code)]

use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use crate::message::{Message, MessageKind};

/// Poll interval for the mailbox receive loop.
const MAILBOX_POLL: Duration = Duration::from_millis(25);

/// Transport failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Deadline expired with nothing to consume.
    #[error("timed out after {waited:?} waiting for {want}")]
    Timeout {
        /// How long the receiver waited.
        waited: Duration,
        /// The message kind that never arrived.
        want: MessageKind,
    },
    /// Peer went away (in-memory channel closed).
    #[error("peer disconnected while waiting for {0}")]
    Disconnected(MessageKind),
    /// Underlying I/O failure.
    #[error("transport i/o: {0}")]
    Io(#[from] std::io::Error),
    /// A published payload did not parse as the expected kind.
    #[error("malformed {kind} payload: {source}")]
    Decode {
        /// Kind of the slot whose payload failed to parse.
        kind: MessageKind,
        /// Parser failure.
        #[source]
        source: serde_json::Error,
    },
}

/// An ordered, reliable, bidirectional message channel.
///
/// `recv` names the kind it expects so slot-addressed transports know where
/// to look; stream transports may still yield a different kind, which the
/// engines treat as a protocol violation.
pub trait Transport {
    /// Publish one message atomically.
    fn send(&mut self, msg: &Message) -> Result<(), TransportError>;

    /// Consume the next message, waiting at most `deadline`.
    fn recv(&mut self, want: MessageKind, deadline: Duration) -> Result<Message, TransportError>;
}

// ============================================================================
// File mailbox
// ============================================================================

/// Shared-directory mailbox: one slot file per message kind.
///
/// Both peers point at the same directory; each kind flows in only one
/// direction per session, so a slot is always written by one side and
/// consumed by the other.
pub struct MailboxTransport {
    dir: PathBuf,
}

impl MailboxTransport {
    /// Open (creating if needed) a mailbox at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, TransportError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn slot(&self, kind: MessageKind) -> PathBuf {
        self.dir.join(kind.slot())
    }

    /// Remove any leftover slots from an aborted session.
    pub fn clear(&self) -> Result<(), TransportError> {
        for kind in [
            MessageKind::Commits,
            MessageKind::Challenge,
            MessageKind::Open,
            MessageKind::Result,
        ] {
            let path = self.slot(kind);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

impl Transport for MailboxTransport {
    fn send(&mut self, msg: &Message) -> Result<(), TransportError> {
        let kind = msg.kind();
        let payload = msg.encode().map_err(|source| TransportError::Decode { kind, source })?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&payload)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.slot(kind)).map_err(|e| TransportError::Io(e.error))?;
        tracing::trace!(%kind, bytes = payload.len(), "published");
        Ok(())
    }

    fn recv(&mut self, want: MessageKind, deadline: Duration) -> Result<Message, TransportError> {
        let start = Instant::now();
        let path = self.slot(want);
        loop {
            if path.is_file() {
                let bytes = std::fs::read(&path)?;
                std::fs::remove_file(&path)?;
                let msg = Message::decode(want, &bytes)
                    .map_err(|source| TransportError::Decode { kind: want, source })?;
                tracing::trace!(kind = %want, "consumed");
                return Ok(msg);
            }
            if start.elapsed() >= deadline {
                return Err(TransportError::Timeout { waited: start.elapsed(), want });
            }
            std::thread::sleep(MAILBOX_POLL);
        }
    }
}

// ============================================================================
// In-memory duplex
// ============================================================================

/// One endpoint of an in-memory duplex channel.
pub struct PairTransport {
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

/// Create a connected pair of in-memory endpoints.
pub fn pair() -> (PairTransport, PairTransport) {
    let (atx, brx) = mpsc::channel();
    let (btx, arx) = mpsc::channel();
    (PairTransport { tx: atx, rx: arx }, PairTransport { tx: btx, rx: brx })
}

impl Transport for PairTransport {
    fn send(&mut self, msg: &Message) -> Result<(), TransportError> {
        self.tx
            .send(msg.clone())
            .map_err(|_| TransportError::Disconnected(msg.kind()))
    }

    fn recv(&mut self, want: MessageKind, deadline: Duration) -> Result<Message, TransportError> {
        match self.rx.recv_timeout(deadline) {
            Ok(msg) => Ok(msg),
            Err(RecvTimeoutError::Timeout) => {
                Err(TransportError::Timeout { waited: deadline, want })
            }
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected(want)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
