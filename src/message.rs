//! Wire messages
//!
//! The four protocol payloads, exactly as they appear on the wire: plain
//! JSON objects with snake_case keys and hex-string byte fields. Message
//! kind is carried by the transport (named mailbox slot, frame tag, …), not
//! by the payload, so the encodings stay byte-compatible with the reference
//! artifacts.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

/// First prover message: the pinned commitment vector for the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commits {
    pub session: String,
    /// One 32-byte SHA-256 commitment per row, hex-encoded.
    pub commits: Vec<String>,
}

/// Verifier challenge: one bit per round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub session: String,
    /// Round number, 1-based.
    pub round: u32,
    /// Challenge bit: 0 opens the whole matrix, 1 opens the cycle.
    pub b: u8,
}

/// A single opened row: index plus the committed preimage parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenedRow {
    pub index: u32,
    pub row_hex: String,
    pub nonce_hex: String,
}

/// Prover opening for one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Open {
    pub session: String,
    pub b: u8,
    pub context: String,
    pub opened_rows: Vec<OpenedRow>,
    /// Cycle vertex order; present only for b=1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_indices: Option<Vec<u32>>,
}

/// Terminal verdict for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResult {
    pub session: String,
    pub ok: bool,
    pub msg: String,
    pub rounds: u32,
}

/// One protocol message of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Commits(Commits),
    Challenge(Challenge),
    Open(Open),
    Result(SessionResult),
}

/// Discriminant for `Message`, used by transports to name slots and by the
/// engines to state what they expect next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Commits,
    Challenge,
    Open,
    Result,
}

impl MessageKind {
    /// Stable slot name, matching the reference mailbox artifacts.
    pub fn slot(self) -> &'static str {
        match self {
            MessageKind::Commits => "commit_package.json",
            MessageKind::Challenge => "challenge.json",
            MessageKind::Open => "open_package.json",
            MessageKind::Result => "round_result.json",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageKind::Commits => "COMMITS",
            MessageKind::Challenge => "CHALLENGE",
            MessageKind::Open => "OPEN",
            MessageKind::Result => "RESULT",
        };
        f.write_str(s)
    }
}

impl Message {
    /// This message's kind.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Commits(_) => MessageKind::Commits,
            Message::Challenge(_) => MessageKind::Challenge,
            Message::Open(_) => MessageKind::Open,
            Message::Result(_) => MessageKind::Result,
        }
    }

    /// The session id carried by any kind.
    pub fn session(&self) -> &str {
        match self {
            Message::Commits(m) => &m.session,
            Message::Challenge(m) => &m.session,
            Message::Open(m) => &m.session,
            Message::Result(m) => &m.session,
        }
    }

    /// Encode the payload (kind carried out of band).
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            Message::Commits(m) => serde_json::to_vec(m),
            Message::Challenge(m) => serde_json::to_vec(m),
            Message::Open(m) => serde_json::to_vec(m),
            Message::Result(m) => serde_json::to_vec(m),
        }
    }

    /// Decode a payload of a known kind.
    pub fn decode(kind: MessageKind, bytes: &[u8]) -> serde_json::Result<Self> {
        Ok(match kind {
            MessageKind::Commits => Message::Commits(serde_json::from_slice(bytes)?),
            MessageKind::Challenge => Message::Challenge(serde_json::from_slice(bytes)?),
            MessageKind::Open => Message::Open(serde_json::from_slice(bytes)?),
            MessageKind::Result => Message::Result(serde_json::from_slice(bytes)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_wire_shape() {
        let ch = Challenge { session: "s1".into(), round: 3, b: 1 };
        let json = serde_json::to_value(&ch).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"session": "s1", "round": 3, "b": 1})
        );
    }

    #[test]
    fn open_omits_absent_cycle() {
        let open = Open {
            session: "s1".into(),
            b: 0,
            context: "row-commit".into(),
            opened_rows: vec![],
            cycle_indices: None,
        };
        let json = serde_json::to_string(&open).unwrap();
        assert!(!json.contains("cycle_indices"));

        // And parses back whether or not the field is present.
        let back: Open = serde_json::from_str(&json).unwrap();
        assert_eq!(back, open);
    }

    #[test]
    fn encode_decode_round_trip_every_kind() {
        let msgs = [
            Message::Commits(Commits { session: "s".into(), commits: vec!["00".repeat(32)] }),
            Message::Challenge(Challenge { session: "s".into(), round: 1, b: 0 }),
            Message::Open(Open {
                session: "s".into(),
                b: 1,
                context: "row-commit".into(),
                opened_rows: vec![OpenedRow {
                    index: 4,
                    row_hex: "a0".into(),
                    nonce_hex: "ff".repeat(16),
                }],
                cycle_indices: Some(vec![4, 1, 0]),
            }),
            Message::Result(SessionResult {
                session: "s".into(),
                ok: true,
                msg: "ok".into(),
                rounds: 8,
            }),
        ];
        for m in msgs {
            let bytes = m.encode().unwrap();
            let back = Message::decode(m.kind(), &bytes).unwrap();
            assert_eq!(back, m);
        }
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(Message::decode(MessageKind::Challenge, b"{\"session\": 3}").is_err());
        assert!(Message::decode(MessageKind::Commits, b"not json").is_err());
    }
}
