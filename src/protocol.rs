//! Protocol engine: the T-round commit/challenge/open session
//!
//! ## Overview
//! One session proves knowledge of the planted Hamiltonian cycle without
//! revealing it. The prover pins a per-row commitment vector once, then for
//! each of T rounds answers a one-bit challenge:
//!
//! - `b = 0`: open **every** row, demonstrating the committed matrix is the
//!   enrolled graph;
//! - `b = 1`: open only the cycle rows plus the cycle order, demonstrating
//!   the committed matrix contains the cycle.
//!
//! A cheater can prepare for either answer but not both, so each round
//! halves its survival odds; after T rounds the cheating probability is
//! 2⁻ᵀ.
//!
//! ## Ordering (session-invariant)
//! `COMMITS ≺ CHALLENGE₁ ≺ OPEN₁ ≺ … ≺ CHALLENGEₜ ≺ OPENₜ ≺ RESULT`.
//! The prover never opens before the matching challenge; the verifier never
//! issues round r+1 before consuming opening r. Any out-of-order, foreign-
//! session, or malformed message terminates the session.
//!
//! ## Rejection discipline
//! The verifier converts every verification failure into a terminal
//! `RESULT{ok=false}` naming only the kind, the offending index, and the
//! round (never σ, nonces, or seed material) and stops the session on the
//! first inconsistency. There are no retries inside the round window.
//!
//! Challenge bits come from the OS CSPRNG through the [`ChallengeSource`]
//! seam; the deterministic implementation exists for drills and exhaustive
//! tests only.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::commit::{self, RowCommitment, NONCE_LEN};
use crate::graph::BitMatrix;
use crate::kdf;
use crate::message::{Challenge, Commits, Message, MessageKind, Open, OpenedRow, SessionResult};
use crate::perm::Permutation;
use crate::transport::{Transport, TransportError};

/// Receive deadlines per suspension point (reference defaults).
#[derive(Clone, Debug)]
pub struct Deadlines {
    /// Verifier waiting for a session's COMMITS.
    pub commits: Duration,
    /// Prover waiting for the next CHALLENGE.
    pub challenge: Duration,
    /// Verifier waiting for the round's OPEN.
    pub open: Duration,
    /// Prover waiting for the terminal RESULT.
    pub result: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            commits: Duration::from_secs(300),
            challenge: Duration::from_secs(120),
            open: Duration::from_secs(60),
            result: Duration::from_secs(300),
        }
    }
}

/// Per-session knobs shared by both engines.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Number of rounds T; cheating probability is 2⁻ᵀ.
    pub rounds: u32,
    /// Receive deadlines.
    pub deadlines: Deadlines,
    /// Demand |cycle_indices| = n on b=1 (full Hamiltonian proof) instead of
    /// accepting cycle segments.
    pub require_full_cycle: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rounds: 256,
            deadlines: Deadlines::default(),
            require_full_cycle: cfg!(feature = "strict-cycle"),
        }
    }
}

// ============================================================================
// Challenge source
// ============================================================================

/// Where the verifier's challenge bits come from.
pub trait ChallengeSource {
    /// Next challenge bit (0 or 1).
    fn next_bit(&mut self) -> u8;
}

/// CSPRNG-backed bits. The only source the production path uses.
pub struct OsChallenges;

impl ChallengeSource for OsChallenges {
    fn next_bit(&mut self) -> u8 {
        (OsRng.next_u32() & 1) as u8
    }
}

/// A fixed, repeating schedule of bits. Predictable challenges make the
/// protocol forgeable, so this is for rejection drills and exhaustive tests.
pub struct ScriptedChallenges {
    bits: Vec<u8>,
    at: usize,
}

impl ScriptedChallenges {
    pub fn new(bits: Vec<u8>) -> Self {
        assert!(!bits.is_empty(), "schedule must not be empty");
        Self { bits, at: 0 }
    }
}

impl ChallengeSource for ScriptedChallenges {
    fn next_bit(&mut self) -> u8 {
        let b = self.bits[self.at % self.bits.len()] & 1;
        self.at += 1;
        b
    }
}

// ============================================================================
// Prover
// ============================================================================

/// Prover-side failures. These surface to the caller immediately; nothing is
/// retried.
#[derive(Debug, thiserror::Error)]
pub enum ProverError {
    #[error("graph has {graph_n} vertices but σ covers {sigma_n}")]
    SizeMismatch { graph_n: usize, sigma_n: usize },
    #[error("protocol violation in round {round}: {detail}")]
    Protocol { round: u32, detail: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Honest prover for one enrolled graph.
pub struct Prover<'a> {
    graph: &'a BitMatrix,
    sigma: &'a Permutation,
    config: SessionConfig,
}

impl<'a> Prover<'a> {
    pub fn new(
        graph: &'a BitMatrix,
        sigma: &'a Permutation,
        config: SessionConfig,
    ) -> Result<Self, ProverError> {
        if graph.n() != sigma.len() {
            return Err(ProverError::SizeMismatch {
                graph_n: graph.n(),
                sigma_n: sigma.len(),
            });
        }
        Ok(Self { graph, sigma, config })
    }

    /// Drive a full session: commit once, answer T challenges, read the
    /// verdict. The nonce table never leaves this frame except through
    /// openings, and is wiped when it drops.
    pub fn run(
        &self,
        session_id: &str,
        transport: &mut dyn Transport,
    ) -> Result<SessionResult, ProverError> {
        let seed_session = kdf::session_seed(session_id);
        let (commits, nonces) =
            commit::commit_rows(self.graph, &seed_session, kdf::CTX_ROW_COMMIT);

        transport.send(&Message::Commits(Commits {
            session: session_id.to_owned(),
            commits: commits.iter().map(hex::encode).collect(),
        }))?;
        tracing::info!(session = session_id, rounds = self.config.rounds, "commitments published");

        for round in 1..=self.config.rounds {
            let challenge = match transport
                .recv(MessageKind::Challenge, self.config.deadlines.challenge)?
            {
                Message::Challenge(c) => c,
                other => {
                    return Err(ProverError::Protocol {
                        round,
                        detail: format!("expected CHALLENGE, got {}", other.kind()),
                    })
                }
            };
            if challenge.session != session_id {
                return Err(ProverError::Protocol {
                    round,
                    detail: format!("challenge addresses session `{}`", challenge.session),
                });
            }
            if challenge.round != round {
                return Err(ProverError::Protocol {
                    round,
                    detail: format!("challenge for round {} out of order", challenge.round),
                });
            }
            if challenge.b > 1 {
                return Err(ProverError::Protocol {
                    round,
                    detail: format!("challenge bit {} is not a bit", challenge.b),
                });
            }

            let open = self.answer(session_id, challenge.b, &nonces);
            transport.send(&Message::Open(open))?;
            tracing::debug!(round, b = challenge.b, "opening sent");
        }

        let result = match transport.recv(MessageKind::Result, self.config.deadlines.result)? {
            Message::Result(r) => r,
            other => {
                return Err(ProverError::Protocol {
                    round: self.config.rounds,
                    detail: format!("expected RESULT, got {}", other.kind()),
                })
            }
        };
        if result.session != session_id {
            return Err(ProverError::Protocol {
                round: self.config.rounds,
                detail: format!("result addresses session `{}`", result.session),
            });
        }
        tracing::info!(session = session_id, ok = result.ok, msg = %result.msg, "session finished");
        Ok(result)
    }

    fn answer(&self, session_id: &str, b: u8, nonces: &commit::NonceTable) -> Open {
        let mut opened_rows = Vec::new();
        let cycle_indices = if b == 1 {
            // Every cycle vertex, in cycle order. σ is a bijection, so this
            // covers each opened row exactly once.
            for &v in self.sigma.as_slice() {
                opened_rows.push(self.opened_row(v as usize, nonces));
            }
            Some(self.sigma.as_slice().to_vec())
        } else {
            for i in 0..self.graph.n() {
                opened_rows.push(self.opened_row(i, nonces));
            }
            None
        };
        Open {
            session: session_id.to_owned(),
            b,
            context: kdf::CTX_ROW_COMMIT.to_owned(),
            opened_rows,
            cycle_indices,
        }
    }

    fn opened_row(&self, i: usize, nonces: &commit::NonceTable) -> OpenedRow {
        OpenedRow {
            index: i as u32,
            row_hex: hex::encode(self.graph.row(i)),
            nonce_hex: hex::encode(nonces.get(i)),
        }
    }
}

// ============================================================================
// Verifier
// ============================================================================

/// A verification failure. Becomes the terminal RESULT message; the display
/// form is `Kind: detail (round r)` and carries nothing session-secret.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyFailure {
    #[error("ProtocolError: {detail} (round {round})")]
    Protocol { round: u32, detail: String },
    #[error("DecodeError: {detail} (round {round})")]
    Decode { round: u32, detail: String },
    #[error("CommitMismatch: row {index} does not match its commitment (round {round})")]
    CommitMismatch { round: u32, index: u32 },
    #[error("CycleInvalid: {detail} (round {round})")]
    CycleInvalid { round: u32, detail: String },
    #[error("TimeoutError: no opening within {waited:?} (round {round})")]
    Timeout { round: u32, waited: Duration },
}

impl VerifyFailure {
    /// Taxonomy kind, for dispatch and assertions.
    pub fn kind(&self) -> &'static str {
        match self {
            VerifyFailure::Protocol { .. } => "ProtocolError",
            VerifyFailure::Decode { .. } => "DecodeError",
            VerifyFailure::CommitMismatch { .. } => "CommitMismatch",
            VerifyFailure::CycleInvalid { .. } => "CycleInvalid",
            VerifyFailure::Timeout { .. } => "TimeoutError",
        }
    }
}

/// Verifier-side fatal failures: the channel itself broke before or while a
/// verdict could be delivered. Ordinary rejections are not errors; they come
/// back as `SessionResult{ok: false}`.
#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Verifier for sessions against one enrollment.
pub struct Verifier<'a> {
    n: usize,
    expected_graph: Option<&'a BitMatrix>,
    config: SessionConfig,
}

impl<'a> Verifier<'a> {
    /// Verifier that checks openings against the commitments only.
    pub fn new(n: usize, config: SessionConfig) -> Self {
        Self { n, expected_graph: None, config }
    }

    /// Verifier that additionally pins b=0 openings to the enrolled graph.
    pub fn with_graph(graph: &'a BitMatrix, config: SessionConfig) -> Self {
        Self { n: graph.n(), expected_graph: Some(graph), config }
    }

    /// Accept one session: wait for COMMITS, run T rounds, emit RESULT.
    ///
    /// Returns the emitted result; `Err` only when the transport itself
    /// fails (including nobody showing up within the COMMITS deadline).
    pub fn run(
        &self,
        transport: &mut dyn Transport,
        challenges: &mut dyn ChallengeSource,
    ) -> Result<SessionResult, VerifierError> {
        let first = transport.recv(MessageKind::Commits, self.config.deadlines.commits)?;
        let (session, outcome) = match first {
            Message::Commits(pkg) => {
                let session = pkg.session.clone();
                tracing::info!(session = %session, commits = pkg.commits.len(), "session opened");
                (session, self.drive(&pkg, transport, challenges)?)
            }
            other => (
                other.session().to_owned(),
                Err(VerifyFailure::Protocol {
                    round: 0,
                    detail: format!("expected COMMITS, got {}", other.kind()),
                }),
            ),
        };

        let result = match outcome {
            Ok(()) => SessionResult {
                session,
                ok: true,
                msg: "ok".into(),
                rounds: self.config.rounds,
            },
            Err(failure) => {
                tracing::warn!(session = %session, %failure, "session rejected");
                SessionResult {
                    session,
                    ok: false,
                    msg: failure.to_string(),
                    rounds: self.config.rounds,
                }
            }
        };
        transport.send(&Message::Result(result.clone()))?;
        Ok(result)
    }

    /// The T-round loop. Outer error: broken transport. Inner error: the
    /// rejection that becomes the RESULT.
    fn drive(
        &self,
        pkg: &Commits,
        transport: &mut dyn Transport,
        challenges: &mut dyn ChallengeSource,
    ) -> Result<Result<(), VerifyFailure>, VerifierError> {
        let commits = match self.pin_commits(pkg) {
            Ok(c) => c,
            Err(f) => return Ok(Err(f)),
        };

        for round in 1..=self.config.rounds {
            let b = challenges.next_bit() & 1;
            transport.send(&Message::Challenge(Challenge {
                session: pkg.session.clone(),
                round,
                b,
            }))?;

            let open = match transport.recv(MessageKind::Open, self.config.deadlines.open) {
                Ok(Message::Open(o)) => o,
                Ok(other) => {
                    return Ok(Err(VerifyFailure::Protocol {
                        round,
                        detail: format!("expected OPEN, got {}", other.kind()),
                    }))
                }
                Err(TransportError::Timeout { waited, .. }) => {
                    return Ok(Err(VerifyFailure::Timeout { round, waited }))
                }
                Err(TransportError::Decode { source, .. }) => {
                    return Ok(Err(VerifyFailure::Decode { round, detail: source.to_string() }))
                }
                Err(e) => return Err(e.into()),
            };

            if let Err(f) = self.verify_open(round, b, &pkg.session, &commits, &open) {
                return Ok(Err(f));
            }
            tracing::debug!(round, b, "round verified");
        }
        Ok(Ok(()))
    }

    /// Validate and decode the commitment vector pinned for the session.
    fn pin_commits(&self, pkg: &Commits) -> Result<Vec<RowCommitment>, VerifyFailure> {
        if pkg.session.is_empty() {
            return Err(VerifyFailure::Decode { round: 0, detail: "empty session id".into() });
        }
        if pkg.commits.len() != self.n {
            return Err(VerifyFailure::Decode {
                round: 0,
                detail: format!("{} commitments for n={}", pkg.commits.len(), self.n),
            });
        }
        let mut out = Vec::with_capacity(self.n);
        for (i, c) in pkg.commits.iter().enumerate() {
            let bytes = hex::decode(c).map_err(|_| VerifyFailure::Decode {
                round: 0,
                detail: format!("commitment {i} is not hex"),
            })?;
            let arr: RowCommitment = bytes.try_into().map_err(|_| VerifyFailure::Decode {
                round: 0,
                detail: format!("commitment {i} is not 32 bytes"),
            })?;
            out.push(arr);
        }
        Ok(out)
    }

    /// The round verification rules. Checks run cheap-to-expensive; the
    /// first violation wins.
    fn verify_open(
        &self,
        round: u32,
        b: u8,
        session: &str,
        commits: &[RowCommitment],
        open: &Open,
    ) -> Result<(), VerifyFailure> {
        if open.session != session {
            return Err(VerifyFailure::Protocol {
                round,
                detail: format!("opening addresses session `{}`", open.session),
            });
        }
        if open.b != b {
            return Err(VerifyFailure::Protocol {
                round,
                detail: format!("opening answers bit {}, challenged {b}", open.b),
            });
        }
        if open.context != kdf::CTX_ROW_COMMIT {
            return Err(VerifyFailure::Protocol {
                round,
                detail: format!("commitment context `{}` mismatch", open.context),
            });
        }

        let row_bytes = self.n.div_ceil(8);
        let mut opened: BTreeMap<u32, Vec<u8>> = BTreeMap::new();
        for entry in &open.opened_rows {
            let i = entry.index;
            if i as usize >= self.n {
                return Err(VerifyFailure::Decode {
                    round,
                    detail: format!("opened row index {i} out of range"),
                });
            }
            if opened.contains_key(&i) {
                return Err(VerifyFailure::Decode {
                    round,
                    detail: format!("duplicate opened row {i}"),
                });
            }
            let row = hex::decode(&entry.row_hex).map_err(|_| VerifyFailure::Decode {
                round,
                detail: format!("row {i} is not hex"),
            })?;
            let nonce = hex::decode(&entry.nonce_hex).map_err(|_| VerifyFailure::Decode {
                round,
                detail: format!("nonce for row {i} is not hex"),
            })?;
            if row.len() != row_bytes {
                return Err(VerifyFailure::Decode {
                    round,
                    detail: format!("row {i} is {} bytes, expected {row_bytes}", row.len()),
                });
            }
            if nonce.len() != NONCE_LEN {
                return Err(VerifyFailure::Decode {
                    round,
                    detail: format!("nonce for row {i} is {} bytes, expected {NONCE_LEN}", nonce.len()),
                });
            }

            if commit::commit_row(&row, &nonce, &open.context) != commits[i as usize] {
                return Err(VerifyFailure::CommitMismatch { round, index: i });
            }
            if bit(&row, i as usize) {
                return Err(VerifyFailure::Protocol {
                    round,
                    detail: format!("self-loop bit set in row {i}"),
                });
            }
            opened.insert(i, row);
        }

        // Symmetry over whatever subset was opened.
        for (&i, row_i) in &opened {
            for (&j, row_j) in opened.range((i + 1)..) {
                if bit(row_i, j as usize) != bit(row_j, i as usize) {
                    return Err(VerifyFailure::Protocol {
                        round,
                        detail: format!("asymmetric opening between rows {i} and {j}"),
                    });
                }
            }
        }

        match b {
            1 => self.check_cycle(round, open, &opened),
            _ => self.check_full_opening(round, &opened),
        }
    }

    fn check_cycle(
        &self,
        round: u32,
        open: &Open,
        opened: &BTreeMap<u32, Vec<u8>>,
    ) -> Result<(), VerifyFailure> {
        let cycle = match open.cycle_indices.as_deref() {
            Some(c) if !c.is_empty() => c,
            _ => {
                return Err(VerifyFailure::CycleInvalid {
                    round,
                    detail: "no cycle provided".into(),
                })
            }
        };
        if cycle.len() > self.n {
            return Err(VerifyFailure::CycleInvalid {
                round,
                detail: format!("cycle visits {} vertices, graph has {}", cycle.len(), self.n),
            });
        }
        if self.config.require_full_cycle && cycle.len() != self.n {
            return Err(VerifyFailure::CycleInvalid {
                round,
                detail: format!("cycle covers {} of {} vertices", cycle.len(), self.n),
            });
        }

        let mut seen = vec![false; self.n];
        for &v in cycle {
            if v as usize >= self.n {
                return Err(VerifyFailure::CycleInvalid {
                    round,
                    detail: format!("vertex {v} out of range"),
                });
            }
            if seen[v as usize] {
                return Err(VerifyFailure::CycleInvalid {
                    round,
                    detail: format!("duplicate vertex {v}"),
                });
            }
            seen[v as usize] = true;
            if !opened.contains_key(&v) {
                return Err(VerifyFailure::CycleInvalid {
                    round,
                    detail: format!("vertex {v} not opened"),
                });
            }
        }

        for k in 0..cycle.len() {
            let u = cycle[k];
            let w = cycle[(k + 1) % cycle.len()];
            if !bit(&opened[&u], w as usize) {
                return Err(VerifyFailure::CycleInvalid {
                    round,
                    detail: format!("edge ({u}, {w}) absent from opened row"),
                });
            }
        }
        Ok(())
    }

    fn check_full_opening(
        &self,
        round: u32,
        opened: &BTreeMap<u32, Vec<u8>>,
    ) -> Result<(), VerifyFailure> {
        if opened.len() != self.n {
            return Err(VerifyFailure::Protocol {
                round,
                detail: format!("opened {} of {} rows", opened.len(), self.n),
            });
        }
        if let Some(g) = self.expected_graph {
            for (&i, row) in opened {
                if row.as_slice() != g.row(i as usize) {
                    // Committed matrix diverges from the enrollment artifact.
                    return Err(VerifyFailure::CommitMismatch { round, index: i });
                }
            }
        }
        Ok(())
    }
}

#[inline]
fn bit(row: &[u8], j: usize) -> bool {
    row[j >> 3] & (1 << (7 - (j & 7))) != 0
}

// ============================================================================
// Tests
// ============================================================================
