//! Forgery harness
//!
//! A prover that does **not** know σ, used to exercise the verifier's
//! rejection paths: it replays enrollment commitments and forges openings.
//! With T rounds the odds of a forged session being accepted are 2⁻ᵀ, so
//! every drill is expected to end in rejection; an acceptance is a finding.

#![forbid(unsafe_code)]

use std::time::Duration;

use rand::rngs::OsRng;
use rand::{Rng, RngCore};

use crate::commit::NONCE_LEN;
use crate::graph::BitMatrix;
use crate::kdf;
use crate::message::{Commits, Message, MessageKind, Open, OpenedRow, SessionResult};
use crate::protocol::{Deadlines, ProverError};
use crate::transport::{Transport, TransportError};

/// How the forged opening is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForgeMode {
    /// Pick one of the other modes at random per trial.
    Random,
    /// Honest rows, random nonces.
    BadNonce,
    /// Rows with a flipped byte, random nonces.
    TamperRow,
    /// A cycle listing a duplicate vertex.
    BadCycle,
}

impl std::str::FromStr for ForgeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(ForgeMode::Random),
            "bad-nonce" => Ok(ForgeMode::BadNonce),
            "tamper-row" => Ok(ForgeMode::TamperRow),
            "bad-cycle" => Ok(ForgeMode::BadCycle),
            other => Err(format!(
                "unknown forge mode `{other}` (random|bad-nonce|tamper-row|bad-cycle)"
            )),
        }
    }
}

/// Aggregate outcome over a batch of forged sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttackStats {
    /// Sessions attempted.
    pub trials: usize,
    /// Forged sessions the verifier accepted. Should stay zero.
    pub accepted: usize,
    /// Forged sessions rejected, as expected.
    pub rejected: usize,
    /// Trials that ended without a verdict (timeout, channel breakage).
    pub no_result: usize,
}

/// The forging prover. Knows only public material: the commitment vector to
/// replay and (optionally) the published graph.
pub struct Attacker<'a> {
    commits: Vec<String>,
    graph: Option<&'a BitMatrix>,
    mode: ForgeMode,
    deadlines: Deadlines,
}

impl<'a> Attacker<'a> {
    /// Forger replaying `commits` (hex, from the enrollment manifest).
    pub fn new(commits: Vec<String>, graph: Option<&'a BitMatrix>, mode: ForgeMode) -> Self {
        Self { commits, graph, mode, deadlines: Deadlines::default() }
    }

    /// Override the receive deadlines (drills want short ones).
    pub fn with_deadlines(mut self, deadlines: Deadlines) -> Self {
        self.deadlines = deadlines;
        self
    }

    /// One forged session: replay commitments, answer the first challenge
    /// with a forgery, then wait for the verdict.
    pub fn run_trial(
        &self,
        session_id: &str,
        transport: &mut dyn Transport,
    ) -> Result<Option<SessionResult>, ProverError> {
        transport.send(&Message::Commits(Commits {
            session: session_id.to_owned(),
            commits: self.commits.clone(),
        }))?;

        let challenge = match transport.recv(MessageKind::Challenge, self.deadlines.challenge) {
            Ok(Message::Challenge(c)) => c,
            Ok(other) => {
                return Err(ProverError::Protocol {
                    round: 1,
                    detail: format!("expected CHALLENGE, got {}", other.kind()),
                })
            }
            Err(TransportError::Timeout { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let open = if challenge.b == 0 {
            // Nothing sensible to forge for a full opening without the nonce
            // table; send an empty one and let the verifier say why not.
            Open {
                session: session_id.to_owned(),
                b: 0,
                context: kdf::CTX_ROW_COMMIT.to_owned(),
                opened_rows: Vec::new(),
                cycle_indices: None,
            }
        } else {
            self.forge_cycle_open(session_id)
        };
        transport.send(&Message::Open(open))?;

        match transport.recv(MessageKind::Result, self.deadlines.result) {
            Ok(Message::Result(r)) => Ok(Some(r)),
            Ok(other) => Err(ProverError::Protocol {
                round: 1,
                detail: format!("expected RESULT, got {}", other.kind()),
            }),
            Err(TransportError::Timeout { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Run `trials` independent forged sessions, tallying verdicts.
    pub fn run_batch(
        &self,
        trials: usize,
        transport: &mut dyn Transport,
    ) -> Result<AttackStats, ProverError> {
        let mut stats = AttackStats::default();
        for trial in 0..trials {
            stats.trials += 1;
            let session = format!("forged-{trial}");
            match self.run_trial(&session, transport)? {
                Some(result) if result.ok => {
                    tracing::warn!(session = %session, "verifier ACCEPTED a forged session");
                    stats.accepted += 1;
                }
                Some(result) => {
                    tracing::debug!(session = %session, msg = %result.msg, "forgery rejected");
                    stats.rejected += 1;
                }
                None => stats.no_result += 1,
            }
        }
        Ok(stats)
    }

    fn forge_cycle_open(&self, session_id: &str) -> Open {
        let mode = match self.mode {
            ForgeMode::Random => match OsRng.gen_range(0..3) {
                0 => ForgeMode::BadNonce,
                1 => ForgeMode::TamperRow,
                _ => ForgeMode::BadCycle,
            },
            m => m,
        };

        let n = self.commits.len();
        let picks: Vec<u32> = (0..n.min(10) as u32).collect();
        let row_bytes = n.div_ceil(8);

        let mut opened_rows = Vec::with_capacity(picks.len());
        for &i in &picks {
            let mut row = match self.graph {
                Some(g) => g.row(i as usize).to_vec(),
                None => vec![0u8; row_bytes],
            };
            if mode == ForgeMode::TamperRow {
                let at = OsRng.gen_range(0..row.len());
                row[at] ^= 0xFF;
            }
            let mut nonce = [0u8; NONCE_LEN];
            OsRng.fill_bytes(&mut nonce);
            opened_rows.push(OpenedRow {
                index: i,
                row_hex: hex::encode(row),
                nonce_hex: hex::encode(nonce),
            });
        }

        let cycle_indices = if mode == ForgeMode::BadCycle {
            vec![0, 1, 2, 2, 4]
        } else {
            picks
        };

        Open {
            session: session_id.to_owned(),
            b: 1,
            context: kdf::CTX_ROW_COMMIT.to_owned(),
            opened_rows,
            cycle_indices: Some(cycle_indices),
        }
    }
}

/// Drill deadlines sized for local mailboxes and tests.
pub fn drill_deadlines() -> Deadlines {
    Deadlines {
        commits: Duration::from_secs(30),
        challenge: Duration::from_secs(30),
        open: Duration::from_secs(30),
        result: Duration::from_secs(90),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build_graph;
    use crate::perm::Permutation;
    use crate::protocol::{ScriptedChallenges, SessionConfig, Verifier};
    use crate::transport::pair;
    use sha2::{Digest, Sha256};

    fn seed(label: &str) -> [u8; 32] {
        Sha256::digest(label.as_bytes()).into()
    }

    fn drill_config() -> SessionConfig {
        SessionConfig {
            rounds: 4,
            deadlines: Deadlines {
                commits: Duration::from_secs(5),
                challenge: Duration::from_secs(5),
                open: Duration::from_secs(5),
                result: Duration::from_secs(5),
            },
            require_full_cycle: false,
        }
    }

    fn rejected_with(mode: ForgeMode, bit: u8) -> String {
        let sigma = Permutation::derive(12, &seed("c"), &seed("p")).unwrap();
        let g = build_graph(12, &seed("p"), &sigma, 4.0).unwrap();
        let enroll_seed = seed("enroll");
        let (commits, _) =
            crate::commit::commit_rows(&g, &enroll_seed, kdf::CTX_ROW_COMMIT);
        let commits_hex: Vec<String> = commits.iter().map(hex::encode).collect();

        let (mut at, mut vt) = pair();
        std::thread::scope(|s| {
            let gr = &g;
            let hex_ref = &commits_hex;
            s.spawn(move || {
                let attacker = Attacker::new(hex_ref.clone(), Some(gr), mode)
                    .with_deadlines(drill_config().deadlines);
                let res = attacker.run_trial("forged-0", &mut at).unwrap().unwrap();
                assert!(!res.ok);
            });
            let verifier = Verifier::with_graph(&g, drill_config());
            let mut ch = ScriptedChallenges::new(vec![bit]);
            let res = verifier.run(&mut vt, &mut ch).unwrap();
            assert!(!res.ok);
            res.msg
        })
    }

    #[test]
    fn bad_nonce_forgery_is_commit_mismatch() {
        let msg = rejected_with(ForgeMode::BadNonce, 1);
        assert!(msg.starts_with("CommitMismatch"), "{msg}");
    }

    #[test]
    fn tampered_row_forgery_is_commit_mismatch() {
        let msg = rejected_with(ForgeMode::TamperRow, 1);
        assert!(msg.starts_with("CommitMismatch"), "{msg}");
    }

    #[test]
    fn empty_b0_forgery_is_rejected() {
        let msg = rejected_with(ForgeMode::BadNonce, 0);
        assert!(msg.starts_with("ProtocolError"), "{msg}");
    }

    #[test]
    fn forge_mode_parses() {
        assert_eq!("bad-cycle".parse::<ForgeMode>().unwrap(), ForgeMode::BadCycle);
        assert!("nope".parse::<ForgeMode>().is_err());
    }
}
