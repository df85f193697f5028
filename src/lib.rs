//! Crate root: public surface and protocol-wide invariants
//!
//! This crate implements an interactive zero-knowledge proof of knowledge of
//! a Hamiltonian cycle, used as an authentication primitive. A client proves
//! it knows the cyclic permutation σ planted in a public graph G without
//! revealing σ, by iterating a commit/challenge/open round T times; a cheater
//! survives with probability 2⁻ᵀ.
//!
//! ## Invariants
//!
//! - **Determinism where published.** σ, G, and the per-session nonce table
//!   are pure functions of their seeds. Enrollment artifacts rebuild
//!   byte-identically from `(seed_client, seed_pub, n, d_avg)` on any
//!   implementation of the derivation schedule in [`kdf`].
//! - **CSPRNG where secret.** Seeds, salts, GCM nonces, and verifier
//!   challenge bits come from the OS CSPRNG. The deterministic DRBG never
//!   produces secrets.
//! - **Secrets are scoped.** `seed_client`, σ, and the nonce table live in
//!   memory owned by one session and are overwritten on drop. The sealed
//!   blob on disk is the only persistent copy of the seed.
//! - **Strict rejection.** The verifier turns the first inconsistency into a
//!   terminal `RESULT{ok=false}` carrying only the error kind, the offending
//!   index, and the round number.
//!
//! We forbid `unsafe` throughout the crate; a violated invariant is a precise
//! error, never UB.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Deterministic HMAC-counter generator (reproducible streams only).
pub mod drbg;
/// HKDF derivations and the protocol's domain-separation contexts.
pub mod kdf;
/// Secret permutation σ and its Fisher–Yates derivation.
pub mod perm;
/// Bit-packed adjacency matrix, deterministic builder, graph file format.
pub mod graph;
/// Per-row nonce derivation and SHA-256 row commitments.
pub mod commit;
/// Seed store: generation and scrypt+AES-GCM at-rest encryption.
pub mod seed;
/// The four wire messages and their JSON encodings.
pub mod message;
/// Transport adapter: atomic-publish mailbox and in-memory duplex.
pub mod transport;
/// Prover/verifier engines for the T-round session.
pub mod protocol;
/// Enrollment artifacts: graph file, manifest, public seed.
pub mod enroll;
/// Forgery harness exercising the rejection paths.
pub mod attack;

// ============================================================================
// Canonical re-exports
// ============================================================================

pub use crate::commit::{commit_row, commit_rows, NonceTable};
pub use crate::drbg::HmacDrbg;
pub use crate::enroll::{enroll, load_manifest, Manifest};
pub use crate::graph::{build_graph, BitMatrix};
pub use crate::message::{Message, MessageKind, SessionResult};
pub use crate::perm::Permutation;
pub use crate::protocol::{
    ChallengeSource, Deadlines, OsChallenges, Prover, ScriptedChallenges, SessionConfig,
    Verifier,
};
pub use crate::seed::{SecretSeed, SeedStore};
pub use crate::transport::{pair, MailboxTransport, PairTransport, Transport};
