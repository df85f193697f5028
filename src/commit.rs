//! Row-commitment engine
//!
//! Each adjacency row is bound under a per-session 128-bit nonce:
//! `commit[i] = SHA-256(row_i || nonce_i || context)`. The nonce table is
//! derived deterministically from the session seed so the prover can
//! recompute it, but it stays prover-local until an opening reveals selected
//! entries. Binding reduces to SHA-256 collision resistance; hiding rests on
//! the 128-bit nonce staying secret until opening.

#![forbid(unsafe_code)]

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{drbg::HmacDrbg, graph::BitMatrix, kdf};

/// Nonce length in bytes (128 bits).
pub const NONCE_LEN: usize = 16;

/// A 32-byte row commitment.
pub type RowCommitment = [u8; 32];

/// A 16-byte row nonce.
pub type RowNonce = [u8; NONCE_LEN];

/// Prover-local nonce table, wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct NonceTable {
    nonces: Vec<RowNonce>,
}

impl NonceTable {
    /// Nonce for row `i`.
    #[inline]
    pub fn get(&self, i: usize) -> &RowNonce {
        &self.nonces[i]
    }

    /// Number of rows covered.
    #[inline]
    pub fn len(&self) -> usize {
        self.nonces.len()
    }

    /// True when the table is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nonces.is_empty()
    }
}

impl std::fmt::Debug for NonceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NonceTable(rows={}, <redacted>)", self.nonces.len())
    }
}

/// Recompute a single commitment from its opened parts.
pub fn commit_row(row: &[u8], nonce: &[u8], context: &str) -> RowCommitment {
    let mut h = Sha256::new();
    h.update(row);
    h.update(nonce);
    h.update(context.as_bytes());
    h.finalize().into()
}

/// Commit every row of `graph` under nonces derived from `seed_session`.
///
/// The nonce DRBG is keyed by HKDF(seed_session, salt=0³², info="row-nonces");
/// each nonce is four consecutive big-endian `u32` draws. Rerunning with the
/// same session seed reproduces both vectors exactly.
pub fn commit_rows(
    graph: &BitMatrix,
    seed_session: &[u8; 32],
    context: &str,
) -> (Vec<RowCommitment>, NonceTable) {
    let mut d = HmacDrbg::new(kdf::nonce_key(seed_session));
    let n = graph.n();
    let mut commits = Vec::with_capacity(n);
    let mut nonces = Vec::with_capacity(n);
    for i in 0..n {
        let mut nonce = [0u8; NONCE_LEN];
        for word in 0..NONCE_LEN / 4 {
            nonce[word * 4..word * 4 + 4].copy_from_slice(&d.next_u32().to_be_bytes());
        }
        commits.push(commit_row(graph.row(i), &nonce, context));
        nonces.push(nonce);
    }
    (commits, NonceTable { nonces })
}

// ============================================================================
// Tests
// ============================================================================
