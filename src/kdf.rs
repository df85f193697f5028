//! Key derivation and domain-separation contexts
//!
//! Every deterministic stream in the protocol is keyed through HKDF-SHA-256
//! (extract-then-expand) with one of the context strings below. The strings
//! are part of the wire-compatible derivation schedule: renaming one changes
//! every derived permutation, graph, and commitment.

#![forbid(unsafe_code)]

use hkdf::Hkdf;
use sha2::{Digest, Sha256};

/// Context for deriving the secret permutation σ.
pub const CTX_PERMUTATION: &str = "ham-perm";
/// Context for deriving the deterministic noise-edge stream.
pub const CTX_NOISE_EDGES: &str = "noise-edges";
/// Context for deriving the per-row commitment nonces.
pub const CTX_ROW_NONCES: &str = "row-nonces";
/// Context bound into each row commitment.
pub const CTX_ROW_COMMIT: &str = "row-commit";

/// HKDF-SHA-256 extract+expand to a 32-byte key.
fn expand32(salt: &[u8], ikm: &[u8], info: &str) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; 32];
    hk.expand(info.as_bytes(), &mut okm)
        .expect("32 bytes is a valid HKDF-SHA-256 output length");
    okm
}

/// DRBG key for σ derivation: HKDF-Extract(salt=seed_pub, ikm=seed_client)
/// then Expand(info=context).
pub fn permutation_key(seed_client: &[u8; 32], seed_pub: &[u8; 32], context: &str) -> [u8; 32] {
    expand32(seed_pub, seed_client, context)
}

/// DRBG key for the noise-edge stream: HKDF(seed_pub, salt=0³²,
/// info="noise-edges").
pub fn noise_key(seed_pub: &[u8; 32]) -> [u8; 32] {
    expand32(&[0u8; 32], seed_pub, CTX_NOISE_EDGES)
}

/// DRBG key for the row-nonce table: HKDF(seed_session, salt=0³²,
/// info="row-nonces").
pub fn nonce_key(seed_session: &[u8; 32]) -> [u8; 32] {
    expand32(&[0u8; 32], seed_session, CTX_ROW_NONCES)
}

/// Per-session seed: SHA-256 over the client-chosen session id bytes.
pub fn session_seed(session_id: &str) -> [u8; 32] {
    let digest = Sha256::digest(session_id.as_bytes());
    digest.into()
}
