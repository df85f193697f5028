//! Secret permutation σ
//!
//! σ is the prover's long-term secret: a cyclic vertex ordering whose
//! consecutive pairs form the planted Hamiltonian cycle. It is re-derived on
//! demand from `(seed_client, seed_pub)`, never persisted, and wiped from
//! memory on drop.

#![forbid(unsafe_code)]

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{drbg::HmacDrbg, kdf};

/// Errors from permutation derivation.
#[derive(Debug, thiserror::Error)]
pub enum PermError {
    /// The requested length cannot index a graph.
    #[error("invalid permutation size: {0}")]
    InvalidSize(usize),
}

/// A bijection on `{0, …, n−1}`, derived deterministically and treated as
/// secret. `Debug` deliberately hides the contents.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Permutation {
    indices: Vec<u32>,
}

impl std::fmt::Debug for Permutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Permutation(n={}, <redacted>)", self.indices.len())
    }
}

impl Permutation {
    /// Derive σ of length `n` with the protocol's default context.
    ///
    /// The DRBG key is HKDF-Extract(salt=seed_pub, ikm=seed_client) expanded
    /// under `"ham-perm"`; the shuffle is Fisher–Yates from the top index
    /// down. Identical inputs yield identical σ across implementations.
    pub fn derive(
        n: usize,
        seed_client: &[u8; 32],
        seed_pub: &[u8; 32],
    ) -> Result<Self, PermError> {
        Self::derive_with_context(n, seed_client, seed_pub, kdf::CTX_PERMUTATION)
    }

    /// Derive σ under an explicit context string.
    pub fn derive_with_context(
        n: usize,
        seed_client: &[u8; 32],
        seed_pub: &[u8; 32],
        context: &str,
    ) -> Result<Self, PermError> {
        if n == 0 || n > u32::MAX as usize {
            return Err(PermError::InvalidSize(n));
        }
        let key = kdf::permutation_key(seed_client, seed_pub, context);
        let mut d = HmacDrbg::new(key);

        let mut indices: Vec<u32> = (0..n as u32).collect();
        for i in (1..n).rev() {
            let j = d
                .uniform(0, i as u32)
                .expect("range 0..=i is non-empty for i >= 1") as usize;
            indices.swap(i, j);
        }
        Ok(Self { indices })
    }

    /// Number of vertices covered by σ.
    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// True when σ covers no vertices (never produced by `derive`).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// The vertex at cycle position `i`.
    #[inline]
    pub fn vertex(&self, i: usize) -> u32 {
        self.indices[i]
    }

    /// Cycle order as a slice of vertex ids.
    #[inline]
    pub fn as_slice(&self) -> &[u32] {
        &self.indices
    }

    /// Consecutive pairs `(σ[i], σ[(i+1) mod n])`, including the wrap-around
    /// edge closing the cycle.
    pub fn cycle_edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let n = self.indices.len();
        (0..n).map(move |i| (self.indices[i], self.indices[(i + 1) % n]))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sha2::{Digest, Sha256};

    fn seed(label: &str) -> [u8; 32] {
        Sha256::digest(label.as_bytes()).into()
    }

    fn is_bijection(p: &Permutation) -> bool {
        let mut seen = vec![false; p.len()];
        for &v in p.as_slice() {
            let v = v as usize;
            if v >= p.len() || seen[v] {
                return false;
            }
            seen[v] = true;
        }
        true
    }

    #[test]
    fn rejects_zero_length() {
        assert!(matches!(
            Permutation::derive(0, &seed("c"), &seed("p")),
            Err(PermError::InvalidSize(0))
        ));
    }

    #[test]
    fn singleton_is_identity() {
        let p = Permutation::derive(1, &seed("c"), &seed("p")).unwrap();
        assert_eq!(p.as_slice(), &[0]);
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = Permutation::derive(257, &seed("c"), &seed("p")).unwrap();
        let b = Permutation::derive(257, &seed("c"), &seed("p")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn seeds_and_context_separate() {
        let base = Permutation::derive(64, &seed("c"), &seed("p")).unwrap();
        assert_ne!(
            base,
            Permutation::derive(64, &seed("c2"), &seed("p")).unwrap()
        );
        assert_ne!(
            base,
            Permutation::derive(64, &seed("c"), &seed("p2")).unwrap()
        );
        assert_ne!(
            base,
            Permutation::derive_with_context(64, &seed("c"), &seed("p"), "other").unwrap()
        );
    }

    #[test]
    fn cycle_edges_close_the_cycle() {
        let p = Permutation::derive(5, &seed("c"), &seed("p")).unwrap();
        let edges: Vec<_> = p.cycle_edges().collect();
        assert_eq!(edges.len(), 5);
        assert_eq!(edges[4].1, edges[0].0);
        // Every vertex appears exactly once as an edge source.
        let mut sources: Vec<u32> = edges.iter().map(|e| e.0).collect();
        sources.sort_unstable();
        assert_eq!(sources, vec![0, 1, 2, 3, 4]);
    }

    proptest! {
        #[test]
        fn derived_permutation_is_a_bijection(n in 1usize..512, c in any::<[u8; 32]>(), p in any::<[u8; 32]>()) {
            let perm = Permutation::derive(n, &c, &p).unwrap();
            prop_assert_eq!(perm.len(), n);
            prop_assert!(is_bijection(&perm));
        }

        #[test]
        fn rederivation_is_stable(n in 1usize..256, c in any::<[u8; 32]>(), p in any::<[u8; 32]>()) {
            let a = Permutation::derive(n, &c, &p).unwrap();
            let b = Permutation::derive(n, &c, &p).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
