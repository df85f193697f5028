//! Bit-packed adjacency matrix and the deterministic graph builder
//!
//! The public graph G is a dense n×n symmetric 0/1 matrix with a zero
//! diagonal, stored row-major as bit-packed rows (MSB-first, ⌈n/8⌉ bytes per
//! row). There is no pointer graph anywhere; neighbor traversal is bit
//! iteration over a row.
//!
//! `build_graph` plants σ as a Hamiltonian cycle and then adds reproducible
//! noise edges toward a target average degree, keyed from the public seed
//! only. The tuple `(n, seed_pub, σ, d_avg)` uniquely determines G down to
//! the byte level, which is what makes enrollment artifacts reproducible.
//!
//! ### Persisted format
//! `u32` big-endian vertex count, then n rows of ⌈n/8⌉ bytes each. Bit `j`
//! of row `i` lives at byte `j >> 3` under mask `1 << (7 − (j & 7))`.

#![forbid(unsafe_code)]

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use crate::{drbg::HmacDrbg, kdf, perm::Permutation};

/// Cap on noise-edge placement attempts, as a multiple of n. Keeps the
/// builder terminating on saturated graphs; stopping short of the target is
/// deterministic and acceptable.
const NOISE_TRIALS_PER_VERTEX: usize = 50;

/// Errors from matrix construction, encoding, and I/O.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Vertex count unusable for a planted-cycle graph.
    #[error("invalid graph size: {0}")]
    InvalidSize(String),
    /// Underlying file-system failure.
    #[error("graph i/o: {0}")]
    Io(#[from] std::io::Error),
    /// Persisted bytes do not describe a well-formed matrix.
    #[error("malformed graph file: {0}")]
    Decode(String),
}

/// Dense, symmetric, bit-packed adjacency matrix.
#[derive(Clone, PartialEq, Eq)]
pub struct BitMatrix {
    n: usize,
    row_bytes: usize,
    bits: Vec<u8>,
}

impl std::fmt::Debug for BitMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitMatrix")
            .field("n", &self.n)
            .field("edges", &self.edge_count())
            .finish()
    }
}

impl BitMatrix {
    /// All-zero matrix on `n` vertices.
    pub fn new(n: usize) -> Result<Self, GraphError> {
        if n == 0 || n > u32::MAX as usize {
            return Err(GraphError::InvalidSize(format!(
                "vertex count {n} out of range"
            )));
        }
        let row_bytes = n.div_ceil(8);
        Ok(Self {
            n,
            row_bytes,
            bits: vec![0u8; n * row_bytes],
        })
    }

    /// Vertex count.
    #[inline]
    pub fn n(&self) -> usize {
        self.n
    }

    /// Bytes per packed row: ⌈n/8⌉.
    #[inline]
    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    /// Packed row `i`.
    #[inline]
    pub fn row(&self, i: usize) -> &[u8] {
        &self.bits[i * self.row_bytes..(i + 1) * self.row_bytes]
    }

    /// Adjacency bit (i, j).
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> bool {
        self.bits[i * self.row_bytes + (j >> 3)] & (1 << (7 - (j & 7))) != 0
    }

    fn set_bit(&mut self, i: usize, j: usize) {
        self.bits[i * self.row_bytes + (j >> 3)] |= 1 << (7 - (j & 7));
    }

    /// Add the undirected edge {i, j}. The diagonal stays zero.
    pub fn add_edge(&mut self, i: usize, j: usize) {
        debug_assert!(i < self.n && j < self.n);
        debug_assert_ne!(i, j, "self-loops are not representable");
        self.set_bit(i, j);
        self.set_bit(j, i);
    }

    /// Neighbors of `i` in increasing vertex order, by bit iteration.
    pub fn neighbors(&self, i: usize) -> Neighbors<'_> {
        Neighbors {
            row: self.row(i),
            n: self.n,
            byte: 0,
            pending: 0,
            pending_base: 0,
        }
    }

    /// Number of undirected edges.
    pub fn edge_count(&self) -> usize {
        let set: usize = self.bits.iter().map(|b| b.count_ones() as usize).sum();
        set / 2
    }

    /// Average degree 2·|E| / n.
    pub fn avg_degree(&self) -> f64 {
        (2 * self.edge_count()) as f64 / self.n as f64
    }

    // ------------------------------------------------------------------
    // Persisted format
    // ------------------------------------------------------------------

    /// Serialize in the enrollment file format.
    pub fn to_writer<W: Write>(&self, w: &mut W) -> Result<(), GraphError> {
        w.write_all(&(self.n as u32).to_be_bytes())?;
        w.write_all(&self.bits)?;
        Ok(())
    }

    /// Parse the enrollment file format, rejecting truncated or oversized
    /// payloads and any asymmetry or diagonal bit.
    pub fn from_reader<R: Read>(r: &mut R) -> Result<Self, GraphError> {
        let mut hdr = [0u8; 4];
        r.read_exact(&mut hdr)
            .map_err(|_| GraphError::Decode("missing vertex-count header".into()))?;
        let n = u32::from_be_bytes(hdr) as usize;
        let mut m = Self::new(n)?;
        r.read_exact(&mut m.bits)
            .map_err(|_| GraphError::Decode(format!("truncated matrix for n={n}")))?;
        let mut trailing = [0u8; 1];
        if r.read(&mut trailing)? != 0 {
            return Err(GraphError::Decode("trailing bytes after matrix".into()));
        }
        m.validate()?;
        Ok(m)
    }

    /// Write the graph file atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<(), GraphError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        self.to_writer(&mut tmp)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| GraphError::Io(e.error))?;
        Ok(())
    }

    /// Load and validate a graph file.
    pub fn load(path: &Path) -> Result<Self, GraphError> {
        let mut f = fs::File::open(path)?;
        Self::from_reader(&mut f)
    }

    /// Check symmetry, zero diagonal, and zero padding bits.
    pub fn validate(&self) -> Result<(), GraphError> {
        for i in 0..self.n {
            if self.get(i, i) {
                return Err(GraphError::Decode(format!("self-loop at vertex {i}")));
            }
            // Padding bits beyond column n−1 must be clear.
            for j in self.n..self.row_bytes * 8 {
                if self.row(i)[j >> 3] & (1 << (7 - (j & 7))) != 0 {
                    return Err(GraphError::Decode(format!("padding bit set in row {i}")));
                }
            }
        }
        for i in 0..self.n {
            for j in (i + 1)..self.n {
                if self.get(i, j) != self.get(j, i) {
                    return Err(GraphError::Decode(format!("asymmetry at ({i}, {j})")));
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // DOT export
    // ------------------------------------------------------------------

    /// Render as a Graphviz `graph`, optionally restricted to the induced
    /// subgraph on the first `limit` vertices (large graphs are unreadable
    /// otherwise).
    pub fn to_dot(&self, limit: Option<usize>) -> String {
        let k = limit.map_or(self.n, |l| l.min(self.n));
        let mut out = String::from("graph G {\n  node [shape=point];\n");
        for i in 0..k {
            for j in self.neighbors(i) {
                if j > i && j < k {
                    out.push_str(&format!("  v{i} -- v{j};\n"));
                }
            }
        }
        out.push_str("}\n");
        out
    }
}

/// Bit-iterating neighbor cursor over one packed row.
pub struct Neighbors<'a> {
    row: &'a [u8],
    n: usize,
    byte: usize,
    pending: u8,
    pending_base: usize,
}

impl Iterator for Neighbors<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.pending != 0 {
                let lead = self.pending.leading_zeros() as usize;
                self.pending &= !(0x80u8 >> lead);
                let j = self.pending_base + lead;
                if j < self.n {
                    return Some(j);
                }
                continue;
            }
            if self.byte >= self.row.len() {
                return None;
            }
            self.pending = self.row[self.byte];
            self.pending_base = self.byte * 8;
            self.byte += 1;
        }
    }
}

/// Deterministically construct G with σ planted as a Hamiltonian cycle.
///
/// After planting the n cycle edges, noise edges are added from a DRBG keyed
/// by HKDF(seed_pub, salt=0³², info="noise-edges") until
/// `⌊n·d_avg/2⌋ − n` extra edges exist or the trials cap is hit. Every input
/// tuple maps to exactly one output matrix.
pub fn build_graph(
    n: usize,
    seed_pub: &[u8; 32],
    sigma: &Permutation,
    d_avg: f64,
) -> Result<BitMatrix, GraphError> {
    if n < 3 {
        return Err(GraphError::InvalidSize(format!(
            "a planted cycle needs n >= 3 vertices (got {n})"
        )));
    }
    if sigma.len() != n {
        return Err(GraphError::InvalidSize(format!(
            "permutation covers {} vertices, graph wants {n}",
            sigma.len()
        )));
    }
    if !d_avg.is_finite() || d_avg < 0.0 {
        return Err(GraphError::InvalidSize(format!(
            "average degree {d_avg} is not usable"
        )));
    }

    let mut g = BitMatrix::new(n)?;
    for (u, v) in sigma.cycle_edges() {
        g.add_edge(u as usize, v as usize);
    }

    let target_edges = (n as f64 * d_avg / 2.0).floor() as u64;
    let noise_target = target_edges.saturating_sub(n as u64);

    let mut d = HmacDrbg::new(kdf::noise_key(seed_pub));
    let top = (n - 1) as u32;
    let mut added = 0u64;
    let mut trials = 0usize;
    while added < noise_target && trials < n * NOISE_TRIALS_PER_VERTEX {
        trials += 1;
        let u = d.uniform(0, top).expect("non-empty range") as usize;
        let v = d.uniform(0, top).expect("non-empty range") as usize;
        if u == v || g.get(u, v) {
            continue;
        }
        g.add_edge(u, v);
        added += 1;
    }
    tracing::debug!(n, edges = g.edge_count(), noise = added, trials, "graph built");
    Ok(g)
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

    fn sample_graph(n: usize, d_avg: f64) -> (BitMatrix, Permutation) {
        let sigma = Permutation::derive(n, &seed("c"), &seed("p")).unwrap();
        let g = build_graph(n, &seed("p"), &sigma, d_avg).unwrap();
        (g, sigma)
    }

    #[test]
    fn bit_layout_is_msb_first() {
        let mut g = BitMatrix::new(10).unwrap();
        g.add_edge(0, 1); // bit 1 of row 0 -> byte 0, mask 0b0100_0000
        g.add_edge(0, 9); // bit 9 of row 0 -> byte 1, mask 0b0100_0000
        assert_eq!(g.row(0), &[0b0100_0000, 0b0100_0000]);
        assert_eq!(g.row_bytes(), 2);
    }

    #[test]
    fn add_edge_is_symmetric() {
        let mut g = BitMatrix::new(8).unwrap();
        g.add_edge(2, 5);
        assert!(g.get(2, 5));
        assert!(g.get(5, 2));
        assert!(!g.get(2, 4));
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn neighbors_iterate_set_bits_in_order() {
        let mut g = BitMatrix::new(12).unwrap();
        g.add_edge(3, 0);
        g.add_edge(3, 7);
        g.add_edge(3, 11);
        assert_eq!(g.neighbors(3).collect::<Vec<_>>(), vec![0, 7, 11]);
        assert_eq!(g.neighbors(1).count(), 0);
    }

    #[test]
    fn builder_plants_the_full_cycle() {
        let (g, sigma) = sample_graph(16, 4.0);
        for (u, v) in sigma.cycle_edges() {
            assert!(g.get(u as usize, v as usize), "missing cycle edge ({u}, {v})");
        }
    }

    #[test]
    fn builder_is_bit_identical_across_runs() {
        let (a, _) = sample_graph(40, 5.0);
        let (b, _) = sample_graph(40, 5.0);
        assert_eq!(a, b);
    }

    #[test]
    fn builder_keys_noise_from_seed_pub() {
        let sigma = Permutation::derive(24, &seed("c"), &seed("p")).unwrap();
        let a = build_graph(24, &seed("p"), &sigma, 6.0).unwrap();
        let b = build_graph(24, &seed("q"), &sigma, 6.0).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn builder_rejects_tiny_and_mismatched_inputs() {
        let sigma = Permutation::derive(2, &seed("c"), &seed("p")).unwrap();
        assert!(matches!(
            build_graph(2, &seed("p"), &sigma, 3.0),
            Err(GraphError::InvalidSize(_))
        ));
        let sigma5 = Permutation::derive(5, &seed("c"), &seed("p")).unwrap();
        assert!(matches!(
            build_graph(6, &seed("p"), &sigma5, 3.0),
            Err(GraphError::InvalidSize(_))
        ));
    }

    #[test]
    fn saturated_target_terminates() {
        // d_avg far above what n=8 can hold; the trials cap must end the loop.
        let (g, _) = sample_graph(8, 100.0);
        assert!(g.edge_count() <= 8 * 7 / 2);
        g.validate().unwrap();
    }

    #[test]
    fn file_round_trip_preserves_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph_adjmatrix.bin");
        let (g, _) = sample_graph(19, 4.0);
        g.save(&path).unwrap();
        let loaded = BitMatrix::load(&path).unwrap();
        assert_eq!(g, loaded);
    }

    #[test]
    fn loader_rejects_truncation_and_trailing_garbage() {
        let (g, _) = sample_graph(9, 3.0);
        let mut bytes = Vec::new();
        g.to_writer(&mut bytes).unwrap();

        let mut short = bytes.clone();
        short.truncate(bytes.len() - 1);
        assert!(matches!(
            BitMatrix::from_reader(&mut short.as_slice()),
            Err(GraphError::Decode(_))
        ));

        let mut long = bytes.clone();
        long.push(0xFF);
        assert!(matches!(
            BitMatrix::from_reader(&mut long.as_slice()),
            Err(GraphError::Decode(_))
        ));
    }

    #[test]
    fn loader_rejects_asymmetry() {
        let (g, _) = sample_graph(9, 3.0);
        let mut bytes = Vec::new();
        g.to_writer(&mut bytes).unwrap();
        // Set one directed bit (0, j) without its mirror image.
        let j = (1..9).find(|&j| !g.get(0, j)).unwrap();
        bytes[4 + (j >> 3)] ^= 1 << (7 - (j & 7));
        assert!(matches!(
            BitMatrix::from_reader(&mut bytes.as_slice()),
            Err(GraphError::Decode(_))
        ));
    }

    #[test]
    fn dot_export_lists_each_edge_once() {
        let (g, _) = sample_graph(8, 3.0);
        let dot = g.to_dot(None);
        assert!(dot.starts_with("graph G {"));
        assert_eq!(dot.matches(" -- ").count(), g.edge_count());
    }

    proptest! {
        #[test]
        fn built_graphs_hold_the_invariants(n in 3usize..64, davg in 2.0f64..8.0) {
            let sigma = Permutation::derive(n, &seed("c"), &seed("p")).unwrap();
            let g = build_graph(n, &seed("p"), &sigma, davg).unwrap();
            // Symmetric, zero-diagonal, clean padding.
            g.validate().unwrap();
            // Planted cycle present.
            for (u, v) in sigma.cycle_edges() {
                prop_assert!(g.get(u as usize, v as usize));
            }
        }
    }
}
