//! Enrollment artifacts
//!
//! Enrollment turns `(seed_client, seed_pub, n, d_avg)` into the two public
//! artifacts the verifier keeps: the graph file and a JSON manifest naming
//! the parameters and the commitment scheme. Both are written atomically so
//! a concurrent reader never sees a torn file.

#![forbid(unsafe_code)]

use std::fs;
use std::io::Write;
use std::path::Path;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::commit;
use crate::graph::{build_graph, GraphError};
use crate::kdf;
use crate::perm::{PermError, Permutation};
use crate::seed::SecretSeed;

/// Protocol identifier recorded in every manifest.
pub const PROTOCOL_ID: &str = "hamiltonian-zkp-v1";
/// Commitment scheme identifier recorded in every manifest.
pub const COMMIT_SCHEME: &str = "sha256(row||nonce||ctx)";

/// Errors from producing or loading enrollment artifacts.
#[derive(Debug, thiserror::Error)]
pub enum EnrollError {
    /// σ derivation failed.
    #[error(transparent)]
    Perm(#[from] PermError),
    /// Graph construction or persistence failed.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Underlying file-system failure.
    #[error("enrollment i/o: {0}")]
    Io(#[from] std::io::Error),
    /// Artifact bytes do not parse.
    #[error("malformed enrollment artifact: {0}")]
    Decode(String),
}

/// The enrollment manifest, published next to the graph file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Vertex count.
    pub n: usize,
    /// Target average degree the builder aimed for.
    pub d_avg: f64,
    /// Public seed, hex-encoded.
    pub seed_pub: String,
    /// Commitment scheme identifier.
    pub commit_scheme: String,
    /// Number of enrollment commitments.
    pub commit_count: usize,
    /// Enrollment-time row commitments, hex-encoded.
    pub commits_all: Vec<String>,
    /// Protocol identifier.
    pub protocol: String,
}

impl Manifest {
    /// Decode the manifest's public seed.
    pub fn seed_pub_bytes(&self) -> Result<[u8; 32], EnrollError> {
        let bytes = hex::decode(&self.seed_pub)
            .map_err(|_| EnrollError::Decode("seed_pub is not hex".into()))?;
        bytes
            .try_into()
            .map_err(|_| EnrollError::Decode("seed_pub is not 32 bytes".into()))
    }
}

/// Read the public seed at `path` (hex text).
pub fn read_seed_pub(path: &Path) -> Result<[u8; 32], EnrollError> {
    let text = fs::read_to_string(path)?;
    let bytes = hex::decode(text.trim())
        .map_err(|_| EnrollError::Decode(format!("{}: not hex", path.display())))?;
    bytes
        .try_into()
        .map_err(|_| EnrollError::Decode(format!("{}: not 32 bytes", path.display())))
}

/// Read the public seed at `path`, generating and persisting a fresh one
/// when the file does not exist yet.
pub fn ensure_seed_pub(path: &Path) -> Result<[u8; 32], EnrollError> {
    if path.is_file() {
        return read_seed_pub(path);
    }
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    write_atomic(path, hex::encode(seed).as_bytes())?;
    tracing::info!(path = %path.display(), "generated public seed");
    Ok(seed)
}

/// Derive σ, build G, commit its rows under a fresh enrollment session seed,
/// and persist the graph file and manifest.
pub fn enroll(
    seed_client: &SecretSeed,
    seed_pub: &[u8; 32],
    n: usize,
    d_avg: f64,
    graph_path: &Path,
    manifest_path: &Path,
) -> Result<Manifest, EnrollError> {
    let sigma = Permutation::derive(n, seed_client.as_bytes(), seed_pub)?;
    let graph = build_graph(n, seed_pub, &sigma, d_avg)?;

    // Enrollment commits use a one-off session seed: the manifest pins the
    // commitment *scheme*, the per-session vectors are rebuilt at prove time.
    let mut tag = [0u8; 8];
    OsRng.fill_bytes(&mut tag);
    let mut h = Sha256::new();
    h.update(b"enroll-session-");
    h.update(tag);
    let enroll_seed: [u8; 32] = h.finalize().into();
    let (commits, _nonces) = commit::commit_rows(&graph, &enroll_seed, kdf::CTX_ROW_COMMIT);

    graph.save(graph_path)?;
    let manifest = Manifest {
        n,
        d_avg,
        seed_pub: hex::encode(seed_pub),
        commit_scheme: COMMIT_SCHEME.to_owned(),
        commit_count: commits.len(),
        commits_all: commits.iter().map(hex::encode).collect(),
        protocol: PROTOCOL_ID.to_owned(),
    };
    let json = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| EnrollError::Decode(e.to_string()))?;
    write_atomic(manifest_path, &json)?;
    tracing::info!(
        n,
        d_avg,
        edges = graph.edge_count(),
        graph = %graph_path.display(),
        manifest = %manifest_path.display(),
        "enrollment complete"
    );
    Ok(manifest)
}

/// Load and sanity-check a manifest.
pub fn load_manifest(path: &Path) -> Result<Manifest, EnrollError> {
    let bytes = fs::read(path)?;
    let manifest: Manifest = serde_json::from_slice(&bytes)
        .map_err(|e| EnrollError::Decode(format!("{}: {e}", path.display())))?;
    if manifest.protocol != PROTOCOL_ID {
        return Err(EnrollError::Decode(format!(
            "unsupported protocol `{}`",
            manifest.protocol
        )));
    }
    if manifest.commit_count != manifest.commits_all.len() {
        return Err(EnrollError::Decode(format!(
            "commit_count {} disagrees with {} recorded commitments",
            manifest.commit_count,
            manifest.commits_all.len()
        )));
    }
    Ok(manifest)
}

/// Write-temp + fsync + rename.
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), EnrollError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| EnrollError::Io(e.error))?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
