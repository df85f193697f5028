//! Seed store: generation and at-rest encryption of the client seed
//!
//! The 256-bit client seed exists in exactly two forms: sealed on disk under
//! a passphrase-derived key, and briefly in RAM between `decrypt` and drop.
//! Sealing is scrypt (N=2¹⁷, r=8, p=1 by default) into AES-256-GCM; the
//! on-disk layout is three sibling artifacts so the blob stays inspectable:
//!
//! - `<base>.enc`: 12-byte GCM nonce, then ciphertext, then 16-byte tag
//! - `<base>.salt`: 16-byte scrypt salt
//! - `<base>.meta.json`: scheme descriptor and sizes
//!
//! All three are written owner-read/write only. A wrong passphrase surfaces
//! as `AuthFail` (the GCM tag check), indistinguishable from a corrupted
//! blob by design of the AEAD.

#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Client seed length in bytes.
pub const SEED_LEN: usize = 32;
/// scrypt salt length in bytes.
pub const SALT_LEN: usize = 16;
/// AES-GCM nonce length in bytes.
pub const GCM_NONCE_LEN: usize = 12;
/// AES-GCM tag length in bytes.
pub const GCM_TAG_LEN: usize = 16;

/// Errors from the seed store.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    /// GCM tag rejection: wrong passphrase or corrupted blob.
    #[error("seed authentication failed (wrong passphrase or corrupted blob)")]
    AuthFail,
    /// Underlying file-system failure.
    #[error("seed store i/o: {0}")]
    Io(#[from] std::io::Error),
    /// Stored artifacts are structurally wrong.
    #[error("malformed seed artifact: {0}")]
    Decode(String),
    /// scrypt parameters outside the crate's accepted envelope.
    #[error("invalid scrypt parameters (log_n={log_n}, r={r}, p={p})")]
    BadKdfParams {
        /// log₂ of the scrypt work factor.
        log_n: u8,
        /// scrypt block size parameter.
        r: u32,
        /// scrypt parallelism parameter.
        p: u32,
    },
}

/// The decrypted client seed. Lives in RAM only and is wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretSeed([u8; SEED_LEN]);

impl std::fmt::Debug for SecretSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretSeed(<redacted>)")
    }
}

impl SecretSeed {
    /// Wrap existing seed bytes.
    pub fn from_bytes(bytes: [u8; SEED_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw seed bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; SEED_LEN] {
        &self.0
    }

    /// Fresh seed from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SEED_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// scrypt cost parameters. N=2¹⁷ is interactive-grade; raise `log_n` for
/// higher-threat deployments.
#[derive(Clone, Copy, Debug)]
pub struct ScryptParams {
    /// log₂ of the work factor N.
    pub log_n: u8,
    /// Block size.
    pub r: u32,
    /// Parallelism.
    pub p: u32,
}

impl Default for ScryptParams {
    fn default() -> Self {
        Self { log_n: 17, r: 8, p: 1 }
    }
}

impl ScryptParams {
    fn to_crate(self) -> Result<scrypt::Params, SeedError> {
        scrypt::Params::new(self.log_n, self.r, self.p, SEED_LEN).map_err(|_| {
            SeedError::BadKdfParams { log_n: self.log_n, r: self.r, p: self.p }
        })
    }
}

/// Metadata descriptor persisted next to the ciphertext.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedMeta {
    /// Sealing scheme identifier.
    pub scheme: String,
    /// scrypt salt size in bytes.
    pub salt_size: usize,
    /// GCM nonce size in bytes.
    pub nonce_size: usize,
    /// Plaintext seed size in bytes.
    pub seed_size: usize,
}

impl SeedMeta {
    fn current() -> Self {
        Self {
            scheme: "scrypt+AESGCM".into(),
            salt_size: SALT_LEN,
            nonce_size: GCM_NONCE_LEN,
            seed_size: SEED_LEN,
        }
    }
}

/// Handle on the three on-disk artifacts under a common base path.
#[derive(Clone, Debug)]
pub struct SeedStore {
    base: PathBuf,
    params: ScryptParams,
}

impl SeedStore {
    /// Store rooted at `base` (no suffix) with default scrypt cost.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into(), params: ScryptParams::default() }
    }

    /// Override the scrypt cost (affects `encrypt` only; `decrypt` always
    /// re-derives with the same parameters the blob was sealed under, which
    /// this store keeps fixed at the configured values).
    pub fn with_params(mut self, params: ScryptParams) -> Self {
        self.params = params;
        self
    }

    /// Path of the ciphertext artifact.
    pub fn enc_path(&self) -> PathBuf {
        with_suffix(&self.base, ".enc")
    }

    /// Path of the salt artifact.
    pub fn salt_path(&self) -> PathBuf {
        with_suffix(&self.base, ".salt")
    }

    /// Path of the metadata descriptor.
    pub fn meta_path(&self) -> PathBuf {
        with_suffix(&self.base, ".meta.json")
    }

    /// Path of the transient raw-seed staging file.
    pub fn raw_path(&self) -> PathBuf {
        with_suffix(&self.base, ".raw")
    }

    /// True when a sealed seed is present.
    pub fn exists(&self) -> bool {
        self.enc_path().is_file() && self.salt_path().is_file()
    }

    fn derive_key(&self, passphrase: &str, salt: &[u8]) -> Result<[u8; 32], SeedError> {
        let mut key = [0u8; 32];
        scrypt::scrypt(passphrase.as_bytes(), salt, &self.params.to_crate()?, &mut key)
            .map_err(|_| SeedError::Decode("scrypt output length".into()))?;
        Ok(key)
    }

    /// Seal `seed` under `passphrase` and persist the three artifacts.
    pub fn encrypt(&self, seed: &SecretSeed, passphrase: &str) -> Result<(), SeedError> {
        if let Some(dir) = self.base.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut key = self.derive_key(passphrase, &salt)?;

        let mut nonce = [0u8; GCM_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), seed.as_bytes().as_slice())
            .map_err(|_| SeedError::AuthFail)?;
        key.zeroize();

        let mut blob = Vec::with_capacity(GCM_NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        write_private(&self.enc_path(), &blob)?;
        write_private(&self.salt_path(), &salt)?;
        let meta = serde_json::to_vec(&SeedMeta::current())
            .map_err(|e| SeedError::Decode(e.to_string()))?;
        write_private(&self.meta_path(), &meta)?;
        tracing::info!(base = %self.base.display(), "sealed client seed");
        Ok(())
    }

    /// Unseal the stored seed with `passphrase`.
    pub fn decrypt(&self, passphrase: &str) -> Result<SecretSeed, SeedError> {
        let salt = fs::read(self.salt_path())?;
        if salt.len() != SALT_LEN {
            return Err(SeedError::Decode(format!(
                "salt is {} bytes, expected {SALT_LEN}",
                salt.len()
            )));
        }
        let blob = fs::read(self.enc_path())?;
        if blob.len() != GCM_NONCE_LEN + SEED_LEN + GCM_TAG_LEN {
            return Err(SeedError::Decode(format!(
                "sealed blob is {} bytes, expected {}",
                blob.len(),
                GCM_NONCE_LEN + SEED_LEN + GCM_TAG_LEN
            )));
        }

        let mut key = self.derive_key(passphrase, &salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let plain = cipher
            .decrypt(Nonce::from_slice(&blob[..GCM_NONCE_LEN]), &blob[GCM_NONCE_LEN..])
            .map_err(|_| SeedError::AuthFail);
        key.zeroize();
        let mut plain = plain?;

        let mut bytes = [0u8; SEED_LEN];
        bytes.copy_from_slice(&plain);
        plain.zeroize();
        Ok(SecretSeed::from_bytes(bytes))
    }

    /// Stage a freshly generated raw seed at `<base>.raw` (owner-only) so a
    /// later `encrypt` run can seal and shred it.
    pub fn write_raw(&self, seed: &SecretSeed) -> Result<(), SeedError> {
        if let Some(dir) = self.base.parent() {
            fs::create_dir_all(dir)?;
        }
        write_private(&self.raw_path(), seed.as_bytes())?;
        Ok(())
    }

    /// Read a previously staged raw seed, if any.
    pub fn read_raw(&self) -> Result<Option<SecretSeed>, SeedError> {
        let path = self.raw_path();
        if !path.is_file() {
            return Ok(None);
        }
        let mut data = fs::read(&path)?;
        if data.len() != SEED_LEN {
            return Err(SeedError::Decode(format!(
                "raw seed is {} bytes, expected {SEED_LEN}",
                data.len()
            )));
        }
        let mut bytes = [0u8; SEED_LEN];
        bytes.copy_from_slice(&data);
        data.zeroize();
        Ok(Some(SecretSeed::from_bytes(bytes)))
    }

    /// Overwrite and remove the raw staging file.
    pub fn shred_raw(&self) -> Result<(), SeedError> {
        let path = self.raw_path();
        if path.is_file() {
            fs::write(&path, [0u8; SEED_LEN])?;
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Write `data` to `path` with owner-only permissions.
fn write_private(path: &Path, data: &[u8]) -> Result<(), SeedError> {
    fs::write(path, data)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // log_n=12 keeps the KDF affordable in test runs; the sealing layout is
    // identical to the default cost.
    fn store(dir: &Path) -> SeedStore {
        SeedStore::new(dir.join("seed")).with_params(ScryptParams { log_n: 12, r: 8, p: 1 })
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let seed = SecretSeed::generate();
        s.encrypt(&seed, "π").unwrap();
        let back = s.decrypt("π").unwrap();
        assert_eq!(seed, back);
    }

    #[test]
    fn wrong_passphrase_is_auth_fail() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.encrypt(&SecretSeed::generate(), "π").unwrap();
        assert!(matches!(s.decrypt("π "), Err(SeedError::AuthFail)));
    }

    #[test]
    fn tampered_blob_is_auth_fail() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.encrypt(&SecretSeed::generate(), "pw").unwrap();
        let mut blob = fs::read(s.enc_path()).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        fs::write(s.enc_path(), blob).unwrap();
        assert!(matches!(s.decrypt("pw"), Err(SeedError::AuthFail)));
    }

    #[test]
    fn artifact_layout_matches_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.encrypt(&SecretSeed::generate(), "pw").unwrap();

        assert_eq!(fs::read(s.salt_path()).unwrap().len(), SALT_LEN);
        assert_eq!(
            fs::read(s.enc_path()).unwrap().len(),
            GCM_NONCE_LEN + SEED_LEN + GCM_TAG_LEN
        );
        let meta: SeedMeta =
            serde_json::from_slice(&fs::read(s.meta_path()).unwrap()).unwrap();
        assert_eq!(meta, SeedMeta::current());
        assert_eq!(meta.scheme, "scrypt+AESGCM");
    }

    #[cfg(unix)]
    #[test]
    fn artifacts_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.encrypt(&SecretSeed::generate(), "pw").unwrap();
        for path in [s.enc_path(), s.salt_path(), s.meta_path()] {
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "{}", path.display());
        }
    }

    #[test]
    fn truncated_blob_is_decode_not_auth() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.encrypt(&SecretSeed::generate(), "pw").unwrap();
        let blob = fs::read(s.enc_path()).unwrap();
        fs::write(s.enc_path(), &blob[..GCM_NONCE_LEN]).unwrap();
        assert!(matches!(s.decrypt("pw"), Err(SeedError::Decode(_))));
    }

    #[test]
    fn raw_staging_round_trip_and_shred() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        assert!(s.read_raw().unwrap().is_none());

        let seed = SecretSeed::generate();
        s.write_raw(&seed).unwrap();
        assert_eq!(s.read_raw().unwrap().unwrap(), seed);

        s.shred_raw().unwrap();
        assert!(!s.raw_path().exists());
        assert!(s.read_raw().unwrap().is_none());
    }
}
