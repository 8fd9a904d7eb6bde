//! Key derivation with a persisted random salt
//!
//! HKDF-SHA256 keyed by externally supplied input keying material. The salt
//! is generated once, written to a restricted file, and read back on every
//! later call, so derivation is stable across process restarts.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use stoker_core::{Error, Result};

/// Filename of the persisted KDF salt
pub const KDF_SALT_FILE: &str = "kdf-salt.dat";

const SALT_LEN: usize = 32;

/// Derives per-purpose keys from input keying material.
///
/// Distinct `info` labels yield independent keys from the same IKM and salt
/// (domain separation).
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    salt_dir: PathBuf,
}

impl KeyDeriver {
    pub fn new(salt_dir: impl Into<PathBuf>) -> Self {
        Self {
            salt_dir: salt_dir.into(),
        }
    }

    /// Derive `length` bytes of key material for the given `info` label.
    ///
    /// Deterministic for a fixed (ikm, persisted salt, info) triple. Salt
    /// file I/O failures and short reads/writes are returned as errors, not
    /// retried; a mis-sized salt file is treated as corruption.
    pub fn derive_key(&self, ikm: &[u8], length: usize, info: &str) -> Result<Zeroizing<Vec<u8>>> {
        let salt = self.load_or_create_salt()?;
        let hk = Hkdf::<Sha256>::new(Some(salt.as_ref()), ikm);
        let mut okm = Zeroizing::new(vec![0u8; length]);
        hk.expand(info.as_bytes(), &mut okm)
            .map_err(|_| Error::crypto(format!("requested key length {length} exceeds HKDF-SHA256 output limit")))?;
        Ok(okm)
    }

    fn salt_path(&self) -> PathBuf {
        self.salt_dir.join(KDF_SALT_FILE)
    }

    fn load_or_create_salt(&self) -> Result<Zeroizing<[u8; SALT_LEN]>> {
        let path = self.salt_path();
        match std::fs::metadata(&path) {
            Ok(_) => self.read_salt(&path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.create_salt(&path),
            Err(e) => Err(e.into()),
        }
    }

    fn read_salt(&self, path: &Path) -> Result<Zeroizing<[u8; SALT_LEN]>> {
        let mut file = std::fs::File::open(path)?;
        let mut salt = Zeroizing::new([0u8; SALT_LEN]);
        let n = file.read(salt.as_mut())?;
        // A trailing byte means the file is bigger than a salt; both cases
        // are corruption, not something to silently accept.
        let mut probe = [0u8; 1];
        if n != SALT_LEN || file.read(&mut probe)? != 0 {
            return Err(Error::crypto(format!(
                "KDF salt file {} is corrupt: expected exactly {SALT_LEN} bytes",
                path.display()
            )));
        }
        Ok(salt)
    }

    fn create_salt(&self, path: &Path) -> Result<Zeroizing<[u8; SALT_LEN]>> {
        let mut salt = Zeroizing::new([0u8; SALT_LEN]);
        rand::rng().fill_bytes(salt.as_mut());

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(salt.as_ref())?;
        file.sync_all()?;
        tracing::debug!(path = %path.display(), "generated new KDF salt");
        Ok(salt)
    }
}
