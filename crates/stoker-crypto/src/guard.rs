//! Master-key protection
//!
//! Wraps each unseal key share with AES-256-GCM under a share-specific key
//! derived from externally supplied input keying material, so a persisted
//! init response never carries plaintext shares when the feature is
//! enabled. Without a configured entropy hook the shares are stored in the
//! clear; that fallback is deliberate and documented in the deployment
//! guide, not an error.

use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use stoker_core::{Error, InitResponse, Result};

use crate::hexpipe::{ExeHexReader, PipedHexReader};
use crate::kdf::KeyDeriver;

const AES_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Holds the input keying material and wraps/unwraps key shares.
///
/// Encryption state must be established explicitly with [`load_ikm`]
/// before either transform is called, and released with [`wipe_ikm`] on
/// every exit path.
///
/// [`load_ikm`]: MasterKeyGuard::load_ikm
/// [`wipe_ikm`]: MasterKeyGuard::wipe_ikm
pub struct MasterKeyGuard {
    reader: Box<dyn PipedHexReader>,
    kdf: KeyDeriver,
    ikm: Zeroizing<Vec<u8>>,
    encrypting: bool,
}

impl MasterKeyGuard {
    pub fn new(kdf: KeyDeriver) -> Self {
        Self::with_reader(Box::new(ExeHexReader), kdf)
    }

    pub fn with_reader(reader: Box<dyn PipedHexReader>, kdf: KeyDeriver) -> Self {
        Self {
            reader,
            kdf,
            ikm: Zeroizing::new(Vec::new()),
            encrypting: false,
        }
    }

    /// Load input keying material from the entropy hook and enable
    /// encryption
    pub async fn load_ikm(&mut self, hook: &Path) -> Result<()> {
        let ikm = self.reader.read_hex_bytes_from_exe(hook).await?;
        if ikm.is_empty() {
            return Err(Error::entropy_hook("entropy hook produced zero bytes"));
        }
        self.ikm = ikm;
        self.encrypting = true;
        Ok(())
    }

    /// Zero the input keying material and disable encryption.
    ///
    /// Callers must reach this on every path once the guard is done,
    /// including error paths.
    pub fn wipe_ikm(&mut self) {
        self.ikm.zeroize();
        self.ikm = Zeroizing::new(Vec::new());
        self.encrypting = false;
    }

    pub fn is_encrypting(&self) -> bool {
        self.encrypting
    }

    /// Replace plaintext key shares with wrapped ones.
    ///
    /// Each share is sealed under its own derived key with a fresh random
    /// nonce; on success `keys`/`keys_base64` are wiped and cleared and the
    /// response carries only `encrypted_keys`/`nonces`. The root token is
    /// left untouched.
    pub fn encrypt_init_response(&self, resp: &mut InitResponse) -> Result<()> {
        if !self.encrypting {
            return Err(Error::crypto(
                "cannot encrypt init response: input keying material not loaded",
            ));
        }

        let mut encrypted = Vec::with_capacity(resp.keys.len());
        let mut nonces = Vec::with_capacity(resp.keys.len());
        for (i, hex_share) in resp.keys.iter().enumerate() {
            let share = Zeroizing::new(hex::decode(hex_share)?);
            let (ciphertext, nonce) = self.seal_share(&share, i)?;
            encrypted.push(hex::encode(ciphertext));
            nonces.push(hex::encode(nonce));
        }

        resp.encrypted_keys = encrypted;
        resp.nonces = nonces;
        for k in &mut resp.keys {
            k.zeroize();
        }
        resp.keys.clear();
        for k in &mut resp.keys_base64 {
            k.zeroize();
        }
        resp.keys_base64.clear();
        Ok(())
    }

    /// Exact inverse of [`encrypt_init_response`]: re-derives the same
    /// per-index key and restores `keys`/`keys_base64`, clearing
    /// `encrypted_keys`/`nonces`.
    ///
    /// [`encrypt_init_response`]: MasterKeyGuard::encrypt_init_response
    pub fn decrypt_init_response(&self, resp: &mut InitResponse) -> Result<()> {
        if !self.encrypting {
            return Err(Error::crypto(
                "cannot decrypt init response: input keying material not loaded",
            ));
        }
        if resp.encrypted_keys.len() != resp.nonces.len() {
            return Err(Error::crypto(
                "init response is corrupt: encrypted key and nonce counts differ",
            ));
        }

        let mut keys = Vec::with_capacity(resp.encrypted_keys.len());
        let mut keys_base64 = Vec::with_capacity(resp.encrypted_keys.len());
        for (i, (hex_ct, hex_nonce)) in resp.encrypted_keys.iter().zip(&resp.nonces).enumerate() {
            let ciphertext = hex::decode(hex_ct)?;
            let nonce = hex::decode(hex_nonce)?;
            let share = self.open_share(&ciphertext, &nonce, i)?;
            let share_bytes: &[u8] = share.as_ref();
            keys.push(hex::encode(share_bytes));
            keys_base64.push(BASE64.encode(share_bytes));
        }

        resp.keys = keys;
        resp.keys_base64 = keys_base64;
        resp.encrypted_keys.clear();
        resp.nonces.clear();
        Ok(())
    }

    fn derive_share_key(&self, index: usize) -> Result<Zeroizing<Vec<u8>>> {
        let info = format!("vault{index}");
        self.kdf.derive_key(&self.ikm, AES_KEY_LEN, &info)
    }

    fn seal_share(&self, share: &[u8], index: usize) -> Result<(Vec<u8>, [u8; NONCE_LEN])> {
        let key = self.derive_share_key(index)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| Error::crypto("failed to initialize AES-256-GCM"))?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), share)
            .map_err(|_| Error::crypto(format!("failed to wrap key share {index}")))?;
        Ok((ciphertext, nonce))
    }

    fn open_share(
        &self,
        ciphertext: &[u8],
        nonce: &[u8],
        index: usize,
    ) -> Result<Zeroizing<Vec<u8>>> {
        if nonce.len() != NONCE_LEN {
            return Err(Error::crypto(format!(
                "key share {index} has a malformed nonce"
            )));
        }
        let key = self.derive_share_key(index)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| Error::crypto("failed to initialize AES-256-GCM"))?;

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                Error::crypto(format!(
                    "authentication failed unwrapping key share {index}; stored shares may have been tampered with"
                ))
            })?;
        Ok(Zeroizing::new(plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct FixedHexReader(&'static str);

    #[async_trait]
    impl PipedHexReader for FixedHexReader {
        async fn read_hex_bytes_from_exe(&self, _path: &Path) -> Result<Zeroizing<Vec<u8>>> {
            Ok(Zeroizing::new(hex::decode(self.0).unwrap()))
        }
    }

    async fn loaded_guard(salt_dir: &Path) -> MasterKeyGuard {
        let mut guard = MasterKeyGuard::with_reader(
            Box::new(FixedHexReader(
                "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
            )),
            KeyDeriver::new(salt_dir),
        );
        guard.load_ikm(Path::new("ikm-hook")).await.unwrap();
        guard
    }

    fn sample_response() -> InitResponse {
        let mut resp = InitResponse::default();
        resp.keys = vec![hex::encode([0x11u8; 32]), hex::encode([0x22u8; 32])];
        resp.keys_base64 = vec![BASE64.encode([0x11u8; 32]), BASE64.encode([0x22u8; 32])];
        resp.root_token = "s.root".into();
        resp
    }

    #[tokio::test]
    async fn roundtrip_restores_keys_and_preserves_exclusivity() {
        let dir = tempdir().unwrap();
        let guard = loaded_guard(dir.path()).await;

        let mut resp = sample_response();
        let original = sample_response();

        guard.encrypt_init_response(&mut resp).unwrap();
        assert!(resp.keys.is_empty());
        assert!(resp.keys_base64.is_empty());
        assert_eq!(resp.encrypted_keys.len(), 2);
        assert_eq!(resp.nonces.len(), 2);
        assert_eq!(resp.root_token, "s.root");

        guard.decrypt_init_response(&mut resp).unwrap();
        assert!(resp.encrypted_keys.is_empty());
        assert!(resp.nonces.is_empty());
        assert_eq!(resp.keys, original.keys);
        assert_eq!(resp.keys_base64, original.keys_base64);
    }

    #[tokio::test]
    async fn repeated_encryption_uses_fresh_nonces() {
        let dir = tempdir().unwrap();
        let guard = loaded_guard(dir.path()).await;

        let mut first = sample_response();
        let mut second = sample_response();
        guard.encrypt_init_response(&mut first).unwrap();
        guard.encrypt_init_response(&mut second).unwrap();

        assert_ne!(first.nonces, second.nonces);
        assert_ne!(first.encrypted_keys, second.encrypted_keys);
    }

    #[tokio::test]
    async fn tampered_ciphertext_fails_authentication() {
        let dir = tempdir().unwrap();
        let guard = loaded_guard(dir.path()).await;

        let mut resp = sample_response();
        guard.encrypt_init_response(&mut resp).unwrap();

        // flip one nibble of the first ciphertext
        let mut bytes = hex::decode(&resp.encrypted_keys[0]).unwrap();
        bytes[0] ^= 0x01;
        resp.encrypted_keys[0] = hex::encode(bytes);

        let result = guard.decrypt_init_response(&mut resp);
        assert!(matches!(result, Err(Error::Crypto { .. })));
        // plaintext fields were not populated from the failed unwrap
        assert!(resp.keys.is_empty());
    }

    #[tokio::test]
    async fn transforms_require_loaded_ikm() {
        let dir = tempdir().unwrap();
        let guard = MasterKeyGuard::with_reader(
            Box::new(FixedHexReader("00")),
            KeyDeriver::new(dir.path()),
        );
        assert!(!guard.is_encrypting());

        let mut resp = sample_response();
        assert!(guard.encrypt_init_response(&mut resp).is_err());
        assert!(guard.decrypt_init_response(&mut resp).is_err());
    }

    #[tokio::test]
    async fn wipe_ikm_disables_encryption() {
        let dir = tempdir().unwrap();
        let mut guard = loaded_guard(dir.path()).await;
        assert!(guard.is_encrypting());

        guard.wipe_ikm();
        assert!(!guard.is_encrypting());
        let mut resp = sample_response();
        assert!(guard.encrypt_init_response(&mut resp).is_err());
    }

    #[tokio::test]
    async fn mismatched_nonce_count_is_rejected() {
        let dir = tempdir().unwrap();
        let guard = loaded_guard(dir.path()).await;

        let mut resp = sample_response();
        guard.encrypt_init_response(&mut resp).unwrap();
        resp.nonces.pop();

        assert!(guard.decrypt_init_response(&mut resp).is_err());
    }
}
