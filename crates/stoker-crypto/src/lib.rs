//! Key derivation and master-key protection for the secret store
//!
//! - [`kdf`]: HKDF-SHA256 derivation over a persisted random salt
//! - [`hexpipe`]: entropy hook that reads hex-encoded keying material
//!   from an external executable
//! - [`guard`]: AES-256-GCM wrapping of unseal key shares

pub mod guard;
pub mod hexpipe;
pub mod kdf;

pub use guard::MasterKeyGuard;
pub use hexpipe::{ExeHexReader, PipedHexReader};
pub use kdf::{KeyDeriver, KDF_SALT_FILE};
