//! Random password generation for userpass logins

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use zeroize::Zeroizing;

use stoker_core::{Result, SecureString};

/// Bytes of entropy behind each generated password
const PASSWORD_BYTES: usize = 30;

/// Source of login passwords, swappable in tests
pub trait CredentialGenerator: Send + Sync {
    fn generate_password(&self) -> Result<SecureString>;
}

/// Generates base64-encoded random passwords
#[derive(Debug, Default)]
pub struct RandomCredentialGenerator;

impl CredentialGenerator for RandomCredentialGenerator {
    fn generate_password(&self) -> Result<SecureString> {
        let mut raw = Zeroizing::new([0u8; PASSWORD_BYTES]);
        rand::rng().fill_bytes(raw.as_mut());
        let encoded = Zeroizing::new(BASE64.encode(raw.as_ref()));
        Ok(SecureString::from(encoded.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwords_are_long_and_distinct() {
        let generator = RandomCredentialGenerator;
        let a = generator.generate_password().unwrap();
        let b = generator.generate_password().unwrap();
        // 30 bytes base64-encode to 40 characters
        assert_eq!(a.len(), 40);
        assert_ne!(a.as_str(), b.as_str());
    }
}
