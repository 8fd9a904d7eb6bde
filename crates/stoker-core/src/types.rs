//! Shared wire types for the secret store

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Response from secret store initialization.
///
/// Exactly one of the two key representations is populated at a time:
/// `keys`/`keys_base64` (plaintext hex/base64 key shares) or
/// `encrypted_keys`/`nonces` (AES-GCM-wrapped shares, hex). `root_token`
/// may be deliberately blanked before the response is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys_base64: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub encrypted_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nonces: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub root_token: String,
}

impl InitResponse {
    /// Whether the key shares are present in wrapped form
    pub fn is_encrypted(&self) -> bool {
        !self.encrypted_keys.is_empty()
    }

    /// Drop the root token from the response, wiping the buffer first
    pub fn strip_root_token(&mut self) {
        self.root_token.zeroize();
        self.root_token = String::new();
    }
}

impl Drop for InitResponse {
    fn drop(&mut self) {
        for k in &mut self.keys {
            k.zeroize();
        }
        for k in &mut self.keys_base64 {
            k.zeroize();
        }
        self.root_token.zeroize();
    }
}

/// A generated credential pair for one service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPasswordPair {
    pub user: String,
    pub password: String,
}

impl Drop for UserPasswordPair {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_response_serializes_only_populated_fields() {
        let mut resp = InitResponse::default();
        resp.encrypted_keys = vec!["aa".into()];
        resp.nonces = vec!["bb".into()];
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("keys").is_none());
        assert!(json.get("keys_base64").is_none());
        assert!(json.get("root_token").is_none());
        assert_eq!(json["encrypted_keys"][0], "aa");
        assert!(resp.is_encrypted());
    }

    #[test]
    fn strip_root_token_clears_the_field() {
        let mut resp = InitResponse::default();
        resp.root_token = "s.abcdef".into();
        resp.strip_root_token();
        assert!(resp.root_token.is_empty());
    }

    #[test]
    fn init_response_roundtrips_through_json() {
        let mut resp = InitResponse::default();
        resp.keys = vec!["00aa".into()];
        resp.keys_base64 = vec!["AKo=".into()];
        resp.root_token = "s.token".into();
        let json = serde_json::to_string(&resp).unwrap();
        let back: InitResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, resp);
        assert!(!back.is_encrypted());
    }
}
