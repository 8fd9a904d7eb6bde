//! Configuration for the bootstrapper, token provider, and broker
//!
//! Loaded from a single YAML file (`stoker.yaml`), with a small set of
//! environment-variable overrides for deployment-injected values.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable naming the entropy hook executable
pub const IKM_HOOK_ENV: &str = "STOKER_IKM_HOOK";
/// Environment variable naming the CA certificate used to verify the store
pub const CA_CERT_ENV: &str = "STOKER_CA_CERT";

/// Connection and bootstrap settings for the secret store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// CA bundle for verifying the store's server certificate; absent means
    /// certificate verification is bypassed (development only)
    pub ca_cert_path: Option<PathBuf>,
    /// Shamir secret-sharing parameters used at first initialization
    pub secret_shares: u8,
    pub secret_threshold: u8,
    /// Revoke legacy root tokens and strip the root token from the
    /// persisted init response
    pub revoke_root_tokens: bool,
    /// Seconds between init/unseal health polls
    pub poll_interval_secs: u64,
    /// Directory holding the persisted init response and the KDF salt
    pub token_folder_path: PathBuf,
    /// Filename of the persisted init response
    pub token_file: String,
    /// Executable producing hex-encoded input keying material on stdout;
    /// enables key-share wrapping when set
    pub ikm_hook: Option<PathBuf>,
    /// Where to write the token-issuing token, when one is requested
    pub admin_token_path: Option<PathBuf>,
    /// Revoke the issuing token once provisioning completes (one-shot mode)
    pub revoke_issuing_token: bool,
    /// KV subtree (under `secret/`) holding per-service secrets
    pub secret_base_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            scheme: "https".into(),
            host: "localhost".into(),
            port: 8200,
            ca_cert_path: None,
            secret_shares: 5,
            secret_threshold: 3,
            revoke_root_tokens: true,
            poll_interval_secs: 10,
            token_folder_path: PathBuf::from("/run/stoker"),
            token_file: "resp-init.json".into(),
            ikm_hook: None,
            admin_token_path: None,
            revoke_issuing_token: true,
            secret_base_path: "stoker".into(),
        }
    }
}

impl StoreConfig {
    /// Base URL of the secret store API
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// Absolute path of the persisted init response
    pub fn init_response_path(&self) -> PathBuf {
        self.token_folder_path.join(&self.token_file)
    }
}

/// Settings for file-based per-service token provisioning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TokenProviderConfig {
    /// File holding the privileged token used for provisioning
    pub privileged_token_path: PathBuf,
    /// Optional JSON file mapping service name to its token configuration
    pub config_file: Option<PathBuf>,
    /// Directory receiving one subdirectory per provisioned service
    pub output_dir: PathBuf,
    /// Filename of the credential bundle written per service
    pub output_filename: String,
    /// Mount point of the username/password auth method
    pub userpass_mount: String,
    /// Identity key used for per-service identity roles
    pub identity_key: String,
    /// TTL/period applied to issued service tokens
    pub default_token_ttl: String,
}

impl Default for TokenProviderConfig {
    fn default() -> Self {
        Self {
            privileged_token_path: PathBuf::from("/run/stoker/resp-init.json"),
            config_file: None,
            output_dir: PathBuf::from("/run/stoker/tokens"),
            output_filename: "secrets-token.json".into(),
            userpass_mount: "userpass".into(),
            identity_key: "stoker-identity".into(),
            default_token_ttl: "1h".into(),
        }
    }
}

/// Settings for the mutual-TLS workload-identity token broker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    pub listen_host: String,
    pub listen_port: u16,
    /// SPIFFE trust domain that client identities must belong to
    pub trust_domain: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// CA bundle anchoring client-certificate verification
    pub ca_path: PathBuf,
    /// Secret names a newly provisioned service may request to be copied
    /// from the bootstrap location; anything else is rejected
    pub known_secret_names: Vec<String>,
    /// Service whose secrets act as the canonical source for known-secret
    /// seeding
    pub bootstrap_service: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".into(),
            listen_port: 59841,
            trust_domain: "stoker.local".into(),
            cert_path: PathBuf::from("/run/stoker/broker/server.crt"),
            key_path: PathBuf::from("/run/stoker/broker/server.key"),
            ca_path: PathBuf::from("/run/stoker/broker/ca.crt"),
            known_secret_names: vec!["database".into()],
            bootstrap_service: "stoker-bootstrapper".into(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StokerConfig {
    pub store: StoreConfig,
    pub tokens: TokenProviderConfig,
    pub broker: BrokerConfig,
}

impl StokerConfig {
    /// Load configuration from a YAML file and apply environment overrides
    pub fn load(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigNotFound {
                path: path.display().to_string(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yaml_ng::from_str(&raw)?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(hook) = std::env::var(IKM_HOOK_ENV) {
            if !hook.is_empty() {
                self.store.ikm_hook = Some(PathBuf::from(hook));
            }
        }
        if let Ok(ca) = std::env::var(CA_CERT_ENV) {
            if !ca.is_empty() {
                self.store.ca_cert_path = Some(PathBuf::from(ca));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_sensible() {
        let config = StokerConfig::default();
        assert_eq!(config.store.base_url(), "https://localhost:8200");
        assert_eq!(config.store.secret_shares, 5);
        assert_eq!(config.store.secret_threshold, 3);
        assert_eq!(
            config.store.init_response_path(),
            PathBuf::from("/run/stoker/resp-init.json")
        );
    }

    #[test]
    #[serial]
    fn yaml_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stoker.yaml");
        std::fs::write(
            &path,
            "store:\n  host: vault.internal\n  port: 8201\n  secret_shares: 7\n",
        )
        .unwrap();
        std::env::remove_var(IKM_HOOK_ENV);
        std::env::remove_var(CA_CERT_ENV);

        let config = StokerConfig::load(&path).unwrap();
        assert_eq!(config.store.host, "vault.internal");
        assert_eq!(config.store.port, 8201);
        assert_eq!(config.store.secret_shares, 7);
        // untouched section keeps its defaults
        assert_eq!(config.tokens.userpass_mount, "userpass");
    }

    #[test]
    #[serial]
    fn env_vars_override_store_settings() {
        std::env::set_var(IKM_HOOK_ENV, "/usr/bin/tpm-hook");
        std::env::set_var(CA_CERT_ENV, "/etc/ssl/store-ca.pem");

        let config = StokerConfig::from_env();
        assert_eq!(config.store.ikm_hook, Some(PathBuf::from("/usr/bin/tpm-hook")));
        assert_eq!(
            config.store.ca_cert_path,
            Some(PathBuf::from("/etc/ssl/store-ca.pem"))
        );

        std::env::remove_var(IKM_HOOK_ENV);
        std::env::remove_var(CA_CERT_ENV);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let result = StokerConfig::load(std::path::Path::new("/does/not/exist.yaml"));
        assert!(matches!(result, Err(Error::ConfigNotFound { .. })));
    }
}
