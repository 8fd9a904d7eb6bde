//! Per-service token configuration
//!
//! Services to provision come from two places: an optional JSON
//! configuration file keyed by service name, and the
//! `STOKER_ADD_SECRETSTORE_TOKENS` environment variable carrying a
//! comma-separated list of extra service names. When both name the same
//! service the file entry wins.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use stoker_core::{fileio, Error, Result};

/// Environment variable listing extra services to provision with default
/// settings
pub const ADD_TOKENS_ENV: &str = "STOKER_ADD_SECRETSTORE_TOKENS";

/// Ownership and mode overrides for a service's credential file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilePermissions {
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub gid: Option<u32>,
    #[serde(default)]
    pub mode_octal: Option<String>,
}

/// One service's provisioning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceTokenConfig {
    /// Start from the default per-service policy and token parameters
    #[serde(alias = "edgex_use_defaults")]
    pub use_defaults: bool,
    /// Policy fragment merged into (or, when `use_defaults` is false,
    /// used instead of) the default policy
    pub custom_policy: Option<Value>,
    pub file_permissions: Option<FilePermissions>,
}

impl Default for ServiceTokenConfig {
    fn default() -> Self {
        Self {
            use_defaults: true,
            custom_policy: None,
            file_permissions: None,
        }
    }
}

/// Service name to settings, ordered so provisioning runs are
/// deterministic
pub type TokenConfigs = BTreeMap<String, ServiceTokenConfig>;

/// A service name becomes a directory component and a store path
/// segment, so reject anything that could escape either.
pub fn validate_service_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.chars().any(char::is_whitespace);
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidServiceName {
            name: name.to_string(),
        })
    }
}

pub fn load_file(path: &Path) -> Result<TokenConfigs> {
    let configs: TokenConfigs = fileio::read_json(path)?;
    for name in configs.keys() {
        validate_service_name(name)?;
    }
    debug!(count = configs.len(), path = %path.display(), "loaded token configuration file");
    Ok(configs)
}

/// Parse the `STOKER_ADD_SECRETSTORE_TOKENS` list into default-config
/// entries
pub fn from_env() -> Result<TokenConfigs> {
    let raw = std::env::var(ADD_TOKENS_ENV).unwrap_or_default();
    parse_service_list(&raw)
}

pub fn parse_service_list(raw: &str) -> Result<TokenConfigs> {
    let mut configs = TokenConfigs::new();
    for name in raw.split(',') {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        validate_service_name(name)?;
        configs.insert(name.to_string(), ServiceTokenConfig::default());
    }
    Ok(configs)
}

/// Combine file and environment entries; the file entry wins for a
/// service named in both.
pub fn merge(file: TokenConfigs, env: TokenConfigs) -> TokenConfigs {
    let mut merged = env;
    merged.extend(file);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    fn service_names_that_escape_paths_are_rejected() {
        for bad in ["", ".", "..", "a/b", "a\\b", "a b", "tab\tname"] {
            assert!(validate_service_name(bad).is_err(), "accepted {bad:?}");
        }
        for good in ["core-data", "device.virtual", "svc_1"] {
            assert!(validate_service_name(good).is_ok(), "rejected {good:?}");
        }
    }

    #[test]
    fn parses_a_comma_separated_service_list() {
        let configs = parse_service_list("core-data, core-metadata,,support-notifications").unwrap();
        assert_eq!(configs.len(), 3);
        assert!(configs["core-data"].use_defaults);
    }

    #[test]
    fn list_with_bad_name_fails_whole_parse() {
        assert!(parse_service_list("good-name,bad/name").is_err());
    }

    #[test]
    fn file_entry_wins_over_env_entry() {
        let mut file = TokenConfigs::new();
        file.insert(
            "svc".into(),
            ServiceTokenConfig {
                use_defaults: false,
                custom_policy: Some(json!({"path": {}})),
                file_permissions: None,
            },
        );
        let env = parse_service_list("svc,other").unwrap();

        let merged = merge(file, env);
        assert_eq!(merged.len(), 2);
        assert!(!merged["svc"].use_defaults);
        assert!(merged["other"].use_defaults);
    }

    #[test]
    fn accepts_the_legacy_use_defaults_key() {
        let config: ServiceTokenConfig =
            serde_json::from_value(json!({"edgex_use_defaults": false})).unwrap();
        assert!(!config.use_defaults);
    }

    #[test]
    #[serial]
    fn env_var_feeds_the_service_list() {
        std::env::set_var(ADD_TOKENS_ENV, "app-rules,app-export");
        let configs = from_env().unwrap();
        std::env::remove_var(ADD_TOKENS_ENV);
        assert_eq!(configs.len(), 2);
    }

    #[test]
    fn config_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("token-config.json");
        std::fs::write(
            &path,
            json!({
                "core-data": {
                    "edgex_use_defaults": true,
                    "file_permissions": {"uid": 100, "gid": 1000, "mode_octal": "0640"}
                }
            })
            .to_string(),
        )
        .unwrap();

        let configs = load_file(&path).unwrap();
        let perms = configs["core-data"].file_permissions.as_ref().unwrap();
        assert_eq!(perms.uid, Some(100));
        assert_eq!(perms.mode_octal.as_deref(), Some("0640"));
    }
}
