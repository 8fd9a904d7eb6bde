//! Per-service ACL policy documents
//!
//! Policies are built as JSON (the store accepts JSON policy bodies) so
//! that custom fragments from the token configuration file can be merged
//! in at path granularity.

use serde_json::{json, Map, Value};

/// Name of the per-service policy installed for `service`
pub fn service_policy_name(service: &str) -> String {
    format!("stoker-service-{service}")
}

/// Default policy granting a service full control of its own secret
/// subtree, read access to its registry credentials, and read access to
/// its own token
pub fn default_token_policy(service: &str, secret_base_path: &str) -> Value {
    let base = secret_base_path.trim_matches('/');
    json!({
        "path": {
            format!("secret/{base}/{service}/*"): {
                "capabilities": ["create", "update", "delete", "list", "read"]
            },
            format!("registry/creds/{service}"): {
                "capabilities": ["read"]
            },
            "auth/token/lookup-self": {
                "capabilities": ["read"]
            },
            "auth/token/renew-self": {
                "capabilities": ["update"]
            },
        }
    })
}

/// Merge a custom policy fragment into a default policy.
///
/// Merging is shallow at the path level: a custom entry for a path the
/// default also names replaces the default's entry wholesale.
pub fn merge_custom_policy(default: &Value, custom: &Value) -> Value {
    let mut paths: Map<String, Value> = default
        .get("path")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    if let Some(custom_paths) = custom.get("path").and_then(Value::as_object) {
        for (path, caps) in custom_paths {
            paths.insert(path.clone(), caps.clone());
        }
    }
    json!({ "path": paths })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_scopes_the_service_subtree() {
        let policy = default_token_policy("device-onvif", "stoker");
        let caps = &policy["path"]["secret/stoker/device-onvif/*"]["capabilities"];
        assert!(caps.as_array().unwrap().contains(&json!("read")));
        assert_eq!(
            policy["path"]["registry/creds/device-onvif"]["capabilities"][0],
            "read"
        );
        assert!(policy["path"]["auth/token/lookup-self"].is_object());
    }

    #[test]
    fn custom_paths_are_added_and_override_defaults() {
        let default = default_token_policy("svc", "stoker");
        let custom = json!({
            "path": {
                "secret/shared/*": { "capabilities": ["read"] },
                "auth/token/renew-self": { "capabilities": ["deny"] },
            }
        });
        let merged = merge_custom_policy(&default, &custom);

        // default paths survive
        assert!(merged["path"]["secret/stoker/svc/*"].is_object());
        // new path added
        assert_eq!(merged["path"]["secret/shared/*"]["capabilities"][0], "read");
        // overlapping path replaced wholesale
        assert_eq!(merged["path"]["auth/token/renew-self"]["capabilities"][0], "deny");
    }

    #[test]
    fn merge_with_empty_custom_is_the_default() {
        let default = default_token_policy("svc", "stoker");
        let merged = merge_custom_policy(&default, &json!({}));
        assert_eq!(merged, default);
    }
}
