//! Root token lifecycle and privileged-token creation
//!
//! The bootstrapper never keeps a long-lived root token. It regenerates
//! a transient one from key shares, uses it to mint a scoped
//! token-issuing token, sweeps stale tokens, and revokes the transient
//! root before exiting.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use stoker_client::SecretStoreClient;
use stoker_core::{Error, Result, SecureString};

/// Name of the policy held by the token-issuing token
pub const TOKEN_CREATOR_POLICY_NAME: &str = "stoker-privileged-token-creator";

/// Everything the provisioning flow needs and nothing more: child-token
/// creation, accessor sweeps, per-service policies, identity plumbing,
/// and userpass user management.
pub const TOKEN_CREATOR_POLICY: &str = r#"
path "auth/token/create" {
  capabilities = ["create", "update", "sudo"]
}
path "auth/token/create-orphan" {
  capabilities = ["create", "update", "sudo"]
}
path "auth/token/accessors" {
  capabilities = ["list", "sudo"]
}
path "auth/token/lookup-accessor" {
  capabilities = ["create", "update"]
}
path "auth/token/revoke-accessor" {
  capabilities = ["create", "update"]
}
path "sys/policies/acl/stoker-service-*" {
  capabilities = ["create", "read", "update", "delete"]
}
path "sys/auth" {
  capabilities = ["read"]
}
path "auth/userpass/users/*" {
  capabilities = ["create", "update"]
}
path "identity/entity/name/*" {
  capabilities = ["create", "read", "update"]
}
path "identity/entity/id/*" {
  capabilities = ["read"]
}
path "identity/entity-alias" {
  capabilities = ["create", "update"]
}
path "identity/oidc/role/*" {
  capabilities = ["create", "update"]
}
"#;

/// A root token regenerated from key shares, revoked when the work
/// holding it finishes
pub struct TransientRoot {
    client: Arc<dyn SecretStoreClient>,
    token: SecureString,
}

impl TransientRoot {
    /// Regenerate a root token from unseal key shares
    pub async fn generate(
        client: Arc<dyn SecretStoreClient>,
        keys_base64: &[String],
    ) -> Result<Self> {
        let token = client.regen_root_token(keys_base64).await?;
        Ok(Self { client, token })
    }

    pub fn token(&self) -> &str {
        self.token.as_str()
    }

    /// Revoke the transient root. Failure here is logged, not
    /// propagated, so it cannot mask the outcome of the work that used
    /// the token.
    pub async fn revoke(self) {
        if let Err(e) = self.client.revoke_self(self.token.as_str()).await {
            warn!(error = %e, "failed to revoke transient root token");
        } else {
            info!("transient root token revoked");
        }
    }
}

/// Revokes a minted token unless disarmed
pub struct RevokeGuard {
    client: Arc<dyn SecretStoreClient>,
    token: SecureString,
}

impl RevokeGuard {
    pub async fn revoke(self) {
        if let Err(e) = self.client.revoke_self(self.token.as_str()).await {
            warn!(error = %e, "failed to revoke issued token");
        }
    }

    /// Keep the token alive (long-running provider mode)
    pub fn disarm(self) {
        info!("issued token left alive for later provisioning");
    }
}

pub struct TokenMaintenance {
    client: Arc<dyn SecretStoreClient>,
}

impl TokenMaintenance {
    pub fn new(client: Arc<dyn SecretStoreClient>) -> Self {
        Self { client }
    }

    /// Mint the token-issuing token: install the creator policy and
    /// create an orphan periodic token restricted to it. Returns the
    /// create-token response (written verbatim to the admin token file)
    /// and a guard that revokes the token.
    pub async fn create_token_issuing_token(
        &self,
        root_token: &str,
    ) -> Result<(Value, RevokeGuard)> {
        self.client
            .install_policy(root_token, TOKEN_CREATOR_POLICY_NAME, TOKEN_CREATOR_POLICY)
            .await?;

        let params = json!({
            "policies": [TOKEN_CREATOR_POLICY_NAME],
            "display_name": TOKEN_CREATOR_POLICY_NAME,
            "no_parent": true,
            "period": "1h",
            "ttl": "1h",
        });
        let response = self.client.create_token(root_token, params).await?;
        let token = response
            .pointer("/auth/client_token")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::missing_field("auth.client_token"))?;

        info!("token-issuing token created");
        let guard = RevokeGuard {
            client: self.client.clone(),
            token: SecureString::from(token),
        };
        Ok((response, guard))
    }

    /// Revoke every token that does not hold the root policy, sparing
    /// the token making the call
    pub async fn revoke_non_root_tokens(&self, token: &str) -> Result<()> {
        self.sweep(token, false).await
    }

    /// Revoke every root-policy token other than the caller's
    pub async fn revoke_root_tokens(&self, token: &str) -> Result<()> {
        self.sweep(token, true).await
    }

    /// Best-effort sweep: a failed lookup or revoke on one accessor does
    /// not stop the rest, but the last failure is still surfaced.
    async fn sweep(&self, token: &str, roots: bool) -> Result<()> {
        let own_accessor = self.client.lookup_self(token).await?.accessor;
        let accessors = self.client.list_token_accessors(token).await?;

        let mut revoked = 0usize;
        let mut last_failure = None;
        for accessor in accessors {
            if accessor == own_accessor {
                continue;
            }
            let meta = match self.client.lookup_token_accessor(token, &accessor).await {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(accessor, error = %e, "accessor lookup failed during sweep");
                    last_failure = Some(e);
                    continue;
                }
            };
            if meta.policies.iter().any(|p| p == "root") != roots {
                continue;
            }
            match self.client.revoke_token_accessor(token, &accessor).await {
                Ok(()) => revoked += 1,
                Err(e) => {
                    warn!(accessor, error = %e, "revoke failed during sweep");
                    last_failure = Some(e);
                }
            }
        }
        info!(revoked, roots, "token sweep complete");
        match last_failure {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stoker_client::MemoryStoreClient;

    #[tokio::test]
    async fn issuing_token_is_scoped_and_revocable() {
        let (store, root) = MemoryStoreClient::ready();
        let store = Arc::new(store);
        let maintenance = TokenMaintenance::new(store.clone());

        let (response, guard) = maintenance.create_token_issuing_token(&root).await.unwrap();
        let token = response["auth"]["client_token"].as_str().unwrap().to_string();
        assert!(store.has_token(&token));
        assert!(store.policy(TOKEN_CREATOR_POLICY_NAME).is_some());

        guard.revoke().await;
        assert!(!store.has_token(&token));
    }

    #[tokio::test]
    async fn non_root_sweep_spares_roots_and_the_caller() {
        let (store, root) = MemoryStoreClient::ready();
        let store = Arc::new(store);
        let worker = store
            .create_token(&root, json!({"display_name": "worker", "policies": ["default"]}))
            .await
            .unwrap();
        let worker_token = worker["auth"]["client_token"].as_str().unwrap().to_string();

        TokenMaintenance::new(store.clone())
            .revoke_non_root_tokens(&root)
            .await
            .unwrap();

        assert!(!store.has_token(&worker_token));
        assert!(store.has_token(&root));
    }

    #[tokio::test]
    async fn root_sweep_spares_the_calling_root() {
        let (store, root) = MemoryStoreClient::ready();
        let store = Arc::new(store);
        let legacy = store
            .create_token(&root, json!({"display_name": "old-root", "policies": ["root"]}))
            .await
            .unwrap();
        let legacy_token = legacy["auth"]["client_token"].as_str().unwrap().to_string();

        TokenMaintenance::new(store.clone())
            .revoke_root_tokens(&root)
            .await
            .unwrap();

        assert!(!store.has_token(&legacy_token));
        assert!(store.has_token(&root));
    }

    #[tokio::test]
    async fn transient_root_revokes_itself() {
        let store = Arc::new(MemoryStoreClient::new());
        let resp = store.init(5, 3).await.unwrap();
        store.unseal(&resp.keys_base64).await.unwrap();

        let transient = TransientRoot::generate(store.clone(), &resp.keys_base64)
            .await
            .unwrap();
        let token = transient.token().to_string();
        assert!(store.has_token(&token));

        transient.revoke().await;
        assert!(!store.has_token(&token));
    }
}
