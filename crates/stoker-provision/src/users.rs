//! Login users bound to identity entities
//!
//! Provisioning a service account is a fixed sequence against the store:
//! install the service policy, upsert the identity entity, upsert the
//! userpass login, resolve the auth method's accessor, bind the login to
//! the entity, and give the entity a token role carrying its name as a
//! claim. Every step is an upsert so re-running the sequence is safe.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use tracing::{debug, info};

use stoker_client::SecretStoreClient;
use stoker_core::{Result, UserPasswordPair};

use crate::policy;

pub struct UserManager {
    client: Arc<dyn SecretStoreClient>,
    userpass_mount: String,
    identity_key: String,
    token_ttl: String,
}

impl UserManager {
    pub fn new(
        client: Arc<dyn SecretStoreClient>,
        userpass_mount: impl Into<String>,
        identity_key: impl Into<String>,
        token_ttl: impl Into<String>,
    ) -> Self {
        Self {
            client,
            userpass_mount: userpass_mount.into(),
            identity_key: identity_key.into(),
            token_ttl: token_ttl.into(),
        }
    }

    /// Create (or refresh) a service account: policy, identity entity,
    /// login user, entity alias, and identity role.
    pub async fn create_user_with_identity(
        &self,
        privileged_token: &str,
        service: &str,
        policy_document: &str,
        credentials: &UserPasswordPair,
    ) -> Result<()> {
        let policy_name = policy::service_policy_name(service);
        self.client
            .install_policy(privileged_token, &policy_name, policy_document)
            .await?;

        let mut metadata = HashMap::new();
        metadata.insert("service".to_string(), service.to_string());
        let entity_id = self
            .client
            .create_or_update_identity(
                privileged_token,
                service,
                &metadata,
                std::slice::from_ref(&policy_name),
            )
            .await?;
        debug!(service, entity_id, "identity entity in place");

        self.client
            .create_or_update_user(
                privileged_token,
                &self.userpass_mount,
                &credentials.user,
                &credentials.password,
                &self.token_ttl,
                std::slice::from_ref(&policy_name),
            )
            .await?;

        let auth_handle = self
            .client
            .lookup_auth_handle(privileged_token, &self.userpass_mount)
            .await?;
        self.client
            .bind_user_to_identity(privileged_token, &entity_id, &auth_handle, &credentials.user)
            .await?;

        let template = BASE64.encode(json!({"name": service}).to_string());
        self.client
            .create_or_update_identity_role(
                privileged_token,
                service,
                &self.identity_key,
                Some(&template),
                &self.token_ttl,
            )
            .await?;

        info!(service, "service account provisioned");
        Ok(())
    }
}
