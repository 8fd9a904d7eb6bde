//! The secret store client trait
//!
//! Every operation the bootstrapper, token provider, and identity broker
//! perform against the store goes through this trait so that the
//! higher-level crates can be tested against [`MemoryStoreClient`]
//! without a live store.
//!
//! [`MemoryStoreClient`]: crate::MemoryStoreClient

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use stoker_core::{InitResponse, Result, SecureString};

use crate::types::TokenMetadata;

/// Health probe outcome, decoded from the store's health status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Initialized, unsealed, active
    Ready,
    /// Initialized and unsealed but not the active node
    Standby,
    /// Not yet initialized
    Uninitialized,
    /// Initialized but sealed
    Sealed,
    /// Anything else; callers retry
    Unknown(u16),
}

impl HealthStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            200 => Self::Ready,
            429 => Self::Standby,
            501 => Self::Uninitialized,
            503 => Self::Sealed,
            other => Self::Unknown(other),
        }
    }
}

#[async_trait]
pub trait SecretStoreClient: Send + Sync {
    /// Probe the store's health endpoint and return the decoded status.
    /// The health endpoint reports state through its status code, so a
    /// non-2xx response here is not an error.
    async fn health_check(&self) -> Result<HealthStatus>;

    /// Initialize the store, producing key shares and an initial root token
    async fn init(&self, secret_shares: u8, secret_threshold: u8) -> Result<InitResponse>;

    /// Submit base64 key shares one at a time until the store reports
    /// unsealed. Errors if all shares are consumed and the store is still
    /// sealed.
    async fn unseal(&self, keys_base64: &[String]) -> Result<()>;

    /// Run the generate-root protocol: cancel any in-flight attempt,
    /// start a new one, feed it base64 key shares, and decode the
    /// resulting one-time-pad-encoded token.
    async fn regen_root_token(&self, keys_base64: &[String]) -> Result<SecureString>;

    /// Revoke the token used to authenticate the call itself
    async fn revoke_self(&self, token: &str) -> Result<()>;

    async fn list_token_accessors(&self, token: &str) -> Result<Vec<String>>;

    async fn lookup_token_accessor(&self, token: &str, accessor: &str) -> Result<TokenMetadata>;

    async fn lookup_self(&self, token: &str) -> Result<TokenMetadata>;

    async fn revoke_token_accessor(&self, token: &str, accessor: &str) -> Result<()>;

    /// Install (create or overwrite) a named ACL policy
    async fn install_policy(&self, token: &str, name: &str, document: &str) -> Result<()>;

    /// Create a child token with the given parameters, returning the full
    /// auth response body
    async fn create_token(&self, token: &str, params: Value) -> Result<Value>;

    /// Whether a secrets engine of `engine_type` is mounted at `mount`
    async fn check_secret_engine_installed(
        &self,
        token: &str,
        mount: &str,
        engine_type: &str,
    ) -> Result<bool>;

    async fn enable_kv_secret_engine(&self, token: &str, mount: &str, version: &str) -> Result<()>;

    /// Create or update a named identity entity; returns the entity id,
    /// looking it up by name when the store omits it from an update
    /// response
    async fn create_or_update_identity(
        &self,
        token: &str,
        name: &str,
        metadata: &HashMap<String, String>,
        policies: &[String],
    ) -> Result<String>;

    /// Resolve the mount accessor of an enabled auth method
    async fn lookup_auth_handle(&self, token: &str, mount: &str) -> Result<String>;

    /// Create or update a username/password login user
    async fn create_or_update_user(
        &self,
        token: &str,
        mount: &str,
        username: &str,
        password: &str,
        token_ttl: &str,
        token_policies: &[String],
    ) -> Result<()>;

    /// Bind a login user to an identity entity via an entity alias.
    /// Idempotent: an alias that already exists for the same auth mount
    /// is left in place.
    async fn bind_user_to_identity(
        &self,
        token: &str,
        entity_id: &str,
        auth_handle: &str,
        username: &str,
    ) -> Result<()>;

    /// Create or update a named identity token role whose claims carry
    /// the entity name
    async fn create_or_update_identity_role(
        &self,
        token: &str,
        role_name: &str,
        key_name: &str,
        template: Option<&str>,
        token_ttl: &str,
    ) -> Result<()>;

    /// Log in with username/password credentials, returning the auth
    /// block of the response
    async fn internal_service_login(
        &self,
        mount: &str,
        username: &str,
        password: &str,
    ) -> Result<Value>;

    async fn read_secret(&self, token: &str, path: &str) -> Result<Value>;

    async fn write_secret(&self, token: &str, path: &str, data: &Value) -> Result<()>;
}
