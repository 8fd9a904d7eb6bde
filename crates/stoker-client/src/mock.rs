//! In-memory secret store used by tests
//!
//! Implements enough of the store's semantics (init/unseal state,
//! token accessors, policies, identity entities, userpass logins, KV
//! secrets) for the bootstrap and provisioning flows to run end to end
//! without a live store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

use stoker_core::{Error, InitResponse, Result, SecureString};

use crate::api::{HealthStatus, SecretStoreClient};
use crate::types::TokenMetadata;

#[derive(Debug, Clone)]
struct TokenRecord {
    token: String,
    accessor: String,
    display_name: String,
    policies: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct Entity {
    id: String,
    policies: Vec<String>,
    metadata: HashMap<String, String>,
    alias_accessors: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    initialized: bool,
    sealed: bool,
    standby: bool,
    warmup_polls: u32,
    health_probes: u32,
    threshold: u8,
    key_shares: Vec<String>,
    tokens: Vec<TokenRecord>,
    revoked_accessors: Vec<String>,
    policies: HashMap<String, String>,
    mounts: HashMap<String, String>,
    auth_handles: HashMap<String, String>,
    entities: HashMap<String, Entity>,
    users: HashMap<String, String>,
    identity_roles: HashMap<String, Value>,
    secrets: HashMap<String, Value>,
    next_id: u64,
}

impl Inner {
    fn mint(&mut self, display_name: &str, policies: Vec<String>) -> TokenRecord {
        self.next_id += 1;
        let record = TokenRecord {
            token: format!("s.{:016x}", self.next_id),
            accessor: format!("accessor-{:08x}", self.next_id),
            display_name: display_name.to_string(),
            policies,
        };
        self.tokens.push(record.clone());
        record
    }

    fn require_token(&self, operation: &'static str, token: &str) -> Result<()> {
        if self.tokens.iter().any(|t| t.token == token) {
            Ok(())
        } else {
            Err(Error::store_status(operation, 403))
        }
    }

    fn valid_shares(&self, keys_base64: &[String]) -> usize {
        keys_base64
            .iter()
            .filter(|k| self.key_shares.contains(k))
            .count()
    }
}

pub struct MemoryStoreClient {
    inner: Mutex<Inner>,
}

impl Default for MemoryStoreClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreClient {
    pub fn new() -> Self {
        let mut inner = Inner {
            sealed: true,
            ..Inner::default()
        };
        inner
            .auth_handles
            .insert("userpass".to_string(), "auth_userpass_00000000".to_string());
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// A store that is already initialized and unsealed, with a root
    /// token ready to use
    pub fn ready() -> (Self, String) {
        let store = Self::new();
        let root = {
            let mut inner = store.inner.lock().unwrap();
            inner.initialized = true;
            inner.sealed = false;
            inner.mint("root", vec!["root".to_string()]).token
        };
        (store, root)
    }

    pub fn seal(&self) {
        self.inner.lock().unwrap().sealed = true;
    }

    pub fn set_warmup_polls(&self, polls: u32) {
        self.inner.lock().unwrap().warmup_polls = polls;
    }

    pub fn set_standby(&self, standby: bool) {
        self.inner.lock().unwrap().standby = standby;
    }

    pub fn health_probes(&self) -> u32 {
        self.inner.lock().unwrap().health_probes
    }

    pub fn has_token(&self, token: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .tokens
            .iter()
            .any(|t| t.token == token)
    }

    pub fn token_count(&self) -> usize {
        self.inner.lock().unwrap().tokens.len()
    }

    pub fn revoked_accessors(&self) -> Vec<String> {
        self.inner.lock().unwrap().revoked_accessors.clone()
    }

    pub fn policy(&self, name: &str) -> Option<String> {
        self.inner.lock().unwrap().policies.get(name).cloned()
    }

    pub fn secret(&self, path: &str) -> Option<Value> {
        self.inner.lock().unwrap().secrets.get(path).cloned()
    }

    pub fn entity_alias_accessors(&self, name: &str) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .entities
            .get(name)
            .map(|e| e.alias_accessors.clone())
            .unwrap_or_default()
    }

    pub fn identity_role(&self, name: &str) -> Option<Value> {
        self.inner.lock().unwrap().identity_roles.get(name).cloned()
    }
}

#[async_trait]
impl SecretStoreClient for MemoryStoreClient {
    async fn health_check(&self) -> Result<HealthStatus> {
        let mut inner = self.inner.lock().unwrap();
        inner.health_probes += 1;
        if inner.warmup_polls > 0 {
            inner.warmup_polls -= 1;
            return Ok(HealthStatus::Unknown(500));
        }
        Ok(if !inner.initialized {
            HealthStatus::Uninitialized
        } else if inner.sealed {
            HealthStatus::Sealed
        } else if inner.standby {
            HealthStatus::Standby
        } else {
            HealthStatus::Ready
        })
    }

    async fn init(&self, secret_shares: u8, secret_threshold: u8) -> Result<InitResponse> {
        let mut inner = self.inner.lock().unwrap();
        if inner.initialized {
            return Err(Error::store_status("init", 400));
        }
        inner.initialized = true;
        inner.threshold = secret_threshold;

        let mut resp = InitResponse::default();
        for i in 0..secret_shares {
            let raw = vec![i + 1; 32];
            resp.keys.push(hex::encode(&raw));
            resp.keys_base64.push(BASE64.encode(&raw));
        }
        inner.key_shares = resp.keys_base64.clone();
        resp.root_token = inner.mint("root", vec!["root".to_string()]).token;
        Ok(resp)
    }

    async fn unseal(&self, keys_base64: &[String]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.initialized {
            return Err(Error::store_status("unseal", 400));
        }
        if inner.valid_shares(keys_base64) >= inner.threshold as usize {
            inner.sealed = false;
            Ok(())
        } else {
            Err(Error::crypto(
                "secret store remained sealed after all key shares were submitted",
            ))
        }
    }

    async fn regen_root_token(&self, keys_base64: &[String]) -> Result<SecureString> {
        let mut inner = self.inner.lock().unwrap();
        if inner.valid_shares(keys_base64) < inner.threshold as usize {
            return Err(Error::crypto(
                "root token generation did not complete after all key shares were submitted",
            ));
        }
        let record = inner.mint("root", vec!["root".to_string()]);
        Ok(SecureString::from(record.token))
    }

    async fn revoke_self(&self, token: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.require_token("revoke-self", token)?;
        let accessor = inner
            .tokens
            .iter()
            .find(|t| t.token == token)
            .map(|t| t.accessor.clone())
            .unwrap_or_default();
        inner.tokens.retain(|t| t.token != token);
        inner.revoked_accessors.push(accessor);
        Ok(())
    }

    async fn list_token_accessors(&self, token: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        inner.require_token("list token accessors", token)?;
        Ok(inner.tokens.iter().map(|t| t.accessor.clone()).collect())
    }

    async fn lookup_token_accessor(&self, token: &str, accessor: &str) -> Result<TokenMetadata> {
        let inner = self.inner.lock().unwrap();
        inner.require_token("lookup token accessor", token)?;
        let record = inner
            .tokens
            .iter()
            .find(|t| t.accessor == accessor)
            .ok_or_else(|| Error::store_status("lookup token accessor", 404))?;
        Ok(TokenMetadata {
            accessor: record.accessor.clone(),
            display_name: record.display_name.clone(),
            policies: record.policies.clone(),
            ..TokenMetadata::default()
        })
    }

    async fn lookup_self(&self, token: &str) -> Result<TokenMetadata> {
        let inner = self.inner.lock().unwrap();
        let record = inner
            .tokens
            .iter()
            .find(|t| t.token == token)
            .ok_or_else(|| Error::store_status("lookup-self", 403))?;
        Ok(TokenMetadata {
            accessor: record.accessor.clone(),
            display_name: record.display_name.clone(),
            policies: record.policies.clone(),
            ..TokenMetadata::default()
        })
    }

    async fn revoke_token_accessor(&self, token: &str, accessor: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.require_token("revoke token accessor", token)?;
        inner.tokens.retain(|t| t.accessor != accessor);
        inner.revoked_accessors.push(accessor.to_string());
        Ok(())
    }

    async fn install_policy(&self, token: &str, name: &str, document: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.require_token("install policy", token)?;
        inner
            .policies
            .insert(name.to_string(), document.to_string());
        Ok(())
    }

    async fn create_token(&self, token: &str, params: Value) -> Result<Value> {
        let mut inner = self.inner.lock().unwrap();
        inner.require_token("create token", token)?;
        let display_name = params
            .get("display_name")
            .and_then(Value::as_str)
            .unwrap_or("token")
            .to_string();
        let policies = params
            .get("policies")
            .and_then(Value::as_array)
            .map(|p| {
                p.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| vec!["default".to_string()]);
        let record = inner.mint(&display_name, policies.clone());
        Ok(json!({
            "auth": {
                "client_token": record.token,
                "accessor": record.accessor,
                "policies": policies,
            }
        }))
    }

    async fn check_secret_engine_installed(
        &self,
        token: &str,
        mount: &str,
        engine_type: &str,
    ) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        inner.require_token("list mounts", token)?;
        Ok(inner.mounts.get(mount).map(String::as_str) == Some(engine_type))
    }

    async fn enable_kv_secret_engine(&self, token: &str, mount: &str, _version: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.require_token("enable KV engine", token)?;
        if inner.mounts.contains_key(mount) {
            return Err(Error::store_status("enable KV engine", 400));
        }
        inner.mounts.insert(mount.to_string(), "kv".to_string());
        Ok(())
    }

    async fn create_or_update_identity(
        &self,
        token: &str,
        name: &str,
        metadata: &HashMap<String, String>,
        policies: &[String],
    ) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.require_token("create identity", token)?;
        inner.next_id += 1;
        let next = inner.next_id;
        let entity = inner.entities.entry(name.to_string()).or_insert_with(|| {
            let mut e = Entity::default();
            e.id = format!("entity-{next:08x}");
            e
        });
        entity.metadata = metadata.clone();
        entity.policies = policies.to_vec();
        Ok(entity.id.clone())
    }

    async fn lookup_auth_handle(&self, token: &str, mount: &str) -> Result<String> {
        let inner = self.inner.lock().unwrap();
        inner.require_token("list auth methods", token)?;
        inner
            .auth_handles
            .get(mount)
            .cloned()
            .ok_or_else(|| Error::missing_field("auth method accessor"))
    }

    async fn create_or_update_user(
        &self,
        token: &str,
        mount: &str,
        username: &str,
        password: &str,
        _token_ttl: &str,
        _token_policies: &[String],
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.require_token("create login user", token)?;
        inner
            .users
            .insert(format!("{mount}/{username}"), password.to_string());
        Ok(())
    }

    async fn bind_user_to_identity(
        &self,
        token: &str,
        entity_id: &str,
        auth_handle: &str,
        _username: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.require_token("bind user to identity", token)?;
        let entity = inner
            .entities
            .values_mut()
            .find(|e| e.id == entity_id)
            .ok_or_else(|| Error::store_status("bind user to identity", 404))?;
        if !entity.alias_accessors.iter().any(|a| a == auth_handle) {
            entity.alias_accessors.push(auth_handle.to_string());
        }
        Ok(())
    }

    async fn create_or_update_identity_role(
        &self,
        token: &str,
        role_name: &str,
        key_name: &str,
        template: Option<&str>,
        token_ttl: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.require_token("create identity role", token)?;
        inner.identity_roles.insert(
            role_name.to_string(),
            json!({
                "key": key_name,
                "template": template,
                "ttl": token_ttl,
            }),
        );
        Ok(())
    }

    async fn internal_service_login(
        &self,
        mount: &str,
        username: &str,
        password: &str,
    ) -> Result<Value> {
        let mut inner = self.inner.lock().unwrap();
        let stored = inner.users.get(&format!("{mount}/{username}"));
        if stored.map(String::as_str) != Some(password) {
            return Err(Error::store_status("login", 403));
        }
        let record = inner.mint(username, vec!["default".to_string()]);
        Ok(json!({
            "client_token": record.token,
            "accessor": record.accessor,
            "policies": record.policies,
        }))
    }

    async fn read_secret(&self, token: &str, path: &str) -> Result<Value> {
        let inner = self.inner.lock().unwrap();
        inner.require_token("read secret", token)?;
        inner
            .secrets
            .get(path)
            .cloned()
            .ok_or_else(|| Error::store_status("read secret", 404))
    }

    async fn write_secret(&self, token: &str, path: &str, data: &Value) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.require_token("write secret", token)?;
        inner.secrets.insert(path.to_string(), data.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_then_unseal_reaches_ready() {
        let store = MemoryStoreClient::new();
        assert_eq!(
            store.health_check().await.unwrap(),
            HealthStatus::Uninitialized
        );

        let resp = store.init(5, 3).await.unwrap();
        assert_eq!(resp.keys_base64.len(), 5);
        assert!(!resp.root_token.is_empty());
        assert_eq!(store.health_check().await.unwrap(), HealthStatus::Sealed);

        store.unseal(&resp.keys_base64).await.unwrap();
        assert_eq!(store.health_check().await.unwrap(), HealthStatus::Ready);
    }

    #[tokio::test]
    async fn unseal_needs_threshold_shares() {
        let store = MemoryStoreClient::new();
        let resp = store.init(5, 3).await.unwrap();
        let too_few = resp.keys_base64[..2].to_vec();
        assert!(store.unseal(&too_few).await.is_err());
        assert_eq!(store.health_check().await.unwrap(), HealthStatus::Sealed);
    }

    #[tokio::test]
    async fn regen_root_token_mints_a_usable_token() {
        let store = MemoryStoreClient::new();
        let resp = store.init(5, 3).await.unwrap();
        store.unseal(&resp.keys_base64).await.unwrap();

        let root = store.regen_root_token(&resp.keys_base64).await.unwrap();
        let meta = store.lookup_self(root.as_str()).await.unwrap();
        assert_eq!(meta.policies, vec!["root"]);
    }

    #[tokio::test]
    async fn revoking_an_accessor_removes_the_token() {
        let (store, root) = MemoryStoreClient::ready();
        let created = store
            .create_token(&root, json!({"display_name": "worker"}))
            .await
            .unwrap();
        let token = created["auth"]["client_token"].as_str().unwrap().to_string();
        let accessor = created["auth"]["accessor"].as_str().unwrap().to_string();

        store.revoke_token_accessor(&root, &accessor).await.unwrap();
        assert!(!store.has_token(&token));
        assert!(store.revoked_accessors().contains(&accessor));
    }

    #[tokio::test]
    async fn login_checks_the_stored_password() {
        let (store, root) = MemoryStoreClient::ready();
        store
            .create_or_update_user(&root, "userpass", "svc", "pw1", "1h", &[])
            .await
            .unwrap();

        assert!(store
            .internal_service_login("userpass", "svc", "wrong")
            .await
            .is_err());
        let auth = store
            .internal_service_login("userpass", "svc", "pw1")
            .await
            .unwrap();
        assert!(auth["client_token"].as_str().is_some());
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let store = MemoryStoreClient::new();
        let result = store.install_policy("bogus", "p", "{}").await;
        assert!(matches!(
            result,
            Err(Error::StoreStatus { status: 403, .. })
        ));
    }
}
