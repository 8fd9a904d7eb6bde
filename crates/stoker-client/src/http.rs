//! reqwest-backed implementation of [`SecretStoreClient`]

use std::collections::HashMap;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::{Certificate, Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;
use zeroize::Zeroizing;

use stoker_core::{Error, InitResponse, Result, SecureString, StoreConfig};

use crate::api::{HealthStatus, SecretStoreClient};
use crate::types::{
    InitRequest, ListTokenAccessorsResponse, RootTokenControlResponse, TokenLookupResponse,
    TokenMetadata, UnsealRequest, UnsealResponse,
};

const TOKEN_HEADER: &str = "X-Vault-Token";

pub struct HttpStoreClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpStoreClient {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        match &config.ca_cert_path {
            Some(ca_path) => {
                let pem = std::fs::read(ca_path)?;
                let cert = Certificate::from_pem(&pem)
                    .map_err(|e| Error::tls(format!("invalid CA certificate {ca_path:?}: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            None => {
                // No CA to pin against; accept whatever certificate the
                // store presents (development deployments only)
                builder = builder.danger_accept_invalid_certs(true);
            }
        }
        let http = builder
            .build()
            .map_err(|e| Error::transport(format!("failed to build HTTP client: {e}")))?;

        let base_url = Url::parse(&config.base_url())
            .map_err(|e| Error::invalid_config(format!("invalid store URL: {e}")))?;

        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::invalid_config(format!("invalid API path {path}: {e}")))
    }

    fn request(&self, method: Method, url: Url, token: Option<&str>) -> RequestBuilder {
        let mut req = self.http.request(method, url);
        if let Some(token) = token {
            req = req.header(TOKEN_HEADER, token);
        }
        req
    }

    async fn send(
        &self,
        operation: &'static str,
        req: RequestBuilder,
    ) -> Result<reqwest::Response> {
        let resp = req
            .send()
            .await
            .map_err(|e| Error::transport(format!("{operation}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::store_status(operation, status.as_u16()));
        }
        Ok(resp)
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        operation: &'static str,
        req: RequestBuilder,
    ) -> Result<T> {
        self.send(operation, req)
            .await?
            .json::<T>()
            .await
            .map_err(|e| Error::transport(format!("{operation}: malformed response body: {e}")))
    }

    /// Undo the one-time-pad encoding of a generated root token
    fn decode_root_token(encoded_token: &str, otp: &str) -> Result<SecureString> {
        let mut encoded = Zeroizing::new(
            URL_SAFE_NO_PAD
                .decode(encoded_token)
                .map_err(|_| Error::crypto("generated root token is not valid base64"))?,
        );
        let pad = otp.as_bytes();
        if pad.len() != encoded.len() {
            return Err(Error::crypto(
                "generated root token and one-time pad lengths differ",
            ));
        }
        for (byte, pad_byte) in encoded.iter_mut().zip(pad) {
            *byte ^= pad_byte;
        }
        let token = std::str::from_utf8(&encoded)
            .map_err(|_| Error::crypto("decoded root token is not valid UTF-8"))?;
        Ok(SecureString::from(token))
    }
}

#[async_trait]
impl SecretStoreClient for HttpStoreClient {
    async fn health_check(&self) -> Result<HealthStatus> {
        let url = self.endpoint("v1/sys/health")?;
        let resp = self
            .request(Method::GET, url, None)
            .send()
            .await
            .map_err(|e| Error::transport(format!("health check: {e}")))?;
        let status = HealthStatus::from_code(resp.status().as_u16());
        debug!(?status, "secret store health probe");
        Ok(status)
    }

    async fn init(&self, secret_shares: u8, secret_threshold: u8) -> Result<InitResponse> {
        let url = self.endpoint("v1/sys/init")?;
        let body = InitRequest {
            secret_shares,
            secret_threshold,
        };
        let req = self.request(Method::POST, url, None).json(&body);
        let resp: InitResponse = self.send_json("init", req).await?;
        info!(secret_shares, secret_threshold, "secret store initialized");
        Ok(resp)
    }

    async fn unseal(&self, keys_base64: &[String]) -> Result<()> {
        for (i, key) in keys_base64.iter().enumerate() {
            let url = self.endpoint("v1/sys/unseal")?;
            let body = UnsealRequest {
                key: key.clone(),
                reset: false,
            };
            let req = self.request(Method::PUT, url, None).json(&body);
            let resp: UnsealResponse = self.send_json("unseal", req).await?;
            if !resp.sealed {
                info!(shares_used = i + 1, "secret store unsealed");
                return Ok(());
            }
            debug!(progress = resp.progress, threshold = resp.t, "unseal share accepted");
        }
        Err(Error::crypto(
            "secret store remained sealed after all key shares were submitted",
        ))
    }

    async fn regen_root_token(&self, keys_base64: &[String]) -> Result<SecureString> {
        // Clear any in-flight attempt; its nonce and progress would
        // otherwise poison ours.
        let cancel = self.endpoint("v1/sys/generate-root/attempt")?;
        self.send(
            "generate-root cancel",
            self.request(Method::DELETE, cancel, None),
        )
        .await?;

        let start = self.endpoint("v1/sys/generate-root/attempt")?;
        let control: RootTokenControlResponse = self
            .send_json("generate-root start", self.request(Method::PUT, start, None))
            .await?;
        if control.otp.is_empty() || control.nonce.is_empty() {
            return Err(Error::missing_field("otp/nonce"));
        }

        for key in keys_base64 {
            let update = self.endpoint("v1/sys/generate-root/update")?;
            let body = json!({ "key": key, "nonce": control.nonce });
            let req = self.request(Method::PUT, update, None).json(&body);
            let progress: RootTokenControlResponse =
                self.send_json("generate-root update", req).await?;
            if progress.complete {
                if progress.encoded_token.is_empty() {
                    return Err(Error::missing_field("encoded_token"));
                }
                info!("root token regenerated from key shares");
                return Self::decode_root_token(&progress.encoded_token, &control.otp);
            }
        }
        Err(Error::crypto(
            "root token generation did not complete after all key shares were submitted",
        ))
    }

    async fn revoke_self(&self, token: &str) -> Result<()> {
        let url = self.endpoint("v1/auth/token/revoke-self")?;
        self.send("revoke-self", self.request(Method::POST, url, Some(token)))
            .await?;
        Ok(())
    }

    async fn list_token_accessors(&self, token: &str) -> Result<Vec<String>> {
        let mut url = self.endpoint("v1/auth/token/accessors")?;
        url.set_query(Some("list=true"));
        let resp: ListTokenAccessorsResponse = self
            .send_json(
                "list token accessors",
                self.request(Method::GET, url, Some(token)),
            )
            .await?;
        Ok(resp.data.keys)
    }

    async fn lookup_token_accessor(&self, token: &str, accessor: &str) -> Result<TokenMetadata> {
        let url = self.endpoint("v1/auth/token/lookup-accessor")?;
        let req = self
            .request(Method::POST, url, Some(token))
            .json(&json!({ "accessor": accessor }));
        let resp: TokenLookupResponse = self.send_json("lookup token accessor", req).await?;
        Ok(resp.data)
    }

    async fn lookup_self(&self, token: &str) -> Result<TokenMetadata> {
        let url = self.endpoint("v1/auth/token/lookup-self")?;
        let resp: TokenLookupResponse = self
            .send_json("lookup-self", self.request(Method::GET, url, Some(token)))
            .await?;
        Ok(resp.data)
    }

    async fn revoke_token_accessor(&self, token: &str, accessor: &str) -> Result<()> {
        let url = self.endpoint("v1/auth/token/revoke-accessor")?;
        let req = self
            .request(Method::POST, url, Some(token))
            .json(&json!({ "accessor": accessor }));
        self.send("revoke token accessor", req).await?;
        Ok(())
    }

    async fn install_policy(&self, token: &str, name: &str, document: &str) -> Result<()> {
        let url = self.endpoint(&format!("v1/sys/policies/acl/{name}"))?;
        let req = self
            .request(Method::PUT, url, Some(token))
            .json(&json!({ "policy": document }));
        self.send("install policy", req).await?;
        debug!(policy = name, "installed ACL policy");
        Ok(())
    }

    async fn create_token(&self, token: &str, params: Value) -> Result<Value> {
        let url = self.endpoint("v1/auth/token/create")?;
        let req = self.request(Method::POST, url, Some(token)).json(&params);
        self.send_json("create token", req).await
    }

    async fn check_secret_engine_installed(
        &self,
        token: &str,
        mount: &str,
        engine_type: &str,
    ) -> Result<bool> {
        let url = self.endpoint("v1/sys/mounts")?;
        let mounts: Value = self
            .send_json("list mounts", self.request(Method::GET, url, Some(token)))
            .await?;
        let mount_key = format!("{}/", mount.trim_end_matches('/'));
        let installed = mounts
            .get("data")
            .unwrap_or(&mounts)
            .get(&mount_key)
            .and_then(|m| m.get("type"))
            .and_then(Value::as_str)
            == Some(engine_type);
        Ok(installed)
    }

    async fn enable_kv_secret_engine(&self, token: &str, mount: &str, version: &str) -> Result<()> {
        let url = self.endpoint(&format!("v1/sys/mounts/{mount}"))?;
        let body = json!({
            "type": "kv",
            "options": { "version": version },
        });
        let req = self.request(Method::POST, url, Some(token)).json(&body);
        self.send("enable KV engine", req).await?;
        info!(mount, version, "enabled KV secrets engine");
        Ok(())
    }

    async fn create_or_update_identity(
        &self,
        token: &str,
        name: &str,
        metadata: &HashMap<String, String>,
        policies: &[String],
    ) -> Result<String> {
        let url = self.endpoint(&format!("v1/identity/entity/name/{name}"))?;
        let body = json!({
            "metadata": metadata,
            "policies": policies,
        });
        let req = self.request(Method::POST, url, Some(token)).json(&body);
        let resp = self.send("create identity", req).await?;

        // A create returns the new id; an update of an existing entity
        // returns 204 with no body, so fall back to a lookup by name.
        if resp.status() != StatusCode::NO_CONTENT {
            let value: Value = resp.json().await.unwrap_or(Value::Null);
            if let Some(id) = value
                .get("data")
                .and_then(|d| d.get("id"))
                .and_then(Value::as_str)
            {
                return Ok(id.to_string());
            }
        }

        let lookup = self.endpoint(&format!("v1/identity/entity/name/{name}"))?;
        let value: Value = self
            .send_json(
                "lookup identity",
                self.request(Method::GET, lookup, Some(token)),
            )
            .await?;
        value
            .get("data")
            .and_then(|d| d.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::missing_field("identity entity id"))
    }

    async fn lookup_auth_handle(&self, token: &str, mount: &str) -> Result<String> {
        let url = self.endpoint("v1/sys/auth")?;
        let value: Value = self
            .send_json(
                "list auth methods",
                self.request(Method::GET, url, Some(token)),
            )
            .await?;
        let mount_key = format!("{}/", mount.trim_end_matches('/'));
        value
            .get("data")
            .unwrap_or(&value)
            .get(&mount_key)
            .and_then(|m| m.get("accessor"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::missing_field("auth method accessor"))
    }

    async fn create_or_update_user(
        &self,
        token: &str,
        mount: &str,
        username: &str,
        password: &str,
        token_ttl: &str,
        token_policies: &[String],
    ) -> Result<()> {
        let url = self.endpoint(&format!("v1/auth/{mount}/users/{username}"))?;
        let body = json!({
            "password": password,
            "token_period": token_ttl,
            "token_policies": token_policies,
        });
        let req = self.request(Method::POST, url, Some(token)).json(&body);
        self.send("create login user", req).await?;
        debug!(username, mount, "created or updated login user");
        Ok(())
    }

    async fn bind_user_to_identity(
        &self,
        token: &str,
        entity_id: &str,
        auth_handle: &str,
        username: &str,
    ) -> Result<()> {
        // Aliases are not upserted by the store; creating a duplicate
        // fails, so check the entity's existing aliases first.
        let lookup = self.endpoint(&format!("v1/identity/entity/id/{entity_id}"))?;
        let entity: Value = self
            .send_json(
                "lookup identity",
                self.request(Method::GET, lookup, Some(token)),
            )
            .await?;
        let already_bound = entity
            .get("data")
            .and_then(|d| d.get("aliases"))
            .and_then(Value::as_array)
            .is_some_and(|aliases| {
                aliases.iter().any(|a| {
                    a.get("mount_accessor").and_then(Value::as_str) == Some(auth_handle)
                })
            });
        if already_bound {
            debug!(entity_id, "login user already bound to identity");
            return Ok(());
        }

        let url = self.endpoint("v1/identity/entity-alias")?;
        let body = json!({
            "name": username,
            "canonical_id": entity_id,
            "mount_accessor": auth_handle,
        });
        let req = self.request(Method::POST, url, Some(token)).json(&body);
        self.send("bind user to identity", req).await?;
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
        let url = self.endpoint(&format!("v1/identity/oidc/role/{role_name}"))?;
        let mut body = json!({
            "key": key_name,
            "ttl": token_ttl,
        });
        if let Some(template) = template {
            body["template"] = Value::String(template.to_string());
        }
        let req = self.request(Method::POST, url, Some(token)).json(&body);
        self.send("create identity role", req).await?;
        Ok(())
    }

    async fn internal_service_login(
        &self,
        mount: &str,
        username: &str,
        password: &str,
    ) -> Result<Value> {
        let url = self.endpoint(&format!("v1/auth/{mount}/login/{username}"))?;
        let req = self
            .request(Method::POST, url, None)
            .json(&json!({ "password": password }));
        let value: Value = self.send_json("login", req).await?;
        value
            .get("auth")
            .cloned()
            .ok_or_else(|| Error::missing_field("auth"))
    }

    async fn read_secret(&self, token: &str, path: &str) -> Result<Value> {
        let url = self.endpoint(&format!("v1/{}", path.trim_start_matches('/')))?;
        let value: Value = self
            .send_json("read secret", self.request(Method::GET, url, Some(token)))
            .await?;
        value
            .get("data")
            .cloned()
            .ok_or_else(|| Error::missing_field("data"))
    }

    async fn write_secret(&self, token: &str, path: &str, data: &Value) -> Result<()> {
        let url = self.endpoint(&format!("v1/{}", path.trim_start_matches('/')))?;
        let req = self.request(Method::POST, url, Some(token)).json(data);
        self.send("write secret", req).await?;
        Ok(())
    }
}
