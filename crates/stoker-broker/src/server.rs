//! The broker's HTTPS surface
//!
//! One axum router per connection: the workload identity is fixed at
//! TLS accept time, so it rides into the handlers as an extension
//! rather than being re-derived per request. Any failure while
//! servicing a token request is answered with 403, never with detail
//! an unauthenticated caller could use.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use stoker_client::SecretStoreClient;
use stoker_core::{fileio, BrokerConfig, Error, Result, TokenProviderConfig, UserPasswordPair};
use stoker_provision::{
    policy, tokenconfig, CredentialGenerator, RandomCredentialGenerator, UserManager,
};

use crate::identity::WorkloadIdentity;
use crate::tls;

pub struct BrokerState {
    pub client: Arc<dyn SecretStoreClient>,
    pub config: BrokerConfig,
    pub tokens: TokenProviderConfig,
    pub secret_base_path: String,
    pub generator: Box<dyn CredentialGenerator>,
}

/// Parsed form body of a token request
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TokenRequest {
    /// Name the caller claims to act as; must match the certificate
    /// identity when present
    pub service_key: Option<String>,
    /// Respond with just the token string instead of the full auth JSON
    pub raw_token: bool,
    /// Secrets to copy from the bootstrap service's subtree; every name
    /// must be on the broker's allow-list
    pub known_secret_names: Vec<String>,
}

impl TokenRequest {
    pub fn parse(body: &[u8]) -> Self {
        let mut request = Self::default();
        for (key, value) in url::form_urlencoded::parse(body) {
            match key.as_ref() {
                "service_key" => {
                    if !value.is_empty() {
                        request.service_key = Some(value.into_owned());
                    }
                }
                "raw_token" => request.raw_token = value == "true" || value == "1",
                "known_secret_names" => {
                    if !value.is_empty() {
                        request.known_secret_names.push(value.into_owned());
                    }
                }
                other => debug!(key = other, "ignoring unknown form field"),
            }
        }
        request
    }
}

/// Issue credentials for an authenticated workload and seed any
/// requested known secrets into its subtree.
///
/// This runs the same service-account sequence the file provisioner
/// uses (default policy, identity entity, userpass login), so a
/// workload that later appears in the token config file converges on
/// the same account. The privileged token is re-read from disk on every
/// request; the provider may have rotated it since the broker started.
pub async fn issue_token(
    state: &BrokerState,
    service: &str,
    known_secret_names: &[String],
) -> Result<Value> {
    tokenconfig::validate_service_name(service)?;
    for name in known_secret_names {
        if !state.config.known_secret_names.iter().any(|k| k == name) {
            return Err(Error::invalid_config(format!(
                "secret name {name:?} is not on the broker allow-list"
            )));
        }
    }

    let privileged = fileio::load_token(&state.tokens.privileged_token_path)?;

    let document = serde_json::to_string(&policy::default_token_policy(
        service,
        &state.secret_base_path,
    ))?;
    let credentials = UserPasswordPair {
        user: service.to_string(),
        password: state.generator.generate_password()?.into_string(),
    };
    let manager = UserManager::new(
        state.client.clone(),
        state.tokens.userpass_mount.clone(),
        state.tokens.identity_key.clone(),
        state.tokens.default_token_ttl.clone(),
    );
    manager
        .create_user_with_identity(&privileged, service, &document, &credentials)
        .await?;

    let auth = state
        .client
        .internal_service_login(
            &state.tokens.userpass_mount,
            &credentials.user,
            &credentials.password,
        )
        .await?;
    let response = json!({ "auth": auth });

    let base = state.secret_base_path.trim_matches('/');
    for name in known_secret_names {
        let destination = format!("secret/{base}/{service}/{name}");
        if state.client.read_secret(&privileged, &destination).await.is_ok() {
            debug!(service, name, "known secret already seeded");
            continue;
        }
        let source = format!(
            "secret/{base}/{}/{name}",
            state.config.bootstrap_service
        );
        let value = state.client.read_secret(&privileged, &source).await?;
        state
            .client
            .write_secret(&privileged, &destination, &value)
            .await?;
        info!(service, name, "seeded known secret");
    }

    Ok(response)
}

async fn ping() -> &'static str {
    "pong"
}

async fn get_token(
    Extension(state): Extension<Arc<BrokerState>>,
    Extension(identity): Extension<WorkloadIdentity>,
    body: Bytes,
) -> Response {
    let request = TokenRequest::parse(&body);
    if let Some(claimed) = &request.service_key {
        if claimed != &identity.service_name {
            warn!(
                service = identity.service_name,
                claimed, "service_key does not match certificate identity"
            );
            return StatusCode::FORBIDDEN.into_response();
        }
    }
    let issued = issue_token(&state, &identity.service_name, &request.known_secret_names).await;
    match issued {
        Ok(response) if request.raw_token => {
            match response.pointer("/auth/client_token").and_then(Value::as_str) {
                Some(token) => token.to_string().into_response(),
                None => StatusCode::FORBIDDEN.into_response(),
            }
        }
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            warn!(service = identity.service_name, error = %e, "token request refused");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

async fn deny() -> StatusCode {
    StatusCode::FORBIDDEN
}

/// Build the per-connection router. A client whose certificate chain
/// verified but yielded no usable workload identity still gets served;
/// every request it makes is answered with 403.
fn router(state: Arc<BrokerState>, identity: Result<WorkloadIdentity>) -> Router {
    let Ok(identity) = identity else {
        return Router::new().fallback(deny);
    };
    Router::new()
        .route("/api/v2/ping", get(ping))
        .route("/api/v2/gettoken", post(get_token))
        .layer(Extension(state))
        .layer(Extension(identity))
}

pub struct BrokerServer {
    state: Arc<BrokerState>,
}

impl BrokerServer {
    pub fn new(
        client: Arc<dyn SecretStoreClient>,
        config: BrokerConfig,
        tokens: TokenProviderConfig,
        secret_base_path: impl Into<String>,
    ) -> Self {
        Self {
            state: Arc::new(BrokerState {
                client,
                config,
                tokens,
                secret_base_path: secret_base_path.into(),
                generator: Box::new(RandomCredentialGenerator),
            }),
        }
    }

    /// Accept mutual-TLS connections until interrupted
    pub async fn serve(&self) -> Result<()> {
        let acceptor = TlsAcceptor::from(tls::server_config(&self.state.config)?);
        let bind = (
            self.state.config.listen_host.as_str(),
            self.state.config.listen_port,
        );
        let listener = TcpListener::bind(bind)
            .await
            .map_err(|e| Error::transport(format!("cannot bind {}:{}: {e}", bind.0, bind.1)))?;
        info!(host = bind.0, port = bind.1, "identity broker listening");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let acceptor = acceptor.clone();
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        handle_connection(acceptor, stream, state, peer.to_string()).await;
                    });
                }
            }
        }
    }
}

async fn handle_connection(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    state: Arc<BrokerState>,
    peer: String,
) {
    let tls_stream = match acceptor.accept(stream).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(peer, error = %e, "TLS handshake failed");
            return;
        }
    };

    let identity = {
        let (_, session) = tls_stream.get_ref();
        session
            .peer_certificates()
            .and_then(|certs| certs.first())
            .ok_or_else(|| Error::tls("no client certificate presented"))
            .and_then(|cert| {
                WorkloadIdentity::from_client_cert(cert, &state.config.trust_domain)
            })
    };
    match &identity {
        Ok(identity) => debug!(peer, service = identity.service_name, "workload connected"),
        Err(e) => warn!(peer, error = %e, "unidentified client; requests will be refused"),
    }

    let service = TowerToHyperService::new(router(state, identity));
    if let Err(e) = auto::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(tls_stream), service)
        .await
    {
        debug!(peer, error = %e, "connection closed with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stoker_client::MemoryStoreClient;
    use tempfile::tempdir;

    fn state_with_store(dir: &std::path::Path) -> (Arc<MemoryStoreClient>, BrokerState, String) {
        let (store, root) = MemoryStoreClient::ready();
        let store = Arc::new(store);
        let token_path = dir.join("privileged-token.json");
        std::fs::write(&token_path, format!(r#"{{"root_token":"{root}"}}"#)).unwrap();

        let mut tokens = TokenProviderConfig::default();
        tokens.privileged_token_path = token_path;
        let state = BrokerState {
            client: store.clone(),
            config: BrokerConfig::default(),
            tokens,
            secret_base_path: "stoker".into(),
            generator: Box::new(RandomCredentialGenerator),
        };
        (store, state, root)
    }

    #[test]
    fn form_body_parses_repeated_secret_names() {
        let body = b"service_key=app-rules&raw_token=true\
            &known_secret_names=database&known_secret_names=message-bus";
        let request = TokenRequest::parse(body);
        assert_eq!(request.service_key.as_deref(), Some("app-rules"));
        assert!(request.raw_token);
        assert_eq!(request.known_secret_names, vec!["database", "message-bus"]);

        assert_eq!(TokenRequest::parse(b""), TokenRequest::default());
    }

    #[tokio::test]
    async fn issues_a_token_for_a_known_workload() {
        let dir = tempdir().unwrap();
        let (store, state, _root) = state_with_store(dir.path());

        let response = issue_token(&state, "device-camera", &[]).await.unwrap();
        let token = response["auth"]["client_token"].as_str().unwrap();
        assert!(store.has_token(token));
        assert!(store.policy("stoker-service-device-camera").is_some());
    }

    #[tokio::test]
    async fn seeds_known_secrets_once() {
        let dir = tempdir().unwrap();
        let (store, state, root) = state_with_store(dir.path());
        store
            .write_secret(
                &root,
                "secret/stoker/stoker-bootstrapper/database",
                &json!({"username": "svc", "password": "pw"}),
            )
            .await
            .unwrap();

        let names = vec!["database".to_string()];
        issue_token(&state, "app-rules", &names).await.unwrap();
        let seeded = store.secret("secret/stoker/app-rules/database").unwrap();
        assert_eq!(seeded["username"], "svc");

        // a second request must not clobber a secret the service may have
        // rotated since
        store
            .write_secret(&root, "secret/stoker/app-rules/database", &json!({"username": "rotated"}))
            .await
            .unwrap();
        issue_token(&state, "app-rules", &names).await.unwrap();
        let kept = store.secret("secret/stoker/app-rules/database").unwrap();
        assert_eq!(kept["username"], "rotated");
    }

    #[tokio::test]
    async fn unlisted_secret_names_are_refused() {
        let dir = tempdir().unwrap();
        let (store, state, _root) = state_with_store(dir.path());

        let names = vec!["private-keys".to_string()];
        assert!(issue_token(&state, "app-rules", &names).await.is_err());
        // refused before any store mutation
        assert!(store.policy("stoker-service-app-rules").is_none());
    }

    #[tokio::test]
    async fn bad_service_names_are_refused() {
        let dir = tempdir().unwrap();
        let (_store, state, _root) = state_with_store(dir.path());
        assert!(issue_token(&state, "../escape", &[]).await.is_err());
    }

    #[tokio::test]
    async fn unidentified_clients_get_403_responses() {
        use tower::ServiceExt;

        let dir = tempdir().unwrap();
        let (_store, state, _root) = state_with_store(dir.path());
        let app = router(
            Arc::new(state),
            Err(Error::tls("no client certificate presented")),
        );

        for (method, uri) in [("POST", "/api/v2/gettoken"), ("GET", "/api/v2/ping")] {
            let request = axum::http::Request::builder()
                .method(method)
                .uri(uri)
                .body(axum::body::Body::empty())
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
        }
    }
}
