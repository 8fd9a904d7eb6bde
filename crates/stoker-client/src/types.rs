//! Request and response bodies for the secret store HTTP API

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct InitRequest {
    pub secret_shares: u8,
    pub secret_threshold: u8,
}

#[derive(Debug, Serialize)]
pub struct UnsealRequest {
    pub key: String,
    pub reset: bool,
}

#[derive(Debug, Deserialize)]
pub struct UnsealResponse {
    pub sealed: bool,
    #[serde(default)]
    pub t: u8,
    #[serde(default)]
    pub n: u8,
    #[serde(default)]
    pub progress: u8,
}

/// Shared shape of the generate-root start and update responses. The
/// start call carries `otp` and `nonce`; update calls report `progress`
/// and, once `complete`, the XOR-encoded root token.
#[derive(Debug, Default, Deserialize)]
pub struct RootTokenControlResponse {
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub encoded_token: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub otp: String,
    #[serde(default)]
    pub progress: u8,
}

#[derive(Debug, Deserialize)]
pub struct ListTokenAccessorsData {
    #[serde(default)]
    pub keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListTokenAccessorsResponse {
    pub data: ListTokenAccessorsData,
}

/// Token metadata as returned by lookup-self and lookup-accessor
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenMetadata {
    #[serde(default)]
    pub accessor: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub renewable: bool,
    #[serde(default)]
    pub ttl: i64,
    #[serde(default)]
    pub expire_time: Option<String>,
    #[serde(default)]
    pub period: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenLookupResponse {
    pub data: TokenMetadata,
}
