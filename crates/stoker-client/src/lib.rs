//! Secret store API client
//!
//! [`SecretStoreClient`] is the seam between the orchestration crates
//! and the store; [`HttpStoreClient`] talks to a live store over HTTP
//! and [`MemoryStoreClient`] stands in for it in tests.

pub mod api;
pub mod http;
pub mod mock;
pub mod types;

pub use api::{HealthStatus, SecretStoreClient};
pub use http::HttpStoreClient;
pub use mock::MemoryStoreClient;
pub use types::TokenMetadata;
