//! # stoker-core
//!
//! Core library for the stoker secret-store bootstrapper providing:
//! - Configuration file parsing (stoker.yaml) with env-var overrides
//! - The shared error type and transient/terminal classification
//! - Wire types shared across crates (init response, credential pair)
//! - Restricted-permission file helpers and secure string handling

pub mod config;
pub mod error;
pub mod fileio;
pub mod secure;
pub mod types;

pub use config::{BrokerConfig, StokerConfig, StoreConfig, TokenProviderConfig};
pub use error::{Error, Result};
pub use secure::SecureString;
pub use types::{InitResponse, UserPasswordPair};
