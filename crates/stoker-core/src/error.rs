//! Error types for stoker-core

use thiserror::Error;

/// Result type alias using stoker-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for Stoker
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Service name rejected by validation
    #[error("Invalid service name: {name}")]
    InvalidServiceName { name: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Hex decoding error
    #[error("Hex decoding error: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Network-level failure talking to the secret store; retried by the
    /// bootstrap polling loop, fatal everywhere else
    #[error("Secret store transport error: {message}")]
    Transport { message: String },

    /// The secret store answered with an unexpected HTTP status
    #[error("Secret store request '{operation}' failed with status {status}")]
    StoreStatus { operation: String, status: u16 },

    /// Key derivation or authenticated-encryption failure; may indicate
    /// tampering and is never retried
    #[error("Cryptographic failure: {message}")]
    Crypto { message: String },

    /// Entropy hook executable failed or produced unusable output
    #[error("Entropy hook failure: {message}")]
    EntropyHook { message: String },

    /// TLS material could not be loaded or validated
    #[error("TLS error: {message}")]
    Tls { message: String },

    /// A required field was absent from a secret store response
    #[error("Missing field in secret store response: {field}")]
    MissingField { field: String },
}

impl Error {
    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a store status error
    pub fn store_status(operation: impl Into<String>, status: u16) -> Self {
        Self::StoreStatus {
            operation: operation.into(),
            status,
        }
    }

    /// Create a crypto error
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Create an entropy hook error
    pub fn entropy_hook(message: impl Into<String>) -> Self {
        Self::EntropyHook {
            message: message.into(),
        }
    }

    /// Create a TLS error
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Whether the error reflects transient store/network state.
    ///
    /// Transient errors are retried indefinitely by the bootstrap polling
    /// loop; everything else (file I/O, crypto, configuration) is terminal.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::StoreStatus { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_status_errors_are_transient() {
        assert!(Error::transport("connection refused").is_transient());
        assert!(Error::store_status("init", 500).is_transient());
    }

    #[test]
    fn config_io_and_crypto_errors_are_terminal() {
        assert!(!Error::invalid_config("bad").is_transient());
        assert!(!Error::crypto("authentication failed").is_transient());
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(!io.is_transient());
    }
}
