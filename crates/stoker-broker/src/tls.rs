//! Mutual-TLS server configuration
//!
//! The broker only talks to workloads that present a client certificate
//! chained to the configured CA; the workload's identity is read from
//! that certificate, so verification here is the authentication step.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};

use stoker_core::{BrokerConfig, Error, Result};

pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| Error::tls(format!("cannot open certificate {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<std::io::Result<_>>()
        .map_err(|e| Error::tls(format!("cannot parse certificate {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(Error::tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| Error::tls(format!("cannot open private key {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::tls(format!("cannot parse private key {}: {e}", path.display())))?
        .ok_or_else(|| Error::tls(format!("no private key found in {}", path.display())))
}

/// Build the broker's TLS server config: server cert/key plus mandatory
/// client-certificate verification against the CA bundle.
pub fn server_config(config: &BrokerConfig) -> Result<Arc<ServerConfig>> {
    let certs = load_certs(&config.cert_path)?;
    let key = load_private_key(&config.key_path)?;

    let mut roots = RootCertStore::empty();
    for ca in load_certs(&config.ca_path)? {
        roots
            .add(ca)
            .map_err(|e| Error::tls(format!("invalid CA certificate: {e}")))?;
    }
    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| Error::tls(format!("cannot build client verifier: {e}")))?;

    let server = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| Error::tls(format!("invalid server certificate or key: {e}")))?;
    Ok(Arc::new(server))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_files_surface_as_tls_errors() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.pem");
        assert!(matches!(load_certs(&missing), Err(Error::Tls { .. })));
        assert!(matches!(load_private_key(&missing), Err(Error::Tls { .. })));
    }

    #[test]
    fn empty_pem_is_rejected() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty.pem");
        std::fs::write(&empty, "").unwrap();
        assert!(load_certs(&empty).is_err());
        assert!(load_private_key(&empty).is_err());
    }
}
