//! Workload identity extracted from client certificates
//!
//! Workloads authenticate with SPIFFE SVIDs: the client certificate
//! carries a URI SAN of the form `spiffe://<trust-domain>/service/<name>`.
//! The trust domain must match the broker's configuration, and the
//! service name becomes the subject of every provisioning decision.

use rustls::pki_types::CertificateDer;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::FromDer;

use stoker_core::{Error, Result};

const SPIFFE_SCHEME: &str = "spiffe://";
const SERVICE_PATH_PREFIX: &str = "service/";

/// The verified identity of a connected workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadIdentity {
    pub trust_domain: String,
    pub service_name: String,
}

impl WorkloadIdentity {
    /// Parse a SPIFFE identity URI and check it against the expected
    /// trust domain
    pub fn parse(uri: &str, expected_trust_domain: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix(SPIFFE_SCHEME)
            .ok_or_else(|| Error::tls(format!("not a SPIFFE identity: {uri}")))?;
        let (trust_domain, path) = rest
            .split_once('/')
            .ok_or_else(|| Error::tls(format!("SPIFFE identity has no workload path: {uri}")))?;
        if trust_domain != expected_trust_domain {
            return Err(Error::tls(format!(
                "identity belongs to trust domain {trust_domain:?}, expected {expected_trust_domain:?}"
            )));
        }
        let workload_path = path
            .strip_prefix(SERVICE_PATH_PREFIX)
            .ok_or_else(|| Error::tls(format!("identity path is not a service path: {uri}")))?;
        // the service name is the final path segment
        let service_name = workload_path.rsplit('/').next().unwrap_or_default();
        if service_name.is_empty() {
            return Err(Error::tls(format!("malformed service name in {uri}")));
        }
        Ok(Self {
            trust_domain: trust_domain.to_string(),
            service_name: service_name.to_string(),
        })
    }

    /// Extract the identity from a client certificate's URI SANs
    pub fn from_client_cert(
        cert: &CertificateDer<'_>,
        expected_trust_domain: &str,
    ) -> Result<Self> {
        let (_, parsed) = x509_parser::certificate::X509Certificate::from_der(cert.as_ref())
            .map_err(|e| Error::tls(format!("cannot parse client certificate: {e}")))?;

        for extension in parsed.extensions() {
            if let ParsedExtension::SubjectAlternativeName(san) = extension.parsed_extension() {
                for name in &san.general_names {
                    if let GeneralName::URI(uri) = name {
                        return Self::parse(uri, expected_trust_domain);
                    }
                }
            }
        }
        Err(Error::tls(
            "client certificate carries no URI subject alternative name",
        ))
    }
}
