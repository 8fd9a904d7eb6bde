//! Mutual-TLS workload-identity token broker
//!
//! Late-arriving services that were not present at bootstrap time
//! authenticate with a SPIFFE client certificate instead of a
//! pre-provisioned file. The broker verifies the certificate, reads the
//! workload's service name out of its identity URI, and answers
//! `/api/v2/gettoken` with freshly issued store credentials.

pub mod identity;
pub mod server;
pub mod tls;

pub use identity::WorkloadIdentity;
pub use server::{BrokerServer, BrokerState, TokenRequest};
