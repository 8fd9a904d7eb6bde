//! Token and credential provisioning against the secret store
//!
//! - [`maintenance`]: transient root tokens, the token-issuing token,
//!   and token accessor sweeps
//! - [`policy`]: per-service ACL policy construction and merging
//! - [`tokenconfig`]: the per-service token configuration file and the
//!   `STOKER_ADD_SECRETSTORE_TOKENS` list
//! - [`users`]: login users bound to identity entities
//! - [`provider`]: the file-based credential provisioner

pub mod maintenance;
pub mod password;
pub mod policy;
pub mod provider;
pub mod tokenconfig;
pub mod users;

pub use maintenance::{
    RevokeGuard, TokenMaintenance, TransientRoot, TOKEN_CREATOR_POLICY, TOKEN_CREATOR_POLICY_NAME,
};
pub use password::{CredentialGenerator, RandomCredentialGenerator};
pub use provider::FileTokenProvider;
pub use users::UserManager;
