//! The `stoker provision` commands

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use stoker_client::{HttpStoreClient, SecretStoreClient};
use stoker_core::fileio;
use stoker_provision::FileTokenProvider;

use crate::cli::{ProvisionRegenArgs, ProvisionRunArgs};

/// Provision credentials for every configured service, then revoke the
/// issuing token when configured for one-shot operation.
pub async fn run(_args: ProvisionRunArgs, config_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let client: Arc<dyn SecretStoreClient> = Arc::new(
        HttpStoreClient::new(&config.store).context("building secret store client")?,
    );

    let privileged = fileio::load_token(&config.tokens.privileged_token_path)
        .context("loading privileged token")?;
    let provider = FileTokenProvider::new(
        client.clone(),
        config.tokens.clone(),
        config.store.secret_base_path.clone(),
    );

    let result = provider.run_all(&privileged).await;

    if config.store.revoke_issuing_token {
        // the token outlived its purpose either way
        if let Err(e) = client.revoke_self(&privileged).await {
            warn!(error = %e, "failed to revoke issuing token");
        } else {
            info!("issuing token revoked");
        }
    }

    result.context("provisioning service credentials")
}

/// Regenerate one service's credentials; unlike a bulk run this aborts
/// on the first error.
pub async fn regen(args: ProvisionRegenArgs, config_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let client: Arc<dyn SecretStoreClient> = Arc::new(
        HttpStoreClient::new(&config.store).context("building secret store client")?,
    );

    let privileged = fileio::load_token(&config.tokens.privileged_token_path)
        .context("loading privileged token")?;
    let provider = FileTokenProvider::new(
        client,
        config.tokens.clone(),
        config.store.secret_base_path.clone(),
    );

    provider
        .regen_token(&privileged, &args.service)
        .await
        .with_context(|| format!("regenerating credentials for {}", args.service))?;
    info!(service = args.service, "credentials regenerated");
    Ok(())
}
