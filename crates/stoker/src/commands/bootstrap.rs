//! The `stoker bootstrap` command
//!
//! Drives the store from cold to serving: init/unseal, transient root
//! regeneration, stale-token sweeps, KV engine enablement, and the
//! token-issuing token. The input keying material is wiped and the
//! transient root revoked on every exit path, success or not.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use stoker_bootstrap::{initfile, BootstrapOutcome, Bootstrapper};
use stoker_client::{HttpStoreClient, SecretStoreClient};
use stoker_core::{fileio, InitResponse, StokerConfig};
use stoker_crypto::{KeyDeriver, MasterKeyGuard};
use stoker_provision::{TokenMaintenance, TransientRoot};

use crate::cli::BootstrapArgs;

const KV_MOUNT: &str = "secret";
const KV_VERSION: &str = "1";

pub async fn run(_args: BootstrapArgs, config_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let client: Arc<dyn SecretStoreClient> = Arc::new(
        HttpStoreClient::new(&config.store).context("building secret store client")?,
    );

    let mut guard = MasterKeyGuard::new(KeyDeriver::new(&config.store.token_folder_path));
    if let Some(hook) = &config.store.ikm_hook {
        guard
            .load_ikm(hook)
            .await
            .context("loading input keying material from entropy hook")?;
    }

    let result = bootstrap_flow(client, &config, &guard).await;
    guard.wipe_ikm();
    result
}

async fn bootstrap_flow(
    client: Arc<dyn SecretStoreClient>,
    config: &StokerConfig,
    guard: &MasterKeyGuard,
) -> Result<()> {
    let bootstrapper = Bootstrapper::new(client.clone(), config.store.clone());
    let resp = match bootstrapper.run(guard).await? {
        BootstrapOutcome::Ready(resp) => resp,
        BootstrapOutcome::Standby => {
            info!("standby node; bootstrap complete");
            return Ok(());
        }
    };

    let root = TransientRoot::generate(client.clone(), &resp.keys_base64)
        .await
        .context("regenerating root token from key shares")?;
    let result = privileged_work(&client, config, guard, &resp, &root).await;
    root.revoke().await;
    result
}

/// Everything that needs the transient root token
async fn privileged_work(
    client: &Arc<dyn SecretStoreClient>,
    config: &StokerConfig,
    guard: &MasterKeyGuard,
    resp: &InitResponse,
    root: &TransientRoot,
) -> Result<()> {
    let maintenance = TokenMaintenance::new(client.clone());

    maintenance
        .revoke_non_root_tokens(root.token())
        .await
        .context("sweeping stale service tokens")?;

    if !client
        .check_secret_engine_installed(root.token(), KV_MOUNT, "kv")
        .await?
    {
        client
            .enable_kv_secret_engine(root.token(), KV_MOUNT, KV_VERSION)
            .await
            .context("enabling KV secrets engine")?;
    }

    if let Some(path) = &config.store.admin_token_path {
        let (response, revoke) = maintenance
            .create_token_issuing_token(root.token())
            .await
            .context("creating token-issuing token")?;
        fileio::write_json_restricted(path, &response)
            .with_context(|| format!("writing token-issuing token to {}", path.display()))?;
        info!(path = %path.display(), "token-issuing token written");
        // the provisioner picks the token up from the file later
        revoke.disarm();
    }

    if config.store.revoke_root_tokens {
        maintenance
            .revoke_root_tokens(root.token())
            .await
            .context("revoking legacy root tokens")?;
        let mut stripped = resp.clone();
        stripped.strip_root_token();
        initfile::save_init_response(&config.store, guard, &mut stripped)
            .context("stripping root token from persisted init response")?;
    }

    info!("bootstrap complete");
    Ok(())
}
