//! The `stoker broker` command

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use stoker_broker::BrokerServer;
use stoker_client::{HttpStoreClient, SecretStoreClient};

use crate::cli::BrokerArgs;

pub async fn run(_args: BrokerArgs, config_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let client: Arc<dyn SecretStoreClient> = Arc::new(
        HttpStoreClient::new(&config.store).context("building secret store client")?,
    );

    let server = BrokerServer::new(
        client,
        config.broker.clone(),
        config.tokens.clone(),
        config.store.secret_base_path.clone(),
    );
    server.serve().await.context("running identity broker")
}
