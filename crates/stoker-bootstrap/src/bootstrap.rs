//! Polling loop that drives the store from any health state to ready
//!
//! The loop keeps polling through transient failures and unexpected
//! health codes; only terminal errors (crypto, config, I/O) abort it.
//! A freshly unsealed store may refuse requests while it warms up, so
//! each unseal is followed by a one-second readiness poll before the
//! main loop takes over again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time;
use tracing::{debug, info, warn};

use stoker_client::{HealthStatus, SecretStoreClient};
use stoker_core::{Error, InitResponse, Result, StoreConfig};
use stoker_crypto::MasterKeyGuard;

use crate::initfile;
use crate::state::{plan, Action};

/// How the loop settled
#[derive(Debug)]
pub enum BootstrapOutcome {
    /// The store is active and unsealed; carries the (decrypted) init
    /// response with key shares and possibly a root token
    Ready(InitResponse),
    /// Another node is active; this node performed no bootstrap work
    Standby,
}

pub struct Bootstrapper {
    client: Arc<dyn SecretStoreClient>,
    config: StoreConfig,
}

impl Bootstrapper {
    pub fn new(client: Arc<dyn SecretStoreClient>, config: StoreConfig) -> Self {
        Self { client, config }
    }

    /// Drive the store to the ready state, initializing and unsealing as
    /// needed
    pub async fn run(&self, guard: &MasterKeyGuard) -> Result<BootstrapOutcome> {
        let interval = Duration::from_secs(self.config.poll_interval_secs);
        loop {
            let status = match self.client.health_check().await {
                Ok(status) => status,
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "health probe failed; will retry");
                    time::sleep(interval).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let action = plan(status);
            debug!(?status, ?action, "bootstrap step");
            let step = match action {
                Action::Finish => {
                    let resp = initfile::load_init_response(&self.config, guard)?;
                    info!("secret store is ready");
                    return Ok(BootstrapOutcome::Ready(resp));
                }
                Action::StandBy => {
                    info!("secret store is on standby; nothing to bootstrap");
                    return Ok(BootstrapOutcome::Standby);
                }
                Action::Initialize => self.initialize(guard).await,
                Action::Unseal => self.unseal(guard).await,
                Action::Retry => Ok(()),
            };

            match step {
                Ok(()) => {}
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "bootstrap step failed; will retry")
                }
                Err(e) => return Err(e),
            }
            time::sleep(interval).await;
        }
    }

    async fn initialize(&self, guard: &MasterKeyGuard) -> Result<()> {
        let resp = self
            .client
            .init(self.config.secret_shares, self.config.secret_threshold)
            .await?;

        // Persist a copy; saving wipes plaintext shares when the guard is
        // encrypting, and unsealing still needs them. The root token is
        // stripped up front when legacy roots are to be revoked anyway.
        let mut to_disk = resp.clone();
        if self.config.revoke_root_tokens {
            to_disk.strip_root_token();
        }
        initfile::save_init_response(&self.config, guard, &mut to_disk)?;

        self.client.unseal(&resp.keys_base64).await?;
        self.wait_until_ready().await
    }

    async fn unseal(&self, guard: &MasterKeyGuard) -> Result<()> {
        let resp = initfile::load_init_response(&self.config, guard)?;
        self.client.unseal(&resp.keys_base64).await?;
        self.wait_until_ready().await
    }

    /// Block until the store answers health with ready.
    ///
    /// A single spawned task polls at a fixed one-second tick and signals
    /// completion over a channel, keeping the tick cadence independent of
    /// the main loop's poll interval.
    async fn wait_until_ready(&self) -> Result<()> {
        let (done, settled) = oneshot::channel::<Result<()>>();
        let client = self.client.clone();
        tokio::spawn(async move {
            let mut tick = time::interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                match client.health_check().await {
                    Ok(HealthStatus::Ready) => {
                        let _ = done.send(Ok(()));
                        return;
                    }
                    Ok(status) => debug!(?status, "store not ready yet"),
                    Err(e) if e.is_transient() => {
                        warn!(error = %e, "readiness probe failed; will retry")
                    }
                    Err(e) => {
                        let _ = done.send(Err(e));
                        return;
                    }
                }
            }
        });
        settled
            .await
            .map_err(|_| Error::transport("readiness poll task exited unexpectedly"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stoker_client::MemoryStoreClient;
    use stoker_crypto::KeyDeriver;
    use tempfile::tempdir;

    fn test_setup(dir: &std::path::Path) -> (Arc<MemoryStoreClient>, StoreConfig, MasterKeyGuard) {
        let mut config = StoreConfig::default();
        config.token_folder_path = dir.to_path_buf();
        config.poll_interval_secs = 0;
        let guard = MasterKeyGuard::new(KeyDeriver::new(dir));
        (Arc::new(MemoryStoreClient::new()), config, guard)
    }

    #[tokio::test]
    async fn bootstraps_an_uninitialized_store() {
        let dir = tempdir().unwrap();
        let (client, config, guard) = test_setup(dir.path());
        let bootstrapper = Bootstrapper::new(client.clone(), config.clone());

        let outcome = bootstrapper.run(&guard).await.unwrap();
        let resp = match outcome {
            BootstrapOutcome::Ready(resp) => resp,
            other => panic!("expected Ready, got {other:?}"),
        };
        assert_eq!(resp.keys_base64.len(), 5);
        // revoke_root_tokens defaults on, so the root token never hits disk
        assert!(resp.root_token.is_empty());
        assert!(config.init_response_path().exists());
        assert_eq!(
            client.health_check().await.unwrap(),
            HealthStatus::Ready
        );
    }

    #[tokio::test]
    async fn keeps_the_root_token_when_revocation_is_disabled() {
        let dir = tempdir().unwrap();
        let (client, mut config, guard) = test_setup(dir.path());
        config.revoke_root_tokens = false;
        let bootstrapper = Bootstrapper::new(client.clone(), config.clone());

        let outcome = bootstrapper.run(&guard).await.unwrap();
        match outcome {
            BootstrapOutcome::Ready(resp) => assert!(!resp.root_token.is_empty()),
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unseals_a_sealed_store_from_the_persisted_file() {
        let dir = tempdir().unwrap();
        let (client, config, guard) = test_setup(dir.path());
        let bootstrapper = Bootstrapper::new(client.clone(), config.clone());

        bootstrapper.run(&guard).await.unwrap();
        client.seal();

        let outcome = bootstrapper.run(&guard).await.unwrap();
        assert!(matches!(outcome, BootstrapOutcome::Ready(_)));
        assert_eq!(
            client.health_check().await.unwrap(),
            HealthStatus::Ready
        );
    }

    #[tokio::test]
    async fn standby_node_does_no_bootstrap_work() {
        let dir = tempdir().unwrap();
        let (client, config, guard) = test_setup(dir.path());
        let bootstrapper = Bootstrapper::new(client.clone(), config.clone());

        bootstrapper.run(&guard).await.unwrap();
        client.set_standby(true);

        let outcome = bootstrapper.run(&guard).await.unwrap();
        assert!(matches!(outcome, BootstrapOutcome::Standby));
    }

    #[tokio::test]
    async fn polls_through_warmup_codes() {
        let dir = tempdir().unwrap();
        let (client, config, guard) = test_setup(dir.path());
        client.set_warmup_polls(3);
        let bootstrapper = Bootstrapper::new(client.clone(), config.clone());

        let outcome = bootstrapper.run(&guard).await.unwrap();
        assert!(matches!(outcome, BootstrapOutcome::Ready(_)));
        assert!(client.health_probes() > 3);
    }
}
