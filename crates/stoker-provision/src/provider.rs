//! File-based credential provisioning
//!
//! For each configured service: build its policy, run the service
//! account sequence, log in with fresh credentials, and drop the
//! resulting auth material into a 0600 file in the service's own
//! directory. Bulk runs keep going past per-service failures; a
//! single-service regeneration aborts on the first error.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, warn};

use stoker_client::SecretStoreClient;
use stoker_core::{fileio, Error, Result, TokenProviderConfig, UserPasswordPair};

use crate::password::{CredentialGenerator, RandomCredentialGenerator};
use crate::policy;
use crate::tokenconfig::{self, ServiceTokenConfig, TokenConfigs};
use crate::users::UserManager;

pub struct FileTokenProvider {
    client: Arc<dyn SecretStoreClient>,
    config: TokenProviderConfig,
    secret_base_path: String,
    generator: Box<dyn CredentialGenerator>,
}

impl FileTokenProvider {
    pub fn new(
        client: Arc<dyn SecretStoreClient>,
        config: TokenProviderConfig,
        secret_base_path: impl Into<String>,
    ) -> Self {
        Self {
            client,
            config,
            secret_base_path: secret_base_path.into(),
            generator: Box::new(RandomCredentialGenerator),
        }
    }

    pub fn with_generator(mut self, generator: Box<dyn CredentialGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Provision every configured service. A failing service is logged
    /// and skipped so one bad entry cannot block the rest; the last
    /// failure is still reported once the run completes.
    pub async fn run_all(&self, privileged_token: &str) -> Result<()> {
        let configs = self.collect_configs()?;
        if configs.is_empty() {
            warn!("no services configured for token provisioning");
            return Ok(());
        }

        let mut last_failure = None;
        for (service, service_config) in &configs {
            match self
                .provision_one(privileged_token, service, service_config)
                .await
            {
                Ok(()) => {}
                Err(e) => {
                    error!(service, error = %e, "failed to provision service");
                    last_failure = Some(e);
                }
            }
        }
        match last_failure {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Regenerate one service's credentials, aborting on any error
    pub async fn regen_token(&self, privileged_token: &str, service: &str) -> Result<()> {
        tokenconfig::validate_service_name(service)?;
        let configs = self.collect_configs()?;
        let service_config = configs.get(service).cloned().unwrap_or_default();
        self.provision_one(privileged_token, service, &service_config)
            .await
    }

    fn collect_configs(&self) -> Result<TokenConfigs> {
        let from_file = match &self.config.config_file {
            Some(path) => tokenconfig::load_file(path)?,
            None => TokenConfigs::new(),
        };
        let from_env = tokenconfig::from_env()?;
        Ok(tokenconfig::merge(from_file, from_env))
    }

    async fn provision_one(
        &self,
        privileged_token: &str,
        service: &str,
        service_config: &ServiceTokenConfig,
    ) -> Result<()> {
        tokenconfig::validate_service_name(service)?;

        let policy_document = self.build_policy(service, service_config)?;
        let credentials = UserPasswordPair {
            user: service.to_string(),
            password: self.generator.generate_password()?.into_string(),
        };

        let manager = UserManager::new(
            self.client.clone(),
            self.config.userpass_mount.clone(),
            self.config.identity_key.clone(),
            self.config.default_token_ttl.clone(),
        );
        manager
            .create_user_with_identity(privileged_token, service, &policy_document, &credentials)
            .await?;

        let auth = self
            .client
            .internal_service_login(
                &self.config.userpass_mount,
                &credentials.user,
                &credentials.password,
            )
            .await?;

        let path = self.write_credentials(service, &json!({ "auth": auth }))?;
        self.apply_permissions(&path, service_config)?;
        info!(service, path = %path.display(), "wrote service credentials");
        Ok(())
    }

    fn build_policy(&self, service: &str, service_config: &ServiceTokenConfig) -> Result<String> {
        let document = match (&service_config.custom_policy, service_config.use_defaults) {
            (None, true) => policy::default_token_policy(service, &self.secret_base_path),
            (None, false) => {
                return Err(Error::invalid_config(format!(
                    "service {service:?} disables the default policy without supplying a custom one"
                )))
            }
            (Some(custom), true) => policy::merge_custom_policy(
                &policy::default_token_policy(service, &self.secret_base_path),
                custom,
            ),
            (Some(custom), false) => custom.clone(),
        };
        Ok(serde_json::to_string(&document)?)
    }

    fn write_credentials(&self, service: &str, bundle: &serde_json::Value) -> Result<PathBuf> {
        let dir = self.config.output_dir.join(service);
        fileio::create_dir_restricted(&dir)?;
        let path = dir.join(&self.config.output_filename);
        fileio::write_json_restricted(&path, bundle)?;
        Ok(path)
    }

    /// Apply configured ownership and mode overrides to the credential
    /// file
    fn apply_permissions(
        &self,
        path: &std::path::Path,
        service_config: &ServiceTokenConfig,
    ) -> Result<()> {
        let Some(perms) = &service_config.file_permissions else {
            return Ok(());
        };
        #[cfg(unix)]
        {
            if perms.uid.is_some() || perms.gid.is_some() {
                std::os::unix::fs::chown(path, perms.uid, perms.gid)?;
            }
            if let Some(mode_octal) = &perms.mode_octal {
                use std::os::unix::fs::PermissionsExt;
                let mode = u32::from_str_radix(mode_octal, 8).map_err(|_| {
                    Error::invalid_config(format!("invalid mode_octal {mode_octal:?}"))
                })?;
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
            }
        }
        Ok(())
    }
}
