//! Persistence of the init response
//!
//! The init response carries the unseal key shares and the initial root
//! token, so it lands in a 0600 file under the token folder. When the
//! master key guard has keying material loaded the shares are wrapped
//! before hitting disk and unwrapped on the way back.

use tracing::{info, warn};

use stoker_core::{fileio, Error, InitResponse, Result, StoreConfig};
use stoker_crypto::MasterKeyGuard;

pub fn save_init_response(
    config: &StoreConfig,
    guard: &MasterKeyGuard,
    resp: &mut InitResponse,
) -> Result<()> {
    if guard.is_encrypting() {
        guard.encrypt_init_response(resp)?;
    }
    fileio::create_dir_restricted(&config.token_folder_path)?;
    let path = config.init_response_path();
    fileio::write_json_restricted(&path, resp)?;
    info!(path = %path.display(), encrypted = resp.is_encrypted(), "persisted init response");
    Ok(())
}

pub fn load_init_response(config: &StoreConfig, guard: &MasterKeyGuard) -> Result<InitResponse> {
    let path = config.init_response_path();
    let mut resp: InitResponse = fileio::read_json(&path)?;

    if resp.is_encrypted() {
        if !guard.is_encrypting() {
            return Err(Error::crypto(format!(
                "init response {} holds wrapped key shares but no entropy hook is configured",
                path.display()
            )));
        }
        guard.decrypt_init_response(&mut resp)?;
    } else if guard.is_encrypting() {
        // A plaintext file with a hook configured means the store was
        // bootstrapped before the hook was introduced. Usable, but worth
        // flagging.
        warn!(path = %path.display(), "init response on disk is not encrypted");
    }

    if resp.keys_base64.is_empty() {
        return Err(Error::missing_field("keys_base64"));
    }
    Ok(resp)
}
