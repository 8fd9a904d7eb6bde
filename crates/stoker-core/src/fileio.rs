//! Restricted-permission file helpers
//!
//! Everything persisted by stoker carries secret material, so files are
//! written 0600 and directories created 0700.

use std::fs::OpenOptions;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Create `dir` (and parents) with mode 0700
pub fn create_dir_restricted(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Serialize `value` as JSON to `path`, creating (or truncating) the file
/// with mode 0600
pub fn write_json_restricted<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let file = options.open(path)?;
    serde_json::to_writer(&file, value)?;
    file.sync_all()?;
    Ok(())
}

/// Read and deserialize a JSON file
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = std::fs::File::open(path)?;
    Ok(serde_json::from_reader(file)?)
}

/// Load an access token from a file.
///
/// The file may be a persisted init response (`root_token`), a create-token
/// response (`auth.client_token`), or a bare token string.
pub fn load_token(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path)?;
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) {
        if let Some(token) = value
            .pointer("/auth/client_token")
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
        {
            return Ok(token.to_string());
        }
        if let Some(token) = value
            .get("root_token")
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
        {
            return Ok(token.to_string());
        }
    }
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(crate::error::Error::invalid_config(format!(
            "token file {} contains no usable token",
            path.display()
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn written_files_are_owner_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resp-init.json");
        write_json_restricted(&path, &json!({"root_token": "s.x"})).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let back: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(back["root_token"], "s.x");
    }

    #[test]
    fn restricted_dirs_are_owner_only() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("tokens/billing");
        create_dir_restricted(&sub).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&sub).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[test]
    fn load_token_handles_all_three_shapes() {
        let dir = tempdir().unwrap();

        let init = dir.path().join("init.json");
        std::fs::write(&init, r#"{"root_token":"s.root"}"#).unwrap();
        assert_eq!(load_token(&init).unwrap(), "s.root");

        let created = dir.path().join("created.json");
        std::fs::write(&created, r#"{"auth":{"client_token":"s.child"}}"#).unwrap();
        assert_eq!(load_token(&created).unwrap(), "s.child");

        let bare = dir.path().join("bare");
        std::fs::write(&bare, "s.bare\n").unwrap();
        assert_eq!(load_token(&bare).unwrap(), "s.bare");
    }

    #[test]
    fn load_token_rejects_empty_files() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty");
        std::fs::write(&empty, "").unwrap();
        assert!(load_token(&empty).is_err());
    }
}
