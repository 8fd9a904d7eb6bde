//! External entropy hook
//!
//! The sole channel for obtaining externally rooted keying material: an
//! executable (typically hardware-backed) that prints one line of
//! hex-encoded bytes to stdout.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use zeroize::{Zeroize, Zeroizing};

use stoker_core::{Error, Result};

/// Reads hex-encoded bytes from an external executable's stdout
#[async_trait]
pub trait PipedHexReader: Send + Sync {
    async fn read_hex_bytes_from_exe(&self, path: &Path) -> Result<Zeroizing<Vec<u8>>>;
}

/// Production reader: resolves the executable on PATH, runs it with no
/// arguments, and decodes the first stdout line.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExeHexReader;

#[async_trait]
impl PipedHexReader for ExeHexReader {
    async fn read_hex_bytes_from_exe(&self, path: &Path) -> Result<Zeroizing<Vec<u8>>> {
        let resolved = which::which(path).map_err(|e| {
            Error::entropy_hook(format!("cannot resolve hook {}: {e}", path.display()))
        })?;

        let output = tokio::process::Command::new(&resolved)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                Error::entropy_hook(format!("failed to run hook {}: {e}", resolved.display()))
            })?;

        if !output.status.success() {
            return Err(Error::entropy_hook(format!(
                "hook {} exited with {}",
                resolved.display(),
                output.status
            )));
        }

        let mut stdout = output.stdout;
        let result = decode_first_line(&stdout, &resolved);
        stdout.zeroize();
        result
    }
}

fn decode_first_line(stdout: &[u8], exe: &Path) -> Result<Zeroizing<Vec<u8>>> {
    let line = stdout.split(|b| *b == b'\n').next().unwrap_or_default();
    let text = std::str::from_utf8(line)
        .map_err(|_| Error::entropy_hook(format!("hook {} produced non-UTF-8 output", exe.display())))?
        .trim();
    if text.is_empty() {
        return Err(Error::entropy_hook(format!(
            "hook {} produced no output",
            exe.display()
        )));
    }
    let bytes = hex::decode(text).map_err(|_| {
        // Do not echo the output itself; it may be partial secret material
        Error::entropy_hook(format!("hook {} produced invalid hex", exe.display()))
    })?;
    Ok(Zeroizing::new(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[cfg(unix)]
    fn write_script(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reads_one_line_of_hex() {
        let dir = tempdir().unwrap();
        let hook = write_script(dir.path(), "hook", "echo deadbeef");

        let bytes = ExeHexReader.read_hex_bytes_from_exe(&hook).await.unwrap();
        let bytes: &[u8] = bytes.as_ref();
        assert_eq!(bytes, &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn only_the_first_line_counts() {
        let dir = tempdir().unwrap();
        let hook = write_script(dir.path(), "hook", "echo 0102\necho notthis");

        let bytes = ExeHexReader.read_hex_bytes_from_exe(&hook).await.unwrap();
        let bytes: &[u8] = bytes.as_ref();
        assert_eq!(bytes, &[0x01, 0x02]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_an_error() {
        let dir = tempdir().unwrap();
        let hook = write_script(dir.path(), "hook", "echo deadbeef; exit 3");

        let result = ExeHexReader.read_hex_bytes_from_exe(&hook).await;
        assert!(matches!(result, Err(Error::EntropyHook { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn invalid_hex_is_an_error() {
        let dir = tempdir().unwrap();
        let hook = write_script(dir.path(), "hook", "echo not-hex-at-all");

        let result = ExeHexReader.read_hex_bytes_from_exe(&hook).await;
        assert!(matches!(result, Err(Error::EntropyHook { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn empty_output_is_an_error() {
        let dir = tempdir().unwrap();
        let hook = write_script(dir.path(), "hook", "true");

        let result = ExeHexReader.read_hex_bytes_from_exe(&hook).await;
        assert!(matches!(result, Err(Error::EntropyHook { .. })));
    }

    #[tokio::test]
    async fn missing_executable_is_an_error() {
        let result = ExeHexReader
            .read_hex_bytes_from_exe(Path::new("/no/such/hook"))
            .await;
        assert!(matches!(result, Err(Error::EntropyHook { .. })));
    }
}
