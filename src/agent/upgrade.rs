//! Binary self-upgrade: download, verify with the shared artifact
//! verifier, then atomically swap the running binary (temp + rename in
//! the same directory). The process is expected to restart afterwards;
//! v1 leaves the re-exec to the service manager.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::security::{KeyRef, Verifier};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct UpgradeInfo {
    pub version: String,
    pub url: String,
    pub sha256: String,
    pub signature: String,
    pub key_id: String,
}

pub struct Upgrader {
    binary_path: PathBuf,
    verifier: Arc<Verifier>,
}

impl Upgrader {
    pub fn new(binary_path: PathBuf, verifier: Arc<Verifier>) -> Self {
        Self {
            binary_path,
            verifier,
        }
    }

    pub async fn apply(&self, info: &UpgradeInfo) -> Result<()> {
        tracing::info!(version = %info.version, url = %info.url, "Applying upgrade");

        let bytes = download(&info.url).await?;
        self.verifier.verify(
            &bytes,
            &info.sha256,
            &info.signature,
            &KeyRef::Id(info.key_id.clone()),
        )?;

        self.swap(&bytes)?;
        tracing::info!(version = %info.version, "Upgrade staged, restart required");
        Ok(())
    }

    fn swap(&self, bytes: &[u8]) -> Result<()> {
        let dir = self.binary_path.parent().ok_or_else(|| {
            Error::Internal("agent binary has no parent directory".to_string())
        })?;
        // Same-directory temp file so the final rename is atomic.
        let staged = NamedTempFile::new_in(dir)
            .map_err(|err| Error::Transport(format!("failed to stage upgrade: {err}")))?;
        std::fs::write(staged.path(), bytes)?;
        set_executable(staged.path())?;
        staged
            .persist(&self.binary_path)
            .map_err(|err| Error::Transport(format!("failed to swap binary: {}", err.error)))?;
        Ok(())
    }
}

async fn download(url: &str) -> Result<Vec<u8>> {
    let client = reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|err| Error::Internal(format!("failed to build HTTP client: {err}")))?;
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Transport(format!(
            "upgrade download returned status {status}"
        )));
    }
    Ok(response.bytes().await?.to_vec())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}
