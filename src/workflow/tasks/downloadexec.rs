use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tempfile::NamedTempFile;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::security::{KeyRef, Verifier};

use super::parse_config;

const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Downloads an executable, verifies it (SHA-256 always, Ed25519 when a
/// signature is given), and runs it. Verification failure aborts before
/// any spawn; the downloaded file is removed on every exit path,
/// including cancellation, because it lives in a [`NamedTempFile`].
#[derive(Debug, Clone)]
pub struct DownloadExecTask {
    pub url: String,
    pub sha256: String,
    pub signature: Option<String>,
    pub key: Option<KeyRef>,
    pub args: Vec<String>,
    pub timeout: Duration,
}

#[derive(Deserialize)]
struct Config {
    url: String,
    sha256: String,
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    public_key: Option<String>,
    #[serde(default)]
    key_id: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
}

impl DownloadExecTask {
    pub fn configure(config: &serde_json::Value) -> Result<Self> {
        let config: Config = parse_config(config)?;
        if config.url.is_empty() {
            return Err(Error::InvalidInput("url is required".to_string()));
        }
        if config.sha256.is_empty() {
            return Err(Error::InvalidInput("sha256 is required".to_string()));
        }
        let key = match (&config.public_key, &config.key_id) {
            (Some(b64), None) => Some(KeyRef::Inline(b64.clone())),
            (None, Some(id)) => Some(KeyRef::Id(id.clone())),
            (Some(_), Some(_)) => {
                return Err(Error::InvalidInput(
                    "public_key and key_id are mutually exclusive".to_string(),
                ));
            }
            (None, None) => None,
        };
        if config.signature.is_some() && key.is_none() {
            return Err(Error::InvalidInput(
                "public_key or key_id is required when signature is provided".to_string(),
            ));
        }
        if config.signature.is_none() && key.is_some() {
            return Err(Error::InvalidInput(
                "signature is required when a public key is provided".to_string(),
            ));
        }
        Ok(Self {
            url: config.url,
            sha256: config.sha256,
            signature: config.signature,
            key,
            args: config.args,
            timeout: config.timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT),
        })
    }

    pub async fn execute(&self, verifier: &Verifier) -> Result<serde_json::Value> {
        let bytes = self.download().await?;

        // All-or-nothing: nothing is spawned unless every check passes.
        verifier.verify_digest(&bytes, &self.sha256)?;
        if let (Some(signature), Some(key)) = (&self.signature, &self.key) {
            verifier.verify_signature(&bytes, signature, key)?;
        }

        // The temp file is unlinked when this binding drops, on every
        // path out of this function.
        let artifact = NamedTempFile::new()
            .map_err(|err| Error::Transport(format!("failed to create temp file: {err}")))?;
        tokio::fs::write(artifact.path(), &bytes).await?;
        make_executable(artifact.path()).await?;

        let output = Command::new(artifact.path())
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| Error::Transport(format!("failed to spawn artifact: {err}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code();

        if !output.status.success() {
            return Err(Error::Internal(format!(
                "artifact exited non-zero: {}",
                if stderr.is_empty() {
                    format!("exit code: {exit_code:?}")
                } else {
                    stderr.clone()
                }
            )));
        }

        Ok(json!({
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": exit_code,
        }))
    }

    async fn download(&self) -> Result<Vec<u8>> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|err| Error::Internal(format!("failed to build HTTP client: {err}")))?;
        let response = client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!(
                "download returned status {status}"
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(unix)]
async fn make_executable(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o755);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn make_executable(_path: &std::path::Path) -> Result<()> {
    Ok(())
}
