use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;

use crate::error::{Error, Result};

use super::{parse_config, DEFAULT_TASK_TIMEOUT};

// ssh(1) reserves 255 for connection and authentication failures.
const SSH_TRANSPORT_EXIT: i32 = 255;

/// Runs a command on a remote host over ssh with key-based auth.
#[derive(Debug, Clone)]
pub struct SshTask {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key: Option<String>,
    pub command: String,
    pub timeout: Duration,
}

#[derive(Deserialize)]
struct Config {
    host: String,
    #[serde(default)]
    port: Option<u16>,
    user: String,
    #[serde(default)]
    key: Option<String>,
    command: String,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
}

impl SshTask {
    pub fn configure(config: &serde_json::Value) -> Result<Self> {
        let config: Config = parse_config(config)?;
        if config.host.is_empty() || config.user.is_empty() || config.command.is_empty() {
            return Err(Error::InvalidInput(
                "host, user, and command are required".to_string(),
            ));
        }
        Ok(Self {
            host: config.host,
            port: config.port.unwrap_or(22),
            user: config.user,
            key: config.key,
            command: config.command,
            timeout: config.timeout.unwrap_or(DEFAULT_TASK_TIMEOUT),
        })
    }

    pub async fn execute(&self) -> Result<serde_json::Value> {
        let mut cmd = Command::new("ssh");
        cmd.args(["-o", "BatchMode=yes", "-o", "StrictHostKeyChecking=accept-new"])
            .arg("-p")
            .arg(self.port.to_string());
        if let Some(key) = &self.key {
            cmd.arg("-i").arg(key);
        }
        cmd.arg(format!("{}@{}", self.user, self.host))
            .arg(&self.command);

        let output = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| Error::Transport(format!("failed to spawn ssh: {err}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code();

        if exit_code == Some(SSH_TRANSPORT_EXIT) {
            return Err(Error::Transport(format!(
                "ssh connection to {}@{} failed: {stderr}",
                self.user, self.host
            )));
        }
        if !output.status.success() {
            return Err(Error::Internal(format!(
                "remote command exited non-zero: {}",
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
}
