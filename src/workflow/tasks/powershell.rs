use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;

use crate::error::{Error, Result};

use super::{parse_config, DEFAULT_TASK_TIMEOUT};

/// Runs a PowerShell script. Only meaningful on Windows hosts; on
/// anything else execution fails without spawning.
#[derive(Debug, Clone)]
pub struct PowerShellTask {
    pub script: String,
    pub timeout: Duration,
}

#[derive(Deserialize)]
struct Config {
    script: String,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
}

impl PowerShellTask {
    pub fn configure(config: &serde_json::Value) -> Result<Self> {
        let config: Config = parse_config(config)?;
        if config.script.is_empty() {
            return Err(Error::InvalidInput("script is required".to_string()));
        }
        Ok(Self {
            script: config.script,
            timeout: config.timeout.unwrap_or(DEFAULT_TASK_TIMEOUT),
        })
    }

    pub async fn execute(&self) -> Result<serde_json::Value> {
        if !cfg!(windows) {
            return Err(Error::InvalidInput(
                "powershell task requires a Windows host".to_string(),
            ));
        }

        let output = Command::new("powershell.exe")
            .args(["-NoProfile", "-NonInteractive", "-Command", &self.script])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| Error::Transport(format!("failed to spawn powershell: {err}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code();

        if !output.status.success() {
            return Err(Error::Internal(format!(
                "script exited non-zero: {}",
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
