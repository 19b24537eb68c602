use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;

use crate::error::{Error, Result};

use super::{parse_config, DEFAULT_TASK_TIMEOUT};

/// Runs a local child process and verifies it exits 0.
#[derive(Debug, Clone)]
pub struct CommandTask {
    pub command: String,
    pub args: Vec<String>,
    pub shell: bool,
    pub timeout: Duration,
}

#[derive(Deserialize)]
struct Config {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    shell: bool,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
}

impl CommandTask {
    pub fn configure(config: &serde_json::Value) -> Result<Self> {
        let config: Config = parse_config(config)?;
        if config.command.is_empty() {
            return Err(Error::InvalidInput("command is required".to_string()));
        }
        Ok(Self {
            command: config.command,
            args: config.args,
            shell: config.shell,
            timeout: config.timeout.unwrap_or(DEFAULT_TASK_TIMEOUT),
        })
    }

    pub async fn execute(&self) -> Result<serde_json::Value> {
        let mut cmd = if self.shell {
            let mut cmd = if cfg!(windows) {
                let mut cmd = Command::new("cmd.exe");
                cmd.arg("/c");
                cmd
            } else {
                let mut cmd = Command::new("sh");
                cmd.arg("-c");
                cmd
            };
            cmd.arg(&self.command);
            cmd
        } else {
            let mut cmd = Command::new(&self.command);
            cmd.args(&self.args);
            cmd
        };

        let output = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| Error::Transport(format!("failed to spawn {}: {err}", self.command)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code();

        if !output.status.success() {
            let detail = if stderr.is_empty() {
                format!("exit code: {exit_code:?}")
            } else {
                stderr.clone()
            };
            return Err(Error::Internal(format!(
                "command exited non-zero: {detail}"
            )));
        }

        Ok(json!({
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": exit_code,
        }))
    }
}
