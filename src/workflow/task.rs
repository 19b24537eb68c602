//! The closed task catalog.
//!
//! Task types are a tagged enum rather than a factory registry: an
//! unknown `type` fails at configure time, before anything runs, and
//! dispatch is static. Each variant carries its typed config, parsed
//! from the spec's opaque mapping. Unknown config keys are ignored for
//! forward compatibility; missing required keys fail `configure` with no
//! side effects.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::security::Verifier;

use super::tasks::{
    command::CommandTask, db::DbTask, downloadexec::DownloadExecTask, http::HttpTask,
    powershell::PowerShellTask, ssh::SshTask,
};
use super::TaskSpec;

/// Shared state tasks may need while executing.
#[derive(Clone)]
pub struct TaskContext {
    pub verifier: Arc<Verifier>,
}

#[derive(Debug, Clone)]
pub enum TaskKind {
    Http(HttpTask),
    Db(DbTask),
    Ssh(SshTask),
    Command(CommandTask),
    PowerShell(PowerShellTask),
    DownloadExec(DownloadExecTask),
}

impl TaskKind {
    /// Parses the spec's config mapping into the typed variant.
    pub fn configure(spec: &TaskSpec) -> Result<Self> {
        match spec.task_type.as_str() {
            "http" => Ok(TaskKind::Http(HttpTask::configure(&spec.config)?)),
            "db" => Ok(TaskKind::Db(DbTask::configure(&spec.config)?)),
            "ssh" => Ok(TaskKind::Ssh(SshTask::configure(&spec.config)?)),
            "command" => Ok(TaskKind::Command(CommandTask::configure(&spec.config)?)),
            "powershell" => Ok(TaskKind::PowerShell(PowerShellTask::configure(
                &spec.config,
            )?)),
            "downloadexec" => Ok(TaskKind::DownloadExec(DownloadExecTask::configure(
                &spec.config,
            )?)),
            other => Err(crate::error::Error::InvalidInput(format!(
                "unknown task type: {other}"
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            TaskKind::Http(_) => "http",
            TaskKind::Db(_) => "db",
            TaskKind::Ssh(_) => "ssh",
            TaskKind::Command(_) => "command",
            TaskKind::PowerShell(_) => "powershell",
            TaskKind::DownloadExec(_) => "downloadexec",
        }
    }

    /// Effective deadline for this task; the executor enforces it.
    pub fn timeout(&self) -> Duration {
        match self {
            TaskKind::Http(t) => t.timeout,
            TaskKind::Db(t) => t.timeout,
            TaskKind::Ssh(t) => t.timeout,
            TaskKind::Command(t) => t.timeout,
            TaskKind::PowerShell(t) => t.timeout,
            TaskKind::DownloadExec(t) => t.timeout,
        }
    }

    pub async fn execute(&self, ctx: &TaskContext) -> Result<serde_json::Value> {
        match self {
            TaskKind::Http(t) => t.execute().await,
            TaskKind::Db(t) => t.execute().await,
            TaskKind::Ssh(t) => t.execute().await,
            TaskKind::Command(t) => t.execute().await,
            TaskKind::PowerShell(t) => t.execute().await,
            TaskKind::DownloadExec(t) => t.execute(&ctx.verifier).await,
        }
    }
}
