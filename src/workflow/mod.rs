//! Declarative workflow documents and their executor.
//!
//! A workflow is an ordered sequence of typed tasks. Documents arrive as
//! YAML (authored) or JSON (the persisted job payload); both parse into
//! the same model. Task configs stay opaque mappings here and become
//! typed structs in [`task::TaskKind::configure`].

pub mod executor;
pub mod task;
pub mod tasks;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use executor::{Executor, TaskResult, WorkflowResult};
pub use task::TaskKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl Workflow {
    /// Parses a YAML or JSON document (YAML is a superset, so one parser
    /// covers both).
    pub fn parse(text: &str) -> Result<Self> {
        let workflow: Workflow = serde_yaml::from_str(text)
            .map_err(|err| Error::InvalidInput(format!("failed to parse workflow: {err}")))?;
        workflow.check()?;
        Ok(workflow)
    }

    /// Parses the opaque job payload the control plane hands back on
    /// lease.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self> {
        let workflow: Workflow = serde_json::from_value(payload.clone())
            .map_err(|err| Error::InvalidInput(format!("failed to parse workflow: {err}")))?;
        workflow.check()?;
        Ok(workflow)
    }

    fn check(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidInput("workflow name is required".to_string()));
        }
        if self.tasks.is_empty() {
            return Err(Error::InvalidInput(
                "workflow has no tasks".to_string(),
            ));
        }
        Ok(())
    }
}
