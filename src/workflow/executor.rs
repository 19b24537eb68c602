//! Sequential workflow execution.
//!
//! Tasks run strictly in order; the first failure terminates the
//! workflow and the result vector ends at the failed task. Task errors
//! are captured into the result, never raised; a panic inside a task
//! becomes a task failure. Cancellation aborts the running task (child
//! processes die with it) and reports the workflow as failed.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::security::Verifier;

use super::task::{TaskContext, TaskKind};
use super::Workflow;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub output: serde_json::Value,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub name: String,
    pub success: bool,
    pub tasks: Vec<TaskResult>,
}

pub struct Executor {
    verifier: Arc<Verifier>,
}

impl Executor {
    pub fn new(verifier: Arc<Verifier>) -> Self {
        Self { verifier }
    }

    /// Runs a workflow to completion or first failure.
    ///
    /// Configuration of every task happens up front, so an unknown task
    /// type or a missing required key fails here with no side effects.
    pub async fn run(
        &self,
        workflow: &Workflow,
        cancel: CancellationToken,
    ) -> Result<WorkflowResult> {
        let mut kinds = Vec::with_capacity(workflow.tasks.len());
        for spec in &workflow.tasks {
            let kind = TaskKind::configure(spec).map_err(|err| {
                Error::InvalidInput(format!("task {}: {err}", spec.name))
            })?;
            kinds.push(kind);
        }

        // The workflow-level timeout cancels everything below it.
        let cancel = cancel.child_token();
        if let Some(budget) = workflow.timeout {
            let deadline_token = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(budget).await;
                deadline_token.cancel();
            });
        }

        let ctx = TaskContext {
            verifier: self.verifier.clone(),
        };

        let mut result = WorkflowResult {
            name: workflow.name.clone(),
            success: true,
            tasks: Vec::new(),
        };

        for (spec, kind) in workflow.tasks.iter().zip(kinds) {
            tracing::info!(workflow = %workflow.name, task = %spec.name, kind = kind.type_name(), "Running task");
            let outcome = run_isolated(kind.clone(), ctx.clone(), kind.timeout(), &cancel).await;

            let mut task_result = TaskResult {
                name: spec.name.clone(),
                task_type: kind.type_name().to_string(),
                output: serde_json::Value::Null,
                success: false,
                error: None,
            };
            match outcome {
                Ok(output) => {
                    task_result.output = output;
                    task_result.success = true;
                }
                Err(err) => {
                    tracing::warn!(workflow = %workflow.name, task = %spec.name, error = %err, "Task failed");
                    task_result.error = Some(err.to_string());
                }
            }

            let failed = !task_result.success;
            result.tasks.push(task_result);
            if failed {
                result.success = false;
                break;
            }
        }

        Ok(result)
    }
}

/// Runs one task on its own tokio task so a panic is contained, with the
/// per-task timeout and the cancellation token racing it.
async fn run_isolated(
    kind: TaskKind,
    ctx: TaskContext,
    task_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<serde_json::Value> {
    let mut handle = tokio::spawn(async move { kind.execute(&ctx).await });

    tokio::select! {
        _ = cancel.cancelled() => {
            // Aborting drops the task future; children spawned with
            // kill_on_drop and temp files go with it.
            handle.abort();
            Err(Error::Internal("task cancelled".to_string()))
        }
        joined = tokio::time::timeout(task_timeout, &mut handle) => match joined {
            Err(_) => {
                handle.abort();
                Err(Error::Timeout(task_timeout))
            }
            Ok(Ok(task_outcome)) => task_outcome,
            Ok(Err(join_err)) if join_err.is_panic() => {
                Err(Error::Internal("task panicked".to_string()))
            }
            Ok(Err(_)) => Err(Error::Internal("task aborted".to_string())),
        },
    }
}
