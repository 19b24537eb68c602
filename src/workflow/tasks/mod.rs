pub mod command;
pub mod db;
pub mod downloadexec;
pub mod http;
pub mod powershell;
pub mod ssh;

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

pub(crate) const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);

/// Parses a task's opaque config mapping into its typed struct. Serde
/// ignores unknown keys; required keys surface as configure errors.
pub(crate) fn parse_config<'de, T: Deserialize<'de>>(config: &'de serde_json::Value) -> Result<T> {
    T::deserialize(config)
        .map_err(|err| Error::InvalidInput(format!("invalid task config: {err}")))
}
