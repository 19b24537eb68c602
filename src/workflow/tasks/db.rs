use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::postgres::PgPoolOptions;

use crate::error::{Error, Result};

use super::{parse_config, DEFAULT_TASK_TIMEOUT};

/// Verifies that a query executes against a live database.
#[derive(Debug, Clone)]
pub struct DbTask {
    pub driver: String,
    pub dsn: String,
    pub query: String,
    pub timeout: Duration,
}

#[derive(Deserialize)]
struct Config {
    driver: String,
    dsn: String,
    query: String,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
}

impl DbTask {
    pub fn configure(config: &serde_json::Value) -> Result<Self> {
        let config: Config = parse_config(config)?;
        if config.driver.is_empty() || config.dsn.is_empty() || config.query.is_empty() {
            return Err(Error::InvalidInput(
                "driver, dsn, and query are required".to_string(),
            ));
        }
        match config.driver.as_str() {
            "mysql" | "postgres" => {}
            other => {
                return Err(Error::InvalidInput(format!("unknown db driver: {other}")));
            }
        }
        Ok(Self {
            driver: config.driver,
            dsn: config.dsn,
            query: config.query,
            timeout: config.timeout.unwrap_or(DEFAULT_TASK_TIMEOUT),
        })
    }

    pub async fn execute(&self) -> Result<serde_json::Value> {
        let rows = match self.driver.as_str() {
            "mysql" => {
                let pool = MySqlPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(self.timeout)
                    .connect(&self.dsn)
                    .await
                    .map_err(|err| Error::Transport(format!("db connect failed: {err}")))?;
                let rows = sqlx::query(&self.query)
                    .fetch_all(&pool)
                    .await
                    .map_err(|err| Error::Internal(format!("query failed: {err}")))?;
                rows.len()
            }
            "postgres" => {
                let pool = PgPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(self.timeout)
                    .connect(&self.dsn)
                    .await
                    .map_err(|err| Error::Transport(format!("db connect failed: {err}")))?;
                let rows = sqlx::query(&self.query)
                    .fetch_all(&pool)
                    .await
                    .map_err(|err| Error::Internal(format!("query failed: {err}")))?;
                rows.len()
            }
            // Unreachable: configure rejects other drivers.
            other => {
                return Err(Error::InvalidInput(format!("unknown db driver: {other}")));
            }
        };

        Ok(json!({ "rows": rows }))
    }
}
