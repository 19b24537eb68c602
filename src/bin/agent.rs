use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use taskplane::agent::{Agent, ControlPlaneClient};
use taskplane::agent::upgrade::Upgrader;
use taskplane::broker::{agent_channel, ws};
use taskplane::config::AgentConfig;
use taskplane::security::Verifier;
use taskplane::shutdown::install_shutdown_handler;
use taskplane::workflow::Executor;

#[derive(Parser, Debug)]
#[command(name = "taskplane-agent")]
#[command(about = "Remote-execution agent: leases jobs and runs workflows")]
struct Args {
    #[arg(long, env = "CONTROL_PLANE_URL", default_value = "http://localhost:8080")]
    control_plane_url: String,

    #[arg(long, env = "BROKER_URL", default_value = "ws://localhost:8000/connection/websocket")]
    broker_url: String,

    #[arg(long, env = "TENANT_ID")]
    tenant_id: String,

    #[arg(long, env = "PROJECT_ID")]
    project_id: String,

    /// Defaults to <hostname>-<pid>
    #[arg(long, env = "AGENT_ID")]
    agent_id: Option<String>,

    #[arg(long, env = "JWT_TOKEN")]
    jwt_token: String,

    /// Labels offered to the scheduler, "key=value" repeated
    #[arg(long = "label")]
    labels: Vec<String>,

    /// Trusted upgrade signing keys, "key_id=base64" repeated
    #[arg(long = "trusted-key", env = "TRUSTED_KEYS", value_delimiter = ',')]
    trusted_keys: Vec<String>,

    /// Heartbeat period in seconds
    #[arg(long, default_value = "30")]
    heartbeat_interval: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = AgentConfig {
        control_plane_url: args.control_plane_url,
        broker_url: args.broker_url,
        tenant_id: args.tenant_id,
        project_id: args.project_id,
        agent_id: args
            .agent_id
            .unwrap_or_else(AgentConfig::default_agent_id),
        token: args.jwt_token,
        os: AgentConfig::detect_os(),
        labels: parse_labels(&args.labels),
        heartbeat_interval: Duration::from_secs(args.heartbeat_interval),
    };

    tracing::info!(
        agent_id = %config.agent_id,
        tenant_id = %config.tenant_id,
        project_id = %config.project_id,
        os = %config.os,
        "Starting agent"
    );

    let mut verifier = Verifier::new();
    for entry in &args.trusted_keys {
        match entry.split_once('=') {
            Some((key_id, key_b64)) => verifier.add_key_b64(key_id, key_b64)?,
            None => tracing::warn!(entry, "Ignoring malformed trusted key, expected id=base64"),
        }
    }
    let verifier = Arc::new(verifier);

    let client = ControlPlaneClient::new(&config.control_plane_url, &config.token)?;
    let executor = Executor::new(verifier.clone());
    let upgrader = std::env::current_exe()
        .ok()
        .map(|path| Upgrader::new(path, verifier.clone()));

    let channel = agent_channel(&config.tenant_id, &config.agent_id);
    let subscription = ws::connect(&config.broker_url, &channel, &config.token).await?;

    let shutdown = install_shutdown_handler();
    let agent = Agent::new(config, client, executor, upgrader);

    agent.run(Box::new(subscription), shutdown).await?;
    tracing::info!("Agent stopped");
    Ok(())
}

fn parse_labels(entries: &[String]) -> BTreeMap<String, String> {
    entries
        .iter()
        .filter_map(|entry| {
            let parts = entry.split_once('=');
            if parts.is_none() {
                tracing::warn!(entry, "Invalid label format, expected key=value");
            }
            parts.map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}
