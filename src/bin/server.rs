use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use taskplane::api::{self, AppState};
use taskplane::auth::{Claims, Guard, Role, TokenValidator};
use taskplane::broker::http::HttpPublisher;
use taskplane::broker::memory::MemoryBroker;
use taskplane::broker::Publisher;
use taskplane::config::ServerConfig;
use taskplane::presence::MemoryPresence;
use taskplane::scheduler::{reaper, Scheduler};
use taskplane::shutdown::install_shutdown_handler;
use taskplane::store::memory::MemoryStore;
use taskplane::store::{Project, Store};

#[derive(Parser, Debug)]
#[command(name = "taskplane-server")]
#[command(about = "Control plane: job lifecycle, scheduling, and the HTTP API")]
struct Args {
    /// Port for the HTTP API
    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Shared secret for bearer-token validation
    #[arg(long, env = "JWT_SECRET", default_value = "change-me-in-production")]
    jwt_secret: String,

    /// Broker base URL for server-side publishes (in-process broker when
    /// absent)
    #[arg(long, env = "BROKER_URL")]
    broker_url: Option<String>,

    /// API key for broker-native HTTP publish
    #[arg(long, env = "BROKER_API_KEY", default_value = "")]
    broker_api_key: String,

    /// Max agents notified per job
    #[arg(long, default_value = "10")]
    fanout_cap: usize,

    /// Seconds between reaper passes
    #[arg(long, default_value = "60")]
    reap_interval: u64,

    /// Seed a project and print an admin token for it (dev convenience:
    /// "tenant:project")
    #[arg(long)]
    bootstrap: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig {
        listen_addr: SocketAddr::from(([0, 0, 0, 0], args.port)),
        jwt_secret: args.jwt_secret,
        broker_url: args.broker_url,
        broker_api_key: args.broker_api_key,
        fanout_cap: args.fanout_cap,
        reap_interval: Duration::from_secs(args.reap_interval),
        ..ServerConfig::default()
    };

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let presence = Arc::new(MemoryPresence::new());
    let publisher: Arc<dyn Publisher> = match &config.broker_url {
        Some(url) => Arc::new(HttpPublisher::new(url, &config.broker_api_key)?),
        None => {
            tracing::warn!("No BROKER_URL configured, using in-process broker");
            MemoryBroker::new()
        }
    };
    let validator = Arc::new(TokenValidator::new(&config.jwt_secret));
    let guard = Arc::new(Guard::new(store.clone()));
    let scheduler = Arc::new(
        Scheduler::new(store.clone(), presence.clone(), publisher.clone())
            .with_fanout_cap(config.fanout_cap),
    );

    if let Some(spec) = &args.bootstrap {
        bootstrap(spec, &store, &validator).await?;
    }

    let shutdown = install_shutdown_handler();

    let reaper_handle = tokio::spawn(reaper::run(
        store.clone(),
        config.reap_interval,
        shutdown.clone(),
    ));

    let state = AppState {
        store,
        presence,
        scheduler,
        publisher,
        validator,
        guard,
        lease_duration: config.lease_duration,
        presence_ttl: config.presence_ttl,
        page_limit: config.page_limit,
    };
    let app = api::router(state);

    tracing::info!(addr = %config.listen_addr, "Starting control plane");
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

    let drain_token = shutdown.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { drain_token.cancelled().await });

    tokio::select! {
        result = server => result?,
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(config.shutdown_grace).await;
        } => {
            tracing::warn!("Drain window elapsed, closing remaining connections");
        }
    }

    reaper_handle.abort();
    tracing::info!("Control plane stopped");
    Ok(())
}

/// Seeds one tenant/project pair plus an admin role binding, then prints
/// a token for it. Mirrors the gen-token tooling; dev only.
async fn bootstrap(
    spec: &str,
    store: &Arc<dyn Store>,
    validator: &Arc<TokenValidator>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (tenant_id, project_id) = spec
        .split_once(':')
        .ok_or("bootstrap spec must be tenant:project")?;

    store
        .create_project(Project {
            project_id: project_id.to_string(),
            tenant_id: tenant_id.to_string(),
            name: project_id.to_string(),
            created_at: chrono::Utc::now(),
        })
        .await?;
    store
        .bind_role(tenant_id, "bootstrap-admin", project_id, Role::Admin)
        .await?;

    let claims = Claims::for_user("bootstrap-admin", tenant_id, 24 * 3600);
    let token = validator.mint(&claims)?;
    println!("admin token for {tenant_id}:{project_id}: {token}");
    Ok(())
}
