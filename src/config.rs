use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub jwt_secret: String,
    pub broker_url: Option<String>,
    pub broker_api_key: String,
    /// How long a granted lease lives before the reaper may reclaim it.
    pub lease_duration: Duration,
    pub reap_interval: Duration,
    pub fanout_cap: usize,
    pub presence_ttl: Duration,
    pub page_limit: usize,
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".parse().unwrap(),
            jwt_secret: "change-me-in-production".to_string(),
            broker_url: None,
            broker_api_key: String::new(),
            lease_duration: Duration::from_secs(30 * 60),
            reap_interval: Duration::from_secs(60),
            fanout_cap: 10,
            // >= heartbeat period x 3
            presence_ttl: Duration::from_secs(90),
            page_limit: 50,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub control_plane_url: String,
    pub broker_url: String,
    pub tenant_id: String,
    pub project_id: String,
    pub agent_id: String,
    pub token: String,
    pub os: String,
    pub labels: BTreeMap<String, String>,
    pub heartbeat_interval: Duration,
}

impl AgentConfig {
    /// `<hostname>-<pid>`, the default identity when `AGENT_ID` is not
    /// set.
    pub fn default_agent_id() -> String {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "agent".to_string());
        format!("{host}-{}", std::process::id())
    }

    pub fn detect_os() -> String {
        std::env::consts::OS.to_string()
    }
}
