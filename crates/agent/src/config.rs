//! Agent configuration

use anyhow::Result;
use serde::Deserialize;

/// Agent configuration, read from `AGENT_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Name this agent reports itself as
    #[serde(default = "default_agent_name")]
    pub agent_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Availability scan interval in seconds
    #[serde(default = "default_scan_interval")]
    pub availability_scan_interval_secs: u64,

    /// Staging directory for downloaded bundle files
    #[serde(default = "default_bundle_data_dir")]
    pub bundle_data_dir: String,
}

fn default_agent_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "mgmt-agent".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_scan_interval() -> u64 {
    60
}

fn default_bundle_data_dir() -> String {
    "/var/lib/mgmt-agent/bundles".to_string()
}

impl AgentConfig {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("AGENT"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| AgentConfig {
            agent_name: default_agent_name(),
            api_port: default_api_port(),
            availability_scan_interval_secs: default_scan_interval(),
            bundle_data_dir: default_bundle_data_dir(),
        }))
    }
}
