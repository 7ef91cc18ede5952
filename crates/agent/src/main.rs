//! Management agent - supervises pluggable resource components
//!
//! This binary wires the core runtime together: the resource inventory with
//! its built-in platform component, the availability scan loop, and the
//! health/metrics HTTP endpoint. RPC dispatch from a management server plugs
//! into the same library APIs.

use agent_core::health::{components, HealthRegistry};
use agent_core::inventory::{AvailabilityScanConfig, AvailabilityScanLoop, Inventory};
use agent_core::models::MeasurementScheduleRequest;
use agent_core::server::LogAvailabilityReporter;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod platform;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = AGENT_VERSION, "Starting mgmt-agent");

    let config = config::AgentConfig::load()?;
    info!(agent_name = %config.agent_name, "Agent configured");

    let health_registry = HealthRegistry::new();
    health_registry.register(components::INVENTORY).await;
    health_registry
        .register(components::AVAILABILITY_SCANNER)
        .await;
    health_registry.register(components::SERVER_LINK).await;

    // Inventory with the built-in platform resource activated
    let inventory = Arc::new(Inventory::with_defaults());
    let container = inventory
        .activate_resource(
            platform::platform_resource(&config.agent_name),
            platform::PlatformComponent::new(),
        )
        .await?;
    container.set_measurement_schedules(vec![MeasurementScheduleRequest::trait_schedule(
        platform::HOSTNAME_TRAIT,
    )]);

    // Availability scan loop pushing change reports upstream
    let shutdown = CancellationToken::new();
    let scan_loop = AvailabilityScanLoop::new(
        inventory.clone(),
        Arc::new(LogAvailabilityReporter),
        AvailabilityScanConfig {
            interval: Duration::from_secs(config.availability_scan_interval_secs),
            agent: config.agent_name.clone(),
        },
    );
    let scan_handle = tokio::spawn(scan_loop.run(shutdown.clone()));

    // Health and metrics endpoint
    let app_state = Arc::new(api::AppState::new(health_registry.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    health_registry.set_ready(true).await;
    info!("Agent ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    shutdown.cancel();
    let _ = scan_handle.await;
    api_handle.abort();
    inventory.shutdown().await;

    Ok(())
}
