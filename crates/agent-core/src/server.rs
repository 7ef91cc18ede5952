//! Outbound collaborator interfaces to the management server.
//!
//! Wire transport belongs to a separate RPC layer; the core only pushes
//! status through these traits. Calls are fire-and-forget from the agent's
//! point of view: failures are logged by the callers, never retried here.

use crate::models::{
    AvailabilityReport, BundleDeploymentHistory, BundleDeploymentStatus, PackageVersion,
};
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

#[async_trait]
pub trait AvailabilityReporter: Send + Sync {
    async fn report_availability(&self, report: AvailabilityReport) -> anyhow::Result<()>;
}

/// Server-side bundle service: terminal status, audit history, and the
/// package store backing bundle downloads.
#[async_trait]
pub trait BundleServerService: Send + Sync {
    async fn set_deployment_status(
        &self,
        deployment_id: u32,
        status: BundleDeploymentStatus,
    ) -> anyhow::Result<()>;

    async fn add_deployment_history(
        &self,
        deployment_id: u32,
        history: BundleDeploymentHistory,
    ) -> anyhow::Result<()>;

    /// Package files that make up a bundle version.
    async fn package_versions(&self, bundle_version_id: u32) -> anyhow::Result<Vec<PackageVersion>>;

    /// Stream one package's bits into `dest`; returns the byte count.
    async fn download_package_bits(
        &self,
        package: &PackageVersion,
        dest: &Path,
    ) -> anyhow::Result<u64>;
}

/// Reporter used when no server transport is wired; logs each report.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAvailabilityReporter;

#[async_trait]
impl AvailabilityReporter for LogAvailabilityReporter {
    async fn report_availability(&self, report: AvailabilityReport) -> anyhow::Result<()> {
        info!(
            agent = %report.agent,
            entries = report.entries.len(),
            "availability report"
        );
        Ok(())
    }
}
