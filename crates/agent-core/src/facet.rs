//! Facet capability interfaces implemented by plugin resource components.
//!
//! A facet is a named capability a component may expose: availability,
//! operations, configuration access, content discovery, measurement, and
//! bundle processing. Components advertise support through the `as_*`
//! accessors on [`ResourceComponent`]; the inventory's proxy layer wraps
//! each supported facet in a lock/timeout-enforcing proxy of the same shape,
//! so callers and plugins share one set of signatures.

use crate::error::FacetResult;
use crate::invocation::InvocationContext;
use crate::models::{
    Availability, BundleDeployRequest, BundleDeployResult, BundlePurgeRequest, BundlePurgeResult,
    Configuration, MeasurementData, MeasurementScheduleRequest, OperationResult, PackageVersion,
};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// The capability families a component can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FacetKind {
    Availability,
    Operation,
    Configuration,
    Content,
    Measurement,
    Bundle,
}

impl FacetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FacetKind::Availability => "availability",
            FacetKind::Operation => "operation",
            FacetKind::Configuration => "configuration",
            FacetKind::Content => "content",
            FacetKind::Measurement => "measurement",
            FacetKind::Bundle => "bundle",
        }
    }
}

impl fmt::Display for FacetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Locking discipline applied to a proxied facet invocation.
///
/// `Write` serializes against every other locked call on the resource,
/// `Read` calls run concurrently with each other but exclude writers, and
/// `None` bypasses the lock entirely; availability checks use `None` so they
/// never queue behind a pending configuration write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacetLockType {
    None,
    Read,
    Write,
}

#[async_trait]
pub trait AvailabilityFacet: Send + Sync {
    /// Report whether the managed endpoint is currently up. May be
    /// arbitrarily slow (a network probe, say); callers normally go through
    /// the adaptive availability proxy rather than invoking this directly.
    async fn get_availability(&self, ctx: &InvocationContext) -> FacetResult<Availability>;
}

#[async_trait]
pub trait OperationFacet: Send + Sync {
    async fn invoke_operation(
        &self,
        ctx: &InvocationContext,
        name: &str,
        params: serde_json::Value,
    ) -> FacetResult<OperationResult>;
}

#[async_trait]
pub trait ConfigurationFacet: Send + Sync {
    async fn load_configuration(&self, ctx: &InvocationContext) -> FacetResult<Configuration>;

    async fn update_configuration(
        &self,
        ctx: &InvocationContext,
        configuration: Configuration,
    ) -> FacetResult<()>;
}

#[async_trait]
pub trait ContentFacet: Send + Sync {
    /// Discover the packages currently installed on the endpoint.
    async fn discover_deployed_packages(
        &self,
        ctx: &InvocationContext,
    ) -> FacetResult<Vec<PackageVersion>>;
}

#[async_trait]
pub trait MeasurementFacet: Send + Sync {
    async fn get_values(
        &self,
        ctx: &InvocationContext,
        requests: &[MeasurementScheduleRequest],
    ) -> FacetResult<Vec<MeasurementData>>;
}

#[async_trait]
pub trait BundleFacet: Send + Sync {
    /// Deploy a bundle into the resolved destination directory. Ordinary
    /// deployment failures are reported through the result object; only
    /// infrastructure problems should surface as errors.
    async fn deploy_bundle(
        &self,
        ctx: &InvocationContext,
        request: BundleDeployRequest,
    ) -> FacetResult<BundleDeployResult>;

    async fn purge_bundle(
        &self,
        ctx: &InvocationContext,
        request: BundlePurgeRequest,
    ) -> FacetResult<BundlePurgeResult>;
}

/// A plugin-supplied driver for one resource.
///
/// Implementations are third-party code; the proxy layer assumes nothing
/// about their behavior beyond these signatures. In particular they may
/// block indefinitely, which is why every call is dispatched through a
/// container proxy.
#[async_trait]
pub trait ResourceComponent: Send + Sync + 'static {
    /// Called when the resource is activated in inventory.
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when the resource is deactivated or the agent shuts down.
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn as_availability(self: Arc<Self>) -> Option<Arc<dyn AvailabilityFacet>> {
        None
    }

    fn as_operation(self: Arc<Self>) -> Option<Arc<dyn OperationFacet>> {
        None
    }

    fn as_configuration(self: Arc<Self>) -> Option<Arc<dyn ConfigurationFacet>> {
        None
    }

    fn as_content(self: Arc<Self>) -> Option<Arc<dyn ContentFacet>> {
        None
    }

    fn as_measurement(self: Arc<Self>) -> Option<Arc<dyn MeasurementFacet>> {
        None
    }

    fn as_bundle(self: Arc<Self>) -> Option<Arc<dyn BundleFacet>> {
        None
    }
}
