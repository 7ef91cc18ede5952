//! Typed error taxonomy for facet invocations and bundle processing.

use crate::facet::FacetKind;
use crate::models::ResourceId;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the facet proxy layer.
#[derive(Debug, Error)]
pub enum FacetError {
    /// The bounded wait on a facet invocation elapsed. The worker keeps
    /// running in the background; retrying is safe.
    #[error("facet invocation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The caller was already flagged for cancellation; no work was
    /// dispatched.
    #[error("facet invocation cancelled before dispatch")]
    Cancelled,

    /// The resource, its container, or its component is missing or shutting
    /// down.
    #[error("resource unavailable: {0}")]
    Unavailable(String),

    /// The component does not implement the requested facet.
    #[error("resource {resource_id} does not support the {facet} facet")]
    NotSupported {
        resource_id: ResourceId,
        facet: FacetKind,
    },

    /// The plugin code itself failed; propagated verbatim.
    #[error(transparent)]
    Plugin(#[from] anyhow::Error),
}

impl FacetError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FacetError::Timeout { .. })
    }
}

/// Shorthand for facet invocation results.
pub type FacetResult<T> = Result<T, FacetError>;

/// Errors raised while scheduling or driving a bundle deployment. Inside the
/// deployer every one of these collapses into a reported `Failure` status;
/// they only reach callers from the synchronous scheduling/purge entry
/// points.
#[derive(Debug, Error)]
pub enum BundleError {
    /// The deployment destination cannot be resolved from the resource's
    /// metadata.
    #[error("bundle destination cannot be resolved: {0}")]
    Configuration(String),

    #[error(transparent)]
    Facet(#[from] FacetError),

    /// A downloaded package file failed checksum verification.
    #[error("bundle file verification failed: {0}")]
    Verification(String),

    /// The server-side bundle service rejected or failed a call.
    #[error("bundle server service failed: {0}")]
    Server(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The deployer has been shut down and accepts no new requests.
    #[error("bundle subsystem is shutting down")]
    ShuttingDown,
}
