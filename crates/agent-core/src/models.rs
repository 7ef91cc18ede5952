//! Core domain model for the management agent.
//!
//! Resource identity, configuration, and measurement schedules are owned by
//! the server-side inventory; the agent holds read-only copies. Bundle
//! shapes mirror what the server sends when it schedules a deployment.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Identifier assigned to a resource by the server-side inventory.
pub type ResourceId = u32;

/// Whether a managed endpoint is currently serviceable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Up,
    Down,
    /// No completed check yet, or the caller was cancelled before one ran.
    Unknown,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Availability::Up => write!(f, "UP"),
            Availability::Down => write!(f, "DOWN"),
            Availability::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Broad classification of a resource within the inventory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceCategory {
    Platform,
    Server,
    Service,
}

/// Flat key/value configuration attached to a resource.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    properties: HashMap<String, String>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn simple_value(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Where a bundle destination's base directory is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationContext {
    FileSystem,
    PluginConfiguration,
    ResourceConfiguration,
    MeasurementTrait,
}

/// A named base location for bundle deployments, declared per resource type
/// in plugin metadata. Immutable.
#[derive(Debug, Clone)]
pub struct BundleDestinationBaseDirectory {
    pub name: String,
    pub context: DestinationContext,
    /// Literal path for `FileSystem`, property name for the configuration
    /// contexts, trait name for `MeasurementTrait`.
    pub value: String,
}

/// Bundle metadata a resource type may declare.
#[derive(Debug, Clone, Default)]
pub struct ResourceTypeBundleConfiguration {
    pub base_directories: Vec<BundleDestinationBaseDirectory>,
}

impl ResourceTypeBundleConfiguration {
    pub fn base_directory(&self, name: &str) -> Option<&BundleDestinationBaseDirectory> {
        self.base_directories.iter().find(|dir| dir.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct ResourceType {
    pub name: String,
    pub plugin: String,
    pub category: ResourceCategory,
    pub bundle_config: Option<ResourceTypeBundleConfiguration>,
}

impl ResourceType {
    pub fn new(
        name: impl Into<String>,
        plugin: impl Into<String>,
        category: ResourceCategory,
    ) -> Self {
        Self {
            name: name.into(),
            plugin: plugin.into(),
            category,
            bundle_config: None,
        }
    }
}

/// One managed endpoint instance in the inventory tree.
#[derive(Debug, Clone)]
pub struct Resource {
    pub id: ResourceId,
    pub key: String,
    pub name: String,
    pub resource_type: Arc<ResourceType>,
    pub parent_id: Option<ResourceId>,
    pub plugin_configuration: Configuration,
    pub resource_configuration: Configuration,
}

impl Resource {
    pub fn new(
        id: ResourceId,
        key: impl Into<String>,
        name: impl Into<String>,
        resource_type: Arc<ResourceType>,
    ) -> Self {
        Self {
            id,
            key: key.into(),
            name: name.into(),
            resource_type,
            parent_id: None,
            plugin_configuration: Configuration::default(),
            resource_configuration: Configuration::default(),
        }
    }
}

/// Kinds of measurement a schedule can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementDataType {
    Numeric,
    Trait,
}

#[derive(Debug, Clone)]
pub struct MeasurementScheduleRequest {
    pub name: String,
    pub data_type: MeasurementDataType,
}

impl MeasurementScheduleRequest {
    pub fn trait_schedule(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: MeasurementDataType::Trait,
        }
    }
}

/// A single collected measurement value, stringly typed at this boundary.
#[derive(Debug, Clone)]
pub struct MeasurementData {
    pub name: String,
    pub value: String,
}

/// Result of a plugin operation invocation.
#[derive(Debug, Clone, Default)]
pub struct OperationResult {
    pub results: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Bundle subsystem shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BundleVersion {
    pub id: u32,
    pub bundle_name: String,
    pub version: String,
}

/// Named deployment target: which declared base directory to use plus the
/// directory underneath (or instead of) it.
#[derive(Debug, Clone)]
pub struct BundleDestination {
    pub name: String,
    pub base_dir_name: String,
    pub dest_dir: String,
}

#[derive(Debug, Clone)]
pub struct BundleDeployment {
    pub name: String,
    pub bundle_version: BundleVersion,
    pub destination: BundleDestination,
}

/// A deployment of one bundle version to one target resource.
#[derive(Debug, Clone)]
pub struct BundleResourceDeployment {
    pub id: u32,
    pub deployment: BundleDeployment,
    pub resource_id: ResourceId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleDeploymentStatus {
    Pending,
    InProgress,
    Success,
    Failure,
    Mixed,
}

impl BundleDeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BundleDeploymentStatus::Success
                | BundleDeploymentStatus::Failure
                | BundleDeploymentStatus::Mixed
        )
    }
}

impl fmt::Display for BundleDeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BundleDeploymentStatus::Pending => "pending",
            BundleDeploymentStatus::InProgress => "in-progress",
            BundleDeploymentStatus::Success => "success",
            BundleDeploymentStatus::Failure => "failure",
            BundleDeploymentStatus::Mixed => "mixed",
        };
        write!(f, "{label}")
    }
}

/// One file that makes up a bundle version.
#[derive(Debug, Clone)]
pub struct PackageVersion {
    pub id: u32,
    pub file_name: String,
    pub display_name: String,
    pub file_size: Option<u64>,
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Success,
    Failure,
    Warn,
}

/// One audit-trail step recorded against a deployment and pushed upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleDeploymentHistory {
    pub subsystem: String,
    pub action: String,
    pub info: String,
    pub status: HistoryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: i64,
}

impl BundleDeploymentHistory {
    pub fn new(
        action: impl Into<String>,
        info: impl Into<String>,
        status: HistoryStatus,
        message: Option<String>,
    ) -> Self {
        Self {
            subsystem: "bundle-plugin".to_string(),
            action: action.into(),
            info: info.into(),
            status,
            message,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// What the plugin's bundle facet receives for a deployment.
#[derive(Debug, Clone)]
pub struct BundleDeployRequest {
    pub deployment_name: String,
    /// Staging directory holding the downloaded package files.
    pub bundle_files_dir: PathBuf,
    /// Package file name to its staged location.
    pub package_files: HashMap<String, PathBuf>,
    pub clean_deployment: bool,
    pub revert: bool,
    pub absolute_destination_directory: PathBuf,
}

/// Outcome the plugin reports for a deployment. Ordinary failures travel in
/// `error_message`; the facet only errors on infrastructure problems.
#[derive(Debug, Clone, Default)]
pub struct BundleDeployResult {
    pub error_message: Option<String>,
}

impl BundleDeployResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_message.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct BundlePurgeRequest {
    pub deployment_name: String,
    pub absolute_destination_directory: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct BundlePurgeResult {
    pub error_message: Option<String>,
}

impl BundlePurgeResult {
    pub fn is_success(&self) -> bool {
        self.error_message.is_none()
    }
}

// ---------------------------------------------------------------------------
// Availability reporting shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityReportEntry {
    pub resource_id: ResourceId,
    pub availability: Availability,
    pub timestamp: i64,
}

/// Batch of availability changes pushed to the server by the scan loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityReport {
    pub agent: String,
    pub entries: Vec<AvailabilityReportEntry>,
    pub changes_only: bool,
}
