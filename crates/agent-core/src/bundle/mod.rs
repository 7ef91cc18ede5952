//! Bundle deployment: destination resolution, package staging, facet
//! invocation, and terminal status reporting.
//!
//! Deployments are accepted synchronously and driven by a single-consumer
//! worker task, so at most one deployment runs at a time. Whatever happens
//! to an accepted deployment, exactly one terminal SUCCESS/FAILURE status is
//! pushed through the server collaborator; resolution and timeout failures
//! are never silently dropped.


use crate::error::{BundleError, FacetError};
use crate::facet::{BundleFacet, FacetKind, FacetLockType};
use crate::invocation::InvocationContext;
use crate::inventory::InventoryLookup;
use crate::measurement::MeasurementCollector;
use crate::models::{
    BundleDeployRequest, BundleDeployResult, BundleDeploymentHistory, BundleDeploymentStatus,
    BundleDestination, BundlePurgeRequest, BundlePurgeResult, BundleResourceDeployment,
    DestinationContext, HistoryStatus, PackageVersion, Resource,
};
use crate::observability;
use crate::server::BundleServerService;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const AUDIT_DEPLOYMENT_SCHEDULED: &str = "Deployment Scheduled";
const AUDIT_DEPLOYMENT_STARTED: &str = "Deployment Started";
const AUDIT_DEPLOYMENT_ENDED: &str = "Deployment Ended";
const AUDIT_DESTINATION_RESOLVED: &str = "Destination Resolved";
const AUDIT_FILE_DOWNLOAD_STARTED: &str = "File Download Started";
const AUDIT_FILE_DOWNLOAD_ENDED: &str = "File Download Ended";
const AUDIT_PURGE_STARTED: &str = "Purge Started";
const AUDIT_PURGE_ENDED: &str = "Purge Ended";

/// What the server sends to schedule one deployment.
#[derive(Debug, Clone)]
pub struct BundleScheduleRequest {
    pub resource_deployment: BundleResourceDeployment,
    /// Epoch seconds; `None` deploys immediately.
    pub requested_deploy_time: Option<i64>,
    pub clean_deployment: bool,
    pub revert: bool,
}

#[derive(Debug, Clone)]
pub struct BundleManagerConfig {
    /// Staging area for downloaded bundle package files.
    pub data_dir: PathBuf,
    /// Budget for the plugin's deploy call; bundle recipes can run a long
    /// time.
    pub deploy_timeout: Duration,
    /// Budget for the plugin's purge call.
    pub purge_timeout: Duration,
    /// Budget for the live trait collection used by `measurementTrait`
    /// destinations.
    pub trait_collection_timeout: Duration,
    /// Depth of the pending-deployment queue.
    pub queue_depth: usize,
}

impl Default for BundleManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/mgmt-agent/bundles"),
            deploy_timeout: Duration::from_secs(4 * 60 * 60),
            purge_timeout: Duration::from_secs(30 * 60),
            trait_collection_timeout: Duration::from_secs(30),
            queue_depth: 16,
        }
    }
}

/// Drives bundle deployments against target resources' bundle facets.
pub struct BundleManager {
    inventory: Arc<dyn InventoryLookup>,
    measurements: Arc<dyn MeasurementCollector>,
    server: Arc<dyn BundleServerService>,
    config: BundleManagerConfig,
    queue: mpsc::Sender<BundleScheduleRequest>,
    shutdown: CancellationToken,
}

impl BundleManager {
    /// Create the manager and spawn its deployer task. The queue has a
    /// single consumer so deployments are processed one at a time.
    pub fn new(
        inventory: Arc<dyn InventoryLookup>,
        measurements: Arc<dyn MeasurementCollector>,
        server: Arc<dyn BundleServerService>,
        config: BundleManagerConfig,
    ) -> Arc<Self> {
        let (queue, rx) = mpsc::channel(config.queue_depth);
        let manager = Arc::new(Self {
            inventory,
            measurements,
            server,
            config,
            queue,
            shutdown: CancellationToken::new(),
        });
        tokio::spawn(Self::deployer_loop(manager.clone(), rx));
        manager
    }

    /// Stop accepting requests and let the deployer task exit. A deployment
    /// already being driven is not interrupted.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn deployer_loop(manager: Arc<Self>, mut rx: mpsc::Receiver<BundleScheduleRequest>) {
        info!("bundle deployer started");
        loop {
            tokio::select! {
                request = rx.recv() => match request {
                    Some(request) => manager.process_deployment(request).await,
                    None => break,
                },
                _ = manager.shutdown.cancelled() => {
                    info!("bundle deployer shutting down");
                    break;
                }
            }
        }
    }

    /// Accept or reject a deployment request immediately. Acceptance means a
    /// terminal SUCCESS/FAILURE status will later be pushed through the
    /// status reporter, exactly once.
    pub async fn schedule_deployment(
        &self,
        request: BundleScheduleRequest,
    ) -> Result<(), BundleError> {
        if self.shutdown.is_cancelled() {
            return Err(BundleError::ShuttingDown);
        }

        let deployment = &request.resource_deployment;
        let container = self.inventory.resource_container(deployment.resource_id)?;
        if !container.supports_facet(FacetKind::Bundle) {
            return Err(BundleError::Facet(FacetError::NotSupported {
                resource_id: deployment.resource_id,
                facet: FacetKind::Bundle,
            }));
        }

        let when = request
            .requested_deploy_time
            .map(|t| t.to_string())
            .unwrap_or_else(|| "immediately".to_string());
        self.audit(
            deployment.id,
            AUDIT_DEPLOYMENT_SCHEDULED,
            &deployment.deployment.name,
            HistoryStatus::Success,
            Some(format!("requested deployment time: {when}")),
        )
        .await;

        self.queue
            .send(request)
            .await
            .map_err(|_| BundleError::ShuttingDown)
    }

    async fn process_deployment(&self, request: BundleScheduleRequest) {
        let deployment = request.resource_deployment.clone();
        let name = deployment.deployment.name.clone();

        let (status, message) = match self.drive_deployment(&request).await {
            Ok(result) if result.is_success() => (
                BundleDeploymentStatus::Success,
                format!("deployment [{name}] completed"),
            ),
            Ok(result) => (
                BundleDeploymentStatus::Failure,
                result
                    .error_message
                    .unwrap_or_else(|| "bundle facet reported failure".to_string()),
            ),
            Err(err) => {
                error!(
                    deployment_id = deployment.id,
                    error = %err,
                    "bundle deployment failed"
                );
                (BundleDeploymentStatus::Failure, format!("deployment failed: {err}"))
            }
        };

        self.complete_deployment(&deployment, status, &message).await;
    }

    async fn complete_deployment(
        &self,
        deployment: &BundleResourceDeployment,
        status: BundleDeploymentStatus,
        message: &str,
    ) {
        observability::bundle_deployment_finished(status);
        if let Err(err) = self.server.set_deployment_status(deployment.id, status).await {
            error!(
                deployment_id = deployment.id,
                error = %format!("{err:#}"),
                "failed to report terminal deployment status"
            );
        }

        let audit_status = if status == BundleDeploymentStatus::Success {
            HistoryStatus::Success
        } else {
            HistoryStatus::Failure
        };
        self.audit(
            deployment.id,
            AUDIT_DEPLOYMENT_ENDED,
            &deployment.deployment.name,
            audit_status,
            Some(message.to_string()),
        )
        .await;
    }

    async fn drive_deployment(
        &self,
        request: &BundleScheduleRequest,
    ) -> Result<BundleDeployResult, BundleError> {
        let deployment = &request.resource_deployment;
        let container = self.inventory.resource_container(deployment.resource_id)?;
        let bundle_version = &deployment.deployment.bundle_version;

        let files_dir = self
            .config
            .data_dir
            .join("bundle-versions")
            .join(bundle_version.id.to_string());
        fs::create_dir_all(&files_dir).await?;
        self.remove_stale_version_dirs(&files_dir).await;
        let package_files = self.download_bundle_files(deployment, &files_dir).await?;

        self.audit(
            deployment.id,
            AUDIT_DEPLOYMENT_STARTED,
            &deployment.deployment.name,
            HistoryStatus::Success,
            Some(format!(
                "deploying [{}] version [{}] to resource [{}]",
                bundle_version.bundle_name,
                bundle_version.version,
                container.resource().name
            )),
        )
        .await;

        let destination = self
            .resolve_destination(container.resource(), &deployment.deployment.destination)
            .await?;
        self.audit(
            deployment.id,
            AUDIT_DESTINATION_RESOLVED,
            &destination.display().to_string(),
            HistoryStatus::Success,
            None,
        )
        .await;

        let proxy =
            container.bundle_proxy(FacetLockType::Write, Some(self.config.deploy_timeout))?;
        let deploy_request = BundleDeployRequest {
            deployment_name: deployment.deployment.name.clone(),
            bundle_files_dir: files_dir,
            package_files,
            clean_deployment: request.clean_deployment,
            revert: request.revert,
            absolute_destination_directory: destination,
        };
        let ctx = InvocationContext::new();
        Ok(proxy.deploy_bundle(&ctx, deploy_request).await?)
    }

    /// Compute the absolute directory a deployment lands in.
    ///
    /// The named base directory declared by the resource's type supplies a
    /// base path according to its context kind; `dest_dir` is then appended,
    /// except that an absolute `dest_dir` replaces the base entirely.
    pub async fn resolve_destination(
        &self,
        resource: &Resource,
        destination: &BundleDestination,
    ) -> Result<PathBuf, BundleError> {
        let rtype = &resource.resource_type;
        let bundle_config = rtype.bundle_config.as_ref().ok_or_else(|| {
            BundleError::Configuration(format!(
                "resource type [{}] does not support bundle deployments",
                rtype.name
            ))
        })?;
        let base = bundle_config
            .base_directory(&destination.base_dir_name)
            .ok_or_else(|| {
                BundleError::Configuration(format!(
                    "resource type [{}] declares no bundle destination base directory named [{}]",
                    rtype.name, destination.base_dir_name
                ))
            })?;

        let base_path = match base.context {
            DestinationContext::FileSystem => {
                // plugin metadata normally says "/"; an empty value falls
                // back to the filesystem root
                let value = base.value.trim();
                if value.is_empty() {
                    PathBuf::from("/")
                } else {
                    PathBuf::from(value)
                }
            }
            DestinationContext::PluginConfiguration => resource
                .plugin_configuration
                .simple_value(&base.value)
                .map(PathBuf::from)
                .ok_or_else(|| {
                    BundleError::Configuration(format!(
                        "no plugin configuration setting named [{}] on resource [{}]",
                        base.value, resource.name
                    ))
                })?,
            DestinationContext::ResourceConfiguration => resource
                .resource_configuration
                .simple_value(&base.value)
                .map(PathBuf::from)
                .ok_or_else(|| {
                    BundleError::Configuration(format!(
                        "no resource configuration setting named [{}] on resource [{}]",
                        base.value, resource.name
                    ))
                })?,
            DestinationContext::MeasurementTrait => self
                .measurements
                .collect_trait_now(
                    resource.id,
                    &base.value,
                    self.config.trait_collection_timeout,
                )
                .await
                .map_err(|err| {
                    BundleError::Configuration(format!(
                        "failed to collect trait [{}] for resource [{}]: {err:#}",
                        base.value, resource.name
                    ))
                })?
                .map(PathBuf::from)
                .ok_or_else(|| {
                    BundleError::Configuration(format!(
                        "trait [{}] produced no value for resource [{}]",
                        base.value, resource.name
                    ))
                })?,
        };

        let dest_dir = destination.dest_dir.trim();
        // `join` replaces the base when dest_dir is absolute
        let resolved = if dest_dir.is_empty() {
            base_path
        } else {
            base_path.join(dest_dir)
        };
        if !resolved.is_absolute() {
            return Err(BundleError::Configuration(format!(
                "[{}] combined with [{}] did not produce an absolute path ({})",
                base.value,
                dest_dir,
                resolved.display()
            )));
        }
        Ok(resolved)
    }

    /// Stage the bundle version's package files, downloading anything that
    /// is missing or fails verification. A file that still fails
    /// verification after a fresh download aborts the deployment.
    async fn download_bundle_files(
        &self,
        deployment: &BundleResourceDeployment,
        dir: &Path,
    ) -> Result<HashMap<String, PathBuf>, BundleError> {
        let bundle_version = &deployment.deployment.bundle_version;
        let packages = self
            .server
            .package_versions(bundle_version.id)
            .await
            .map_err(|err| {
                BundleError::Server(format!(
                    "cannot list packages for bundle version {}: {err:#}",
                    bundle_version.id
                ))
            })?;

        let mut files = HashMap::new();
        for package in packages {
            let path = dir.join(&package.file_name);
            if verify_package(&package, &path).await.is_err() {
                self.audit(
                    deployment.id,
                    AUDIT_FILE_DOWNLOAD_STARTED,
                    &package.display_name,
                    HistoryStatus::Success,
                    Some(format!("downloading [{}]", package.file_name)),
                )
                .await;

                match self.server.download_package_bits(&package, &path).await {
                    Ok(size) => {
                        if package.file_size.is_some_and(|expected| expected != size) {
                            let message = format!(
                                "downloaded [{}] with size [{size}] but expected [{:?}]",
                                package.file_name, package.file_size
                            );
                            warn!(deployment_id = deployment.id, "{message}");
                            self.audit(
                                deployment.id,
                                AUDIT_FILE_DOWNLOAD_ENDED,
                                &package.display_name,
                                HistoryStatus::Warn,
                                Some(message),
                            )
                            .await;
                        } else {
                            self.audit(
                                deployment.id,
                                AUDIT_FILE_DOWNLOAD_ENDED,
                                &package.display_name,
                                HistoryStatus::Success,
                                Some(format!("download complete for [{}]", package.file_name)),
                            )
                            .await;
                        }
                    }
                    Err(err) => {
                        let message =
                            format!("failed to download [{}]: {err:#}", package.file_name);
                        warn!(deployment_id = deployment.id, "{message}");
                        self.audit(
                            deployment.id,
                            AUDIT_FILE_DOWNLOAD_ENDED,
                            &package.display_name,
                            HistoryStatus::Failure,
                            Some(message),
                        )
                        .await;
                    }
                }

                verify_package(&package, &path)
                    .await
                    .map_err(|err| BundleError::Verification(format!("{err:#}")))?;
            }
            files.insert(package.file_name.clone(), path);
        }
        Ok(files)
    }

    /// Wipe sibling bundle-version directories so the staging area does not
    /// accumulate files from deployments that will never run again.
    async fn remove_stale_version_dirs(&self, current: &Path) {
        let Some(parent) = current.parent() else {
            return;
        };
        let mut entries = match fs::read_dir(parent).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    dir = %parent.display(),
                    error = %err,
                    "cannot scan bundle staging area for stale downloads"
                );
                return;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path == current {
                continue;
            }
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            if let Err(err) = removed {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to remove stale bundle files"
                );
            }
        }
    }

    async fn audit(
        &self,
        deployment_id: u32,
        action: &str,
        info: &str,
        status: HistoryStatus,
        message: Option<String>,
    ) {
        let history = BundleDeploymentHistory::new(action, info, status, message);
        debug!(deployment_id, action, "recording deployment history");
        if let Err(err) = self
            .server
            .add_deployment_history(deployment_id, history)
            .await
        {
            warn!(
                deployment_id,
                error = %format!("{err:#}"),
                "failed to record deployment history"
            );
        }
    }

    /// Purge a live deployment from its destination. Runs inline rather than
    /// through the deployer queue; the caller gets the plugin's result.
    pub async fn purge_deployment(
        &self,
        deployment: &BundleResourceDeployment,
    ) -> Result<BundlePurgeResult, BundleError> {
        let container = self.inventory.resource_container(deployment.resource_id)?;
        let name = &deployment.deployment.name;
        self.audit(
            deployment.id,
            AUDIT_PURGE_STARTED,
            name,
            HistoryStatus::Success,
            Some(format!(
                "purging [{name}] from resource [{}]",
                container.resource().name
            )),
        )
        .await;

        let outcome = self.drive_purge(deployment, &container).await;
        match &outcome {
            Ok(result) if result.is_success() => {
                self.audit(
                    deployment.id,
                    AUDIT_PURGE_ENDED,
                    name,
                    HistoryStatus::Success,
                    None,
                )
                .await;
            }
            Ok(result) => {
                self.audit(
                    deployment.id,
                    AUDIT_PURGE_ENDED,
                    name,
                    HistoryStatus::Failure,
                    result.error_message.clone(),
                )
                .await;
            }
            Err(err) => {
                self.audit(
                    deployment.id,
                    AUDIT_PURGE_ENDED,
                    name,
                    HistoryStatus::Failure,
                    Some(format!("purge failed: {err}")),
                )
                .await;
            }
        }
        outcome
    }

    async fn drive_purge(
        &self,
        deployment: &BundleResourceDeployment,
        container: &crate::inventory::ResourceContainer,
    ) -> Result<BundlePurgeResult, BundleError> {
        let destination = self
            .resolve_destination(container.resource(), &deployment.deployment.destination)
            .await?;
        let proxy = container.bundle_proxy(FacetLockType::Write, Some(self.config.purge_timeout))?;
        let ctx = InvocationContext::new();
        Ok(proxy
            .purge_bundle(
                &ctx,
                BundlePurgeRequest {
                    deployment_name: deployment.deployment.name.clone(),
                    absolute_destination_directory: destination,
                },
            )
            .await?)
    }
}

/// Verify a staged package file against the package's sha256, if it carries
/// one. Missing files and mismatches are errors; a package without a
/// checksum passes once the file exists.
async fn verify_package(package: &PackageVersion, path: &Path) -> anyhow::Result<()> {
    if !fs::try_exists(path).await? {
        anyhow::bail!("package file [{}] does not exist", path.display());
    }
    let Some(expected) = package.sha256.as_deref() else {
        debug!(
            file = %path.display(),
            "package carries no checksum; skipping verification"
        );
        return Ok(());
    };

    let bytes = fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let actual = hex::encode(hasher.finalize());
    if actual != expected {
        anyhow::bail!(
            "package [{}] failed sha256 check: expected [{expected}], got [{actual}]",
            package.file_name
        );
    }
    Ok(())
}
