//! Per-resource component container and the facet proxy machinery.
//!
//! Every live resource owns exactly one [`ResourceContainer`]. The container
//! hands out per-facet proxies that enforce the resource's lock discipline,
//! a wall-clock timeout, and cooperative interruption, so untrusted plugin
//! code can never stall an agent loop. Each facet kind gets its own
//! hand-written proxy type implementing the same capability trait the plugin
//! implements; there is no reflective dispatch.

use crate::error::{FacetError, FacetResult};
use crate::facet::{
    AvailabilityFacet, BundleFacet, ConfigurationFacet, ContentFacet, FacetKind, FacetLockType,
    MeasurementFacet, OperationFacet, ResourceComponent,
};
use crate::invocation::InvocationContext;
use crate::models::{
    Availability, BundleDeployRequest, BundleDeployResult, BundlePurgeRequest, BundlePurgeResult,
    Configuration, MeasurementData, MeasurementDataType, MeasurementScheduleRequest,
    OperationResult, PackageVersion, Resource, ResourceId,
};
use crate::observability;
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Owns one resource's component instance and the machinery that makes
/// invoking it safe.
pub struct ResourceContainer {
    resource: Resource,
    component: Arc<dyn ResourceComponent>,
    facet_lock: Arc<RwLock<()>>,
    shutdown: CancellationToken,
    measurement_schedules: StdRwLock<Vec<MeasurementScheduleRequest>>,
}

impl std::fmt::Debug for ResourceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceContainer")
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

impl ResourceContainer {
    pub fn new(resource: Resource, component: Arc<dyn ResourceComponent>) -> Self {
        Self {
            resource,
            component,
            facet_lock: Arc::new(RwLock::new(())),
            shutdown: CancellationToken::new(),
            measurement_schedules: StdRwLock::new(Vec::new()),
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn resource_id(&self) -> ResourceId {
        self.resource.id
    }

    pub fn set_measurement_schedules(&self, schedules: Vec<MeasurementScheduleRequest>) {
        *self.measurement_schedules.write().unwrap() = schedules;
    }

    pub fn measurement_schedules(&self) -> Vec<MeasurementScheduleRequest> {
        self.measurement_schedules.read().unwrap().clone()
    }

    /// The trait-typed schedule with the given name, if one is configured.
    pub fn trait_schedule(&self, name: &str) -> Option<MeasurementScheduleRequest> {
        self.measurement_schedules
            .read()
            .unwrap()
            .iter()
            .find(|s| s.data_type == MeasurementDataType::Trait && s.name == name)
            .cloned()
    }

    pub fn is_destroyed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop the component and invalidate every outstanding proxy. Invoked by
    /// the inventory on deactivation and agent shutdown; idempotent.
    pub async fn destroy(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        if let Err(error) = self.component.stop().await {
            warn!(
                resource_id = self.resource.id,
                error = %format!("{error:#}"),
                "component stop failed during container destroy"
            );
        }
    }

    pub fn supports_facet(&self, kind: FacetKind) -> bool {
        let component = self.component.clone();
        match kind {
            FacetKind::Availability => component.as_availability().is_some(),
            FacetKind::Operation => component.as_operation().is_some(),
            FacetKind::Configuration => component.as_configuration().is_some(),
            FacetKind::Content => component.as_content().is_some(),
            FacetKind::Measurement => component.as_measurement().is_some(),
            FacetKind::Bundle => component.as_bundle().is_some(),
        }
    }

    fn invoker(
        &self,
        facet: FacetKind,
        lock_type: FacetLockType,
        timeout: Option<Duration>,
    ) -> FacetInvoker {
        FacetInvoker {
            resource_id: self.resource.id,
            facet,
            lock_type,
            timeout,
            lock: self.facet_lock.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    fn not_supported(&self, facet: FacetKind) -> FacetError {
        FacetError::NotSupported {
            resource_id: self.resource.id,
            facet,
        }
    }

    /// Proxy for the availability facet. `timeout: None` means unbounded;
    /// the adaptive availability checker uses that because it manages its
    /// own sync/async budgets.
    pub fn availability_proxy(
        &self,
        lock_type: FacetLockType,
        timeout: Option<Duration>,
    ) -> FacetResult<AvailabilityFacetProxy> {
        let facet = self
            .component
            .clone()
            .as_availability()
            .ok_or_else(|| self.not_supported(FacetKind::Availability))?;
        Ok(AvailabilityFacetProxy {
            facet,
            invoker: self.invoker(FacetKind::Availability, lock_type, timeout),
        })
    }

    pub fn operation_proxy(
        &self,
        lock_type: FacetLockType,
        timeout: Option<Duration>,
    ) -> FacetResult<OperationFacetProxy> {
        let facet = self
            .component
            .clone()
            .as_operation()
            .ok_or_else(|| self.not_supported(FacetKind::Operation))?;
        Ok(OperationFacetProxy {
            facet,
            invoker: self.invoker(FacetKind::Operation, lock_type, timeout),
        })
    }

    pub fn configuration_proxy(
        &self,
        lock_type: FacetLockType,
        timeout: Option<Duration>,
    ) -> FacetResult<ConfigurationFacetProxy> {
        let facet = self
            .component
            .clone()
            .as_configuration()
            .ok_or_else(|| self.not_supported(FacetKind::Configuration))?;
        Ok(ConfigurationFacetProxy {
            facet,
            invoker: self.invoker(FacetKind::Configuration, lock_type, timeout),
        })
    }

    pub fn content_proxy(
        &self,
        lock_type: FacetLockType,
        timeout: Option<Duration>,
    ) -> FacetResult<ContentFacetProxy> {
        let facet = self
            .component
            .clone()
            .as_content()
            .ok_or_else(|| self.not_supported(FacetKind::Content))?;
        Ok(ContentFacetProxy {
            facet,
            invoker: self.invoker(FacetKind::Content, lock_type, timeout),
        })
    }

    pub fn measurement_proxy(
        &self,
        lock_type: FacetLockType,
        timeout: Option<Duration>,
    ) -> FacetResult<MeasurementFacetProxy> {
        let facet = self
            .component
            .clone()
            .as_measurement()
            .ok_or_else(|| self.not_supported(FacetKind::Measurement))?;
        Ok(MeasurementFacetProxy {
            facet,
            invoker: self.invoker(FacetKind::Measurement, lock_type, timeout),
        })
    }

    pub fn bundle_proxy(
        &self,
        lock_type: FacetLockType,
        timeout: Option<Duration>,
    ) -> FacetResult<BundleFacetProxy> {
        let facet = self
            .component
            .clone()
            .as_bundle()
            .ok_or_else(|| self.not_supported(FacetKind::Bundle))?;
        Ok(BundleFacetProxy {
            facet,
            invoker: self.invoker(FacetKind::Bundle, lock_type, timeout),
        })
    }
}

/// Shared lock/timeout/cancellation machinery behind every facet proxy.
#[derive(Clone)]
pub(crate) struct FacetInvoker {
    resource_id: ResourceId,
    facet: FacetKind,
    lock_type: FacetLockType,
    timeout: Option<Duration>,
    lock: Arc<RwLock<()>>,
    shutdown: CancellationToken,
}

impl FacetInvoker {
    /// Dispatch one facet call to a detached worker and wait for it within
    /// the configured budget.
    ///
    /// The worker owns the facet lock guard, so release is guaranteed on
    /// every exit path even when the caller has stopped waiting. A timed-out
    /// caller interrupts the worker's context and returns; the worker keeps
    /// running and its late result is dropped with the oneshot receiver.
    pub(crate) async fn invoke<T, F, Fut>(
        &self,
        caller: &InvocationContext,
        call: F,
    ) -> FacetResult<T>
    where
        F: FnOnce(InvocationContext) -> Fut,
        Fut: Future<Output = FacetResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        if caller.is_interrupted() {
            return Err(FacetError::Cancelled);
        }
        if self.shutdown.is_cancelled() {
            return Err(FacetError::Unavailable(format!(
                "resource {} container has been shut down",
                self.resource_id
            )));
        }

        observability::facet_invocation(self.facet);

        let worker_ctx = InvocationContext::new();
        let call_future = call(worker_ctx.clone());
        let lock = self.lock.clone();
        let lock_type = self.lock_type;
        let shutdown = self.shutdown.clone();
        let resource_id = self.resource_id;
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = run_locked(lock, lock_type, shutdown, resource_id, call_future).await;
            let _ = done_tx.send(result);
        });

        let completion = match self.timeout {
            Some(timeout) => match time::timeout(timeout, done_rx).await {
                Ok(completed) => completed,
                Err(_) => {
                    worker_ctx.interrupt();
                    observability::facet_timeout(self.facet);
                    warn!(
                        resource_id = self.resource_id,
                        facet = %self.facet,
                        timeout_ms = timeout.as_millis() as u64,
                        "facet invocation exceeded its timeout; worker left running"
                    );
                    return Err(FacetError::Timeout { timeout });
                }
            },
            None => done_rx.await,
        };

        match completion {
            Ok(result) => result,
            Err(_) => Err(FacetError::Unavailable(format!(
                "invocation worker for resource {} terminated without a result",
                self.resource_id
            ))),
        }
    }
}

async fn run_locked<T>(
    lock: Arc<RwLock<()>>,
    lock_type: FacetLockType,
    shutdown: CancellationToken,
    resource_id: ResourceId,
    call_future: impl Future<Output = FacetResult<T>>,
) -> FacetResult<T> {
    match lock_type {
        FacetLockType::None => call_future.await,
        FacetLockType::Read => {
            let _guard = tokio::select! {
                guard = lock.read() => guard,
                _ = shutdown.cancelled() => {
                    return Err(FacetError::Unavailable(format!(
                        "resource {resource_id} shut down while waiting for its read lock"
                    )));
                }
            };
            call_future.await
        }
        FacetLockType::Write => {
            let _guard = tokio::select! {
                guard = lock.write() => guard,
                _ = shutdown.cancelled() => {
                    return Err(FacetError::Unavailable(format!(
                        "resource {resource_id} shut down while waiting for its write lock"
                    )));
                }
            };
            call_future.await
        }
    }
}

/// Time-boxed, lock-disciplined view of a component's availability facet.
#[derive(Clone)]
pub struct AvailabilityFacetProxy {
    facet: Arc<dyn AvailabilityFacet>,
    invoker: FacetInvoker,
}

#[async_trait]
impl AvailabilityFacet for AvailabilityFacetProxy {
    async fn get_availability(&self, ctx: &InvocationContext) -> FacetResult<Availability> {
        let facet = self.facet.clone();
        self.invoker
            .invoke(ctx, move |ictx| async move { facet.get_availability(&ictx).await })
            .await
    }
}

#[derive(Clone)]
pub struct OperationFacetProxy {
    facet: Arc<dyn OperationFacet>,
    invoker: FacetInvoker,
}

#[async_trait]
impl OperationFacet for OperationFacetProxy {
    async fn invoke_operation(
        &self,
        ctx: &InvocationContext,
        name: &str,
        params: serde_json::Value,
    ) -> FacetResult<OperationResult> {
        let facet = self.facet.clone();
        let name = name.to_owned();
        self.invoker
            .invoke(ctx, move |ictx| async move {
                facet.invoke_operation(&ictx, &name, params).await
            })
            .await
    }
}

#[derive(Clone)]
pub struct ConfigurationFacetProxy {
    facet: Arc<dyn ConfigurationFacet>,
    invoker: FacetInvoker,
}

#[async_trait]
impl ConfigurationFacet for ConfigurationFacetProxy {
    async fn load_configuration(&self, ctx: &InvocationContext) -> FacetResult<Configuration> {
        let facet = self.facet.clone();
        self.invoker
            .invoke(ctx, move |ictx| async move { facet.load_configuration(&ictx).await })
            .await
    }

    async fn update_configuration(
        &self,
        ctx: &InvocationContext,
        configuration: Configuration,
    ) -> FacetResult<()> {
        let facet = self.facet.clone();
        self.invoker
            .invoke(ctx, move |ictx| async move {
                facet.update_configuration(&ictx, configuration).await
            })
            .await
    }
}

#[derive(Clone)]
pub struct ContentFacetProxy {
    facet: Arc<dyn ContentFacet>,
    invoker: FacetInvoker,
}

#[async_trait]
impl ContentFacet for ContentFacetProxy {
    async fn discover_deployed_packages(
        &self,
        ctx: &InvocationContext,
    ) -> FacetResult<Vec<PackageVersion>> {
        let facet = self.facet.clone();
        self.invoker
            .invoke(ctx, move |ictx| async move {
                facet.discover_deployed_packages(&ictx).await
            })
            .await
    }
}

#[derive(Clone)]
pub struct MeasurementFacetProxy {
    facet: Arc<dyn MeasurementFacet>,
    invoker: FacetInvoker,
}

#[async_trait]
impl MeasurementFacet for MeasurementFacetProxy {
    async fn get_values(
        &self,
        ctx: &InvocationContext,
        requests: &[MeasurementScheduleRequest],
    ) -> FacetResult<Vec<MeasurementData>> {
        let facet = self.facet.clone();
        let requests = requests.to_vec();
        self.invoker
            .invoke(ctx, move |ictx| async move {
                facet.get_values(&ictx, &requests).await
            })
            .await
    }
}

#[derive(Clone)]
pub struct BundleFacetProxy {
    facet: Arc<dyn BundleFacet>,
    invoker: FacetInvoker,
}

#[async_trait]
impl BundleFacet for BundleFacetProxy {
    async fn deploy_bundle(
        &self,
        ctx: &InvocationContext,
        request: BundleDeployRequest,
    ) -> FacetResult<BundleDeployResult> {
        let facet = self.facet.clone();
        self.invoker
            .invoke(ctx, move |ictx| async move {
                facet.deploy_bundle(&ictx, request).await
            })
            .await
    }

    async fn purge_bundle(
        &self,
        ctx: &InvocationContext,
        request: BundlePurgeRequest,
    ) -> FacetResult<BundlePurgeResult> {
        let facet = self.facet.clone();
        self.invoker
            .invoke(ctx, move |ictx| async move {
                facet.purge_bundle(&ictx, request).await
            })
            .await
    }
}
