//! Local resource inventory: the one-container-per-resource registry, the
//! availability monitors layered on it, and the narrow lookup interface the
//! other subsystems consume.

mod availability;
mod container;
mod scan;

pub use availability::{AvailabilityPolicy, AvailabilityProxy};
pub use container::{
    AvailabilityFacetProxy, BundleFacetProxy, ConfigurationFacetProxy, ContentFacetProxy,
    MeasurementFacetProxy, OperationFacetProxy, ResourceContainer,
};
pub use scan::{AvailabilityScanConfig, AvailabilityScanLoop};

use crate::error::{FacetError, FacetResult};
use crate::facet::{FacetKind, ResourceComponent};
use crate::invocation::InvocationContext;
use crate::models::{Availability, Resource, ResourceId};
use crate::observability;
use anyhow::Context;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Lookup interface consumed by the bundle and measurement subsystems.
/// Tests substitute their own implementations; production code passes the
/// [`Inventory`] itself.
pub trait InventoryLookup: Send + Sync {
    /// Resolve a live resource's container.
    fn resource_container(&self, resource_id: ResourceId) -> FacetResult<Arc<ResourceContainer>>;

    /// All live containers whose resource type carries the given name.
    fn containers_with_type(&self, type_name: &str) -> Vec<Arc<ResourceContainer>>;
}

/// Registry of activated resources. Holds exactly one container per live
/// resource plus an availability monitor for each component that supports
/// the availability facet.
pub struct Inventory {
    containers: DashMap<ResourceId, Arc<ResourceContainer>>,
    monitors: DashMap<ResourceId, Arc<AvailabilityProxy>>,
    policy: AvailabilityPolicy,
}

impl Inventory {
    pub fn new(policy: AvailabilityPolicy) -> Self {
        Self {
            containers: DashMap::new(),
            monitors: DashMap::new(),
            policy,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(AvailabilityPolicy::default())
    }

    /// Start the component and register its container. Fails if the
    /// resource is already activated or the component refuses to start.
    pub async fn activate_resource(
        &self,
        resource: Resource,
        component: Arc<dyn ResourceComponent>,
    ) -> anyhow::Result<Arc<ResourceContainer>> {
        let resource_id = resource.id;
        if self.containers.contains_key(&resource_id) {
            anyhow::bail!("resource {resource_id} is already activated");
        }

        component
            .start()
            .await
            .with_context(|| format!("failed to start component for resource {resource_id}"))?;

        let container = Arc::new(ResourceContainer::new(resource, component));
        match self.containers.entry(resource_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                container.destroy().await;
                anyhow::bail!("resource {resource_id} was activated concurrently");
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(container.clone());
            }
        }

        if container.supports_facet(FacetKind::Availability) {
            if let Ok(monitor) = AvailabilityProxy::new(&container, self.policy.clone()) {
                self.monitors.insert(resource_id, Arc::new(monitor));
            }
        }

        observability::resources_monitored(self.containers.len() as i64);
        info!(
            resource_id,
            resource = %container.resource().name,
            "resource activated"
        );
        Ok(container)
    }

    /// Stop the component and drop the container. Returns false if the
    /// resource was not activated.
    pub async fn deactivate_resource(&self, resource_id: ResourceId) -> bool {
        self.monitors.remove(&resource_id);
        match self.containers.remove(&resource_id) {
            Some((_, container)) => {
                container.destroy().await;
                observability::resources_monitored(self.containers.len() as i64);
                info!(resource_id, "resource deactivated");
                true
            }
            None => false,
        }
    }

    pub fn container(&self, resource_id: ResourceId) -> Option<Arc<ResourceContainer>> {
        self.containers.get(&resource_id).map(|e| e.value().clone())
    }

    pub fn availability_monitor(&self, resource_id: ResourceId) -> Option<Arc<AvailabilityProxy>> {
        self.monitors.get(&resource_id).map(|e| e.value().clone())
    }

    pub fn resource_count(&self) -> usize {
        self.containers.len()
    }

    pub fn resource_ids(&self) -> Vec<ResourceId> {
        self.containers.iter().map(|e| *e.key()).collect()
    }

    /// Degrading availability facade: always produces a value, never an
    /// error. Unknown resources and components without the facet answer
    /// `Unknown`; check errors fall back to the last known value.
    pub async fn current_availability(
        &self,
        resource_id: ResourceId,
        caller: &InvocationContext,
    ) -> Availability {
        let Some(monitor) = self.availability_monitor(resource_id) else {
            return Availability::Unknown;
        };
        match monitor.get_availability(caller).await {
            Ok(value) => value,
            Err(error) => {
                debug!(
                    resource_id,
                    error = %error,
                    "availability check degraded to last known value"
                );
                monitor.last_known()
            }
        }
    }

    /// Deactivate every resource. Called on agent shutdown.
    pub async fn shutdown(&self) {
        for resource_id in self.resource_ids() {
            self.deactivate_resource(resource_id).await;
        }
    }
}

impl InventoryLookup for Inventory {
    fn resource_container(&self, resource_id: ResourceId) -> FacetResult<Arc<ResourceContainer>> {
        self.container(resource_id).ok_or_else(|| {
            FacetError::Unavailable(format!("resource {resource_id} is not activated in inventory"))
        })
    }

    fn containers_with_type(&self, type_name: &str) -> Vec<Arc<ResourceContainer>> {
        self.containers
            .iter()
            .filter(|e| e.value().resource().resource_type.name == type_name)
            .map(|e| e.value().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facet::AvailabilityFacet;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct ToggleComponent {
        up: AtomicBool,
        fail: AtomicBool,
    }

    impl ToggleComponent {
        fn up() -> Arc<Self> {
            Arc::new(Self {
                up: AtomicBool::new(true),
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl ResourceComponent for ToggleComponent {
        fn as_availability(self: Arc<Self>) -> Option<Arc<dyn AvailabilityFacet>> {
            Some(self)
        }
    }

    #[async_trait]
    impl AvailabilityFacet for ToggleComponent {
        async fn get_availability(&self, _ctx: &InvocationContext) -> FacetResult<Availability> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(anyhow::anyhow!("probe broke").into());
            }
            if self.up.load(Ordering::SeqCst) {
                Ok(Availability::Up)
            } else {
                Ok(Availability::Down)
            }
        }
    }

    fn test_resource(id: ResourceId) -> Resource {
        use crate::models::{ResourceCategory, ResourceType};
        let rtype = Arc::new(ResourceType::new("ToggleServer", "toggle", ResourceCategory::Server));
        Resource::new(id, format!("key-{id}"), format!("toggle-{id}"), rtype)
    }

    #[tokio::test]
    async fn activation_is_exclusive_per_resource() {
        let inventory = Inventory::with_defaults();
        inventory
            .activate_resource(test_resource(1), ToggleComponent::up())
            .await
            .unwrap();

        let error = inventory
            .activate_resource(test_resource(1), ToggleComponent::up())
            .await
            .unwrap_err();
        assert!(error.to_string().contains("already activated"));
        assert_eq!(inventory.resource_count(), 1);
    }

    #[tokio::test]
    async fn deactivation_destroys_the_container() {
        let inventory = Inventory::with_defaults();
        let container = inventory
            .activate_resource(test_resource(2), ToggleComponent::up())
            .await
            .unwrap();

        assert!(inventory.deactivate_resource(2).await);
        assert!(container.is_destroyed());
        assert!(inventory.container(2).is_none());
        assert!(!inventory.deactivate_resource(2).await);
    }

    #[tokio::test]
    async fn unknown_resource_availability_is_unknown() {
        let inventory = Inventory::with_defaults();
        let ctx = InvocationContext::new();
        assert_eq!(
            inventory.current_availability(99, &ctx).await,
            Availability::Unknown
        );
    }

    #[tokio::test]
    async fn lookup_by_type_matches_type_names() {
        let inventory = Inventory::with_defaults();
        inventory
            .activate_resource(test_resource(3), ToggleComponent::up())
            .await
            .unwrap();

        assert_eq!(inventory.containers_with_type("ToggleServer").len(), 1);
        assert!(inventory.containers_with_type("Other").is_empty());
        assert!(inventory.resource_container(3).is_ok());
        assert!(matches!(
            inventory.resource_container(4),
            Err(FacetError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn availability_facade_tracks_component_state() {
        let inventory = Inventory::with_defaults();
        let component = ToggleComponent::up();
        inventory
            .activate_resource(test_resource(5), component.clone())
            .await
            .unwrap();

        let ctx = InvocationContext::new();
        assert_eq!(
            inventory.current_availability(5, &ctx).await,
            Availability::Up
        );

        component.up.store(false, Ordering::SeqCst);
        // allow the coalescing window to clear between checks
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            inventory.current_availability(5, &ctx).await,
            Availability::Down
        );
    }
}
