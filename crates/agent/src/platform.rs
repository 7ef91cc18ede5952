//! Built-in platform resource component.
//!
//! The agent always manages one resource: the machine it runs on. The
//! platform component answers availability trivially and exposes the host
//! name as a trait, which gives the scan loop and measurement layer
//! something real to exercise before any third-party plugin is loaded.

use agent_core::error::FacetResult;
use agent_core::facet::{AvailabilityFacet, MeasurementFacet, ResourceComponent};
use agent_core::invocation::InvocationContext;
use agent_core::models::{
    Availability, MeasurementData, MeasurementScheduleRequest, Resource, ResourceCategory,
    ResourceType,
};
use async_trait::async_trait;
use std::sync::Arc;

pub const PLATFORM_TYPE: &str = "Platform";
pub const PLATFORM_RESOURCE_ID: u32 = 1;
pub const HOSTNAME_TRAIT: &str = "hostname";

pub fn platform_resource(agent_name: &str) -> Resource {
    let rtype = Arc::new(ResourceType::new(
        PLATFORM_TYPE,
        "platform",
        ResourceCategory::Platform,
    ));
    Resource::new(
        PLATFORM_RESOURCE_ID,
        format!("platform:{agent_name}"),
        agent_name,
        rtype,
    )
}

pub struct PlatformComponent {
    hostname: String,
}

impl PlatformComponent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
        })
    }
}

#[async_trait]
impl ResourceComponent for PlatformComponent {
    fn as_availability(self: Arc<Self>) -> Option<Arc<dyn AvailabilityFacet>> {
        Some(self)
    }

    fn as_measurement(self: Arc<Self>) -> Option<Arc<dyn MeasurementFacet>> {
        Some(self)
    }
}

#[async_trait]
impl AvailabilityFacet for PlatformComponent {
    async fn get_availability(&self, _ctx: &InvocationContext) -> FacetResult<Availability> {
        // if the agent can ask, the platform is up
        Ok(Availability::Up)
    }
}

#[async_trait]
impl MeasurementFacet for PlatformComponent {
    async fn get_values(
        &self,
        _ctx: &InvocationContext,
        requests: &[MeasurementScheduleRequest],
    ) -> FacetResult<Vec<MeasurementData>> {
        Ok(requests
            .iter()
            .filter(|request| request.name == HOSTNAME_TRAIT)
            .map(|request| MeasurementData {
                name: request.name.clone(),
                value: self.hostname.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::inventory::Inventory;

    #[tokio::test]
    async fn platform_is_always_up_and_reports_its_hostname() {
        let inventory = Inventory::with_defaults();
        let container = inventory
            .activate_resource(platform_resource("test-agent"), PlatformComponent::new())
            .await
            .unwrap();
        container.set_measurement_schedules(vec![MeasurementScheduleRequest::trait_schedule(
            HOSTNAME_TRAIT,
        )]);

        let ctx = InvocationContext::new();
        assert_eq!(
            inventory
                .current_availability(PLATFORM_RESOURCE_ID, &ctx)
                .await,
            Availability::Up
        );

        let proxy = container
            .measurement_proxy(agent_core::facet::FacetLockType::Read, None)
            .unwrap();
        use agent_core::facet::MeasurementFacet as _;
        let values = proxy
            .get_values(
                &ctx,
                &[MeasurementScheduleRequest::trait_schedule(HOSTNAME_TRAIT)],
            )
            .await
            .unwrap();
        assert_eq!(values.len(), 1);
        assert!(!values[0].value.is_empty());
    }
}
