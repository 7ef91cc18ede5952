//! Real-time measurement collection against live components.
//!
//! Bundle destination resolution needs the *current* value of a trait, not
//! the last scheduled collection, so this goes straight through the
//! resource's measurement facet with a bounded wait.

use crate::facet::{FacetLockType, MeasurementFacet};
use crate::invocation::InvocationContext;
use crate::inventory::InventoryLookup;
use crate::models::ResourceId;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait MeasurementCollector: Send + Sync {
    /// Collect the current value of a named trait, waiting at most
    /// `timeout`. `Ok(None)` means the resource has no such trait schedule
    /// or the component produced no datum for it.
    async fn collect_trait_now(
        &self,
        resource_id: ResourceId,
        trait_name: &str,
        timeout: Duration,
    ) -> anyhow::Result<Option<String>>;
}

/// Collector that invokes the live component's measurement facet through a
/// READ-locked container proxy.
pub struct LiveMeasurementCollector {
    inventory: Arc<dyn InventoryLookup>,
}

impl LiveMeasurementCollector {
    pub fn new(inventory: Arc<dyn InventoryLookup>) -> Self {
        Self { inventory }
    }
}

#[async_trait]
impl MeasurementCollector for LiveMeasurementCollector {
    async fn collect_trait_now(
        &self,
        resource_id: ResourceId,
        trait_name: &str,
        timeout: Duration,
    ) -> anyhow::Result<Option<String>> {
        let container = self.inventory.resource_container(resource_id)?;
        let Some(schedule) = container.trait_schedule(trait_name) else {
            return Ok(None);
        };

        let proxy = container.measurement_proxy(FacetLockType::Read, Some(timeout))?;
        let ctx = InvocationContext::new();
        let data = proxy.get_values(&ctx, &[schedule]).await?;
        Ok(data
            .into_iter()
            .find(|datum| datum.name == trait_name)
            .map(|datum| datum.value))
    }
}
