//! Periodic availability scanning and change reporting.
//!
//! The scan loop walks the inventory on a fixed interval, asks each
//! resource's availability monitor for a current value, and pushes a report
//! of changes to the server collaborator. Reporting is fire-and-forget: a
//! failed push is logged and the unreported changes roll into the next scan.

use crate::invocation::InvocationContext;
use crate::inventory::Inventory;
use crate::models::{Availability, AvailabilityReport, AvailabilityReportEntry, ResourceId};
use crate::observability;
use crate::server::AvailabilityReporter;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct AvailabilityScanConfig {
    /// Interval between full inventory scans.
    pub interval: Duration,
    /// Agent name stamped on outgoing reports.
    pub agent: String,
}

impl Default for AvailabilityScanConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            agent: "agent".to_string(),
        }
    }
}

/// Scans the inventory and reports availability changes upstream.
pub struct AvailabilityScanLoop {
    inventory: Arc<Inventory>,
    reporter: Arc<dyn AvailabilityReporter>,
    config: AvailabilityScanConfig,
    reported: HashMap<ResourceId, Availability>,
}

impl AvailabilityScanLoop {
    pub fn new(
        inventory: Arc<Inventory>,
        reporter: Arc<dyn AvailabilityReporter>,
        config: AvailabilityScanConfig,
    ) -> Self {
        Self {
            inventory,
            reporter,
            config,
            reported: HashMap::new(),
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "starting availability scan loop"
        );
        let mut ticker = interval(self.config.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.scan_once().await;
                }
                _ = shutdown.cancelled() => {
                    info!("shutting down availability scan loop");
                    break;
                }
            }
        }
    }

    /// One full pass over the inventory. Exposed for tests and for callers
    /// that want an immediate scan outside the ticker.
    pub async fn scan_once(&mut self) {
        let begun = Instant::now();
        let ctx = InvocationContext::new();
        let live: HashSet<ResourceId> = self.inventory.resource_ids().into_iter().collect();

        // forget resources that have left inventory
        self.reported.retain(|id, _| live.contains(id));

        let mut changes = Vec::new();
        for resource_id in &live {
            let availability = self.inventory.current_availability(*resource_id, &ctx).await;
            if self.reported.get(resource_id) != Some(&availability) {
                changes.push(AvailabilityReportEntry {
                    resource_id: *resource_id,
                    availability,
                    timestamp: chrono::Utc::now().timestamp(),
                });
            }
        }
        observability::scan_duration(begun.elapsed());

        if changes.is_empty() {
            return;
        }

        let report = AvailabilityReport {
            agent: self.config.agent.clone(),
            entries: changes.clone(),
            changes_only: true,
        };
        match self.reporter.report_availability(report).await {
            Ok(()) => {
                for entry in changes {
                    self.reported.insert(entry.resource_id, entry.availability);
                }
            }
            Err(error) => {
                // changes stay uncommitted so the next scan reports them again
                warn!(error = %format!("{error:#}"), "failed to push availability report");
            }
        }
    }
}
