//! Prometheus metrics for the agent core.
//!
//! Metrics are registered once in the default registry; the agent binary
//! exposes them through its `/metrics` endpoint.

use crate::facet::FacetKind;
use crate::models::BundleDeploymentStatus;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;

/// Buckets for the availability scan duration (in seconds). Scans cover the
/// whole inventory, so the tail is long.
const SCAN_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0];

static METRICS: OnceLock<AgentMetrics> = OnceLock::new();

struct AgentMetrics {
    facet_invocations: IntCounterVec,
    facet_timeouts: IntCounterVec,
    availability_checks: IntCounter,
    availability_coalesced_waits: IntCounter,
    availability_sync_disabled: IntGauge,
    resources_monitored: IntGauge,
    bundle_deployments: IntCounterVec,
    availability_scan_seconds: Histogram,
}

impl AgentMetrics {
    fn new() -> Self {
        Self {
            facet_invocations: register_int_counter_vec!(
                "mgmt_agent_facet_invocations_total",
                "Facet invocations dispatched through a resource container proxy",
                &["facet"]
            )
            .expect("Failed to register facet_invocations_total"),

            facet_timeouts: register_int_counter_vec!(
                "mgmt_agent_facet_timeouts_total",
                "Facet invocations whose caller gave up after the bounded wait",
                &["facet"]
            )
            .expect("Failed to register facet_timeouts_total"),

            availability_checks: register_int_counter!(
                "mgmt_agent_availability_checks_total",
                "Background availability checks submitted"
            )
            .expect("Failed to register availability_checks_total"),

            availability_coalesced_waits: register_int_counter!(
                "mgmt_agent_availability_coalesced_waits_total",
                "Availability calls that joined an already in-flight check"
            )
            .expect("Failed to register availability_coalesced_waits_total"),

            availability_sync_disabled: register_int_gauge!(
                "mgmt_agent_availability_sync_disabled_resources",
                "Resources whose synchronous availability waiting is currently disabled"
            )
            .expect("Failed to register availability_sync_disabled_resources"),

            resources_monitored: register_int_gauge!(
                "mgmt_agent_resources_monitored",
                "Resources currently activated in the local inventory"
            )
            .expect("Failed to register resources_monitored"),

            bundle_deployments: register_int_counter_vec!(
                "mgmt_agent_bundle_deployments_total",
                "Bundle deployments by terminal status",
                &["status"]
            )
            .expect("Failed to register bundle_deployments_total"),

            availability_scan_seconds: register_histogram!(
                "mgmt_agent_availability_scan_seconds",
                "Time spent scanning the inventory for availability changes",
                SCAN_BUCKETS.to_vec()
            )
            .expect("Failed to register availability_scan_seconds"),
        }
    }
}

fn metrics() -> &'static AgentMetrics {
    METRICS.get_or_init(AgentMetrics::new)
}

pub(crate) fn facet_invocation(facet: FacetKind) {
    metrics()
        .facet_invocations
        .with_label_values(&[facet.as_str()])
        .inc();
}

pub(crate) fn facet_timeout(facet: FacetKind) {
    metrics()
        .facet_timeouts
        .with_label_values(&[facet.as_str()])
        .inc();
}

pub(crate) fn availability_check_started() {
    metrics().availability_checks.inc();
}

pub(crate) fn availability_wait_coalesced() {
    metrics().availability_coalesced_waits.inc();
}

pub(crate) fn availability_sync_disabled(disabled: bool) {
    if disabled {
        metrics().availability_sync_disabled.inc();
    } else {
        metrics().availability_sync_disabled.dec();
    }
}

pub(crate) fn resources_monitored(count: i64) {
    metrics().resources_monitored.set(count);
}

pub(crate) fn bundle_deployment_finished(status: BundleDeploymentStatus) {
    let label = status.to_string();
    metrics()
        .bundle_deployments
        .with_label_values(&[label.as_str()])
        .inc();
}

pub(crate) fn scan_duration(elapsed: Duration) {
    metrics()
        .availability_scan_seconds
        .observe(elapsed.as_secs_f64());
}
