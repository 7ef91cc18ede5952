//! Adaptive, coalescing availability checking.
//!
//! Plugin availability probes are allowed to be arbitrarily slow. This proxy
//! guarantees that (a) at most one probe per resource is in flight, (b) the
//! common case answers within a short synchronous wait, and (c) chronically
//! slow components stop being waited on at all while background probing
//! continues, so callers always get an answer within a bounded ceiling.

use crate::error::{FacetError, FacetResult};
use crate::facet::{AvailabilityFacet, FacetLockType};
use crate::invocation::InvocationContext;
use crate::inventory::container::{AvailabilityFacetProxy, ResourceContainer};
use crate::models::{Availability, ResourceId};
use crate::observability;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::{info, warn};

/// Timing policy for availability checks.
///
/// Production defaults: a one second synchronous wait, a sixty second
/// overall ceiling, and sync waiting disabled after five consecutive
/// synchronous timeouts. Deployments with very slow probes can widen these.
#[derive(Debug, Clone)]
pub struct AvailabilityPolicy {
    /// How long a caller waits synchronously for the in-flight check.
    pub sync_timeout: Duration,
    /// Overall ceiling, measured from check submission; past it the caller
    /// gets a timeout error while the check keeps running.
    pub async_timeout: Duration,
    /// Consecutive synchronous timeouts after which sync waiting is
    /// disabled until a check completes promptly again.
    pub sync_disable_threshold: u32,
}

impl Default for AvailabilityPolicy {
    fn default() -> Self {
        Self {
            sync_timeout: Duration::from_secs(1),
            async_timeout: Duration::from_secs(60),
            sync_disable_threshold: 5,
        }
    }
}

struct InFlightCheck {
    started: Instant,
    done: watch::Receiver<Option<Availability>>,
}

struct CheckState {
    last_known: Availability,
    in_flight: Option<InFlightCheck>,
    sync_disabled: bool,
    consecutive_sync_timeouts: u32,
}

/// Availability checker for one resource, layered over an unlocked,
/// untimed facet proxy from that resource's container.
pub struct AvailabilityProxy {
    resource_id: ResourceId,
    facet: AvailabilityFacetProxy,
    policy: AvailabilityPolicy,
    state: Arc<Mutex<CheckState>>,
}

impl AvailabilityProxy {
    /// Checks go through a NONE-lock proxy with no per-call timeout: the
    /// proxy manages its own sync/async budgets, and an availability probe
    /// must never queue behind a pending configuration write.
    pub fn new(container: &ResourceContainer, policy: AvailabilityPolicy) -> FacetResult<Self> {
        let facet = container.availability_proxy(FacetLockType::None, None)?;
        Ok(Self {
            resource_id: container.resource_id(),
            facet,
            policy,
            state: Arc::new(Mutex::new(CheckState {
                last_known: Availability::Unknown,
                in_flight: None,
                sync_disabled: false,
                consecutive_sync_timeouts: 0,
            })),
        })
    }

    /// The value recorded by the most recently completed check.
    pub fn last_known(&self) -> Availability {
        self.state.lock().unwrap().last_known
    }

    pub fn is_sync_disabled(&self) -> bool {
        self.state.lock().unwrap().sync_disabled
    }

    pub fn check_in_flight(&self) -> bool {
        self.state.lock().unwrap().in_flight.is_some()
    }

    /// Answer "is this resource up?".
    ///
    /// An already-interrupted caller gets `Unknown` immediately without
    /// touching in-flight state. Otherwise the caller either submits a new
    /// background check or coalesces onto the one in flight, waits up to the
    /// sync timeout, and on expiry escalates to the async budget (measured
    /// from the original submission). With sync waiting disabled the last
    /// known value is returned at once while checks continue in the
    /// background.
    pub async fn get_availability(&self, caller: &InvocationContext) -> FacetResult<Availability> {
        if caller.is_interrupted() {
            return Ok(Availability::Unknown);
        }

        let (done, started, skip_wait) = {
            let mut state = self.state.lock().unwrap();
            let (done, started) = match &state.in_flight {
                Some(check) => {
                    observability::availability_wait_coalesced();
                    (check.done.clone(), check.started)
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    let started = Instant::now();
                    state.in_flight = Some(InFlightCheck {
                        started,
                        done: rx.clone(),
                    });
                    self.spawn_check(tx, started);
                    (rx, started)
                }
            };
            let skip_wait = state.sync_disabled.then_some(state.last_known);
            (done, started, skip_wait)
        };

        if let Some(last_known) = skip_wait {
            return Ok(last_known);
        }

        if let Some(value) = await_completion(done.clone(), self.policy.sync_timeout).await {
            return Ok(value);
        }

        // The short wait elapsed. Count it toward disabling sync waits, then
        // fall back to whatever remains of the async budget.
        {
            let mut state = self.state.lock().unwrap();
            state.consecutive_sync_timeouts += 1;
            if !state.sync_disabled
                && state.consecutive_sync_timeouts >= self.policy.sync_disable_threshold
            {
                state.sync_disabled = true;
                observability::availability_sync_disabled(true);
                warn!(
                    resource_id = self.resource_id,
                    consecutive_timeouts = state.consecutive_sync_timeouts,
                    "disabling synchronous availability waits for chronically slow component"
                );
            }
        }

        let remaining = self.policy.async_timeout.saturating_sub(started.elapsed());
        match await_completion(done, remaining).await {
            Some(value) => Ok(value),
            None => Err(FacetError::Timeout {
                timeout: self.policy.async_timeout,
            }),
        }
    }

    fn spawn_check(&self, tx: watch::Sender<Option<Availability>>, started: Instant) {
        observability::availability_check_started();
        let facet = self.facet.clone();
        let state = self.state.clone();
        let sync_timeout = self.policy.sync_timeout;
        let resource_id = self.resource_id;

        tokio::spawn(async move {
            let ctx = InvocationContext::new();
            let value = match facet.get_availability(&ctx).await {
                Ok(value) => value,
                Err(error) => {
                    warn!(
                        resource_id,
                        error = %error,
                        "availability check failed; reporting DOWN"
                    );
                    Availability::Down
                }
            };

            // This may run long after every caller has stopped waiting; the
            // update still applies so the next caller benefits from it.
            let elapsed = started.elapsed();
            {
                let mut state = state.lock().unwrap();
                state.last_known = value;
                state.in_flight = None;
                if elapsed <= sync_timeout {
                    if state.sync_disabled {
                        info!(
                            resource_id,
                            "availability check completed promptly; re-enabling synchronous waits"
                        );
                        observability::availability_sync_disabled(false);
                    }
                    state.sync_disabled = false;
                    state.consecutive_sync_timeouts = 0;
                }
            }
            let _ = tx.send(Some(value));
        });
    }
}

async fn await_completion(
    mut done: watch::Receiver<Option<Availability>>,
    limit: Duration,
) -> Option<Availability> {
    if let Some(value) = *done.borrow_and_update() {
        return Some(value);
    }
    time::timeout(limit, async move {
        loop {
            if done.changed().await.is_err() {
                return None;
            }
            if let Some(value) = *done.borrow() {
                return Some(value);
            }
        }
    })
    .await
    .ok()
    .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facet::ResourceComponent;
    use crate::models::{Resource, ResourceCategory, ResourceType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use tokio::time::sleep;

    /// Probe whose per-call delay is adjustable and which counts every real
    /// facet invocation.
    struct TunableProbe {
        delay_ms: AtomicU64,
        invocations: AtomicUsize,
        fail: bool,
    }

    impl TunableProbe {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay_ms: AtomicU64::new(delay.as_millis() as u64),
                invocations: AtomicUsize::new(0),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                delay_ms: AtomicU64::new(0),
                invocations: AtomicUsize::new(0),
                fail: true,
            })
        }

        fn set_delay(&self, delay: Duration) {
            self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
        }

        fn invocations(&self) -> usize {
            self.invocations.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResourceComponent for TunableProbe {
        fn as_availability(self: Arc<Self>) -> Option<Arc<dyn AvailabilityFacet>> {
            Some(self)
        }
    }

    #[async_trait]
    impl AvailabilityFacet for TunableProbe {
        async fn get_availability(&self, _ctx: &InvocationContext) -> FacetResult<Availability> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(self.delay_ms.load(Ordering::SeqCst))).await;
            if self.fail {
                return Err(anyhow::anyhow!("probe socket refused").into());
            }
            Ok(Availability::Up)
        }
    }

    /// Probe that is slow on every nth invocation and fast otherwise.
    struct RhythmicProbe {
        every: usize,
        fast: Duration,
        slow: Duration,
        invocations: AtomicUsize,
    }

    #[async_trait]
    impl ResourceComponent for RhythmicProbe {
        fn as_availability(self: Arc<Self>) -> Option<Arc<dyn AvailabilityFacet>> {
            Some(self)
        }
    }

    #[async_trait]
    impl AvailabilityFacet for RhythmicProbe {
        async fn get_availability(&self, _ctx: &InvocationContext) -> FacetResult<Availability> {
            let call = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
            let delay = if call % self.every == 0 { self.slow } else { self.fast };
            sleep(delay).await;
            Ok(Availability::Up)
        }
    }

    fn container_for(component: Arc<dyn ResourceComponent>) -> Arc<ResourceContainer> {
        let rtype = Arc::new(ResourceType::new("ProbeServer", "probe", ResourceCategory::Server));
        let resource = Resource::new(7, "probe-key", "probe", rtype);
        Arc::new(ResourceContainer::new(resource, component))
    }

    fn quick_policy() -> AvailabilityPolicy {
        AvailabilityPolicy {
            sync_timeout: Duration::from_millis(250),
            async_timeout: Duration::from_secs(60),
            sync_disable_threshold: 5,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_check_value_is_returned_and_recorded() {
        let probe = TunableProbe::new(Duration::from_millis(10));
        let container = container_for(probe.clone());
        let proxy = AvailabilityProxy::new(&container, quick_policy()).unwrap();

        assert_eq!(proxy.last_known(), Availability::Unknown);

        let ctx = InvocationContext::new();
        let value = proxy.get_availability(&ctx).await.unwrap();
        assert_eq!(value, Availability::Up);
        assert_eq!(proxy.last_known(), Availability::Up);
        assert!(!proxy.check_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_a_single_check() {
        let probe = TunableProbe::new(Duration::from_millis(150));
        let container = container_for(probe.clone());
        let proxy = Arc::new(AvailabilityProxy::new(&container, quick_policy()).unwrap());

        let mut callers = Vec::new();
        for _ in 0..5 {
            let proxy = proxy.clone();
            callers.push(tokio::spawn(async move {
                let ctx = InvocationContext::new();
                proxy.get_availability(&ctx).await
            }));
        }

        for caller in callers {
            assert_eq!(caller.await.unwrap().unwrap(), Availability::Up);
        }
        assert_eq!(probe.invocations(), 1);
    }

    #[tokio::test]
    async fn pre_interrupted_caller_gets_unknown_and_submits_nothing() {
        let probe = TunableProbe::new(Duration::from_millis(10));
        let container = container_for(probe.clone());
        let proxy = AvailabilityProxy::new(&container, quick_policy()).unwrap();

        let ctx = InvocationContext::new();
        ctx.interrupt();

        let value = proxy.get_availability(&ctx).await.unwrap();
        assert_eq!(value, Availability::Unknown);
        assert!(ctx.is_interrupted());
        assert!(!proxy.check_in_flight());
        assert_eq!(probe.invocations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_is_bounded_by_the_async_ceiling() {
        let probe = TunableProbe::new(Duration::from_secs(10));
        let container = container_for(probe.clone());
        let policy = AvailabilityPolicy {
            sync_timeout: Duration::from_millis(50),
            async_timeout: Duration::from_millis(400),
            sync_disable_threshold: 5,
        };
        let proxy = AvailabilityProxy::new(&container, policy).unwrap();

        let ctx = InvocationContext::new();
        let begun = Instant::now();
        let error = proxy.get_availability(&ctx).await.unwrap_err();
        assert!(error.is_timeout());
        assert!(begun.elapsed() <= Duration::from_millis(450));

        // The check is still in flight and eventually lands its value.
        assert!(proxy.check_in_flight());
        sleep(Duration::from_secs(11)).await;
        assert_eq!(proxy.last_known(), Availability::Up);
        assert!(!proxy.check_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn chronically_slow_component_degrades_then_recovers() {
        let probe = TunableProbe::new(Duration::from_millis(120));
        let container = container_for(probe.clone());
        let policy = AvailabilityPolicy {
            sync_timeout: Duration::from_millis(40),
            async_timeout: Duration::from_secs(5),
            sync_disable_threshold: 2,
        };
        let proxy = AvailabilityProxy::new(&container, policy).unwrap();
        let ctx = InvocationContext::new();

        // Two sync timeouts in a row cross the threshold.
        assert_eq!(proxy.get_availability(&ctx).await.unwrap(), Availability::Up);
        assert!(!proxy.is_sync_disabled());
        assert_eq!(proxy.get_availability(&ctx).await.unwrap(), Availability::Up);
        assert!(proxy.is_sync_disabled());

        // Disabled: the answer is instant even though a check is submitted.
        probe.set_delay(Duration::from_millis(5));
        let begun = Instant::now();
        assert_eq!(proxy.get_availability(&ctx).await.unwrap(), Availability::Up);
        assert!(begun.elapsed() < Duration::from_millis(40));
        assert!(proxy.check_in_flight());

        // That background check completes within the sync window, which
        // re-enables synchronous waiting.
        sleep(Duration::from_millis(50)).await;
        assert!(!proxy.is_sync_disabled());
        assert_eq!(proxy.get_availability(&ctx).await.unwrap(), Availability::Up);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_check_resolves_to_down() {
        let probe = TunableProbe::failing();
        let container = container_for(probe.clone());
        let proxy = AvailabilityProxy::new(&container, quick_policy()).unwrap();

        let ctx = InvocationContext::new();
        let value = proxy.get_availability(&ctx).await.unwrap();
        assert_eq!(value, Availability::Down);
        assert_eq!(proxy.last_known(), Availability::Down);
    }

    /// Rapid-fire calls against a probe that is slow on every third
    /// invocation: coalescing keeps the real invocation count well under the
    /// call count without ever surfacing a spurious non-UP value.
    #[tokio::test(start_paused = true)]
    async fn rapid_fire_calls_coalesce_without_spurious_values() {
        let probe = Arc::new(RhythmicProbe {
            every: 3,
            fast: Duration::from_millis(10),
            slow: Duration::from_millis(400),
            invocations: AtomicUsize::new(0),
        });
        let container = container_for(probe.clone());
        let policy = AvailabilityPolicy {
            sync_timeout: Duration::from_millis(250),
            async_timeout: Duration::from_millis(300),
            sync_disable_threshold: 100,
        };
        let proxy = AvailabilityProxy::new(&container, policy).unwrap();
        let ctx = InvocationContext::new();

        let mut resolved = Vec::new();
        for _ in 0..15 {
            if let Ok(value) = proxy.get_availability(&ctx).await {
                resolved.push(value);
            }
            sleep(Duration::from_millis(25)).await;
        }

        assert!(!resolved.is_empty());
        assert!(resolved.iter().all(|v| *v == Availability::Up), "{resolved:?}");

        let invocations = probe.invocations.load(Ordering::SeqCst);
        assert!(
            invocations > 3 && invocations < 15,
            "expected coalescing to land between 3 and 15 invocations, got {invocations}"
        );
    }
}
