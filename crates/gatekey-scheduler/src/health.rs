use async_trait::async_trait;

use gatekey_keystore::UpstreamKey;

/// Liveness probe used by the release loop before reactivating a cooled-down
/// key, gated by `check_health_after_cool_down`.
///
/// Kept as a trait (rather than a direct dependency on the forwarder crate)
/// so the scheduler never depends on the HTTP stack; the binary wires a
/// concrete implementation in at construction, per the "gateway context"
/// note in the spec's design section.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self, key: &UpstreamKey) -> bool;
}

/// Default checker used when `check_health_after_cool_down` is disabled: the
/// release loop skips the probe entirely, so this is never actually invoked,
/// but a `None` health checker would complicate `KeyScheduler`'s construction.
pub struct NoopHealthChecker;

#[async_trait]
impl HealthChecker for NoopHealthChecker {
    async fn check(&self, _key: &UpstreamKey) -> bool {
        true
    }
}
