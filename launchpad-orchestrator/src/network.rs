use crate::backend::{AddressLookupApi, OrchestrationApi, TaskHandle};
use crate::error::{OrchestratorError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// How long to wait for a launched task to get a public address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvePolicy {
    /// Wait before the first lookup, giving the backend time to attach networking.
    pub initial_delay: Duration,
    pub max_attempts: u32,
    pub backoff_factor: u32,
    pub max_delay: Duration,
}

impl Default for ResolvePolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(8),
            max_attempts: 4,
            backoff_factor: 2,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ResolvePolicy {
    /// One fixed wait followed by one lookup.
    pub fn single_check(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt` (zero-based).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1).saturating_pow(attempt);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay.max(self.initial_delay))
    }
}

/// Looks up the public address of a launched task.
#[derive(Clone)]
pub struct NetworkResolver {
    orchestration: Arc<dyn OrchestrationApi>,
    lookup: Arc<dyn AddressLookupApi>,
}

impl NetworkResolver {
    pub fn new(orchestration: Arc<dyn OrchestrationApi>, lookup: Arc<dyn AddressLookupApi>) -> Self {
        Self {
            orchestration,
            lookup,
        }
    }

    /// Exactly one attempt: describe the task, then look up its interface.
    #[instrument(skip(self))]
    pub async fn resolve(&self, handle: &TaskHandle) -> Result<String> {
        let attachment = self
            .orchestration
            .describe(handle)
            .await
            .map_err(|e| OrchestratorError::NetworkResolutionFailed(format!("describe {handle}: {e:#}")))?
            .ok_or_else(|| {
                OrchestratorError::NetworkResolutionFailed(format!(
                    "task {handle} has no network attachment"
                ))
            })?;

        let interface_id = attachment.network_interface_id;
        debug!("Task {} attached to interface {}", handle, interface_id);

        self.lookup
            .lookup_public_address(&interface_id)
            .await
            .map_err(|e| {
                OrchestratorError::NetworkResolutionFailed(format!("lookup {interface_id}: {e:#}"))
            })?
            .ok_or_else(|| {
                OrchestratorError::NetworkResolutionFailed(format!(
                    "interface {interface_id} has no public address"
                ))
            })
    }

    /// Repeat [`resolve`](Self::resolve) under `policy` until it succeeds,
    /// attempts run out, or `cancel` fires.
    #[instrument(skip(self, policy, cancel))]
    pub async fn await_endpoint(
        &self,
        handle: &TaskHandle,
        policy: &ResolvePolicy,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let attempts = policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            let delay = policy.delay_before(attempt);
            debug!("Waiting {:?} before lookup {}/{}", delay, attempt + 1, attempts);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(OrchestratorError::Cancelled(format!(
                        "stopped waiting for network on task {handle}"
                    )));
                }
                _ = tokio::time::sleep(delay) => {}
            }

            match self.resolve(handle).await {
                Ok(endpoint) => {
                    info!("Task {} reachable at {}", handle, endpoint);
                    return Ok(endpoint);
                }
                Err(e) => {
                    warn!("Lookup {}/{} for task {} failed: {}", attempt + 1, attempts, handle, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            OrchestratorError::NetworkResolutionFailed(format!("no lookup attempted for task {handle}"))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule_is_capped() {
        let policy = ResolvePolicy::default();

        assert_eq!(policy.delay_before(0), Duration::from_secs(8));
        assert_eq!(policy.delay_before(1), Duration::from_secs(16));
        assert_eq!(policy.delay_before(2), Duration::from_secs(30));
        assert_eq!(policy.delay_before(10), Duration::from_secs(30));
    }

    #[test]
    fn test_single_check_waits_once() {
        let policy = ResolvePolicy::single_check(Duration::from_secs(8));

        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay_before(0), Duration::from_secs(8));
    }

    #[test]
    fn test_zero_delay_stays_zero() {
        let policy = ResolvePolicy {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..ResolvePolicy::default()
        };

        assert_eq!(policy.delay_before(3), Duration::ZERO);
    }
}
