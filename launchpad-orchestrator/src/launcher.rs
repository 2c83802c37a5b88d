use crate::backend::{OrchestrationApi, TaskHandle};
use crate::builder::LaunchSpec;
use crate::error::{OrchestratorError, Result};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Submits launch specifications to the orchestration backend.
///
/// Single attempt per call. Retrying is the caller's decision.
#[derive(Clone)]
pub struct WorkloadLauncher {
    api: Arc<dyn OrchestrationApi>,
}

impl WorkloadLauncher {
    pub fn new(api: Arc<dyn OrchestrationApi>) -> Self {
        Self { api }
    }

    #[instrument(skip(self, spec), fields(family = %spec.task_family, container = %spec.container_name))]
    pub async fn launch(&self, spec: &LaunchSpec) -> Result<TaskHandle> {
        match self.api.launch(spec).await {
            Ok(handle) => {
                info!("Launched task {}", handle);
                Ok(handle)
            }
            Err(e) => {
                error!("Launch rejected: {:#}", e);
                Err(OrchestratorError::LaunchFailed(format!("{e:#}")))
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn stop(&self, handle: &TaskHandle) -> Result<()> {
        self.api.stop(handle).await.map_err(|e| {
            warn!("Failed to stop task {}: {:#}", handle, e);
            OrchestratorError::StopFailed(format!("{handle}: {e:#}"))
        })?;

        info!("Stopped task {}", handle);
        Ok(())
    }
}
