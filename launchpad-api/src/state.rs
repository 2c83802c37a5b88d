use launchpad_orchestrator::DeploymentCoordinator;
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: DeploymentCoordinator,
}

impl AppState {
    pub fn new(coordinator: DeploymentCoordinator) -> Self {
        Self { coordinator }
    }

    pub fn pool(&self) -> &SqlitePool {
        self.coordinator.registry().pool()
    }
}
