use anyhow::{Context, Result};
use launchpad_api::{create_app, logging, AppState, Config};
use launchpad_orchestrator::backend::{HttpAddressLookup, HttpOrchestrationApi};
use launchpad_orchestrator::db::{backup_database, create_pool, run_migrations};
use launchpad_orchestrator::{
    DeploymentCoordinator, GitTriggerAdapter, GithubHookApi, NetworkResolver,
    ProvisionRequestBuilder, ResourceRegistry, WorkloadLauncher,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_subscriber();

    info!("Starting launchpad-api service...");

    // Load configuration
    let config = Config::from_env();
    info!(
        "Configuration loaded: bind_addr={}, db_path={}, orchestration_url={}",
        config.bind_addr,
        config.db_path.display(),
        config.orchestration_url
    );

    // Backup before migrations
    let db_path = &config.db_path;
    if let Some(backup_path) = backup_database(db_path)? {
        info!("Database backed up to: {}", backup_path.display());
    }

    // Create pool and run migrations
    let pool = create_pool(db_path).await?;
    info!("Running database migrations...");
    run_migrations(&pool).await?;
    info!("Migrations complete");

    // One HTTP client shared by every backend
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;

    let orchestration = Arc::new(HttpOrchestrationApi::new(
        client.clone(),
        &config.orchestration_url,
        config.orchestration_token.clone(),
    )?);
    let lookup = Arc::new(HttpAddressLookup::new(
        client.clone(),
        &config.network_url,
        config.orchestration_token.clone(),
    )?);

    let mut coordinator = DeploymentCoordinator::new(
        ResourceRegistry::new(pool),
        ProvisionRequestBuilder::new(config.builder_config()),
        WorkloadLauncher::new(orchestration.clone()),
        NetworkResolver::new(orchestration, lookup),
        config.coordinator_options(),
    );

    match &config.webhook_callback_base {
        Some(callback_base) => {
            let hooks = GithubHookApi::new(
                client,
                config.github_api_url.clone(),
                config.github_token.clone(),
            );
            coordinator = coordinator.with_git_trigger(GitTriggerAdapter::new(
                Arc::new(hooks),
                callback_base.clone(),
                config.webhook_secret.clone(),
            ));
            info!("Git push webhooks enabled (callback base: {})", callback_base);
        }
        None => warn!("LAUNCHPAD_WEBHOOK_CALLBACK_BASE not set, app deployments are disabled"),
    }

    let app = create_app(AppState::new(coordinator));

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
