//! The deployment workflow.
//!
//! `create` inserts a record, registers the push webhook for apps, then runs
//! the launch → wait → resolve sequence. Each step failure is terminal for the
//! invocation: the record is marked `FAILED` (or removed, when the webhook
//! could not be registered) and the error is returned to the caller.
//!
//! `redeploy` is what a push re-invokes for an app. Records never move
//! backwards, so it deploys a fresh `CREATED` record for the project and only
//! retires the previous one once the new one is `LIVE`.

use crate::backend::TaskHandle;
use crate::builder::{ProvisionParams, ProvisionPlan, ProvisionRequestBuilder, Workload};
use crate::error::{OrchestratorError, Result};
use crate::git_trigger::{GitTriggerAdapter, RepoRef};
use crate::launcher::WorkloadLauncher;
use crate::locks::IdLocks;
use crate::network::{NetworkResolver, ResolvePolicy};
use crate::operation::{Operation, OperationStatus, OperationType};
use crate::resource::{
    BillingWindow, NewResource, Resource, ResourceFilters, ResourceKind, ResourceRegistry,
    ResourceStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub resolve_policy: ResolvePolicy,
    /// Stop the workload when its network never resolves. The task handle
    /// stays on the record either way.
    pub stop_unresolved_workloads: bool,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            resolve_policy: ResolvePolicy::default(),
            stop_unresolved_workloads: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeploymentRequest {
    pub project_id: String,
    /// Owner of the new resource. The HTTP layer overwrites it with the
    /// authenticated user.
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub billing_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub billing_end: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub params: ProvisionParams,
}

/// Returned when a resource reaches `LIVE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentOutcome {
    pub resource_id: String,
    pub endpoint: String,
    #[serde(rename = "connectionURI")]
    pub connection_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_url: Option<String>,
    pub task_handle: String,
}

#[derive(Clone)]
pub struct DeploymentCoordinator {
    registry: ResourceRegistry,
    builder: ProvisionRequestBuilder,
    launcher: WorkloadLauncher,
    resolver: NetworkResolver,
    git: Option<GitTriggerAdapter>,
    options: CoordinatorOptions,
    locks: IdLocks,
}

impl DeploymentCoordinator {
    pub fn new(
        registry: ResourceRegistry,
        builder: ProvisionRequestBuilder,
        launcher: WorkloadLauncher,
        resolver: NetworkResolver,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            registry,
            builder,
            launcher,
            resolver,
            git: None,
            options,
            locks: IdLocks::new(),
        }
    }

    pub fn with_git_trigger(mut self, git: GitTriggerAdapter) -> Self {
        self.git = Some(git);
        self
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn options(&self) -> &CoordinatorOptions {
        &self.options
    }

    pub fn git_trigger(&self) -> Option<&GitTriggerAdapter> {
        self.git.as_ref()
    }

    /// Provision a new resource end to end.
    #[instrument(skip(self, request, cancel), fields(project_id = %request.project_id))]
    pub async fn create(
        &self,
        resource_type: &str,
        request: CreateDeploymentRequest,
        cancel: &CancellationToken,
    ) -> Result<DeploymentOutcome> {
        let plan = self.builder.build(resource_type, &request.params)?;

        let trigger = match plan.workload {
            Workload::App => {
                let git = self.git.as_ref().ok_or_else(|| {
                    OrchestratorError::WebhookRegistrationFailed(
                        "no source-control integration configured".to_string(),
                    )
                })?;
                let repo = RepoRef::parse(plan.params().git_url.as_deref().unwrap_or_default())?;
                Some((git, repo))
            }
            _ => None,
        };

        let resource = self
            .registry
            .insert(NewResource {
                name: plan.resource_name.clone(),
                owner: request.user_id,
                project_id: request.project_id,
                kind: plan.workload.kind(),
                engine: plan.workload.engine(),
                params: request.params,
                billing_window: BillingWindow {
                    start: request.billing_start.unwrap_or_else(Utc::now),
                    end: request.billing_end,
                },
            })
            .await?;

        info!("Created {} resource {} ({})", resource.kind, resource.name, resource.id);

        let _guard = self.locks.lock(&resource.id).await;
        let op = self.start_operation(&resource.id, OperationType::Create).await;

        let result = match trigger {
            Some((git, repo)) => match self.attach_webhook(git, &repo, resource).await {
                Ok(resource) => self.run_deployment(resource, &plan, cancel).await,
                Err(e) => Err(e),
            },
            None => self.run_deployment(resource, &plan, cancel).await,
        };

        self.finish_operation(op, &result).await;
        result
    }

    /// Run launch → resolve for an existing `CREATED` record.
    #[instrument(skip(self, cancel))]
    pub async fn deploy(
        &self,
        resource_type: &str,
        resource_id: &str,
        cancel: &CancellationToken,
    ) -> Result<DeploymentOutcome> {
        let kind: ResourceKind = resource_type.parse()?;
        let _guard = self.locks.lock(resource_id).await;
        let resource = self.registry.get(resource_id).await?;

        if resource.kind != kind {
            return Err(OrchestratorError::InvalidInput(format!(
                "resource {} is of type {}, not {}",
                resource.id, resource.kind, kind
            )));
        }
        if resource.status != ResourceStatus::Created {
            return Err(OrchestratorError::InvalidState(format!(
                "resource {} is {:?}; only CREATED resources can be deployed",
                resource.id, resource.status
            )));
        }

        let plan = self.builder.build(resource.kind.as_str(), &resource.params)?;

        let op = self.start_operation(resource_id, OperationType::Deploy).await;
        let result = self.run_deployment(resource, &plan, cancel).await;
        self.finish_operation(op, &result).await;
        result
    }

    /// Relaunch the git-deployed app of `project_id` after a push.
    ///
    /// The current record keeps serving until its successor is `LIVE`. The
    /// successor then takes over the webhook and the previous workload is
    /// stopped and its record removed. A failed successor stays `FAILED` for
    /// inspection and the current record is left untouched.
    #[instrument(skip(self, cancel))]
    pub async fn redeploy(&self, project_id: &str, cancel: &CancellationToken) -> Result<DeploymentOutcome> {
        let _project = self.locks.lock(&format!("project:{project_id}")).await;

        let current = self
            .registry
            .find_hooked(project_id, ResourceKind::App)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("no git-deployed app for project {project_id}")))?;

        if !current.status.is_terminal() {
            return Err(OrchestratorError::InvalidState(format!(
                "resource {} is {:?}; only LIVE or FAILED apps can be redeployed",
                current.id, current.status
            )));
        }

        let plan = self.builder.build(current.kind.as_str(), &current.params)?;
        let successor = self
            .registry
            .insert(NewResource {
                name: current.name.clone(),
                owner: current.owner.clone(),
                project_id: current.project_id.clone(),
                kind: current.kind,
                engine: current.engine,
                params: current.params.clone(),
                billing_window: current.billing_window.clone(),
            })
            .await?;

        info!("Redeploying {} as {}", current.id, successor.id);

        let _guard = self.locks.lock(&successor.id).await;
        let op = self.start_operation(&successor.id, OperationType::Deploy).await;

        let result = match self.run_deployment(successor, &plan, cancel).await {
            Ok(outcome) => self
                .hand_over(&current.id, &outcome.resource_id)
                .await
                .map(|()| outcome),
            Err(e) => Err(e),
        };

        self.finish_operation(op, &result).await;
        result
    }

    /// Stop the workload (best effort) and remove the record.
    #[instrument(skip(self))]
    pub async fn delete(&self, resource_id: &str) -> Result<()> {
        let _guard = self.locks.lock(resource_id).await;
        let mut resource = self
            .registry
            .find(resource_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(resource_id.to_string()))?;

        let op = self.start_operation(resource_id, OperationType::Delete).await;

        if resource.status.can_transition_to(ResourceStatus::Deleting) {
            resource.transition(ResourceStatus::Deleting)?;
            if let Err(e) = self.registry.update(&mut resource).await {
                warn!("Could not mark {} as DELETING: {}", resource_id, e);
            }
        } else {
            warn!(
                "Deleting resource {} from unexpected status {:?}",
                resource_id, resource.status
            );
        }

        if let Some(handle) = resource.task_handle.as_deref().filter(|h| !h.is_empty()) {
            // A stop failure must not keep the record alive.
            if let Err(e) = self.launcher.stop(&TaskHandle::new(handle)).await {
                warn!("Removing {} although task {} did not stop: {}", resource_id, handle, e);
            }
        }

        if let (Some(hook_id), Some(git)) = (&resource.webhook_id, &self.git) {
            match resource.params.git_url.as_deref().map(RepoRef::parse) {
                Some(Ok(repo)) => {
                    if let Err(e) = git.unregister(&repo, hook_id).await {
                        warn!("Removing {} although webhook {} is still registered: {}", resource_id, hook_id, e);
                    }
                }
                _ => warn!("Resource {} has webhook {} but no usable git URL", resource_id, hook_id),
            }
        }

        match self.registry.delete(resource_id).await {
            // The operation history, this delete included, went with the record.
            Ok(removed) => {
                if removed {
                    info!("Deleted resource {}", resource_id);
                } else {
                    warn!("Resource {} was already gone", resource_id);
                }
                Ok(())
            }
            Err(e) => {
                let result: Result<()> = Err(OrchestratorError::PersistenceFailed(e.to_string()));
                self.finish_operation(op, &result).await;
                result
            }
        }
    }

    /// One-shot network lookup for a task handle.
    pub async fn check_ip(&self, task_handle: &str) -> Result<String> {
        self.resolver.resolve(&parse_handle(task_handle)?).await
    }

    /// Stop a task directly. Unlike `delete`, the failure is reported.
    pub async fn stop_task(&self, task_handle: &str) -> Result<()> {
        self.launcher.stop(&parse_handle(task_handle)?).await
    }

    pub async fn get(&self, resource_id: &str) -> Result<Resource> {
        self.registry.get(resource_id).await
    }

    pub async fn list(&self, filters: ResourceFilters) -> Result<Vec<Resource>> {
        self.registry.list(filters).await
    }

    pub async fn operations(&self, resource_id: &str) -> Result<Vec<Operation>> {
        self.registry.get_operations(resource_id).await
    }

    async fn attach_webhook(
        &self,
        git: &GitTriggerAdapter,
        repo: &RepoRef,
        mut resource: Resource,
    ) -> Result<Resource> {
        let registered = match git.callback_url(&resource.project_id) {
            Ok(callback) => git.register(repo, &callback).await,
            Err(e) => Err(e),
        };

        let hook_id = match registered {
            Ok(hook_id) => hook_id,
            Err(e) => {
                error!("Webhook registration for {} failed: {}", resource.id, e);
                self.discard(&resource.id).await;
                return Err(e);
            }
        };

        resource.webhook_id = Some(hook_id.clone());
        if let Err(e) = self.registry.update(&mut resource).await {
            if let Err(unregister) = git.unregister(repo, &hook_id).await {
                warn!("Webhook {} outlives resource {}: {}", hook_id, resource.id, unregister);
            }
            self.discard(&resource.id).await;
            return Err(e);
        }

        Ok(resource)
    }

    /// Move the webhook from `previous_id` to its live successor, then stop
    /// and remove the previous record.
    async fn hand_over(&self, previous_id: &str, successor_id: &str) -> Result<()> {
        let _guard = self.locks.lock(previous_id).await;

        let Some(previous) = self.registry.find(previous_id).await? else {
            warn!(
                "Resource {} was removed during redeploy; {} runs without a webhook",
                previous_id, successor_id
            );
            return Ok(());
        };

        let mut successor = self.registry.get(successor_id).await?;
        successor.webhook_id = previous.webhook_id.clone();
        self.registry.update(&mut successor).await?;

        if let Some(handle) = previous.task_handle.as_deref().filter(|h| !h.is_empty()) {
            if let Err(e) = self.launcher.stop(&TaskHandle::new(handle)).await {
                warn!("Previous task {} of {} did not stop: {}", handle, previous_id, e);
            }
        }

        match self.registry.delete(previous_id).await {
            Ok(_) => info!("Resource {} replaced {}", successor_id, previous_id),
            Err(e) => error!("Failed to remove replaced resource {}: {}", previous_id, e),
        }

        Ok(())
    }

    async fn run_deployment(
        &self,
        mut resource: Resource,
        plan: &ProvisionPlan,
        cancel: &CancellationToken,
    ) -> Result<DeploymentOutcome> {
        resource.transition(ResourceStatus::Launching)?;
        self.registry.update(&mut resource).await?;

        let handle = match self.launcher.launch(&plan.spec).await {
            Ok(handle) => handle,
            Err(e) => {
                self.fail(&mut resource, &e).await;
                return Err(e);
            }
        };

        resource.task_handle = Some(handle.to_string());
        resource.transition(ResourceStatus::AwaitingNetwork)?;
        if let Err(e) = self.registry.update(&mut resource).await {
            // The handle never reached the record, so nothing else can clean this task up.
            error!("Lost track of task {} for {}: {}", handle, resource.id, e);
            if let Err(stop) = self.launcher.stop(&handle).await {
                warn!("Untracked task {} keeps running: {}", handle, stop);
            }
            return Err(e);
        }

        let endpoint = match self
            .resolver
            .await_endpoint(&handle, &self.options.resolve_policy, cancel)
            .await
        {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.fail(&mut resource, &e).await;
                if self.options.stop_unresolved_workloads {
                    if let Err(stop) = self.launcher.stop(&handle).await {
                        warn!("Unresolved task {} of {} did not stop: {}", handle, resource.id, stop);
                    }
                }
                return Err(e);
            }
        };

        let details = plan.connection_for(&endpoint);
        resource.network_endpoint = Some(endpoint.clone());
        resource.connection_uri = Some(details.connection_uri.clone());
        resource.ui_url = details.ui_url.clone();
        resource.project_url = details.project_url.clone();
        resource.transition(ResourceStatus::Live)?;

        if let Err(e) = self.registry.update(&mut resource).await {
            error!("Resource {} is reachable but could not be saved as LIVE: {}", resource.id, e);
            return Err(e);
        }

        info!("Resource {} is LIVE at {}", resource.id, endpoint);

        Ok(DeploymentOutcome {
            resource_id: resource.id,
            endpoint,
            connection_uri: details.connection_uri,
            ui_url: details.ui_url,
            project_url: details.project_url,
            task_handle: handle.into_inner(),
        })
    }

    /// Record a terminal failure. Persistence problems here are logged only,
    /// the original error is what the caller sees.
    async fn fail(&self, resource: &mut Resource, cause: &OrchestratorError) {
        warn!("Resource {} failed: {}", resource.id, cause);

        if let Err(e) = resource.mark_failed(cause.to_string()) {
            error!("Cannot mark {} as FAILED: {}", resource.id, e);
            return;
        }
        if let Err(e) = self.registry.update(resource).await {
            error!("Failed to persist FAILED status for {}: {}", resource.id, e);
        }
    }

    async fn discard(&self, resource_id: &str) {
        match self.registry.delete(resource_id).await {
            Ok(_) => info!("Removed partially created resource {}", resource_id),
            Err(e) => error!("Failed to remove partially created resource {}: {}", resource_id, e),
        }
    }

    async fn start_operation(&self, resource_id: &str, operation_type: OperationType) -> Option<String> {
        self.registry
            .record_operation(resource_id, operation_type, OperationStatus::Running)
            .await
            .map_err(|e| warn!("Failed to record {:?} operation: {}", operation_type, e))
            .ok()
    }

    async fn finish_operation<T>(&self, operation_id: Option<String>, result: &Result<T>) {
        let Some(id) = operation_id else {
            return;
        };

        let (status, error) = match result {
            Ok(_) => (OperationStatus::Success, None),
            Err(e) => (OperationStatus::Failed, Some(format!("{}: {}", e.kind(), e))),
        };

        if let Err(e) = self.registry.complete_operation(&id, status, error).await {
            warn!("Failed to complete operation {}: {}", id, e);
        }
    }
}

fn parse_handle(task_handle: &str) -> Result<TaskHandle> {
    let handle = task_handle.trim();
    if handle.is_empty() {
        return Err(OrchestratorError::InvalidInput("taskHandle must not be empty".to_string()));
    }
    Ok(TaskHandle::new(handle))
}
