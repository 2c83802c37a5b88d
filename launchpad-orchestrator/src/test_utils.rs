//! In-memory database and scriptable backend fakes for tests.

use crate::backend::{AddressLookupApi, NetworkAttachment, OrchestrationApi, TaskHandle};
use crate::builder::{LaunchSpec, ProvisionRequestBuilder};
use crate::coordinator::{CoordinatorOptions, DeploymentCoordinator};
use crate::git_trigger::{GitTriggerAdapter, Hook, HookApi, RepoRef};
use crate::launcher::WorkloadLauncher;
use crate::network::{NetworkResolver, ResolvePolicy};
use crate::resource::ResourceRegistry;
use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Helper to create an in-memory test database with migrations applied
pub async fn create_test_db() -> SqlitePool {
    // Every connection to `sqlite::memory:` is a separate database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Options with no waiting and a single lookup.
pub fn instant_options() -> CoordinatorOptions {
    CoordinatorOptions {
        resolve_policy: ResolvePolicy::single_check(Duration::ZERO),
        stop_unresolved_workloads: true,
    }
}

/// Coordinator wired to the given fakes.
pub fn test_coordinator(
    pool: SqlitePool,
    orchestration: Arc<FakeOrchestration>,
    lookup: Arc<FakeAddressLookup>,
    options: CoordinatorOptions,
) -> DeploymentCoordinator {
    DeploymentCoordinator::new(
        ResourceRegistry::new(pool),
        ProvisionRequestBuilder::default(),
        WorkloadLauncher::new(orchestration.clone()),
        NetworkResolver::new(orchestration, lookup),
        options,
    )
}

/// Git trigger adapter backed by a fake hook API.
pub fn test_git_trigger(hooks: Arc<FakeHookApi>) -> GitTriggerAdapter {
    GitTriggerAdapter::new(hooks, "https://launchpad.test", "s3cret")
}

#[derive(Default)]
struct OrchestrationState {
    launch_error: Option<String>,
    describe_error: Option<String>,
    stop_error: Option<String>,
    interface_id: Option<String>,
    /// Describe calls that report no attachment before it shows up.
    attach_after: usize,
    launched: Vec<LaunchSpec>,
    stopped: Vec<String>,
    describe_calls: usize,
}

/// Orchestration backend that records calls and answers from a script.
///
/// By default every launch succeeds with `task-N` and every task is attached
/// to interface `eni-default`.
pub struct FakeOrchestration {
    state: Mutex<OrchestrationState>,
}

impl Default for FakeOrchestration {
    fn default() -> Self {
        Self {
            state: Mutex::new(OrchestrationState {
                interface_id: Some("eni-default".to_string()),
                ..Default::default()
            }),
        }
    }
}

impl FakeOrchestration {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_launch(&self, message: &str) {
        self.state.lock().unwrap().launch_error = Some(message.to_string());
    }

    pub fn fail_describe(&self, message: &str) {
        self.state.lock().unwrap().describe_error = Some(message.to_string());
    }

    pub fn fail_stop(&self, message: &str) {
        self.state.lock().unwrap().stop_error = Some(message.to_string());
    }

    /// Let launches succeed again.
    pub fn clear_launch_failure(&self) {
        self.state.lock().unwrap().launch_error = None;
    }

    pub fn detach(&self) {
        self.state.lock().unwrap().interface_id = None;
    }

    pub fn attach_after(&self, describe_calls: usize) {
        self.state.lock().unwrap().attach_after = describe_calls;
    }

    pub fn launched(&self) -> Vec<LaunchSpec> {
        self.state.lock().unwrap().launched.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn describe_calls(&self) -> usize {
        self.state.lock().unwrap().describe_calls
    }
}

#[async_trait]
impl OrchestrationApi for FakeOrchestration {
    async fn launch(&self, spec: &LaunchSpec) -> anyhow::Result<TaskHandle> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.launch_error {
            return Err(anyhow!("{message}"));
        }
        state.launched.push(spec.clone());
        Ok(TaskHandle::new(format!("task-{}", state.launched.len())))
    }

    async fn describe(&self, _handle: &TaskHandle) -> anyhow::Result<Option<NetworkAttachment>> {
        let mut state = self.state.lock().unwrap();
        state.describe_calls += 1;
        if let Some(message) = &state.describe_error {
            return Err(anyhow!("{message}"));
        }
        if state.describe_calls <= state.attach_after {
            return Ok(None);
        }
        Ok(state.interface_id.clone().map(|network_interface_id| NetworkAttachment {
            network_interface_id,
        }))
    }

    async fn stop(&self, handle: &TaskHandle) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.stopped.push(handle.to_string());
        match &state.stop_error {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }
}

/// Address lookup answering from a fixed interface → address table.
#[derive(Default)]
pub struct FakeAddressLookup {
    addresses: Mutex<HashMap<String, String>>,
    error: Mutex<Option<String>>,
}

impl FakeAddressLookup {
    /// Lookup where `eni-default` resolves to `address`.
    pub fn with_address(address: &str) -> Arc<Self> {
        let lookup = Self::default();
        lookup.set_address("eni-default", address);
        Arc::new(lookup)
    }

    pub fn set_address(&self, interface_id: &str, address: &str) {
        self.addresses
            .lock()
            .unwrap()
            .insert(interface_id.to_string(), address.to_string());
    }

    pub fn fail(&self, message: &str) {
        *self.error.lock().unwrap() = Some(message.to_string());
    }
}

#[async_trait]
impl AddressLookupApi for FakeAddressLookup {
    async fn lookup_public_address(&self, interface_id: &str) -> anyhow::Result<Option<String>> {
        if let Some(message) = self.error.lock().unwrap().as_ref() {
            return Err(anyhow!("{message}"));
        }
        Ok(self.addresses.lock().unwrap().get(interface_id).cloned())
    }
}

#[derive(Default)]
struct HookState {
    hooks: Vec<(RepoRef, Hook)>,
    next_id: u64,
    list_error: Option<String>,
    create_error: Option<String>,
    deleted: Vec<String>,
}

/// Webhook API keeping registrations in memory.
#[derive(Default)]
pub struct FakeHookApi {
    state: Mutex<HookState>,
}

impl FakeHookApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pre-existing registration, e.g. left over from an earlier deploy.
    pub fn seed(&self, repo: &RepoRef, url: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id.to_string();
        state.hooks.push((
            repo.clone(),
            Hook {
                id: id.clone(),
                url: Some(url.to_string()),
            },
        ));
        id
    }

    pub fn fail_list(&self, message: &str) {
        self.state.lock().unwrap().list_error = Some(message.to_string());
    }

    pub fn fail_create(&self, message: &str) {
        self.state.lock().unwrap().create_error = Some(message.to_string());
    }

    pub fn hooks(&self) -> Vec<Hook> {
        let state = self.state.lock().unwrap();
        state.hooks.iter().map(|(_, hook)| hook.clone()).collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl HookApi for FakeHookApi {
    async fn list_hooks(&self, repo: &RepoRef) -> anyhow::Result<Vec<Hook>> {
        let state = self.state.lock().unwrap();
        if let Some(message) = &state.list_error {
            return Err(anyhow!("{message}"));
        }
        Ok(state
            .hooks
            .iter()
            .filter(|(r, _)| r == repo)
            .map(|(_, hook)| hook.clone())
            .collect())
    }

    async fn create_hook(&self, repo: &RepoRef, url: &str, _secret: &str) -> anyhow::Result<Hook> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.create_error {
            return Err(anyhow!("{message}"));
        }
        state.next_id += 1;
        let hook = Hook {
            id: state.next_id.to_string(),
            url: Some(url.to_string()),
        };
        state.hooks.push((repo.clone(), hook.clone()));
        Ok(hook)
    }

    async fn delete_hook(&self, repo: &RepoRef, hook_id: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        let before = state.hooks.len();
        state.hooks.retain(|(r, hook)| !(r == repo && hook.id == hook_id));
        if state.hooks.len() == before {
            return Err(anyhow!("hook {hook_id} not found"));
        }
        state.deleted.push(hook_id.to_string());
        Ok(())
    }
}
