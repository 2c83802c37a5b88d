//! Deployment lifecycle business logic
//!
//! This crate turns a resource type plus user parameters into a running,
//! reachable workload: it persists the resource record, submits the launch to
//! the orchestration backend, resolves the public endpoint and renders the
//! connection details. It is consumed by the launchpad-api HTTP service but can
//! also be driven from CLI commands or background workers.

pub mod backend;
pub mod builder;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod git_trigger;
pub mod launcher;
pub mod locks;
pub mod network;
pub mod operation;
pub mod resource;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use backend::{AddressLookupApi, OrchestrationApi, TaskHandle};
pub use builder::{BuilderConfig, LaunchSpec, ProvisionParams, ProvisionRequestBuilder};
pub use coordinator::{
    CoordinatorOptions, CreateDeploymentRequest, DeploymentCoordinator, DeploymentOutcome,
};
pub use error::{OrchestratorError, Result};
pub use git_trigger::{GitTriggerAdapter, GithubHookApi};
pub use launcher::WorkloadLauncher;
pub use network::{NetworkResolver, ResolvePolicy};
pub use operation::{Operation, OperationStatus, OperationType};
pub use resource::{
    DatabaseEngine, Resource, ResourceFilters, ResourceKind, ResourceRegistry, ResourceStatus,
};
