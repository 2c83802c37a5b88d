//! Contracts for the external orchestration and network-lookup backends.
//!
//! The coordinator only ever talks to these traits. [`http`] holds the
//! production clients; scriptable fakes live in `test_utils`.

use crate::builder::LaunchSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod http;

pub use http::{HttpAddressLookup, HttpOrchestrationApi};

/// Opaque identifier the orchestration backend assigns to a launched task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(String);

impl TaskHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskHandle {
    fn from(handle: String) -> Self {
        Self(handle)
    }
}

/// Network interface the backend attached to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAttachment {
    pub network_interface_id: String,
}

/// Container-orchestration backend.
#[async_trait]
pub trait OrchestrationApi: Send + Sync {
    /// Submit a launch request; returns the handle of the started task.
    async fn launch(&self, spec: &LaunchSpec) -> anyhow::Result<TaskHandle>;

    /// Describe a task. `None` means no network interface is attached yet.
    async fn describe(&self, handle: &TaskHandle) -> anyhow::Result<Option<NetworkAttachment>>;

    async fn stop(&self, handle: &TaskHandle) -> anyhow::Result<()>;
}

/// Network-interface lookup backend.
#[async_trait]
pub trait AddressLookupApi: Send + Sync {
    /// Public address of an interface, `None` when it has none.
    async fn lookup_public_address(&self, interface_id: &str) -> anyhow::Result<Option<String>>;
}
