use crate::builder::ProvisionParams;
use crate::error::{OrchestratorError, Result};
use crate::operation::{Operation, OperationStatus, OperationType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::fmt;
use std::str::FromStr;
use tracing::instrument;
use uuid::Uuid;

/// Kind of deployable unit. Immutable once the record exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ResourceKind {
    Database,
    Webbuilder,
    Virtualspace,
    Chatbot,
    App,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Webbuilder => "webbuilder",
            Self::Virtualspace => "virtualspace",
            Self::Chatbot => "chatbot",
            Self::App => "app",
        }
    }
}

impl FromStr for ResourceKind {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "database" => Ok(Self::Database),
            "webbuilder" => Ok(Self::Webbuilder),
            "virtualspace" => Ok(Self::Virtualspace),
            "chatbot" => Ok(Self::Chatbot),
            "app" => Ok(Self::App),
            _ => Err(OrchestratorError::InvalidResourceType(s.to_string())),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database subtype for `ResourceKind::Database`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DatabaseEngine {
    Mysql,
    Mongodb,
    Redis,
    Qdrant,
}

impl DatabaseEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Mongodb => "mongodb",
            Self::Redis => "redis",
            Self::Qdrant => "qdrant",
        }
    }
}

impl FromStr for DatabaseEngine {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(Self::Mysql),
            "mongodb" | "mongo" => Ok(Self::Mongodb),
            "redis" => Ok(Self::Redis),
            "qdrant" => Ok(Self::Qdrant),
            _ => Err(OrchestratorError::InvalidResourceType(format!(
                "database/{s}"
            ))),
        }
    }
}

impl fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a resource.
///
/// Forward path is `Created -> Launching -> AwaitingNetwork -> Live`. Any
/// non-terminal state may fall to `Failed`. `Deleting` is entered from
/// `Live`, `Failed`, or a `Created` record that never launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Created,
    Launching,
    AwaitingNetwork,
    Live,
    Failed,
    Deleting,
}

impl ResourceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Live | Self::Failed)
    }

    pub fn can_transition_to(self, next: ResourceStatus) -> bool {
        use ResourceStatus::*;

        matches!(
            (self, next),
            (Created, Launching)
                | (Launching, AwaitingNetwork)
                | (AwaitingNetwork, Live)
                | (Created | Launching | AwaitingNetwork, Failed)
                | (Created | Live | Failed, Deleting)
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageCounters {
    pub cpu: f64,
    pub memory: f64,
    pub storage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingWindow {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl Default for BillingWindow {
    fn default() -> Self {
        Self {
            start: Utc::now(),
            end: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub project_id: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub engine: Option<DatabaseEngine>,
    pub status: ResourceStatus,
    pub task_handle: Option<String>,
    pub network_endpoint: Option<String>,
    #[serde(rename = "connectionURI")]
    pub connection_uri: Option<String>,
    pub ui_url: Option<String>,
    pub project_url: Option<String>,
    pub webhook_id: Option<String>,

    /// Caller parameters, credentials included. Never sent back out.
    #[serde(skip)]
    pub params: ProvisionParams,

    pub usage: UsageCounters,
    pub billing_window: BillingWindow,
    pub error_message: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    /// Move to `next`, applying the side effects tied to entering that state.
    pub fn transition(&mut self, next: ResourceStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(OrchestratorError::InvalidState(format!(
                "resource {} cannot move from {:?} to {:?}",
                self.id, self.status, next
            )));
        }

        match next {
            ResourceStatus::Launching => {
                self.usage = UsageCounters::default();
                self.error_message = None;
            }
            ResourceStatus::Failed => self.clear_network(),
            _ => {}
        }

        self.status = next;
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(ResourceStatus::Failed)?;
        self.error_message = Some(reason.into());
        Ok(())
    }

    fn clear_network(&mut self) {
        self.network_endpoint = None;
        self.connection_uri = None;
        self.ui_url = None;
        self.project_url = None;
    }
}

/// Fields supplied when a record is first inserted.
#[derive(Debug, Clone)]
pub struct NewResource {
    pub name: String,
    pub owner: String,
    pub project_id: String,
    pub kind: ResourceKind,
    pub engine: Option<DatabaseEngine>,
    pub params: ProvisionParams,
    pub billing_window: BillingWindow,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceFilters {
    pub owner: Option<String>,
    pub status: Option<ResourceStatus>,
}

/// SQLite-backed store of resource records and their operation history.
#[derive(Clone)]
pub struct ResourceRegistry {
    pool: SqlitePool,
}

impl ResourceRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[instrument(skip(self, new), fields(kind = %new.kind, name = %new.name))]
    pub async fn insert(&self, new: NewResource) -> Result<Resource> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let params = serde_json::to_string(&new.params)?;

        sqlx::query(
            r#"
            INSERT INTO resources (id, name, owner, project_id, kind, engine, status, params,
                                   billing_start, billing_end, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&new.name)
        .bind(&new.owner)
        .bind(&new.project_id)
        .bind(new.kind)
        .bind(new.engine)
        .bind(ResourceStatus::Created)
        .bind(params)
        .bind(new.billing_window.start.timestamp())
        .bind(new.billing_window.end.map(|dt| dt.timestamp()))
        .bind(now.timestamp())
        .bind(now.timestamp())
        .execute(&self.pool)
        .await?;

        self.get(&id).await
    }

    pub async fn find(&self, id: &str) -> Result<Option<Resource>> {
        let row = sqlx::query_as::<_, ResourceRow>("SELECT * FROM resources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Resource::try_from).transpose()
    }

    /// Record currently carrying `task_handle`, if any.
    pub async fn find_by_task_handle(&self, task_handle: &str) -> Result<Option<Resource>> {
        let row = sqlx::query_as::<_, ResourceRow>("SELECT * FROM resources WHERE task_handle = ?")
            .bind(task_handle)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Resource::try_from).transpose()
    }

    /// Newest record of `kind` for a project that owns a push webhook.
    pub async fn find_hooked(&self, project_id: &str, kind: ResourceKind) -> Result<Option<Resource>> {
        let row = sqlx::query_as::<_, ResourceRow>(
            "SELECT * FROM resources WHERE project_id = ? AND kind = ? AND webhook_id IS NOT NULL
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )
        .bind(project_id)
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Resource::try_from).transpose()
    }

    pub async fn get(&self, id: &str) -> Result<Resource> {
        self.find(id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    /// Persist every mutable field of `resource`.
    ///
    /// The write only lands if the stored version still matches, after which
    /// `resource.version` is bumped in place.
    #[instrument(skip(self, resource), fields(resource_id = %resource.id, status = ?resource.status))]
    pub async fn update(&self, resource: &mut Resource) -> Result<()> {
        let now = Utc::now();
        let params = serde_json::to_string(&resource.params)?;

        let result = sqlx::query(
            r#"
            UPDATE resources
            SET status = ?, task_handle = ?, network_endpoint = ?, connection_uri = ?,
                ui_url = ?, project_url = ?, webhook_id = ?, params = ?,
                cpu_usage = ?, memory_usage = ?, storage_usage = ?, error_message = ?,
                version = version + 1, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(resource.status)
        .bind(&resource.task_handle)
        .bind(&resource.network_endpoint)
        .bind(&resource.connection_uri)
        .bind(&resource.ui_url)
        .bind(&resource.project_url)
        .bind(&resource.webhook_id)
        .bind(params)
        .bind(resource.usage.cpu)
        .bind(resource.usage.memory)
        .bind(resource.usage.storage)
        .bind(&resource.error_message)
        .bind(now.timestamp())
        .bind(&resource.id)
        .bind(resource.version)
        .execute(&self.pool)
        .await
        .map_err(|e| OrchestratorError::PersistenceFailed(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(match self.find(&resource.id).await? {
                Some(current) => OrchestratorError::PersistenceFailed(format!(
                    "stale write for resource {} (have version {}, stored {})",
                    resource.id, resource.version, current.version
                )),
                None => OrchestratorError::PersistenceFailed(format!(
                    "resource {} no longer exists",
                    resource.id
                )),
            });
        }

        resource.version += 1;
        resource.updated_at = now;
        Ok(())
    }

    /// Remove a record together with its operation history. Returns `false`
    /// when no record matched.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM operations WHERE resource_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM resources WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// List resources with optional filters
    pub async fn list(&self, filters: ResourceFilters) -> Result<Vec<Resource>> {
        let mut query = "SELECT * FROM resources WHERE 1=1".to_string();

        if filters.owner.is_some() {
            query.push_str(" AND owner = ?");
        }
        if filters.status.is_some() {
            query.push_str(" AND status = ?");
        }

        query.push_str(" ORDER BY created_at DESC");

        let mut q = sqlx::query_as::<_, ResourceRow>(&query);

        if let Some(owner) = &filters.owner {
            q = q.bind(owner);
        }
        if let Some(status) = filters.status {
            q = q.bind(status);
        }

        let rows = q.fetch_all(&self.pool).await?;

        rows.into_iter().map(Resource::try_from).collect()
    }

    /// Record an operation for tracking
    pub async fn record_operation(
        &self,
        resource_id: &str,
        operation_type: OperationType,
        status: OperationStatus,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO operations (id, resource_id, operation_type, status, started_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(resource_id)
        .bind(operation_type)
        .bind(status)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn complete_operation(
        &self,
        operation_id: &str,
        status: OperationStatus,
        error: Option<String>,
    ) -> Result<()> {
        sqlx::query("UPDATE operations SET status = ?, completed_at = ?, error = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now().timestamp())
            .bind(error)
            .bind(operation_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Operations for one resource, newest first
    pub async fn get_operations(&self, resource_id: &str) -> Result<Vec<Operation>> {
        let rows = sqlx::query_as::<_, OperationRow>(
            "SELECT * FROM operations WHERE resource_id = ? ORDER BY started_at DESC, rowid DESC",
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Operation::try_from).collect()
    }
}

// Internal row types for sqlx
#[derive(sqlx::FromRow)]
struct ResourceRow {
    id: String,
    name: String,
    owner: String,
    project_id: String,
    kind: ResourceKind,
    engine: Option<DatabaseEngine>,
    status: ResourceStatus,
    task_handle: Option<String>,
    network_endpoint: Option<String>,
    connection_uri: Option<String>,
    ui_url: Option<String>,
    project_url: Option<String>,
    webhook_id: Option<String>,
    params: String,
    cpu_usage: f64,
    memory_usage: f64,
    storage_usage: f64,
    billing_start: i64,
    billing_end: Option<i64>,
    error_message: Option<String>,
    version: i64,
    created_at: i64,
    updated_at: i64,
}

#[derive(sqlx::FromRow)]
struct OperationRow {
    id: String,
    resource_id: String,
    operation_type: OperationType,
    status: OperationStatus,
    started_at: i64,
    completed_at: Option<i64>,
    error: Option<String>,
}

fn timestamp(ts: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| OrchestratorError::PersistenceFailed(format!("invalid timestamp {ts}")))
}

impl TryFrom<ResourceRow> for Resource {
    type Error = OrchestratorError;

    fn try_from(row: ResourceRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            owner: row.owner,
            project_id: row.project_id,
            kind: row.kind,
            engine: row.engine,
            status: row.status,
            task_handle: row.task_handle,
            network_endpoint: row.network_endpoint,
            connection_uri: row.connection_uri,
            ui_url: row.ui_url,
            project_url: row.project_url,
            webhook_id: row.webhook_id,
            params: serde_json::from_str(&row.params)?,
            usage: UsageCounters {
                cpu: row.cpu_usage,
                memory: row.memory_usage,
                storage: row.storage_usage,
            },
            billing_window: BillingWindow {
                start: timestamp(row.billing_start)?,
                end: row.billing_end.map(timestamp).transpose()?,
            },
            error_message: row.error_message,
            version: row.version,
            created_at: timestamp(row.created_at)?,
            updated_at: timestamp(row.updated_at)?,
        })
    }
}

impl TryFrom<OperationRow> for Operation {
    type Error = OrchestratorError;

    fn try_from(row: OperationRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            resource_id: row.resource_id,
            operation_type: row.operation_type,
            status: row.status,
            started_at: timestamp(row.started_at)?,
            completed_at: row.completed_at.map(timestamp).transpose()?,
            error: row.error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path_is_allowed() {
        use ResourceStatus::*;

        assert!(Created.can_transition_to(Launching));
        assert!(Launching.can_transition_to(AwaitingNetwork));
        assert!(AwaitingNetwork.can_transition_to(Live));
    }

    #[test]
    fn test_terminal_states_only_lead_to_deleting() {
        use ResourceStatus::*;

        for next in [Created, Launching, AwaitingNetwork, Live, Failed] {
            assert!(!Live.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
        assert!(Live.can_transition_to(Deleting));
        assert!(Failed.can_transition_to(Deleting));
    }

    #[test]
    fn test_no_skipping_or_going_back() {
        use ResourceStatus::*;

        assert!(!Created.can_transition_to(Live));
        assert!(!Created.can_transition_to(AwaitingNetwork));
        assert!(!AwaitingNetwork.can_transition_to(Launching));
        assert!(!Launching.can_transition_to(Deleting));
        assert!(!Deleting.can_transition_to(Failed));
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("App".parse::<ResourceKind>().unwrap(), ResourceKind::App);
        assert!(matches!(
            "mainframe".parse::<ResourceKind>(),
            Err(OrchestratorError::InvalidResourceType(_))
        ));
        assert!(matches!(
            "cassandra".parse::<DatabaseEngine>(),
            Err(OrchestratorError::InvalidResourceType(_))
        ));
    }

    #[test]
    fn test_status_serializes_screaming() {
        let json = serde_json::to_string(&ResourceStatus::AwaitingNetwork).unwrap();
        assert_eq!(json, "\"AWAITING_NETWORK\"");
    }
}
