use crate::{
    auth::{check_resource_owner, AuthenticatedUser},
    error::{ApiResult, Envelope},
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Extension, Json, Router,
};
use launchpad_orchestrator::{Operation, OperationStatus, OperationType};
use serde::Deserialize;

pub fn routes() -> Router<AppState> {
    Router::new().route("/deployments/{id}/operations", get(list_operations))
}

#[derive(Debug, Deserialize)]
struct OperationsQuery {
    #[serde(rename = "type")]
    operation_type: Option<String>,
    status: Option<String>,
}

async fn list_operations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Query(query): Query<OperationsQuery>,
) -> ApiResult<Json<Envelope<Vec<Operation>>>> {
    check_resource_owner(&state.coordinator, &id, &user).await?;

    // Unknown filter values match nothing rather than everything.
    let operation_type = query
        .operation_type
        .map(|s| serde_json::from_str::<OperationType>(&format!("\"{}\"", s)).ok());

    let status = query
        .status
        .map(|s| serde_json::from_str::<OperationStatus>(&format!("\"{}\"", s)).ok());

    let operations: Vec<Operation> = state
        .coordinator
        .operations(&id)
        .await?
        .into_iter()
        .filter(|op| operation_type.is_none_or(|t| t == Some(op.operation_type)))
        .filter(|op| status.is_none_or(|s| s == Some(op.status)))
        .collect();

    Ok(Envelope::ok(
        format!("{} operation(s)", operations.len()),
        operations,
    ))
}
