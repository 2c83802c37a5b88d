use crate::{
    auth::AuthenticatedUser,
    error::{ApiError, ApiResult, Envelope},
    routes::deployments::json_body,
    state::AppState,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/deploy/checkip", post(check_ip))
        .route("/deploy/delete", post(stop_task))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskBody {
    task_handle: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Endpoint {
    task_handle: String,
    endpoint: String,
}

/// Handles still on a record may only be touched by the record's owner.
async fn check_task_owner(state: &AppState, task_handle: &str, user: &AuthenticatedUser) -> ApiResult<()> {
    let owner = state
        .coordinator
        .registry()
        .find_by_task_handle(task_handle.trim())
        .await?
        .map(|resource| resource.owner);

    match owner {
        Some(owner) if owner != user.username => Err(ApiError::Forbidden(format!(
            "Access denied: task {task_handle} belongs to another user"
        ))),
        _ => Ok(()),
    }
}

async fn check_ip(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<TaskBody>, JsonRejection>,
) -> ApiResult<Json<Envelope<Endpoint>>> {
    let body = json_body(payload)?;
    check_task_owner(&state, &body.task_handle, &user).await?;

    let endpoint = state.coordinator.check_ip(&body.task_handle).await?;

    Ok(Envelope::ok(
        "Endpoint resolved",
        Endpoint {
            task_handle: body.task_handle,
            endpoint,
        },
    ))
}

async fn stop_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<TaskBody>, JsonRejection>,
) -> ApiResult<Json<Envelope>> {
    let body = json_body(payload)?;
    check_task_owner(&state, &body.task_handle, &user).await?;

    state.coordinator.stop_task(&body.task_handle).await?;

    Ok(Envelope::message("Task stopped"))
}
