use crate::{
    auth::{authenticated_user, check_resource_owner, AuthenticatedUser},
    error::{ApiError, ApiResult, Envelope},
    state::AppState,
};
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use launchpad_orchestrator::{
    CreateDeploymentRequest, DeploymentOutcome, Resource, ResourceFilters, ResourceKind,
    ResourceStatus,
};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/createdeployment/{type}", post(create_deployment))
        .route("/deployments", get(list_deployments))
        .route(
            "/deployments/{id}",
            get(get_deployment).delete(delete_deployment),
        )
}

/// Routes that authenticate per request rather than through the proxy
/// middleware. `/deploy/{type}` doubles as the push callback, which the
/// source-control provider calls without a user identity.
pub fn callback_routes() -> Router<AppState> {
    Router::new().route("/deploy/{type}", post(deploy))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeployBody {
    resource_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeployQuery {
    project_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeploymentsQuery {
    status: Option<String>,
}

/// Unwrap a JSON body, turning axum's rejection into an enveloped 400.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Run a workflow on its own task, tied to the request by a cancellation token.
///
/// If the client goes away this future is dropped, the token fires and the
/// workflow winds down on its own, still recording its outcome.
pub(crate) async fn run_detached<F, Fut, T>(work: F) -> ApiResult<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = launchpad_orchestrator::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let joined = tokio::spawn(work(cancel)).await;
    guard.disarm();

    let result = joined.map_err(|e| ApiError::Internal(format!("Deployment task aborted: {e}")))?;
    Ok(result?)
}

async fn create_deployment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(resource_type): Path<String>,
    payload: Result<Json<CreateDeploymentRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Envelope<DeploymentOutcome>>)> {
    let mut request = json_body(payload)?;

    if !request.user_id.is_empty() && request.user_id != user.username {
        warn!(
            "Ignoring userId {} in favour of authenticated user {}",
            request.user_id, user.username
        );
    }
    request.user_id = user.username;

    let coordinator = state.coordinator.clone();
    let outcome = run_detached(move |cancel| async move {
        coordinator.create(&resource_type, request, &cancel).await
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Envelope::ok("Deployment is live", outcome),
    ))
}

/// `POST /deploy/{type}`.
///
/// With `?projectId=` this is the push callback registered on an app's
/// repository: the payload must carry a valid signature and the redeploy runs
/// in the background. Otherwise the authenticated owner deploys the `CREATED`
/// record named by `{resourceId}`.
async fn deploy(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    Query(query): Query<DeployQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    match query.project_id {
        Some(project_id) => push_redeploy(state, &resource_type, project_id, &headers, &body).await,
        None => deploy_record(state, resource_type, &headers, &body).await,
    }
}

async fn deploy_record(
    state: AppState,
    resource_type: String,
    headers: &HeaderMap,
    payload: &[u8],
) -> ApiResult<Response> {
    let user = authenticated_user(headers)?;
    let body: DeployBody = serde_json::from_slice(payload)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))?;
    check_resource_owner(&state.coordinator, &body.resource_id, &user).await?;

    let coordinator = state.coordinator.clone();
    let outcome = run_detached(move |cancel| async move {
        coordinator
            .deploy(&resource_type, &body.resource_id, &cancel)
            .await
    })
    .await?;

    Ok(Envelope::ok("Deployment is live", outcome).into_response())
}

async fn push_redeploy(
    state: AppState,
    resource_type: &str,
    project_id: String,
    headers: &HeaderMap,
    payload: &[u8],
) -> ApiResult<Response> {
    if resource_type != ResourceKind::App.as_str() {
        return Err(ApiError::BadRequest(format!(
            "Push callbacks are only accepted for app deployments, not {resource_type}"
        )));
    }

    let git = state
        .coordinator
        .git_trigger()
        .ok_or_else(|| ApiError::Unauthorized("Push callbacks are not configured".to_string()))?;
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|h| h.to_str().ok());
    if !git.verify_signature(payload, signature) {
        return Err(ApiError::Unauthorized("Invalid webhook signature".to_string()));
    }

    match headers.get("x-github-event").and_then(|h| h.to_str().ok()) {
        Some("push") => {}
        Some("ping") => return Ok(Envelope::message("pong").into_response()),
        event => {
            info!("Ignoring {:?} event for project {}", event, project_id);
            return Ok(Envelope::message("Event ignored").into_response());
        }
    }

    let current = state
        .coordinator
        .registry()
        .find_hooked(&project_id, ResourceKind::App)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No git-deployed app for project {project_id}")))?;

    let coordinator = state.coordinator.clone();
    tokio::spawn(async move {
        // Not tied to the delivery; the outcome lands on the successor record.
        match coordinator.redeploy(&project_id, &CancellationToken::new()).await {
            Ok(outcome) => info!("Project {} redeployed as {}", project_id, outcome.resource_id),
            Err(e) => warn!("Redeploy of project {} failed: {}", project_id, e),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Envelope::ok("Redeploy started", json!({ "resourceId": current.id })),
    )
        .into_response())
}

async fn list_deployments(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<DeploymentsQuery>,
) -> ApiResult<Json<Envelope<Vec<Resource>>>> {
    let status = match query.status {
        Some(s) => Some(
            serde_json::from_str::<ResourceStatus>(&format!("\"{}\"", s.to_ascii_uppercase()))
                .map_err(|_| ApiError::BadRequest(format!("Unknown status: {s}")))?,
        ),
        None => None,
    };

    let filters = ResourceFilters {
        owner: Some(user.username),
        status,
    };

    let resources = state.coordinator.list(filters).await?;

    Ok(Envelope::ok(
        format!("{} deployment(s)", resources.len()),
        resources,
    ))
}

async fn get_deployment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Envelope<Resource>>> {
    let resource = check_resource_owner(&state.coordinator, &id, &user).await?;

    Ok(Envelope::ok("Deployment found", resource))
}

async fn delete_deployment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Envelope>> {
    check_resource_owner(&state.coordinator, &id, &user).await?;

    state.coordinator.delete(&id).await?;

    Ok(Envelope::message("Deployment deleted"))
}
