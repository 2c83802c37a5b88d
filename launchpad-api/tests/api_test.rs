//! Integration tests for REST API endpoints
//!
//! Covers deployment creation per outcome, redeploy, task pass-throughs,
//! dashboard reads, deletion and the response envelope.

mod common;

use axum::http::StatusCode;
use launchpad_orchestrator::ResourceStatus;
use serde_json::{json, Value};
use std::time::Duration;

#[tokio::test]
async fn test_create_qdrant_deployment() {
    let t = common::create_test_app().await;

    let response = t
        .post(
            "/createdeployment/database",
            &json!({
                "projectId": "proj-1",
                "userId": "alice",
                "dbtype": "qdrant",
                "dbname": "x"
            }),
            Some("alice"),
        )
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);

    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["endpoint"], "5.6.7.8");
    assert_eq!(body["data"]["connectionURI"], "https://5.6.7.8:6333");
    assert_eq!(body["data"]["uiUrl"], "https://5.6.7.8:6333/dashboard");
    assert_eq!(body["data"]["taskHandle"], "task-1");

    let id = body["data"]["resourceId"].as_str().unwrap();
    let stored = t.registry().get(id).await.unwrap();
    assert_eq!(stored.status, ResourceStatus::Live);
    assert_eq!(stored.owner, "alice");
}

#[tokio::test]
async fn test_owner_comes_from_identity_not_body() {
    let t = common::create_test_app().await;

    let response = t
        .post(
            "/createdeployment/webbuilder",
            &json!({ "projectId": "proj-1", "userId": "mallory", "name": "blog" }),
            Some("alice"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["data"]["projectUrl"], "https://blog.sites.launchpad.dev");

    let id = body["data"]["resourceId"].as_str().unwrap();
    assert_eq!(t.registry().get(id).await.unwrap().owner, "alice");
}

#[tokio::test]
async fn test_launch_failure_returns_400() {
    let t = common::create_test_app().await;
    t.orchestration.fail_launch("no capacity");

    let response = t
        .post(
            "/createdeployment/database",
            &json!({ "projectId": "proj-1", "dbtype": "qdrant", "dbname": "x" }),
            Some("alice"),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("no capacity"));

    let resources = t.registry().list(Default::default()).await.unwrap();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].status, ResourceStatus::Failed);
    assert!(resources[0].network_endpoint.is_none());
}

#[tokio::test]
async fn test_webhook_failure_returns_401_and_leaves_no_record() {
    let t = common::create_test_app().await;
    t.hooks.fail_list("token revoked");

    let response = t
        .post(
            "/createdeployment/app",
            &json!({
                "projectId": "proj-1",
                "name": "shop",
                "gitUrl": "https://github.com/acme/shop"
            }),
            Some("alice"),
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["success"], false);

    assert!(t.registry().list(Default::default()).await.unwrap().is_empty());
    assert!(t.orchestration.launched().is_empty());
}

#[tokio::test]
async fn test_resolve_failure_returns_500_and_keeps_handle() {
    let t = common::create_test_app().await;
    t.orchestration.detach();

    let response = t
        .post(
            "/createdeployment/database",
            &json!({ "projectId": "proj-1", "dbtype": "qdrant", "dbname": "x" }),
            Some("alice"),
        )
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let resources = t.registry().list(Default::default()).await.unwrap();
    assert_eq!(resources[0].status, ResourceStatus::Failed);
    assert_eq!(resources[0].task_handle.as_deref(), Some("task-1"));
}

#[tokio::test]
async fn test_invalid_requests_return_400() {
    let t = common::create_test_app().await;

    let response = t
        .post(
            "/createdeployment/mainframe",
            &json!({ "projectId": "proj-1", "name": "x" }),
            Some("alice"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Missing required password for redis
    let response = t
        .post(
            "/createdeployment/database",
            &json!({ "projectId": "proj-1", "dbtype": "redis", "dbname": "cache" }),
            Some("alice"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Missing projectId
    let response = t
        .post("/createdeployment/chatbot", &json!({ "name": "bot" }), Some("alice"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["success"], false);

    assert!(t.registry().list(Default::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_deploy_existing_record() {
    let t = common::create_test_app().await;
    let resource = common::fixture_created_resource(&t.pool, "alice").await;

    let response = t
        .post("/deploy/database", &json!({ "resourceId": resource.id }), Some("alice"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["data"]["resourceId"], resource.id.as_str());
    assert_eq!(body["data"]["connectionURI"], "https://5.6.7.8:6333");

    // Already LIVE
    let response = t
        .post("/deploy/database", &json!({ "resourceId": resource.id }), Some("alice"))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_deploy_other_users_record_is_forbidden() {
    let t = common::create_test_app().await;
    let resource = common::fixture_created_resource(&t.pool, "alice").await;

    let response = t
        .post("/deploy/database", &json!({ "resourceId": resource.id }), Some("bob"))
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(t.orchestration.launched().is_empty());
}

#[tokio::test]
async fn test_deploy_without_identity_is_unauthorized() {
    let t = common::create_test_app().await;
    let resource = common::fixture_created_resource(&t.pool, "alice").await;

    let response = t
        .post("/deploy/database", &json!({ "resourceId": resource.id }), None)
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(t.orchestration.launched().is_empty());
}

async fn create_app_deployment(t: &common::TestApp) -> String {
    let response = t
        .post(
            "/createdeployment/app",
            &json!({
                "projectId": "proj-1",
                "name": "shop",
                "gitUrl": "https://github.com/acme/shop"
            }),
            Some("alice"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body: Value = common::extract_json_body(response).await;
    body["data"]["resourceId"].as_str().unwrap().to_string()
}

/// Path and query of the callback registered with the provider.
fn registered_callback(t: &common::TestApp) -> String {
    let hooks = t.hooks.hooks();
    assert_eq!(hooks.len(), 1);
    let url = hooks[0].url.clone().unwrap();
    url.strip_prefix("https://launchpad.test").unwrap().to_string()
}

#[tokio::test]
async fn test_push_to_registered_callback_redeploys_app() {
    let t = common::create_test_app().await;
    let original = create_app_deployment(&t).await;

    let callback = registered_callback(&t);
    assert_eq!(callback, "/deploy/app?projectId=proj-1");

    let payload = r#"{"ref":"refs/heads/main"}"#;
    let response = t
        .push(&callback, payload, "push", Some(t.sign(payload)))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["resourceId"], original.as_str());

    // The rollout continues after the callback has been answered.
    let mut replaced = false;
    for _ in 0..100 {
        if t.registry().find(&original).await.unwrap().is_none() {
            replaced = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(replaced, "previous app record should be retired");

    let resources = t.registry().list(Default::default()).await.unwrap();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].status, ResourceStatus::Live);
    assert_eq!(resources[0].task_handle.as_deref(), Some("task-2"));
    assert_eq!(resources[0].owner, "alice");
    assert!(resources[0].webhook_id.is_some());

    assert_eq!(t.orchestration.launched().len(), 2);
    assert_eq!(t.orchestration.stopped(), vec!["task-1".to_string()]);
    assert_eq!(t.hooks.hooks().len(), 1);
}

#[tokio::test]
async fn test_push_callback_is_verified() {
    let t = common::create_test_app().await;
    let original = create_app_deployment(&t).await;
    let callback = registered_callback(&t);
    let payload = r#"{"ref":"refs/heads/main"}"#;

    let response = t.push(&callback, payload, "push", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let forged = t.sign(r#"{"ref":"refs/heads/evil"}"#);
    let response = t.push(&callback, payload, "push", Some(forged)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let signature = t.sign(payload);

    let response = t.push(&callback, payload, "ping", Some(signature.clone())).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = t
        .push("/deploy/database?projectId=proj-1", payload, "push", Some(signature.clone()))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = t
        .push("/deploy/app?projectId=other", payload, "push", Some(signature.clone()))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Nothing was relaunched.
    assert_eq!(t.orchestration.launched().len(), 1);
    assert!(t.registry().find(&original).await.unwrap().is_some());
}

#[tokio::test]
async fn test_list_get_and_delete() {
    let t = common::create_test_app().await;
    let mine = common::fixture_created_resource(&t.pool, "alice").await;
    common::fixture_created_resource(&t.pool, "bob").await;

    let response = t.get("/deployments", Some("alice")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = common::extract_json_body(response).await;
    let items = body["data"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], mine.id.as_str());
    assert_eq!(items[0]["status"], "CREATED");
    assert_eq!(items[0]["type"], "database");
    // Credentials never leave the service
    assert!(items[0].get("params").is_none());

    let response = t.get("/deployments?status=live", Some("alice")).await;
    let body: Value = common::extract_json_body(response).await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let response = t.get(&format!("/deployments/{}", mine.id), Some("bob")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = t.delete(&format!("/deployments/{}", mine.id), Some("alice")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["success"], true);

    // Never launched, so nothing to stop
    assert!(t.orchestration.stopped().is_empty());

    let response = t.get(&format!("/deployments/{}", mine.id), Some("alice")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = t.delete("/deployments/missing", Some("alice")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_operations_endpoint() {
    let t = common::create_test_app().await;

    let response = t
        .post(
            "/createdeployment/database",
            &json!({ "projectId": "proj-1", "dbtype": "qdrant", "dbname": "x" }),
            Some("alice"),
        )
        .await;
    let body: Value = common::extract_json_body(response).await;
    let id = body["data"]["resourceId"].as_str().unwrap().to_string();

    let response = t.get(&format!("/deployments/{id}/operations"), Some("alice")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = common::extract_json_body(response).await;
    let ops = body["data"].as_array().unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0]["operationType"], "create");
    assert_eq!(ops[0]["status"], "success");

    let response = t
        .get(&format!("/deployments/{id}/operations?status=failed"), Some("alice"))
        .await;
    let body: Value = common::extract_json_body(response).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_check_ip_and_stop_task() {
    let t = common::create_test_app().await;

    let response = t
        .post("/deploy/checkip", &json!({ "taskHandle": "task-7" }), Some("alice"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["data"]["endpoint"], "5.6.7.8");

    let response = t
        .post("/deploy/delete", &json!({ "taskHandle": "task-7" }), Some("alice"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(t.orchestration.stopped(), vec!["task-7".to_string()]);

    t.orchestration.fail_stop("unknown task");
    let response = t
        .post("/deploy/delete", &json!({ "taskHandle": "task-8" }), Some("alice"))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = t
        .post("/deploy/checkip", &json!({ "taskHandle": "" }), Some("alice"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_task_of_another_user_is_forbidden() {
    let t = common::create_test_app().await;

    let response = t
        .post(
            "/createdeployment/database",
            &json!({ "projectId": "proj-1", "dbtype": "qdrant", "dbname": "x" }),
            Some("alice"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = t
        .post("/deploy/delete", &json!({ "taskHandle": "task-1" }), Some("bob"))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(t.orchestration.stopped().is_empty());
}

#[tokio::test]
async fn test_health_endpoints() {
    let t = common::create_test_app().await;

    let response = t.get("/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "launchpad-api");

    let response = t.get("/health/ready", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = common::extract_json_body(response).await;
    assert_eq!(body["database"], "connected");
}
