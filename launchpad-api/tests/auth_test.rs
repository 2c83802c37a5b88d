//! Integration tests for authentication middleware
//!
//! Tests that the auth middleware extracts user information from the auth
//! proxy headers and rejects anonymous requests with an enveloped 401.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware,
    response::Response,
    routing::get,
    Router,
};
use launchpad_api::auth::{auth_middleware, AuthenticatedUser};
use serde_json::Value;
use tower::ServiceExt; // for `oneshot`

// Simple handler that returns the authenticated user info
async fn test_handler(
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> axum::Json<Value> {
    axum::Json(serde_json::json!({
        "username": user.username,
        "email": user.email,
    }))
}

// Create a test app with auth middleware
fn create_test_app() -> Router {
    Router::new()
        .route("/protected", get(test_handler))
        .layer(middleware::from_fn(auth_middleware))
}

async fn send(headers: &[(&str, &str)]) -> Response {
    let mut builder = Request::builder().uri("/protected");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }

    create_test_app()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn json(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_valid_x_user_header_passes() {
    let response = send(&[("x-user", "testuser")]).await;

    assert_eq!(response.status(), StatusCode::OK);

    let json = json(response).await;
    assert_eq!(json["username"], "testuser");
    assert!(json["email"].is_null());
}

#[tokio::test]
async fn test_proxy_headers_pass() {
    let response = send(&[("x-launchpad-user", "proxied")]).await;
    assert_eq!(json(response).await["username"], "proxied");

    let response = send(&[("x-forwarded-user", "forwarded")]).await;
    assert_eq!(json(response).await["username"], "forwarded");
}

#[tokio::test]
async fn test_header_priority() {
    // x-launchpad-user wins over x-forwarded-user and x-user
    let response = send(&[
        ("x-launchpad-user", "proxied"),
        ("x-forwarded-user", "forwarded"),
        ("x-user", "fallback"),
    ])
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["username"], "proxied");
}

#[tokio::test]
async fn test_email_headers_are_extracted() {
    let response = send(&[("x-user", "testuser"), ("x-launchpad-email", "test@example.com")]).await;
    assert_eq!(json(response).await["email"], "test@example.com");

    let response = send(&[
        ("x-user", "testuser"),
        ("x-forwarded-email", "forwarded@example.com"),
    ])
    .await;
    assert_eq!(json(response).await["email"], "forwarded@example.com");
}

#[tokio::test]
async fn test_missing_user_header_returns_enveloped_401() {
    let response = send(&[]).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Missing user identity");
}

#[tokio::test]
async fn test_blank_user_header_returns_401() {
    let response = send(&[("x-user", "  ")]).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_invalid_utf8_header_returns_401() {
    // Create request with invalid UTF-8 header value
    let request = Request::builder()
        .uri("/protected")
        .header("x-user", &b"\xFF\xFE"[..])
        .body(Body::empty())
        .unwrap();

    let response = create_test_app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_deployment_routes_require_identity() {
    use launchpad_orchestrator::test_utils::{
        create_test_db, instant_options, test_coordinator, FakeAddressLookup, FakeOrchestration,
    };

    let pool = create_test_db().await;
    let orchestration = FakeOrchestration::new();
    let coordinator = test_coordinator(
        pool,
        orchestration.clone(),
        FakeAddressLookup::with_address("5.6.7.8"),
        instant_options(),
    );
    let app = launchpad_api::create_app(launchpad_api::AppState::new(coordinator));

    let request = Request::builder()
        .method("POST")
        .uri("/createdeployment/database")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"projectId":"p","dbtype":"qdrant","dbname":"x"}"#))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(orchestration.launched().is_empty());

    // Health stays public
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
