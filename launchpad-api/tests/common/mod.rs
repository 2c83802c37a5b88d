//! Common test utilities and helpers for launchpad-api tests
//!
//! Builds the router over an in-memory database and scripted backends, and
//! wraps the oneshot request plumbing shared by the test files.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use launchpad_api::{create_app, AppState};
use launchpad_orchestrator::resource::{BillingWindow, NewResource};
use launchpad_orchestrator::test_utils::{
    create_test_db, instant_options, test_coordinator, test_git_trigger, FakeAddressLookup,
    FakeHookApi, FakeOrchestration,
};
use launchpad_orchestrator::{DatabaseEngine, ProvisionParams, Resource, ResourceKind, ResourceRegistry};
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower::ServiceExt; // for `oneshot`

pub struct TestApp {
    pub app: Router,
    pub pool: SqlitePool,
    pub orchestration: Arc<FakeOrchestration>,
    pub lookup: Arc<FakeAddressLookup>,
    pub hooks: Arc<FakeHookApi>,
}

/// Router wired to fakes: launches succeed and resolve to `5.6.7.8`.
pub async fn create_test_app() -> TestApp {
    let pool = create_test_db().await;
    let orchestration = FakeOrchestration::new();
    let lookup = FakeAddressLookup::with_address("5.6.7.8");
    let hooks = FakeHookApi::new();

    let coordinator = test_coordinator(
        pool.clone(),
        orchestration.clone(),
        lookup.clone(),
        instant_options(),
    )
    .with_git_trigger(test_git_trigger(hooks.clone()));

    TestApp {
        app: create_app(AppState::new(coordinator)),
        pool,
        orchestration,
        lookup,
        hooks,
    }
}

impl TestApp {
    /// Send a request to the API
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        // Router is cheap to clone
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn post(&self, uri: &str, body: &Value, user: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");

        if let Some(user) = user {
            builder = builder.header("x-user", user);
        }

        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn get(&self, uri: &str, user: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);

        if let Some(user) = user {
            builder = builder.header("x-user", user);
        }

        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn delete(&self, uri: &str, user: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().method("DELETE").uri(uri);

        if let Some(user) = user {
            builder = builder.header("x-user", user);
        }

        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Deliver a provider push callback: no user identity, signed payload.
    pub async fn push(
        &self,
        uri: &str,
        payload: &str,
        event: &str,
        signature: Option<String>,
    ) -> Response<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-github-event", event);

        if let Some(signature) = signature {
            builder = builder.header("x-hub-signature-256", signature);
        }

        self.send(builder.body(Body::from(payload.to_string())).unwrap())
            .await
    }

    /// Signature the provider would send for `payload`.
    pub fn sign(&self, payload: &str) -> String {
        test_git_trigger(self.hooks.clone())
            .sign(payload.as_bytes())
            .unwrap()
    }

    pub fn registry(&self) -> ResourceRegistry {
        ResourceRegistry::new(self.pool.clone())
    }
}

/// Fixture: a CREATED qdrant record that has never been launched
pub async fn fixture_created_resource(pool: &SqlitePool, owner: &str) -> Resource {
    ResourceRegistry::new(pool.clone())
        .insert(NewResource {
            name: "vectors".to_string(),
            owner: owner.to_string(),
            project_id: "proj-1".to_string(),
            kind: ResourceKind::Database,
            engine: Some(DatabaseEngine::Qdrant),
            params: ProvisionParams {
                dbtype: Some("qdrant".to_string()),
                dbname: Some("vectors".to_string()),
                ..Default::default()
            },
            billing_window: BillingWindow::default(),
        })
        .await
        .expect("Failed to create fixture resource")
}

/// Helper to extract JSON body from axum response
pub async fn extract_json_body<T>(response: Response<Body>) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}
