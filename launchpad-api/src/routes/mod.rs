pub mod deployments;
pub mod health;
pub mod operations;
pub mod tasks;

use crate::{auth::auth_middleware, state::AppState};
use axum::{middleware, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub fn create_app(state: AppState) -> Router {
    // Allow CORS for the dashboard served from another origin
    let cors = CorsLayer::permissive();

    Router::new()
        .merge(health::routes()) // Health routes don't need auth
        .merge(deployments::callback_routes())
        .merge(
            deployments::routes()
                .merge(tasks::routes())
                .merge(operations::routes())
                .layer(middleware::from_fn(auth_middleware)),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
