pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult, Envelope};
pub use routes::create_app;
pub use state::AppState;
