use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use launchpad_orchestrator::OrchestratorError;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

/// Response body used by every endpoint.
#[derive(Debug, Serialize)]
pub struct Envelope<T = Value> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data: Some(data),
        })
    }
}

impl Envelope {
    pub fn message(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data: None,
        })
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Envelope::<Value> {
            success: false,
            message: self.to_string(),
            data: None,
        };

        (status, Json(body)).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let message = err.to_string();
        match err {
            OrchestratorError::InvalidResourceType(_)
            | OrchestratorError::InvalidInput(_)
            | OrchestratorError::LaunchFailed(_) => ApiError::BadRequest(message),
            OrchestratorError::WebhookRegistrationFailed(_) => ApiError::Unauthorized(message),
            OrchestratorError::NotFound(_) => ApiError::NotFound(message),
            OrchestratorError::InvalidState(_) => ApiError::Conflict(message),
            _ => ApiError::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_maps_to_status() {
        let cases = [
            (OrchestratorError::InvalidResourceType("x".into()), StatusCode::BAD_REQUEST),
            (OrchestratorError::LaunchFailed("x".into()), StatusCode::BAD_REQUEST),
            (OrchestratorError::WebhookRegistrationFailed("x".into()), StatusCode::UNAUTHORIZED),
            (OrchestratorError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (OrchestratorError::InvalidState("x".into()), StatusCode::CONFLICT),
            (OrchestratorError::NetworkResolutionFailed("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (OrchestratorError::PersistenceFailed("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (OrchestratorError::StopFailed("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }
}
