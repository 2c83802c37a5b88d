use crate::error::ApiError;
use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use launchpad_orchestrator::{DeploymentCoordinator, Resource};

#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub username: String,
    pub email: Option<String>,
}

/// Auth middleware - extracts the user set by the fronting auth proxy
///
/// The proxy verifies the session and sets `x-launchpad-user`. Generic
/// `x-forwarded-user` (oauth2-proxy) and a bare `x-user` for local
/// development are accepted as fallbacks.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let user = authenticated_user(req.headers())?;
    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

/// Identity from the proxy headers, for handlers that sit outside the middleware.
pub fn authenticated_user(headers: &HeaderMap) -> Result<AuthenticatedUser, ApiError> {
    let username = headers
        .get("x-launchpad-user")
        .or_else(|| headers.get("x-forwarded-user"))
        .or_else(|| headers.get("x-user"))
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| ApiError::Unauthorized("Missing user identity".to_string()))?;

    let email = headers
        .get("x-launchpad-email")
        .or_else(|| headers.get("x-forwarded-email"))
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());

    Ok(AuthenticatedUser { username, email })
}

/// Load a resource and check the authenticated user owns it
///
/// Returns:
/// - ApiError::NotFound if the resource doesn't exist
/// - ApiError::Forbidden if it exists but belongs to someone else
pub async fn check_resource_owner(
    coordinator: &DeploymentCoordinator,
    resource_id: &str,
    user: &AuthenticatedUser,
) -> Result<Resource, ApiError> {
    let resource = coordinator.get(resource_id).await?;

    if resource.owner != user.username {
        return Err(ApiError::Forbidden(format!(
            "Access denied: resource {} is owned by {}",
            resource_id, resource.owner
        )));
    }

    Ok(resource)
}
