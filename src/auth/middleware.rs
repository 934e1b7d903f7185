use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::state::AppState;

/// Extract Bearer token from Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth_header = headers.get("Authorization")?.to_str().ok()?;
    auth_header.strip_prefix("Bearer ").map(|t| t.to_string())
}

/// Validate the caller's bearer token and attach the resulting `Principal`
pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut req: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    let Some(token) = extract_bearer_token(&headers) else {
        tracing::warn!("Auth middleware: no bearer token on {}", req.uri().path());
        return Err((
            StatusCode::UNAUTHORIZED,
            "Missing authentication token (Authorization header)".to_string(),
        ));
    };

    let principal = state.jwt_validator.validate(&token).map_err(|e| {
        tracing::warn!("Auth middleware: token rejected: {:#}", e);
        (StatusCode::UNAUTHORIZED, "Invalid or expired token".to_string())
    })?;

    tracing::debug!(subject = %principal.subject, "Authenticated request");
    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}
