use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

use super::auth::{AuthenticatedUser, JwtAuth};

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<JwtAuth>,
}

impl AuthState {
    pub fn new(secret: &str) -> Self {
        Self {
            jwt: Arc::new(JwtAuth::new(secret)),
        }
    }
}

/// Rejects requests without a valid bearer token
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = JwtAuth::bearer_token(header_value)
        .and_then(|token| state.jwt.verify(token))
        .map_err(|e| {
            debug!("Rejected request to {}: {}", request.uri().path(), e);
            StatusCode::UNAUTHORIZED
        })?;

    request.extensions_mut().insert(AuthenticatedUser(claims.sub));
    Ok(next.run(request).await)
}
