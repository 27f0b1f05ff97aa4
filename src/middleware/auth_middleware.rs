// Authentication middleware for protected routes
// Validates bearer access tokens against live session state and injects
// AuthenticatedSession into request extensions

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{app::AppState, middleware::auth::AuthenticatedSession, utils::ApiError};

/// Extract the bearer token, validate it, and stash the resolved identity
pub async fn auth_middleware(
    State(app_state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match auth_header {
        Some(header) if header.starts_with("Bearer ") => &header[7..],
        _ => return ApiError::Unauthorized.into_response(),
    };

    let now = chrono::Utc::now();
    match app_state.sessions.validate_access_token(token, now).await {
        Ok(claims) => {
            request.extensions_mut().insert(AuthenticatedSession {
                user_id: claims.sub,
                session_id: claims.sid,
            });

            next.run(request).await
        },
        Err(e) => {
            tracing::debug!("access token rejected: {}", e);
            ApiError::Unauthorized.into_response()
        },
    }
}

/// Extractor so handlers can take AuthenticatedSession as a parameter
impl FromRequestParts<AppState> for AuthenticatedSession {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedSession>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized.into_response())
    }
}
