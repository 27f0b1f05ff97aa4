// HTTP handlers for the ARC backend core

pub mod auth;
pub mod health;

use crate::app::AppState;
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};

/// Public authentication routes (no bearer required)
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh_token))
        .route("/invites/consume", post(auth::consume_invite))
}

/// Bearer-protected authentication routes
pub fn protected_auth_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/logout", post(auth::logout))
        .route("/logout_all", post(auth::logout_all))
        .route("/sessions", get(auth::list_sessions))
        .route("/invites/create", post(auth::create_invite))
        .route("/invites/revoke", post(auth::revoke_invite))
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            crate::middleware::auth_middleware,
        ))
}

/// Bearer-protected user routes
pub fn user_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/me", get(auth::get_current_user))
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            crate::middleware::auth_middleware,
        ))
}
