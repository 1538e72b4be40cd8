//! API route definitions
//!
//! Author: hephaex@gmail.com

use crate::auth::{require_role, require_session, ADMIN_ROLE};
use crate::handlers::auth;
use crate::middleware::no_store_middleware;
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Session endpoints under `/api/auth`
pub fn auth_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Reachable without an access token; logout and refresh must work once it has expired
    let public_routes = Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/refresh-token", post(auth::refresh_token));

    let admin_routes = Router::new()
        .route("/api/auth/desbloquear-cuenta", post(auth::unlock_account))
        .route_layer(middleware::from_fn(require_role(ADMIN_ROLE)));

    let session_routes = Router::new()
        .route("/api/auth/me", get(auth::me))
        .merge(admin_routes)
        .route_layer(middleware::from_fn_with_state(state, require_session));

    Router::new()
        .merge(public_routes)
        .merge(session_routes)
        .route_layer(middleware::from_fn(no_store_middleware))
}
