//! Route guard for UI shell navigation
//!
//! Paths are classified by segment-aware prefix. Anything that is neither a
//! known protected nor a known public prefix is treated as protected.
//!
//! Author: hephaex@gmail.com

use crate::audit::{audit_log, AuditContext, AuditEvent};
use crate::auth::authenticate_request;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use gestion_core::LOGIN_PATH;
use std::sync::Arc;

/// Shell sections that require a session
pub const PROTECTED_PREFIXES: &[&str] = &[
    "/dashboard",
    "/usuarios",
    "/roles",
    "/inventario",
    "/pedidos",
    "/formulas",
    "/proveedores",
];

/// Shell pages reachable without a session
pub const PUBLIC_PREFIXES: &[&str] = &[
    "/auth/login",
    "/auth/register",
    "/auth/forgot-password",
    "/auth/reset-password",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Public,
    Protected,
}

/// Classify a request path
pub fn classify(path: &str) -> RouteClass {
    if PROTECTED_PREFIXES.iter().any(|p| has_prefix(path, p)) {
        RouteClass::Protected
    } else if PUBLIC_PREFIXES.iter().any(|p| has_prefix(path, p)) {
        RouteClass::Public
    } else {
        RouteClass::Protected
    }
}

pub fn is_protected_path(path: &str) -> bool {
    classify(path) == RouteClass::Protected
}

pub fn is_public_path(path: &str) -> bool {
    classify(path) == RouteClass::Public
}

/// `/roles` matches `/roles` and `/roles/7` but not `/rolesx`
fn has_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Login URL that returns the user to `target` afterwards
pub fn login_redirect_target(target: &str) -> String {
    let next: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
    format!("{LOGIN_PATH}?next={next}")
}

/// Guard middleware for the UI shell
///
/// Protected navigation without a valid access token is answered with
/// `303 See Other` to the login page before the shell produces any content.
pub async fn route_guard(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if classify(&path) == RouteClass::Public {
        return next.run(request).await;
    }

    match authenticate_request(&state, &request) {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(err) => {
            audit_log(
                &AuditEvent::InvalidToken {
                    path: path.clone(),
                    reason: err.to_string(),
                },
                &AuditContext::from_headers(request.headers()),
            );

            let target = request
                .uri()
                .path_and_query()
                .map_or(path.as_str(), |pq| pq.as_str());
            redirect_to_login(target)
        }
    }
}

fn redirect_to_login(target: &str) -> Response {
    let location = login_redirect_target(target);
    match HeaderValue::from_str(&location) {
        Ok(value) => (StatusCode::SEE_OTHER, [(header::LOCATION, value)]).into_response(),
        Err(_) => (
            StatusCode::SEE_OTHER,
            [(header::LOCATION, HeaderValue::from_static(LOGIN_PATH))],
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protected_sections() {
        assert!(is_protected_path("/dashboard/roles"));
        assert!(is_protected_path("/dashboard"));
        assert!(is_protected_path("/inventario/42/editar"));
        assert!(is_protected_path("/proveedores"));
    }

    #[test]
    fn test_public_pages() {
        assert!(is_public_path("/auth/login"));
        assert!(is_public_path("/auth/reset-password/abc123"));
        assert!(is_public_path("/auth/register"));
        assert!(!is_protected_path("/auth/forgot-password"));
    }

    #[test]
    fn test_unknown_paths_fail_closed() {
        assert!(is_protected_path("/unknown/path"));
        assert!(is_protected_path("/"));
        assert!(is_protected_path("/auth"));
        assert!(is_protected_path("/auth/logout"));
    }

    #[test]
    fn test_prefix_respects_segments() {
        assert!(is_protected_path("/auth/loginx"));
        assert!(!is_public_path("/auth/login-bypass"));
        assert_eq!(classify("/rolesx"), RouteClass::Protected);
        assert!(has_prefix("/roles/7", "/roles"));
        assert!(!has_prefix("/rolesx", "/roles"));
    }

    #[test]
    fn test_login_redirect_target() {
        assert_eq!(
            login_redirect_target("/dashboard"),
            "/auth/login?next=%2Fdashboard"
        );
        assert_eq!(
            login_redirect_target("/pedidos?estado=abierto&p=2"),
            "/auth/login?next=%2Fpedidos%3Festado%3Dabierto%26p%3D2"
        );
    }
}
