//! API Integration Tests
//!
//! Routers run against the in-memory credential store with a manual clock,
//! so token expiry is simulated by advancing the clock.
//!
//! Author: hephaex@gmail.com

use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use chrono::Duration;
use gestion_api::create_router_for_testing;
use gestion_api::testing::{
    TestApp, ADMIN_PASSWORD, ADMIN_USERNAME, OPERATOR_PASSWORD, OPERATOR_USERNAME,
};
use serde_json::{json, Value};
use tower::ServiceExt;

/// Helper to create a test request
fn create_json_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");

    match body {
        Some(json_body) => builder
            .body(Body::from(serde_json::to_string(&json_body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn get_with_bearer(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn with_cookie(method: &str, uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn set_cookies<B>(response: &Response<B>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

fn cookie_value(cookies: &[String], name: &str) -> Option<String> {
    cookies.iter().find_map(|c| {
        let (key, rest) = c.split_once('=')?;
        (key == name).then(|| rest.split(';').next().unwrap_or_default().to_string())
    })
}

async fn login(app: &Router, usuario: &str, password: &str) -> Response<Body> {
    app.clone()
        .oneshot(create_json_request(
            "POST",
            "/api/auth/login",
            Some(json!({ "usuario": usuario, "password": password })),
        ))
        .await
        .unwrap()
}

/// Log in and return (access token, refresh token)
async fn login_tokens(app: &Router, usuario: &str, password: &str) -> (String, String) {
    let response = login(app, usuario, password).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookies = set_cookies(&response);
    (
        cookie_value(&cookies, "accessToken").unwrap(),
        cookie_value(&cookies, "refreshToken").unwrap(),
    )
}

// =============================================================================
// Health and documentation
// =============================================================================

#[tokio::test]
async fn test_health_check() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::X_CONTENT_TYPE_OPTIONS).unwrap(),
        "nosniff"
    );

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_readiness_check() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["ready"], true);
    assert_eq!(json["checks"]["credential_store"], true);
}

#[tokio::test]
async fn test_openapi_document() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["paths"]["/api/auth/refresh-token"].is_object());
}

// =============================================================================
// Login
// =============================================================================

#[tokio::test]
async fn test_login_sets_session_cookies() {
    let app = create_router_for_testing();

    let response = login(&app, OPERATOR_USERNAME, OPERATOR_PASSWORD).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );

    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 2);
    let access = cookies.iter().find(|c| c.starts_with("accessToken=")).unwrap();
    let refresh = cookies.iter().find(|c| c.starts_with("refreshToken=")).unwrap();
    assert!(access.contains("HttpOnly; SameSite=Lax; Max-Age=1800"));
    assert!(refresh.contains("Max-Age=1296000"));
    assert!(!access.contains("Secure"));

    let json = body_json(response).await;
    assert_eq!(json["tokenType"], "Bearer");
    assert_eq!(json["expiresIn"], 1800);
    assert_eq!(json["refreshExpiresIn"], 1_296_000);
    assert_eq!(
        json["accessToken"].as_str(),
        cookie_value(&cookies, "accessToken").as_deref()
    );
}

#[tokio::test]
async fn test_secure_cookies_in_production() {
    let mut config = gestion_api::testing::test_config();
    config.server.production = true;
    let app = TestApp::with_config(config).router();

    let response = login(&app, OPERATOR_USERNAME, OPERATOR_PASSWORD).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).iter().all(|c| c.ends_with("; Secure")));
}

#[tokio::test]
async fn test_login_wrong_password() {
    let app = create_router_for_testing();

    let response = login(&app, OPERATOR_USERNAME, "incorrecta").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookies(&response).is_empty());

    let json = body_json(response).await;
    assert_eq!(json["code"], "INVALID_CREDENTIALS");
}

#[tokio::test]
async fn test_login_unknown_user_matches_wrong_password() {
    let app = create_router_for_testing();

    let unknown = body_json(login(&app, "fantasma", "x").await).await;
    let wrong = body_json(login(&app, OPERATOR_USERNAME, "x").await).await;
    assert_eq!(unknown, wrong);
}

#[tokio::test]
async fn test_login_lockout() {
    let app = create_router_for_testing();

    for _ in 0..2 {
        let response = login(&app, OPERATOR_USERNAME, "incorrecta").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = login(&app, OPERATOR_USERNAME, "incorrecta").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["code"], "ACCOUNT_LOCKED");

    let response = login(&app, OPERATOR_USERNAME, OPERATOR_PASSWORD).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_lockout_lapses() {
    let test_app = TestApp::new();
    let app = test_app.router();

    for _ in 0..3 {
        login(&app, OPERATOR_USERNAME, "incorrecta").await;
    }
    test_app.clock.advance(Duration::minutes(15));

    let response = login(&app, OPERATOR_USERNAME, OPERATOR_PASSWORD).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_malformed_login_body() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(create_json_request(
            "POST",
            "/api/auth/login",
            Some(json!({ "usuario": OPERATOR_USERNAME })),
        ))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

// =============================================================================
// Access tokens
// =============================================================================

#[tokio::test]
async fn test_me_with_bearer_and_cookie() {
    let app = create_router_for_testing();
    let (access, _) = login_tokens(&app, OPERATOR_USERNAME, OPERATOR_PASSWORD).await;

    let response = app
        .clone()
        .oneshot(get_with_bearer("/api/auth/me", &access))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["roles"], json!(["inventario", "pedidos"]));

    let response = app
        .oneshot(with_cookie("GET", "/api/auth/me", &format!("accessToken={access}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_me_without_token() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(Request::builder().uri("/api/auth/me").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
        "Bearer"
    );
}

#[tokio::test]
async fn test_expired_and_forged_tokens_look_the_same() {
    let test_app = TestApp::new();
    let app = test_app.router();
    let (access, _) = login_tokens(&app, OPERATOR_USERNAME, OPERATOR_PASSWORD).await;

    let forged = body_json(
        app.clone()
            .oneshot(get_with_bearer("/api/auth/me", "eyJhbGciOiJIUzI1NiJ9.e30.c2ln"))
            .await
            .unwrap(),
    )
    .await;

    test_app.clock.advance(Duration::seconds(1801));
    let response = app
        .oneshot(get_with_bearer("/api/auth/me", &access))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let expired = body_json(response).await;

    assert_eq!(expired, forged);
    assert_eq!(expired["code"], "SESSION_EXPIRED");
}

// =============================================================================
// Refresh
// =============================================================================

#[tokio::test]
async fn test_refresh_after_access_expiry() {
    let test_app = TestApp::new();
    let app = test_app.router();
    let (access, refresh) = login_tokens(&app, OPERATOR_USERNAME, OPERATOR_PASSWORD).await;

    test_app.clock.advance(Duration::seconds(1801));
    let response = app
        .clone()
        .oneshot(get_with_bearer("/api/auth/me", &access))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(with_cookie(
            "POST",
            "/api/auth/refresh-token",
            &format!("refreshToken={refresh}"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookies = set_cookies(&response);
    let new_access = cookie_value(&cookies, "accessToken").unwrap();
    assert!(cookie_value(&cookies, "refreshToken").is_some());
    assert_eq!(body_json(response).await["expiresIn"], 1800);

    let response = app
        .oneshot(get_with_bearer("/api/auth/me", &new_access))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_refresh_body_fallback() {
    let app = create_router_for_testing();
    let (_, refresh) = login_tokens(&app, OPERATOR_USERNAME, OPERATOR_PASSWORD).await;

    let response = app
        .oneshot(create_json_request(
            "POST",
            "/api/auth/refresh-token",
            Some(json!({ "refreshToken": refresh })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response).await["accessToken"].is_string());
}

#[tokio::test]
async fn test_rotated_refresh_token_is_revoked() {
    let app = create_router_for_testing();
    let (_, refresh) = login_tokens(&app, OPERATOR_USERNAME, OPERATOR_PASSWORD).await;
    let cookie = format!("refreshToken={refresh}");

    let response = app
        .clone()
        .oneshot(with_cookie("POST", "/api/auth/refresh-token", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(with_cookie("POST", "/api/auth/refresh-token", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let cookies = set_cookies(&response);
    assert!(cookies.iter().all(|c| c.contains("Max-Age=0")));
    assert_eq!(body_json(response).await["code"], "SESSION_EXPIRED");
}

#[tokio::test]
async fn test_refresh_without_token() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(create_json_request("POST", "/api/auth/refresh-token", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_access_token_rejected_as_refresh() {
    let app = create_router_for_testing();
    let (access, _) = login_tokens(&app, OPERATOR_USERNAME, OPERATOR_PASSWORD).await;

    let response = app
        .oneshot(with_cookie(
            "POST",
            "/api/auth/refresh-token",
            &format!("refreshToken={access}"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_expired_refresh_token() {
    let test_app = TestApp::new();
    let app = test_app.router();
    let (_, refresh) = login_tokens(&app, OPERATOR_USERNAME, OPERATOR_PASSWORD).await;

    test_app.clock.advance(Duration::seconds(1_296_000));
    let response = app
        .oneshot(with_cookie(
            "POST",
            "/api/auth/refresh-token",
            &format!("refreshToken={refresh}"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Logout
// =============================================================================

#[tokio::test]
async fn test_logout_without_access_token() {
    let test_app = TestApp::new();
    let app = test_app.router();
    let (_, refresh) = login_tokens(&app, OPERATOR_USERNAME, OPERATOR_PASSWORD).await;
    let cookie = format!("refreshToken={refresh}");

    // Access token long expired; logout still succeeds
    test_app.clock.advance(Duration::hours(2));
    let response = app
        .clone()
        .oneshot(with_cookie("POST", "/api/auth/logout", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 2);
    assert!(cookies.iter().any(|c| c.starts_with("accessToken=;")));
    assert!(cookies.iter().all(|c| c.contains("Max-Age=0")));

    let response = app
        .oneshot(with_cookie("POST", "/api/auth/refresh-token", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_without_any_token() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(create_json_request("POST", "/api/auth/logout", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(set_cookies(&response).len(), 2);
}

// =============================================================================
// Unlock
// =============================================================================

#[tokio::test]
async fn test_unlock_requires_admin() {
    let app = create_router_for_testing();
    let (operator_access, _) = login_tokens(&app, OPERATOR_USERNAME, OPERATOR_PASSWORD).await;
    let (admin_access, _) = login_tokens(&app, ADMIN_USERNAME, ADMIN_PASSWORD).await;

    for _ in 0..3 {
        login(&app, OPERATOR_USERNAME, "incorrecta").await;
    }

    let unlock = |token: &str| {
        Request::builder()
            .method("POST")
            .uri("/api/auth/desbloquear-cuenta")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "usuario": OPERATOR_USERNAME }).to_string()))
            .unwrap()
    };

    let response = app.clone().oneshot(unlock(&operator_access)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.clone().oneshot(unlock(&admin_access)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response).await["accountId"].is_string());

    let response = login(&app, OPERATOR_USERNAME, OPERATOR_PASSWORD).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unlock_unknown_account() {
    let app = create_router_for_testing();
    let (admin_access, _) = login_tokens(&app, ADMIN_USERNAME, ADMIN_PASSWORD).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/desbloquear-cuenta")
                .header(header::AUTHORIZATION, format!("Bearer {admin_access}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "usuario": "fantasma" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unlock_without_session() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(create_json_request(
            "POST",
            "/api/auth/desbloquear-cuenta",
            Some(json!({ "usuario": OPERATOR_USERNAME })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Route guard
// =============================================================================

#[tokio::test]
async fn test_guard_redirects_protected_navigation() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(Request::builder().uri("/dashboard/roles").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/auth/login?next=%2Fdashboard%2Froles"
    );
}

#[tokio::test]
async fn test_guard_fails_closed_on_unknown_paths() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(Request::builder().uri("/unknown/path").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn test_guard_lets_public_pages_through() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(Request::builder().uri("/auth/login").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_ne!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn test_guard_serves_shell_with_session() {
    let static_dir = tempfile::tempdir().unwrap();
    std::fs::write(static_dir.path().join("index.html"), "<html>gestion</html>").unwrap();

    let mut config = gestion_api::testing::test_config();
    config.server.static_dir = static_dir.path().to_path_buf();
    let test_app = TestApp::with_config(config);
    let app = test_app.router();
    let (access, _) = login_tokens(&app, OPERATOR_USERNAME, OPERATOR_PASSWORD).await;

    let response = app
        .clone()
        .oneshot(with_cookie("GET", "/inventario", &format!("accessToken={access}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"<html>gestion</html>");

    // Same navigation once the access token has expired
    test_app.clock.advance(Duration::seconds(1800));
    let response = app
        .oneshot(with_cookie("GET", "/inventario", &format!("accessToken={access}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}
