//! Session API handlers
//!
//! Login, logout, refresh, unlock and the current principal. Tokens are
//! returned both in the JSON body and as cookies.
//!
//! Author: hephaex@gmail.com

use crate::audit::AuditContext;
use crate::auth::AuthenticatedUser;
use crate::cookies::{cleared_session_cookies, read_cookie, session_cookies};
use crate::error::AppError;
use crate::state::AppState;
use axum::{extract::State, http::HeaderMap, response::IntoResponse, Extension, Json};
use gestion_core::{
    LoginRequest, PrincipalInfo, RefreshTokenRequest, SessionError, TokenResponse, UnlockRequest,
    REFRESH_TOKEN_COOKIE,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// Plain acknowledgement body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// Unlock acknowledgement
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnlockResponse {
    pub message: String,
    pub account_id: String,
}

/// Login with username and password
///
/// Failed attempts are counted; reaching the configured threshold locks the
/// account for the lockout window.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful, session cookies set", body = TokenResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
        (status = 403, description = "Account locked", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let context = AuditContext::from_headers(&headers);
    let tokens = state.auth.login(&request, &context).await?;

    let cookies = session_cookies(&tokens, &state.config.auth, state.secure_cookies());
    Ok((cookies, Json(tokens.to_response())))
}

/// Exchange the refresh token for a new access token
///
/// The refresh token is read from the `refreshToken` cookie, falling back to
/// the `refreshToken` body field. A rejected refresh also clears the session
/// cookies.
#[utoipa::path(
    post,
    path = "/api/auth/refresh-token",
    tag = "auth",
    request_body(content = RefreshTokenRequest, description = "Fallback when no cookie is sent"),
    responses(
        (status = 200, description = "New access token issued", body = TokenResponse),
        (status = 401, description = "Session expired", body = crate::error::ApiError),
        (status = 403, description = "Account locked", body = crate::error::ApiError),
    )
)]
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<RefreshTokenRequest>>,
) -> impl IntoResponse {
    let context = AuditContext::from_headers(&headers);
    let secure = state.secure_cookies();

    let token = read_cookie(&headers, REFRESH_TOKEN_COOKIE)
        .or_else(|| body.and_then(|Json(request)| request.refresh_token));
    let Some(token) = token else {
        return (
            cleared_session_cookies(secure),
            AppError::from(SessionError::MalformedOrForgedToken),
        )
            .into_response();
    };

    match state.auth.refresh(&token, &context).await {
        Ok(tokens) => (
            session_cookies(&tokens, &state.config.auth, secure),
            Json(tokens.to_response()),
        )
            .into_response(),
        Err(err @ AppError::Session(_)) => (cleared_session_cookies(secure), err).into_response(),
        Err(err) => err.into_response(),
    }
}

/// End the session
///
/// Revokes the refresh token from the cookie or body and clears both cookies.
/// No access token is needed, so an expired session can still log out.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "auth",
    request_body(content = RefreshTokenRequest, description = "Optional when the cookie is sent"),
    responses(
        (status = 200, description = "Session ended", body = MessageResponse),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<RefreshTokenRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let context = AuditContext::from_headers(&headers);
    let token = read_cookie(&headers, REFRESH_TOKEN_COOKIE)
        .or_else(|| body.and_then(|Json(request)| request.refresh_token));

    state.auth.logout(token.as_deref(), &context).await?;

    Ok((
        cleared_session_cookies(state.secure_cookies()),
        Json(MessageResponse {
            message: "Logged out successfully".to_string(),
        }),
    ))
}

/// Lift the lock on an account
///
/// Requires the admin role.
#[utoipa::path(
    post,
    path = "/api/auth/desbloquear-cuenta",
    tag = "auth",
    request_body = UnlockRequest,
    responses(
        (status = 200, description = "Account unlocked", body = UnlockResponse),
        (status = 401, description = "Session expired", body = crate::error::ApiError),
        (status = 403, description = "Insufficient permissions", body = crate::error::ApiError),
        (status = 404, description = "Account not found", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn unlock_account(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    headers: HeaderMap,
    Json(request): Json<UnlockRequest>,
) -> Result<impl IntoResponse, AppError> {
    let usuario = request.usuario.trim();
    if usuario.is_empty() {
        return Err(AppError::BadRequest("usuario is required".to_string()));
    }

    let context = AuditContext::from_headers(&headers);
    let account_id = state
        .auth
        .unlock(usuario, Some(user.account_id), &context)
        .await?;

    Ok(Json(UnlockResponse {
        message: "Account unlocked".to_string(),
        account_id: account_id.to_string(),
    }))
}

/// Current principal
#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Authenticated principal", body = PrincipalInfo),
        (status = 401, description = "Session expired", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn me(Extension(user): Extension<AuthenticatedUser>) -> Json<PrincipalInfo> {
    Json(user.principal())
}
