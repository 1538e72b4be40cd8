//! OpenAPI document for the session API

use crate::error::ApiError;
use crate::handlers::{auth, health};
use gestion_core::{
    LoginRequest, PrincipalInfo, RefreshTokenRequest, TokenResponse, UnlockRequest,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    info(title = "Gestion session API", description = "Login, token refresh and session control"),
    paths(
        auth::login,
        auth::refresh_token,
        auth::logout,
        auth::unlock_account,
        auth::me,
        health::health_check,
        health::readiness_check,
    ),
    components(schemas(
        LoginRequest,
        RefreshTokenRequest,
        UnlockRequest,
        TokenResponse,
        PrincipalInfo,
        ApiError,
        auth::MessageResponse,
        auth::UnlockResponse,
        health::HealthResponse,
        health::ReadinessResponse,
        health::ReadinessChecks,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Session lifecycle"),
        (name = "health", description = "Probes")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_session_endpoints() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let paths = doc["paths"].as_object().unwrap();

        for path in [
            "/api/auth/login",
            "/api/auth/refresh-token",
            "/api/auth/logout",
            "/api/auth/desbloquear-cuenta",
            "/api/auth/me",
            "/health",
            "/ready",
        ] {
            assert!(paths.contains_key(path), "missing {path}");
        }
        assert!(doc["components"]["securitySchemes"]["bearer_auth"].is_object());
    }
}
