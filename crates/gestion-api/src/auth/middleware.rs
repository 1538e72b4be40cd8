/// Session middleware for protecting API routes
///
/// Reads the access token from the `Authorization` header or the
/// `accessToken` cookie, validates it against the configured issuer and
/// injects [`AuthenticatedUser`] into request extensions.
use super::jwt::Claims;
use super::models::ADMIN_ROLE;
use crate::audit::{audit_log, AuditContext, AuditEvent};
use crate::cookies::access_token;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use gestion_core::{PrincipalInfo, SessionError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

/// Authenticated caller extracted from a valid access token
///
/// Handlers read it with `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub account_id: Uuid,
    pub roles: Vec<String>,
    /// Token ID of the access token used
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthenticatedUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }

    pub fn principal(&self) -> PrincipalInfo {
        PrincipalInfo {
            id: self.account_id.to_string(),
            roles: self.roles.clone(),
        }
    }
}

impl TryFrom<Claims> for AuthenticatedUser {
    type Error = SessionError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        Ok(Self {
            account_id: claims.subject()?,
            expires_at: claims.expires_at(),
            roles: claims.roles,
            jti: claims.jti,
        })
    }
}

/// Resolve the caller of a request, if it carries a valid access token
pub fn authenticate_request(
    state: &AppState,
    request: &Request<Body>,
) -> Result<AuthenticatedUser, SessionError> {
    let token = access_token(request.headers()).ok_or(SessionError::MalformedOrForgedToken)?;
    let claims = state.auth.authenticate(&token)?;
    AuthenticatedUser::try_from(claims)
}

/// Middleware that requires a valid access token
///
/// Every rejection answers with the same 401 body; the precise reason only
/// reaches the audit log.
///
/// ```ignore
/// let app = Router::new()
///     .route("/api/auth/me", get(me))
///     .route_layer(middleware::from_fn_with_state(state.clone(), require_session));
/// ```
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let user = match authenticate_request(&state, &request) {
        Ok(user) => user,
        Err(err) => {
            audit_log(
                &AuditEvent::InvalidToken {
                    path: request.uri().path().to_string(),
                    reason: err.to_string(),
                },
                &AuditContext::from_headers(request.headers()),
            );
            return Err(err.into());
        }
    };

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

type RoleMiddlewareFuture = Pin<Box<dyn Future<Output = Result<Response, AppError>> + Send>>;

/// Middleware factory for role checks
///
/// Must sit inside [`require_session`]. Holders of the admin role pass every
/// check.
///
/// ```ignore
/// let admin = Router::new()
///     .route("/api/auth/desbloquear-cuenta", post(unlock_account))
///     .route_layer(middleware::from_fn(require_role("admin")))
///     .route_layer(middleware::from_fn_with_state(state.clone(), require_session));
/// ```
pub fn require_role(
    required_role: &'static str,
) -> impl Fn(Request<Body>, Next) -> RoleMiddlewareFuture + Clone {
    move |request: Request<Body>, next: Next| {
        Box::pin(async move {
            let user = request
                .extensions()
                .get::<AuthenticatedUser>()
                .cloned()
                .ok_or(AppError::Session(SessionError::MalformedOrForgedToken))?;

            if !user.has_role(required_role) && !user.is_admin() {
                audit_log(
                    &AuditEvent::AccessDenied {
                        account_id: user.account_id,
                        resource: request.uri().path().to_string(),
                        required_role: required_role.to_string(),
                    },
                    &AuditContext::from_headers(request.headers()),
                );
                return Err(AppError::Forbidden("Insufficient permissions".to_string()));
            }

            Ok(next.run(request).await)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::TokenUse;

    fn claims(sub: &str, roles: &[&str]) -> Claims {
        Claims {
            iss: "gestion-api".to_string(),
            sub: sub.to_string(),
            jti: "jti-1".to_string(),
            iat: 1_700_000_000,
            exp: 1_700_001_800,
            roles: roles.iter().map(|r| r.to_string()).collect(),
            token_use: TokenUse::Access,
        }
    }

    #[test]
    fn test_authenticated_user_from_claims() {
        let id = Uuid::new_v4();
        let user = AuthenticatedUser::try_from(claims(&id.to_string(), &["inventario"])).unwrap();

        assert_eq!(user.account_id, id);
        assert_eq!(user.jti, "jti-1");
        assert_eq!(user.expires_at.timestamp(), 1_700_001_800);
        assert!(user.has_role("inventario"));
        assert!(!user.is_admin());
    }

    #[test]
    fn test_non_uuid_subject_rejected() {
        assert_eq!(
            AuthenticatedUser::try_from(claims("not-a-uuid", &[])).unwrap_err(),
            SessionError::MalformedOrForgedToken
        );
    }

    #[test]
    fn test_principal_info() {
        let id = Uuid::new_v4();
        let user = AuthenticatedUser::try_from(claims(&id.to_string(), &["admin"])).unwrap();
        let principal = user.principal();

        assert_eq!(principal.id, id.to_string());
        assert_eq!(principal.roles, vec!["admin".to_string()]);
        assert!(user.is_admin());
    }
}
