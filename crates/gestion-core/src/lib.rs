//! Gestion Core - Shared types for the session core
//!
//! This crate defines the pieces shared by the API server and the session client:
//! - Session error taxonomy and the user-facing messages derived from it
//! - Wire types exchanged by the auth endpoints
//! - Clock abstraction used for every expiry decision
//! - Configuration management
//!
//! Author: hephaex@gmail.com

pub mod clock;
pub mod config;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    parse_duration, AppConfig, AuthConfig, ClientConfig, ConfigError, DatabaseConfig,
    LoggingConfig, ServerConfig,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the cookie carrying the access token
pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";

/// Name of the cookie carrying the refresh token
pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";

/// Login entry point the UI redirects to once a session is gone
pub const LOGIN_PATH: &str = "/auth/login";

/// Generic message shown whenever a session cannot be recovered
pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired, please log in again";

/// Message shown for locked accounts
pub const ACCOUNT_LOCKED_MESSAGE: &str =
    "Account is locked. Use the account unlock flow or contact an administrator";

/// Message shown for failed logins
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid username or password";

// ============================================================================
// Error Types
// ============================================================================

/// Failure modes of the session/token protocol
///
/// `ExpiredToken` on an access token is recovered by the refresh flow and never
/// reaches the end user. `MalformedOrForgedToken` and `RefreshRevoked` are fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Token has expired")]
    ExpiredToken,

    #[error("Token is malformed or its signature is invalid")]
    MalformedOrForgedToken,

    #[error("Account is locked until {until}")]
    AccountLocked { until: DateTime<Utc> },

    #[error("Credentials do not match")]
    CredentialMismatch,

    #[error("Refresh token has been revoked")]
    RefreshRevoked,

    #[error("Network failure: {0}")]
    NetworkFailure(String),
}

impl SessionError {
    /// Whether the refresh flow can recover from this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ExpiredToken)
    }

    /// Fatal errors terminate the session without any retry
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MalformedOrForgedToken | Self::RefreshRevoked)
    }

    /// Whether a bounded retry policy may repeat the failed call
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::NetworkFailure(_))
    }

    /// Stable code used in API error bodies
    ///
    /// Token failures all collapse into `SESSION_EXPIRED` so responses never
    /// reveal which check failed.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AccountLocked { .. } => "ACCOUNT_LOCKED",
            Self::CredentialMismatch => "INVALID_CREDENTIALS",
            Self::NetworkFailure(_) => "NETWORK_FAILURE",
            Self::ExpiredToken | Self::MalformedOrForgedToken | Self::RefreshRevoked => {
                "SESSION_EXPIRED"
            }
        }
    }

    /// Message safe to show to the end user
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AccountLocked { .. } => ACCOUNT_LOCKED_MESSAGE,
            Self::CredentialMismatch => INVALID_CREDENTIALS_MESSAGE,
            _ => SESSION_EXPIRED_MESSAGE,
        }
    }
}

// ============================================================================
// Wire Types
// ============================================================================

/// Login request body for `POST /api/auth/login`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LoginRequest {
    /// Login identifier
    pub usuario: String,
    /// Plaintext password
    pub password: String,
}

/// Account unlock request body for `POST /api/auth/desbloquear-cuenta`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UnlockRequest {
    /// Login identifier of the locked account
    pub usuario: String,
}

/// Optional body for refresh and logout when the cookie is unavailable
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: Option<String>,
}

/// Tokens returned by login and refresh
///
/// The same values are also delivered as cookies; the body exists for
/// non-browser clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    /// Present on login and whenever the refresh token was rotated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    /// Refresh token lifetime in seconds, when a refresh token is included
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_expires_in: Option<u64>,
}

/// Principal summary returned by `GET /api/auth/me`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PrincipalInfo {
    pub id: String,
    pub roles: Vec<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_errors_share_public_code() {
        for err in [
            SessionError::ExpiredToken,
            SessionError::MalformedOrForgedToken,
            SessionError::RefreshRevoked,
        ] {
            assert_eq!(err.code(), "SESSION_EXPIRED");
            assert_eq!(err.user_message(), SESSION_EXPIRED_MESSAGE);
        }
    }

    #[test]
    fn test_account_locked_is_distinct() {
        let err = SessionError::AccountLocked { until: Utc::now() };
        assert_eq!(err.code(), "ACCOUNT_LOCKED");
        assert_eq!(err.user_message(), ACCOUNT_LOCKED_MESSAGE);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_error_classes() {
        assert!(SessionError::ExpiredToken.is_recoverable());
        assert!(!SessionError::ExpiredToken.is_fatal());
        assert!(SessionError::MalformedOrForgedToken.is_fatal());
        assert!(SessionError::RefreshRevoked.is_fatal());
        assert!(SessionError::NetworkFailure("reset".into()).is_retriable());
        assert!(!SessionError::RefreshRevoked.is_retriable());
    }

    #[test]
    fn test_token_response_wire_format() {
        let response = TokenResponse {
            access_token: "a.b.c".to_string(),
            refresh_token: None,
            token_type: "Bearer".to_string(),
            expires_in: 1800,
            refresh_expires_in: None,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["accessToken"], "a.b.c");
        assert_eq!(json["expiresIn"], 1800);
        assert!(json.get("refreshToken").is_none());
    }
}
