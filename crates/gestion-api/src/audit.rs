//! Security audit logging for session events
//!
//! Every login, refresh, logout, lock and unlock decision is logged at INFO
//! level on the "audit" target with the event serialized as JSON. Internal
//! failure reasons (unknown account, forged token, revoked refresh token) are
//! recorded here and nowhere else; HTTP responses only carry the generic
//! session message.
//!
//! Author: hephaex@gmail.com

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Security audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Successful login
    LoginSuccess { account_id: Uuid, username: String },

    /// Failed login attempt
    LoginFailure {
        username: String,
        reason: String,
        failed_attempts: Option<i32>,
    },

    /// Lockout triggered by repeated failures
    AccountLocked {
        account_id: Uuid,
        username: String,
        failed_attempts: i32,
        locked_until: DateTime<Utc>,
    },

    /// Lock lifted by an administrator
    AccountUnlocked {
        account_id: Uuid,
        username: String,
        unlocked_by: Option<Uuid>,
    },

    /// Access token minted from a refresh token
    TokenRefresh { account_id: Uuid, rotated: bool },

    /// Refresh token rejected
    RefreshRejected {
        account_id: Option<Uuid>,
        reason: String,
    },

    /// Session ended by the user
    Logout {
        account_id: Option<Uuid>,
        refresh_revoked: bool,
    },

    /// Invalid, expired or forged access token presented
    InvalidToken { path: String, reason: String },

    /// Authenticated caller lacks the required role
    AccessDenied {
        account_id: Uuid,
        resource: String,
        required_role: String,
    },
}

impl AuditEvent {
    /// Human-readable summary used as the log message
    pub fn summary(&self) -> &'static str {
        match self {
            Self::LoginSuccess { .. } => "Login successful",
            Self::LoginFailure { .. } => "Login failed",
            Self::AccountLocked { .. } => "Account locked",
            Self::AccountUnlocked { .. } => "Account unlocked",
            Self::TokenRefresh { .. } => "Token refresh",
            Self::RefreshRejected { .. } => "Refresh rejected",
            Self::Logout { .. } => "User logout",
            Self::InvalidToken { .. } => "Invalid token",
            Self::AccessDenied { .. } => "Access denied",
        }
    }
}

/// Request metadata attached to audit events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditContext {
    /// Client IP address (from proxy headers)
    pub ip_address: Option<String>,
    /// User agent string
    pub user_agent: Option<String>,
}

impl AuditContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip_address: extract_ip_address(headers),
            user_agent: extract_user_agent(headers),
        }
    }
}

/// Log a security audit event on the "audit" target
pub fn audit_log(event: &AuditEvent, context: &AuditContext) {
    let timestamp = Utc::now();

    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    info!(
        target: "audit",
        timestamp = %timestamp,
        event = %event_json,
        ip_address = ?context.ip_address,
        user_agent = ?context.user_agent,
        "{}",
        event.summary()
    );
}

/// Extract client IP from X-Forwarded-For or X-Real-IP
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    if let Some(first_ip) = headers
        .get("x-forwarded-for")
        .and_then(|xff| xff.to_str().ok())
        .and_then(|xff| xff.split(',').next())
    {
        return Some(first_ip.trim().to_string());
    }

    headers
        .get("x-real-ip")
        .and_then(|ip| ip.to_str().ok())
        .map(|ip| ip.to_string())
}

/// Extract user agent from request headers
pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::RefreshRejected {
            account_id: None,
            reason: "revoked refresh token presented".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"refresh_rejected\""));
        assert!(json.contains("revoked refresh token presented"));
    }

    #[test]
    fn test_audit_log_does_not_panic() {
        audit_log(
            &AuditEvent::AccountLocked {
                account_id: Uuid::new_v4(),
                username: "ana".to_string(),
                failed_attempts: 5,
                locked_until: Utc::now() + chrono::Duration::minutes(15),
            },
            &AuditContext::default(),
        );
    }

    #[test]
    fn test_extract_ip_from_x_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.1, 198.51.100.1".parse().unwrap(),
        );

        assert_eq!(extract_ip_address(&headers), Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_extract_ip_from_x_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "203.0.113.1".parse().unwrap());

        assert_eq!(extract_ip_address(&headers), Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_context_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::USER_AGENT,
            "Mozilla/5.0 (Test)".parse().unwrap(),
        );

        let context = AuditContext::from_headers(&headers);
        assert_eq!(context.user_agent.as_deref(), Some("Mozilla/5.0 (Test)"));
        assert_eq!(context.ip_address, None);
    }
}
