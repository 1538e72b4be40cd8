//! Database models for authentication
//!
//! - Account: login identity, credential hash, roles and lock state
//! - RefreshTokenRecord: persisted reference to an issued refresh token
//!
//! These map to the `accounts` and `refresh_tokens` tables in `migrations/`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::jwt::AccountClaims;

/// Role allowed to unlock other accounts
pub const ADMIN_ROLE: &str = "admin";

/// Account owned by the credential store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Account {
    pub id: Uuid,
    /// Login identifier
    pub username: String,
    pub email: Option<String>,
    /// Argon2 PHC string, never serialized
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub roles: Vec<String>,
    pub is_active: bool,
    pub failed_login_attempts: i32,
    pub is_locked: bool,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Active lock expiry at `now`, if the account is locked
    ///
    /// A lock without an expiry lasts until it is explicitly lifted.
    pub fn locked_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.is_locked {
            return None;
        }
        match self.locked_until {
            Some(until) if until <= now => None,
            Some(until) => Some(until),
            None => Some(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Claim summary embedded in issued tokens
    pub fn claims(&self) -> AccountClaims {
        AccountClaims {
            subject: self.id,
            roles: self.roles.clone(),
        }
    }
}

/// Persisted reference to an issued refresh token
///
/// Only the SHA-256 hash of the token is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshTokenRecord {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && self.expires_at > now
    }
}
