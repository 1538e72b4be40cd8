//! Authentication service layer
//!
//! Login with lockout, refresh with optional rotation, logout and account
//! unlock. The credential store is injected; nothing here touches a global
//! handle.

use super::jwt::{Claims, IssuedToken, TokenIssuer};
use super::models::Account;
use super::password::{hash_password_with_config, verify_password, PasswordConfig};
use super::repository::CredentialStore;
use crate::audit::{audit_log, AuditContext, AuditEvent};
use crate::error::AppError;
use chrono::Duration;
use gestion_core::{AuthConfig, LoginRequest, SessionError, TokenResponse};
use sha2::{Digest, Sha256};
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

/// Tokens minted by a login or refresh
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub account_id: Uuid,
    pub access: IssuedToken,
    /// New refresh token, absent when a refresh ran without rotation
    pub refresh: Option<IssuedToken>,
}

impl SessionTokens {
    pub fn to_response(&self) -> TokenResponse {
        TokenResponse {
            access_token: self.access.token.clone(),
            refresh_token: self.refresh.as_ref().map(|t| t.token.clone()),
            token_type: "Bearer".to_string(),
            expires_in: self.access.lifetime_secs(),
            refresh_expires_in: self.refresh.as_ref().map(IssuedToken::lifetime_secs),
        }
    }
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    issuer: TokenIssuer,
    rotate_refresh_tokens: bool,
    max_failed_attempts: i32,
    lockout_duration: Duration,
    password: PasswordConfig,
    /// Hash verified against when the account does not exist
    decoy: Arc<OnceLock<Option<String>>>,
}

impl AuthService {
    /// Create a new authentication service
    pub fn new(store: Arc<dyn CredentialStore>, issuer: TokenIssuer, auth: &AuthConfig) -> Self {
        Self {
            store,
            issuer,
            rotate_refresh_tokens: auth.rotate_refresh_tokens,
            max_failed_attempts: i32::try_from(auth.max_failed_attempts).unwrap_or(i32::MAX),
            lockout_duration: Duration::from_std(auth.lockout_duration)
                .unwrap_or_else(|_| Duration::minutes(15)),
            password: PasswordConfig::default(),
            decoy: Arc::new(OnceLock::new()),
        }
    }

    /// Argon2 cost used for the decoy credential
    pub fn with_password_config(mut self, password: PasswordConfig) -> Self {
        self.password = password;
        self.decoy = Arc::new(OnceLock::new());
        self
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Validate an access token presented on a protected request
    pub fn authenticate(&self, access_token: &str) -> Result<Claims, SessionError> {
        self.issuer.validate_access_token(access_token)
    }

    /// Login with username and password
    ///
    /// Unknown accounts, inactive accounts and wrong passwords all yield
    /// `CredentialMismatch`. Reaching the failure threshold locks the account
    /// and reports `AccountLocked` on that same attempt.
    pub async fn login(
        &self,
        request: &LoginRequest,
        context: &AuditContext,
    ) -> Result<SessionTokens, AppError> {
        let now = self.issuer.clock().now();

        let Some(mut account) = self.store.find_account_by_credential(&request.usuario).await?
        else {
            self.verify_decoy(&request.password);
            self.login_failed(&request.usuario, "unknown account", None, context);
            return Err(SessionError::CredentialMismatch.into());
        };

        if !account.is_active {
            self.verify_decoy(&request.password);
            self.login_failed(&account.username, "account deactivated", None, context);
            return Err(SessionError::CredentialMismatch.into());
        }

        if let Some(until) = account.locked_at(now) {
            self.login_failed(&account.username, "account locked", None, context);
            return Err(SessionError::AccountLocked { until }.into());
        }

        // A lapsed lock starts a fresh failure window
        if account.is_locked {
            self.store.unlock_account(account.id).await?;
            account.failed_login_attempts = 0;
        }

        if !verify_password(&request.password, &account.password_hash)? {
            return Err(self.record_failure(&account, context).await?.into());
        }

        self.store.reset_failed_logins(account.id, now).await?;

        let access = self.issuer.issue_access_token(&account.claims())?;
        let refresh = self.issue_refresh(&account).await?;

        audit_log(
            &AuditEvent::LoginSuccess {
                account_id: account.id,
                username: account.username.clone(),
            },
            context,
        );

        Ok(SessionTokens {
            account_id: account.id,
            access,
            refresh: Some(refresh),
        })
    }

    /// Exchange a refresh token for a new access token
    ///
    /// With rotation enabled the presented token is revoked first; only the
    /// caller that wins the revocation gets new tokens, so a refresh token can
    /// be spent at most once.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        context: &AuditContext,
    ) -> Result<SessionTokens, AppError> {
        let claims = self
            .issuer
            .validate_refresh_token(refresh_token)
            .inspect_err(|e| self.refresh_rejected(None, &e.to_string(), context))?;
        let account_id = claims.subject()?;
        let now = self.issuer.clock().now();
        let token_hash = hash_token(refresh_token);

        let record = self.store.find_refresh_token_reference(&token_hash).await?;
        match record {
            Some(record) if record.account_id == account_id && !record.is_revoked() => {}
            Some(record) if record.is_revoked() => {
                self.refresh_rejected(Some(account_id), "revoked refresh token presented", context);
                return Err(SessionError::RefreshRevoked.into());
            }
            _ => {
                self.refresh_rejected(Some(account_id), "unknown refresh token", context);
                return Err(SessionError::RefreshRevoked.into());
            }
        }

        let account = match self.store.find_account_by_id(account_id).await? {
            Some(account) if account.is_active => account,
            _ => {
                self.refresh_rejected(Some(account_id), "account missing or inactive", context);
                return Err(SessionError::RefreshRevoked.into());
            }
        };

        if let Some(until) = account.locked_at(now) {
            self.refresh_rejected(Some(account_id), "account locked", context);
            return Err(SessionError::AccountLocked { until }.into());
        }

        let refresh = if self.rotate_refresh_tokens {
            if !self.store.revoke_refresh_token(&token_hash, now).await? {
                self.refresh_rejected(Some(account_id), "lost rotation race", context);
                return Err(SessionError::RefreshRevoked.into());
            }
            Some(self.issue_refresh(&account).await?)
        } else {
            None
        };

        let access = self.issuer.issue_access_token(&account.claims())?;

        audit_log(
            &AuditEvent::TokenRefresh {
                account_id,
                rotated: refresh.is_some(),
            },
            context,
        );

        Ok(SessionTokens {
            account_id,
            access,
            refresh,
        })
    }

    /// Revoke the presented refresh token, if any
    ///
    /// Logout always succeeds; a missing, expired or unknown token simply
    /// leaves nothing to revoke.
    pub async fn logout(
        &self,
        refresh_token: Option<&str>,
        context: &AuditContext,
    ) -> Result<(), AppError> {
        let mut account_id = None;
        let mut refresh_revoked = false;

        if let Some(token) = refresh_token {
            let token_hash = hash_token(token);
            if let Some(record) = self.store.find_refresh_token_reference(&token_hash).await? {
                account_id = Some(record.account_id);
                refresh_revoked = self
                    .store
                    .revoke_refresh_token(&token_hash, self.issuer.clock().now())
                    .await?;
            }
        }

        audit_log(
            &AuditEvent::Logout {
                account_id,
                refresh_revoked,
            },
            context,
        );
        Ok(())
    }

    /// Lift the lock on an account
    pub async fn unlock(
        &self,
        username: &str,
        unlocked_by: Option<Uuid>,
        context: &AuditContext,
    ) -> Result<Uuid, AppError> {
        let account = self
            .store
            .find_account_by_credential(username)
            .await?
            .ok_or_else(|| AppError::NotFound("Account".to_string()))?;

        if !self.store.unlock_account(account.id).await? {
            return Err(AppError::NotFound("Account".to_string()));
        }

        audit_log(
            &AuditEvent::AccountUnlocked {
                account_id: account.id,
                username: account.username,
                unlocked_by,
            },
            context,
        );
        Ok(account.id)
    }

    async fn record_failure(
        &self,
        account: &Account,
        context: &AuditContext,
    ) -> Result<SessionError, AppError> {
        let attempts = self.store.record_failed_login(account.id).await?;

        if attempts < self.max_failed_attempts {
            self.login_failed(&account.username, "password mismatch", Some(attempts), context);
            return Ok(SessionError::CredentialMismatch);
        }

        let now = self.issuer.clock().now();
        let until = now + self.lockout_duration;
        self.store.lock_account(account.id, until).await?;
        // Sessions opened before the lock do not survive it
        let revoked = self.store.revoke_all_refresh_tokens(account.id, now).await?;
        tracing::debug!(account_id = %account.id, revoked, "Refresh tokens revoked on lockout");
        audit_log(
            &AuditEvent::AccountLocked {
                account_id: account.id,
                username: account.username.clone(),
                failed_attempts: attempts,
                locked_until: until,
            },
            context,
        );
        Ok(SessionError::AccountLocked { until })
    }

    async fn issue_refresh(&self, account: &Account) -> Result<IssuedToken, AppError> {
        let refresh = self.issuer.issue_refresh_token(&account.claims())?;
        self.store
            .persist_refresh_token_reference(&hash_token(&refresh.token), account.id, refresh.expires_at)
            .await?;
        Ok(refresh)
    }

    /// Pay the cost of a real verification so unknown accounts are not faster
    fn verify_decoy(&self, password: &str) {
        let decoy = self.decoy.get_or_init(|| {
            hash_password_with_config("decoy-credential", &self.password)
                .map_err(|e| tracing::error!(error = %e, "Failed to prepare decoy credential"))
                .ok()
        });
        if let Some(hash) = decoy {
            let _ = verify_password(password, hash);
        }
    }

    fn login_failed(
        &self,
        username: &str,
        reason: &str,
        failed_attempts: Option<i32>,
        context: &AuditContext,
    ) {
        audit_log(
            &AuditEvent::LoginFailure {
                username: username.to_string(),
                reason: reason.to_string(),
                failed_attempts,
            },
            context,
        );
    }

    fn refresh_rejected(&self, account_id: Option<Uuid>, reason: &str, context: &AuditContext) {
        audit_log(
            &AuditEvent::RefreshRejected {
                account_id,
                reason: reason.to_string(),
            },
            context,
        );
    }
}

/// SHA-256 of a token, hex encoded, as stored in the credential store
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
