//! Credential store
//!
//! This module provides the persistence collaborator for the session core:
//! - Account lookup and lock state
//! - Refresh token references for revocation
//!
//! [`CredentialStore`] is the seam. [`PgCredentialStore`] wraps a pool that is
//! created at startup and closed at shutdown; [`InMemoryCredentialStore`]
//! backs tests and local development.

use super::models::{Account, RefreshTokenRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Repository errors
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Account not found")]
    AccountNotFound,

    #[error("Account already exists: {0}")]
    AccountExists(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        RepositoryError::DatabaseError(err.to_string())
    }
}

/// Persistence operations the session core depends on
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find an account by its login identifier
    async fn find_account_by_credential(
        &self,
        username: &str,
    ) -> Result<Option<Account>, RepositoryError>;

    async fn find_account_by_id(&self, id: Uuid) -> Result<Option<Account>, RepositoryError>;

    /// Increment the failed-login counter and return the new value
    async fn record_failed_login(&self, id: Uuid) -> Result<i32, RepositoryError>;

    async fn lock_account(&self, id: Uuid, until: DateTime<Utc>) -> Result<(), RepositoryError>;

    /// Lift a lock and clear the failure counter. Returns false for unknown accounts.
    async fn unlock_account(&self, id: Uuid) -> Result<bool, RepositoryError>;

    /// Clear the failure counter after a successful login
    async fn reset_failed_logins(&self, id: Uuid, at: DateTime<Utc>)
        -> Result<(), RepositoryError>;

    async fn persist_refresh_token_reference(
        &self,
        token_hash: &str,
        account_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn find_refresh_token_reference(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, RepositoryError>;

    /// Revoke a live reference
    ///
    /// Returns true only for the caller that performed the revocation, which
    /// makes this the claim step of rotation.
    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Revoke every live reference of an account and return how many were revoked
    async fn revoke_all_refresh_tokens(
        &self,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    /// Connectivity check for readiness probes
    async fn ping(&self) -> Result<(), RepositoryError>;

    /// Release the underlying handle
    async fn close(&self) {}
}

const ACCOUNT_COLUMNS: &str = "id, username, email, password_hash, roles, is_active, \
     failed_login_attempts, is_locked, locked_until, last_login, created_at";

/// PostgreSQL-backed credential store
#[derive(Debug, Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::DatabaseError(format!("Migration failed: {e}")))
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_account_by_credential(
        &self,
        username: &str,
    ) -> Result<Option<Account>, RepositoryError> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE username = $1");
        let account = sqlx::query_as::<_, Account>(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn find_account_by_id(&self, id: Uuid) -> Result<Option<Account>, RepositoryError> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let account = sqlx::query_as::<_, Account>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn record_failed_login(&self, id: Uuid) -> Result<i32, RepositoryError> {
        sqlx::query_scalar::<_, i32>(
            "UPDATE accounts SET failed_login_attempts = failed_login_attempts + 1 \
             WHERE id = $1 RETURNING failed_login_attempts",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepositoryError::AccountNotFound)
    }

    async fn lock_account(&self, id: Uuid, until: DateTime<Utc>) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE accounts SET is_locked = true, locked_until = $1 WHERE id = $2")
                .bind(until)
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::AccountNotFound);
        }
        Ok(())
    }

    async fn unlock_account(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE accounts SET is_locked = false, locked_until = NULL, \
             failed_login_attempts = 0 WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reset_failed_logins(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE accounts SET failed_login_attempts = 0, is_locked = false, \
             locked_until = NULL, last_login = $1 WHERE id = $2",
        )
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn persist_refresh_token_reference(
        &self,
        token_hash: &str,
        account_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO refresh_tokens (id, account_id, token_hash, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, NOW())",
        )
        .bind(Uuid::new_v4())
        .bind(account_id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_refresh_token_reference(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, RepositoryError> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            "SELECT id, account_id, token_hash, expires_at, created_at, revoked_at \
             FROM refresh_tokens WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $1 \
             WHERE token_hash = $2 AND revoked_at IS NULL",
        )
        .bind(at)
        .bind(token_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_refresh_tokens(
        &self,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $1 \
             WHERE account_id = $2 AND revoked_at IS NULL",
        )
        .bind(at)
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// In-process credential store
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    accounts: RwLock<HashMap<Uuid, Account>>,
    refresh_tokens: RwLock<HashMap<String, RefreshTokenRecord>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with accounts; later duplicates of a username are dropped
    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let mut by_id: HashMap<Uuid, Account> = HashMap::new();
        for account in accounts {
            if !by_id.values().any(|a| a.username == account.username) {
                by_id.insert(account.id, account);
            }
        }
        Self {
            accounts: RwLock::new(by_id),
            refresh_tokens: RwLock::default(),
        }
    }

    /// Add an account, rejecting duplicate usernames
    pub async fn insert_account(&self, account: Account) -> Result<(), RepositoryError> {
        let mut accounts = self.accounts.write().await;
        if accounts.values().any(|a| a.username == account.username) {
            return Err(RepositoryError::AccountExists(account.username));
        }
        accounts.insert(account.id, account);
        Ok(())
    }

    /// Number of references that are neither revoked nor expired at `now`
    pub async fn live_refresh_tokens(&self, account_id: Uuid, now: DateTime<Utc>) -> usize {
        self.refresh_tokens
            .read()
            .await
            .values()
            .filter(|r| r.account_id == account_id && r.is_live(now))
            .count()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_account_by_credential(
        &self,
        username: &str,
    ) -> Result<Option<Account>, RepositoryError> {
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .find(|a| a.username == username)
            .cloned())
    }

    async fn find_account_by_id(&self, id: Uuid) -> Result<Option<Account>, RepositoryError> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn record_failed_login(&self, id: Uuid) -> Result<i32, RepositoryError> {
        let mut accounts = self.accounts.write().await;
        let account = accounts.get_mut(&id).ok_or(RepositoryError::AccountNotFound)?;
        account.failed_login_attempts += 1;
        Ok(account.failed_login_attempts)
    }

    async fn lock_account(&self, id: Uuid, until: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut accounts = self.accounts.write().await;
        let account = accounts.get_mut(&id).ok_or(RepositoryError::AccountNotFound)?;
        account.is_locked = true;
        account.locked_until = Some(until);
        Ok(())
    }

    async fn unlock_account(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let mut accounts = self.accounts.write().await;
        match accounts.get_mut(&id) {
            Some(account) => {
                account.is_locked = false;
                account.locked_until = None;
                account.failed_login_attempts = 0;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reset_failed_logins(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut accounts = self.accounts.write().await;
        if let Some(account) = accounts.get_mut(&id) {
            account.failed_login_attempts = 0;
            account.is_locked = false;
            account.locked_until = None;
            account.last_login = Some(at);
        }
        Ok(())
    }

    async fn persist_refresh_token_reference(
        &self,
        token_hash: &str,
        account_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            account_id,
            token_hash: token_hash.to_string(),
            expires_at,
            created_at: Utc::now(),
            revoked_at: None,
        };
        self.refresh_tokens
            .write()
            .await
            .insert(token_hash.to_string(), record);
        Ok(())
    }

    async fn find_refresh_token_reference(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, RepositoryError> {
        Ok(self.refresh_tokens.read().await.get(token_hash).cloned())
    }

    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut tokens = self.refresh_tokens.write().await;
        match tokens.get_mut(token_hash) {
            Some(record) if record.revoked_at.is_none() => {
                record.revoked_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_refresh_tokens(
        &self,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut tokens = self.refresh_tokens.write().await;
        let mut revoked = 0;
        for record in tokens
            .values_mut()
            .filter(|r| r.account_id == account_id && r.revoked_at.is_none())
        {
            record.revoked_at = Some(at);
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn account(username: &str) -> Account {
        Account {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: None,
            password_hash: String::new(),
            roles: vec![],
            is_active: true,
            failed_login_attempts: 0,
            is_locked: false,
            locked_until: None,
            last_login: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_find_by_credential() {
        let store = InMemoryCredentialStore::new();
        let acc = account("ana");
        store.insert_account(acc.clone()).await.unwrap();

        let found = store.find_account_by_credential("ana").await.unwrap();
        assert_eq!(found.map(|a| a.id), Some(acc.id));
        assert!(store.find_account_by_credential("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_with_accounts_seeds_store() {
        let first = account("ana");
        let store =
            InMemoryCredentialStore::with_accounts([first.clone(), account("ana"), account("luis")]);

        let found = store.find_account_by_credential("ana").await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
        assert!(store.find_account_by_credential("luis").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let store = InMemoryCredentialStore::new();
        store.insert_account(account("ana")).await.unwrap();
        assert!(matches!(
            store.insert_account(account("ana")).await,
            Err(RepositoryError::AccountExists(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_logins_lock_and_unlock() {
        let store = InMemoryCredentialStore::new();
        let acc = account("ana");
        store.insert_account(acc.clone()).await.unwrap();

        assert_eq!(store.record_failed_login(acc.id).await.unwrap(), 1);
        assert_eq!(store.record_failed_login(acc.id).await.unwrap(), 2);

        let until = Utc::now() + Duration::minutes(15);
        store.lock_account(acc.id, until).await.unwrap();
        let locked = store.find_account_by_id(acc.id).await.unwrap().unwrap();
        assert!(locked.is_locked);
        assert_eq!(locked.locked_until, Some(until));

        assert!(store.unlock_account(acc.id).await.unwrap());
        let unlocked = store.find_account_by_id(acc.id).await.unwrap().unwrap();
        assert!(!unlocked.is_locked);
        assert_eq!(unlocked.failed_login_attempts, 0);

        assert!(!store.unlock_account(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_is_single_winner() {
        let store = InMemoryCredentialStore::new();
        let owner = Uuid::new_v4();
        let now = Utc::now();
        store
            .persist_refresh_token_reference("hash-1", owner, now + Duration::days(15))
            .await
            .unwrap();

        assert!(store.revoke_refresh_token("hash-1", now).await.unwrap());
        assert!(!store.revoke_refresh_token("hash-1", now).await.unwrap());
        assert!(!store.revoke_refresh_token("unknown", now).await.unwrap());

        let record = store.find_refresh_token_reference("hash-1").await.unwrap().unwrap();
        assert!(record.is_revoked());
    }

    #[tokio::test]
    async fn test_revoke_all_refresh_tokens() {
        let store = InMemoryCredentialStore::new();
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let now = Utc::now();
        let expires = now + Duration::days(15);
        store.persist_refresh_token_reference("a", owner, expires).await.unwrap();
        store.persist_refresh_token_reference("b", owner, expires).await.unwrap();
        store.persist_refresh_token_reference("c", other, expires).await.unwrap();

        assert_eq!(store.revoke_all_refresh_tokens(owner, now).await.unwrap(), 2);
        assert_eq!(store.live_refresh_tokens(owner, now).await, 0);
        assert_eq!(store.live_refresh_tokens(other, now).await, 1);
    }
}
