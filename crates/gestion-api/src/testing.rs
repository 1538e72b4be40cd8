//! Fixtures for router-level tests
//!
//! An in-memory credential store seeded with two accounts, a manual clock
//! pinned to [`TEST_EPOCH`], and cheap Argon2 parameters.

use crate::auth::{hash_password_with_config, Account, InMemoryCredentialStore, PasswordConfig};
use crate::state::AppState;
use axum::Router;
use chrono::{DateTime, Utc};
use gestion_core::{AppConfig, ManualClock};
use std::sync::Arc;
use uuid::Uuid;

pub const ADMIN_USERNAME: &str = "admin";
pub const ADMIN_PASSWORD: &str = "Admin#2025";
pub const OPERATOR_USERNAME: &str = "operador";
pub const OPERATOR_PASSWORD: &str = "Operador#2025";

/// Start instant of the manual clock (Unix seconds)
pub const TEST_EPOCH: i64 = 1_700_000_000;

/// Account with a minimal-cost credential hash
pub fn test_account(username: &str, password: &str, roles: &[&str]) -> Account {
    let password_hash = hash_password_with_config(password, &PasswordConfig::minimal())
        .unwrap_or_else(|e| panic!("fixture hash for {username}: {e}"));
    Account {
        id: Uuid::new_v4(),
        username: username.to_string(),
        email: Some(format!("{username}@gestion.local")),
        password_hash,
        roles: roles.iter().map(|r| r.to_string()).collect(),
        is_active: true,
        failed_login_attempts: 0,
        is_locked: false,
        locked_until: None,
        last_login: None,
        created_at: DateTime::from_timestamp(TEST_EPOCH, 0).unwrap_or_default(),
    }
}

/// Default configuration with production-grade lifetimes and a quick lockout
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.auth.max_failed_attempts = 3;
    config
}

/// Application state plus handles to its fakes
pub struct TestApp {
    pub state: Arc<AppState>,
    pub store: Arc<InMemoryCredentialStore>,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let store = Arc::new(InMemoryCredentialStore::with_accounts([
            test_account(ADMIN_USERNAME, ADMIN_PASSWORD, &["admin"]),
            test_account(OPERATOR_USERNAME, OPERATOR_PASSWORD, &["inventario", "pedidos"]),
        ]));
        let clock = Arc::new(ManualClock::at_unix(TEST_EPOCH));
        let state = Arc::new(
            AppState::with_clock(config, store.clone(), clock.clone())
                .with_password_config(PasswordConfig::minimal()),
        );

        Self {
            state,
            store,
            clock,
        }
    }

    pub fn router(&self) -> Router {
        crate::create_router(self.state.clone())
    }

    pub fn now(&self) -> DateTime<Utc> {
        use gestion_core::Clock;
        self.clock.now()
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}
