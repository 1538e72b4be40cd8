//! Application state management
//!
//! Author: hephaex@gmail.com

use crate::auth::{AuthService, CredentialStore, JwtConfig, PasswordConfig, TokenIssuer};
use gestion_core::{AppConfig, Clock, SystemClock};
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Session service over the injected credential store
    pub auth: AuthService,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Build state around a credential store using the wall clock
    pub fn new(config: AppConfig, store: Arc<dyn CredentialStore>) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Build state with an explicit clock
    pub fn with_clock(
        config: AppConfig,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let issuer = TokenIssuer::new(JwtConfig::from(&config.auth), clock);
        let auth = AuthService::new(store, issuer, &config.auth);
        Self {
            config,
            auth,
            start_time: Instant::now(),
        }
    }

    /// Argon2 cost of the decoy checked when a login names no account
    pub fn with_password_config(mut self, password: PasswordConfig) -> Self {
        self.auth = self.auth.with_password_config(password);
        self
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        self.auth.store()
    }

    /// Whether cookies carry the `Secure` attribute
    pub fn secure_cookies(&self) -> bool {
        self.config.server.production
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
