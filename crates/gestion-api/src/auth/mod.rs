//! Authentication and session module
//!
//! - Token issuance and validation (separate access and refresh secrets)
//! - Credential hashing with Argon2
//! - Credential store seam with Postgres and in-memory backends
//! - Session service: login, refresh with rotation, logout, unlock
//! - Middleware for request authentication and role checks

pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod repository;
pub mod service;

pub use jwt::{AccountClaims, Claims, IssuedToken, JwtConfig, TokenError, TokenIssuer, TokenUse};
pub use middleware::{authenticate_request, require_role, require_session, AuthenticatedUser};
pub use models::{Account, RefreshTokenRecord, ADMIN_ROLE};
pub use password::{hash_password_with_config, verify_password, PasswordConfig, PasswordError};
pub use repository::{
    CredentialStore, InMemoryCredentialStore, PgCredentialStore, RepositoryError,
};
pub use service::{hash_token, AuthService, SessionTokens};
