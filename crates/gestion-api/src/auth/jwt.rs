//! JWT token issuance and validation
//!
//! Access and refresh tokens are HS256-signed claim sets. Each token class has
//! its own secret, so a leaked access secret cannot mint refresh tokens and the
//! other way around. Expiry lives inside the token (`exp`) and is checked
//! against an injected [`Clock`] with zero leeway.

use chrono::{DateTime, Duration, Utc};
use gestion_core::{AuthConfig, Clock, SessionError};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Token class carried in the `token_use` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    Access,
    Refresh,
}

/// JWT claims shared by both token classes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Token issuer
    pub iss: String,
    /// Subject - account ID
    pub sub: String,
    /// JWT ID - unique per token
    pub jti: String,
    /// Issued at (Unix epoch seconds)
    pub iat: i64,
    /// Expiration (Unix epoch seconds)
    pub exp: i64,
    /// Role/permission summary
    pub roles: Vec<String>,
    /// Access or refresh
    pub token_use: TokenUse,
}

impl Claims {
    /// Account ID encoded in `sub`
    pub fn subject(&self) -> Result<Uuid, SessionError> {
        Uuid::parse_str(&self.sub).map_err(|_| SessionError::MalformedOrForgedToken)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }
}

/// Minimal claim input for issuing tokens. Never carries secrets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountClaims {
    pub subject: Uuid,
    pub roles: Vec<String>,
}

impl TryFrom<&Claims> for AccountClaims {
    type Error = SessionError;

    fn try_from(claims: &Claims) -> Result<Self, Self::Error> {
        Ok(Self {
            subject: claims.subject()?,
            roles: claims.roles.clone(),
        })
    }
}

/// A freshly signed token with the metadata the caller needs to persist or set cookies
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IssuedToken {
    /// Lifetime in whole seconds
    pub fn lifetime_secs(&self) -> u64 {
        (self.expires_at - self.issued_at).num_seconds().max(0) as u64
    }
}

/// Token issuance errors
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Failed to encode JWT: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("Token lifetime out of range")]
    LifetimeOutOfRange,
}

/// JWT configuration derived from [`AuthConfig`]
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Secret for access tokens
    pub access_secret: String,
    /// Access token lifetime
    pub access_ttl: Duration,
    /// Secret for refresh tokens
    pub refresh_secret: String,
    /// Refresh token lifetime
    pub refresh_ttl: Duration,
    /// Token issuer identifier
    pub issuer: String,
}

impl From<&AuthConfig> for JwtConfig {
    fn from(auth: &AuthConfig) -> Self {
        Self {
            access_secret: auth.jwt_secret.clone(),
            access_ttl: to_chrono(auth.access_token_ttl),
            refresh_secret: auth.jwt_refresh_secret.clone(),
            refresh_ttl: to_chrono(auth.refresh_token_ttl),
            issuer: auth.issuer.clone(),
        }
    }
}

fn to_chrono(ttl: std::time::Duration) -> Duration {
    Duration::from_std(ttl).unwrap_or_else(|_| Duration::weeks(52 * 100))
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self::from(&AuthConfig::default())
    }
}

impl JwtConfig {
    fn secret(&self, token_use: TokenUse) -> &str {
        match token_use {
            TokenUse::Access => &self.access_secret,
            TokenUse::Refresh => &self.refresh_secret,
        }
    }

    fn ttl(&self, token_use: TokenUse) -> Duration {
        match token_use {
            TokenUse::Access => self.access_ttl,
            TokenUse::Refresh => self.refresh_ttl,
        }
    }
}

/// Mints and validates both token classes
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    config: JwtConfig,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(config: JwtConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Sign a short-lived access token
    pub fn issue_access_token(&self, account: &AccountClaims) -> Result<IssuedToken, TokenError> {
        self.issue(account, TokenUse::Access)
    }

    /// Sign a long-lived refresh token
    pub fn issue_refresh_token(&self, account: &AccountClaims) -> Result<IssuedToken, TokenError> {
        self.issue(account, TokenUse::Refresh)
    }

    pub fn validate_access_token(&self, token: &str) -> Result<Claims, SessionError> {
        self.validate_as(token, TokenUse::Access)
    }

    pub fn validate_refresh_token(&self, token: &str) -> Result<Claims, SessionError> {
        self.validate_as(token, TokenUse::Refresh)
    }

    fn validate_as(&self, token: &str, token_use: TokenUse) -> Result<Claims, SessionError> {
        validate(
            token,
            self.config.secret(token_use),
            &self.config.issuer,
            token_use,
            self.clock.now(),
        )
    }

    fn issue(&self, account: &AccountClaims, token_use: TokenUse) -> Result<IssuedToken, TokenError> {
        let issued_at = self.clock.now();
        let expires_at = issued_at
            .checked_add_signed(self.config.ttl(token_use))
            .ok_or(TokenError::LifetimeOutOfRange)?;
        let jti = Uuid::new_v4().to_string();

        let claims = Claims {
            iss: self.config.issuer.clone(),
            sub: account.subject.to_string(),
            jti: jti.clone(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            roles: account.roles.clone(),
            token_use,
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.secret(token_use).as_bytes()),
        )?;

        Ok(IssuedToken {
            token,
            jti,
            issued_at,
            expires_at,
        })
    }
}

/// Verify a token's signature, issuer and class, then its expiry at `now`
///
/// Any structural or signature failure is `MalformedOrForgedToken`. Only a token
/// that verifies cleanly can be reported as `ExpiredToken`.
pub fn validate(
    token: &str,
    secret: &str,
    issuer: &str,
    expected_use: TokenUse,
    now: DateTime<Utc>,
) -> Result<Claims, SessionError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[issuer]);
    // Expiry is checked below against the injected clock
    validation.validate_exp = false;
    validation.leeway = 0;

    let claims = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => SessionError::ExpiredToken,
            _ => SessionError::MalformedOrForgedToken,
        })?
        .claims;

    if claims.token_use != expected_use {
        return Err(SessionError::MalformedOrForgedToken);
    }

    if now.timestamp() >= claims.exp {
        return Err(SessionError::ExpiredToken);
    }

    Ok(claims)
}
