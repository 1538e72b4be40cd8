//! Session cookies
//!
//! Both tokens travel as `HttpOnly; SameSite=Lax` cookies scoped to `/`. The
//! `Max-Age` of each cookie is what clients use to derive expiry, so it is set
//! from configuration rather than from the token itself.

use axum::http::{
    header::{AUTHORIZATION, COOKIE, SET_COOKIE},
    HeaderMap, HeaderValue,
};
use gestion_core::{AuthConfig, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};

use crate::auth::SessionTokens;

/// Build a `Set-Cookie` value carrying a token
pub fn token_cookie(name: &str, token: &str, max_age: u64, secure: bool) -> Option<HeaderValue> {
    let mut cookie = format!("{name}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).ok()
}

/// Build a `Set-Cookie` value that removes a cookie
pub fn clear_cookie(name: &str, secure: bool) -> HeaderValue {
    let cookie = if secure {
        format!("{name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0; Secure")
    } else {
        format!("{name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
    };
    // Cookie names are compile-time constants, always valid header text
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// `Set-Cookie` headers for freshly issued tokens
///
/// The refresh cookie is only written when a refresh token was issued, so a
/// refresh without rotation leaves the client's refresh cookie untouched.
pub fn session_cookies(tokens: &SessionTokens, auth: &AuthConfig, secure: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Some(cookie) = token_cookie(
        ACCESS_TOKEN_COOKIE,
        &tokens.access.token,
        auth.access_cookie_max_age,
        secure,
    ) {
        headers.append(SET_COOKIE, cookie);
    }

    if let Some(refresh) = &tokens.refresh {
        if let Some(cookie) = token_cookie(
            REFRESH_TOKEN_COOKIE,
            &refresh.token,
            auth.refresh_cookie_max_age,
            secure,
        ) {
            headers.append(SET_COOKIE, cookie);
        }
    }

    headers
}

/// `Set-Cookie` headers that end the session on the client
pub fn cleared_session_cookies(secure: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.append(SET_COOKIE, clear_cookie(ACCESS_TOKEN_COOKIE, secure));
    headers.append(SET_COOKIE, clear_cookie(REFRESH_TOKEN_COOKIE, secure));
    headers
}

/// Read a cookie value from the request's `Cookie` headers
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Bearer token from the `Authorization` header
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Access token from the `Authorization` header, falling back to the cookie
pub fn access_token(headers: &HeaderMap) -> Option<String> {
    bearer_token(headers).or_else(|| read_cookie(headers, ACCESS_TOKEN_COOKIE))
}
