//! Client-held session view
//!
//! Tokens are opaque here. Expiry instants come from the `Max-Age` attribute
//! of the `Set-Cookie` headers the server sends, measured from the moment the
//! response was observed.

use chrono::{DateTime, Duration, Utc};
use gestion_core::{TokenResponse, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};

/// One parsed `Set-Cookie` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub max_age: Option<i64>,
}

impl SetCookie {
    /// `Max-Age=0` or an empty value is the server clearing the cookie
    pub fn is_removal(&self) -> bool {
        self.value.is_empty() || self.max_age.is_some_and(|age| age <= 0)
    }
}

/// Parse `name=value; Attr=...` keeping only `Max-Age`
pub fn parse_set_cookie(header: &str) -> Option<SetCookie> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.trim().split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let max_age = parts.find_map(|attr| {
        let (key, val) = attr.trim().split_once('=')?;
        if key.trim().eq_ignore_ascii_case("max-age") {
            val.trim().parse::<i64>().ok()
        } else {
            None
        }
    });

    Some(SetCookie {
        name: name.to_string(),
        value: value.trim().to_string(),
        max_age,
    })
}

/// Browsers cap cookie lifetimes at 400 days
const MAX_COOKIE_AGE_SECS: i64 = 400 * 24 * 3600;

fn lifetime(secs: i64) -> Duration {
    Duration::seconds(secs.clamp(0, MAX_COOKIE_AGE_SECS))
}

/// Tokens the client holds plus the instants they stop being usable
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub access_token: Option<String>,
    pub access_expires_at: Option<DateTime<Utc>>,
    pub refresh_token: Option<String>,
    pub refresh_expires_at: Option<DateTime<Utc>>,
}

impl SessionState {
    /// Apply the session cookies among `headers`; returns whether anything changed
    pub fn apply_set_cookies<S: AsRef<str>>(
        &mut self,
        headers: &[S],
        now: DateTime<Utc>,
    ) -> bool {
        let mut changed = false;
        for cookie in headers.iter().filter_map(|h| parse_set_cookie(h.as_ref())) {
            let (token, expires_at) = match cookie.name.as_str() {
                ACCESS_TOKEN_COOKIE => (&mut self.access_token, &mut self.access_expires_at),
                REFRESH_TOKEN_COOKIE => (&mut self.refresh_token, &mut self.refresh_expires_at),
                _ => continue,
            };

            if cookie.is_removal() {
                *token = None;
                *expires_at = None;
            } else {
                *expires_at = cookie.max_age.map(|age| now + lifetime(age));
                *token = Some(cookie.value);
            }
            changed = true;
        }
        changed
    }

    /// Take tokens from a login or refresh body when no cookies came with it
    pub fn apply_token_response(&mut self, tokens: &TokenResponse, now: DateTime<Utc>) {
        self.access_token = Some(tokens.access_token.clone());
        self.access_expires_at = Some(now + lifetime(tokens.expires_in as i64));
        if let Some(refresh) = &tokens.refresh_token {
            self.refresh_token = Some(refresh.clone());
            self.refresh_expires_at = tokens
                .refresh_expires_in
                .map(|secs| now + lifetime(secs as i64));
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some() || self.refresh_token.is_some()
    }

    /// Access token missing, expired, or expiring within `lead`
    pub fn access_expires_within(&self, now: DateTime<Utc>, lead: Duration) -> bool {
        match (&self.access_token, self.access_expires_at) {
            (None, _) => true,
            (Some(_), Some(at)) => at - lead <= now,
            (Some(_), None) => false,
        }
    }

    /// A refresh is no longer possible
    pub fn refresh_expired(&self, now: DateTime<Utc>) -> bool {
        match (&self.refresh_token, self.refresh_expires_at) {
            (None, _) => true,
            (Some(_), Some(at)) => at <= now,
            (Some(_), None) => false,
        }
    }
}
