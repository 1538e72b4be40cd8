//! Scripted transport for coordinator and watcher tests
//!
//! Each route is a closure receiving the request and how many calls that path
//! had seen before it, so scripts can answer differently per attempt.

use crate::transport::{ApiRequest, ApiResponse, Transport};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use gestion_core::{SessionError, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

/// Access cookie lifetime the server uses by default
pub const ACCESS_MAX_AGE: u64 = 1800;
/// Refresh cookie lifetime the server uses by default
pub const REFRESH_MAX_AGE: u64 = 1_296_000;

type Reply = BoxFuture<'static, Result<ApiResponse, SessionError>>;
type Handler = Arc<dyn Fn(ApiRequest, usize) -> Reply + Send + Sync>;

/// Transport answering from per-path scripts and recording every request
#[derive(Default)]
pub struct ScriptedTransport {
    routes: HashMap<String, Handler>,
    log: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route<F, Fut>(mut self, path: &str, handler: F) -> Self
    where
        F: Fn(ApiRequest, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ApiResponse, SessionError>> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |request: ApiRequest, seen: usize| handler(request, seen).boxed());
        self.routes.insert(path.to_string(), handler);
        self
    }

    /// Requests sent to `path` so far
    pub fn requests(&self, path: &str) -> Vec<ApiRequest> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    pub fn calls(&self, path: &str) -> usize {
        self.requests(path).len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, SessionError> {
        let (handler, seen) = {
            let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
            let seen = log.iter().filter(|r| r.path == request.path).count();
            log.push(request.clone());
            (self.routes.get(&request.path).cloned(), seen)
        };

        match handler {
            Some(handler) => handler(request.clone(), seen).await,
            None => Ok(ApiResponse::new(404)),
        }
    }
}

/// 200 carrying session cookies and the JSON token body
pub fn token_response(access: &str, refresh: Option<&str>) -> ApiResponse {
    let mut response = ApiResponse::new(200).with_set_cookie(format!(
        "{ACCESS_TOKEN_COOKIE}={access}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ACCESS_MAX_AGE}"
    ));
    if let Some(refresh) = refresh {
        response = response.with_set_cookie(format!(
            "{REFRESH_TOKEN_COOKIE}={refresh}; Path=/; HttpOnly; SameSite=Lax; Max-Age={REFRESH_MAX_AGE}"
        ));
    }

    let body = serde_json::json!({
        "accessToken": access,
        "refreshToken": refresh,
        "tokenType": "Bearer",
        "expiresIn": ACCESS_MAX_AGE,
        "refreshExpiresIn": refresh.map(|_| REFRESH_MAX_AGE),
    });
    response.with_body(body.to_string())
}

/// 401 with the generic session body
pub fn unauthorized() -> ApiResponse {
    ApiResponse::new(401).with_body(
        serde_json::json!({
            "code": "SESSION_EXPIRED",
            "message": gestion_core::SESSION_EXPIRED_MESSAGE,
        })
        .to_string(),
    )
}

/// 200 with a JSON body
pub fn ok_json(body: serde_json::Value) -> ApiResponse {
    ApiResponse::new(200).with_body(body.to_string())
}
