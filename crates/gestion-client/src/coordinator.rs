//! Refresh coordinator
//!
//! Owns the client-held tokens and drives the session state machine:
//!
//! ```text
//! ActiveAccess --401--> AccessExpiredRefreshPending --ok--> Reauthenticated --> ActiveAccess
//!                                  |
//!                                  +--failed--> SessionTerminated
//! ```
//!
//! Concurrent 401s share a single refresh. Each caller remembers the credential
//! generation its request went out with. The first caller to find no exchange
//! in flight for that generation spawns one; later callers await the same
//! result, and callers arriving after it finished see the generation already
//! advanced and simply replay with the new token.
//!
//! The exchange runs on its own task. A caller that is dropped halfway through
//! only stops waiting, so a refresh token the server has already rotated is
//! never sent twice.
//!
//! Author: hephaex@gmail.com

use crate::error::ClientError;
use crate::retry::RetryPolicy;
use crate::session::SessionState;
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use gestion_core::{
    ClientConfig, Clock, LoginRequest, PrincipalInfo, SessionError, SystemClock, TokenResponse,
    LOGIN_PATH, REFRESH_TOKEN_COOKIE,
};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

pub const LOGIN_ENDPOINT: &str = "/api/auth/login";
pub const LOGOUT_ENDPOINT: &str = "/api/auth/logout";
pub const REFRESH_ENDPOINT: &str = "/api/auth/refresh-token";
pub const ME_ENDPOINT: &str = "/api/auth/me";

/// Client-side session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    ActiveAccess,
    AccessExpiredRefreshPending,
    Reauthenticated,
    SessionTerminated,
}

/// Notifications for the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    Refreshed,
    /// Tokens are gone; navigate to `redirect_to`
    SessionExpired { redirect_to: String },
    LoggedOut,
}

#[derive(Debug)]
struct Inner {
    session: SessionState,
    phase: SessionPhase,
    /// Bumped whenever the held credentials change
    generation: u64,
}

type RefreshOutcome = Shared<BoxFuture<'static, Result<(), ClientError>>>;

/// Exchange started for the credentials at `generation`
struct InFlight {
    generation: u64,
    outcome: RefreshOutcome,
}

/// Session client that refreshes transparently on 401
pub struct RefreshCoordinator {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    inner: Arc<RwLock<Inner>>,
    in_flight: Mutex<Option<InFlight>>,
    events: broadcast::Sender<SessionEvent>,
}

impl RefreshCoordinator {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            transport,
            retry,
            clock,
            inner: Arc::new(RwLock::new(Inner {
                session: SessionState::default(),
                phase: SessionPhase::SessionTerminated,
                generation: 0,
            })),
            in_flight: Mutex::new(None),
            events,
        }
    }

    /// HTTP client against `config.base_url` on the wall clock
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(&config.base_url)?;
        Ok(Self::new(
            Arc::new(transport),
            RetryPolicy::from_config(config),
            Arc::new(SystemClock),
        ))
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn phase(&self) -> SessionPhase {
        self.inner.read().await.phase
    }

    pub async fn generation(&self) -> u64 {
        self.inner.read().await.generation
    }

    /// Copy of the held tokens and their expiry instants
    pub async fn session(&self) -> SessionState {
        self.inner.read().await.session.clone()
    }

    // ========================================================================
    // Login / logout
    // ========================================================================

    pub async fn login(&self, usuario: &str, password: &str) -> Result<TokenResponse, ClientError> {
        let body = serde_json::to_value(LoginRequest {
            usuario: usuario.to_string(),
            password: password.to_string(),
        })
        .map_err(|e| ClientError::Decode(e.to_string()))?;

        let request = ApiRequest::post(LOGIN_ENDPOINT).with_json(body);
        let response = self.dispatch(&request).await?;
        if !response.is_success() {
            return Err(self.rejection(&response));
        }
        let tokens: TokenResponse = response.json()?;

        {
            let now = self.clock.now();
            let mut inner = self.inner.write().await;
            inner.session.clear();
            if !inner.session.apply_set_cookies(&response.set_cookies, now) {
                inner.session.apply_token_response(&tokens, now);
            }
            inner.phase = SessionPhase::ActiveAccess;
            inner.generation += 1;
        }

        info!(usuario, "Logged in");
        let _ = self.events.send(SessionEvent::LoggedIn);
        Ok(tokens)
    }

    /// Revoke the refresh token server-side and drop local tokens
    ///
    /// Local state is cleared even when the server cannot be reached.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let refresh_token = {
            let mut inner = self.inner.write().await;
            let token = inner.session.refresh_token.take();
            inner.session.clear();
            inner.phase = SessionPhase::SessionTerminated;
            inner.generation += 1;
            token
        };

        let mut request = ApiRequest::post(LOGOUT_ENDPOINT);
        if let Some(token) = refresh_token {
            request = request.with_cookie(REFRESH_TOKEN_COOKIE, token);
        }
        let result = self.dispatch(&request).await;

        let _ = self.events.send(SessionEvent::LoggedOut);
        match result {
            Ok(response) if response.is_success() => Ok(()),
            Ok(response) => Err(response.unexpected()),
            Err(err) => {
                warn!(error = %err, "Logout did not reach the server");
                Err(err)
            }
        }
    }

    // ========================================================================
    // Protected requests
    // ========================================================================

    /// Send a protected request, refreshing and replaying once on 401
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let (token, generation) = self.credentials().await?;
        let response = self.dispatch(&request.clone().with_bearer(token)).await?;
        if !response.is_unauthorized() {
            self.settle().await;
            return Ok(response);
        }

        debug!(path = %request.path, "Access token rejected, refreshing");
        self.refresh_from(generation).await?;

        let (token, _) = self.credentials().await?;
        let path = request.path.clone();
        let replayed = self.dispatch(&request.with_bearer(token)).await?;
        if replayed.is_unauthorized() {
            warn!(%path, "Request rejected again after refresh");
            self.terminate().await;
            return Err(ClientError::terminated());
        }

        self.settle().await;
        Ok(replayed)
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse, ClientError> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<ApiResponse, ClientError> {
        self.send(ApiRequest::post(path).with_json(body)).await
    }

    /// The authenticated principal
    pub async fn me(&self) -> Result<PrincipalInfo, ClientError> {
        let response = self.get(ME_ENDPOINT).await?;
        if !response.is_success() {
            return Err(response.unexpected());
        }
        response.json()
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Refresh now unless another caller already did since we last looked
    pub async fn refresh(&self) -> Result<(), ClientError> {
        let generation = self.generation().await;
        self.refresh_from(generation).await
    }

    /// Refresh on behalf of a caller whose credentials were at `seen`
    pub(crate) async fn refresh_from(&self, seen: u64) -> Result<(), ClientError> {
        let outcome = {
            let mut in_flight = self.in_flight.lock().await;
            let mut inner = self.inner.write().await;
            if inner.phase == SessionPhase::SessionTerminated {
                return Err(ClientError::terminated());
            }
            if inner.generation != seen {
                debug!("Credentials already refreshed by another caller");
                return Ok(());
            }

            let joined = in_flight
                .as_ref()
                .filter(|current| current.generation == seen)
                .map(|current| current.outcome.clone());
            if let Some(outcome) = joined {
                debug!("Joining refresh already in flight");
                outcome
            } else {
                inner.phase = SessionPhase::AccessExpiredRefreshPending;
                let now = self.clock.now();
                let refresh_token = inner
                    .session
                    .refresh_token
                    .clone()
                    .filter(|_| !inner.session.refresh_expired(now));
                drop(inner);

                let outcome = self.spawn_refresh(seen, refresh_token);
                *in_flight = Some(InFlight {
                    generation: seen,
                    outcome: outcome.clone(),
                });
                outcome
            }
        };

        outcome.await
    }

    fn spawn_refresh(&self, generation: u64, refresh_token: Option<String>) -> RefreshOutcome {
        let job = RefreshJob {
            transport: self.transport.clone(),
            retry: self.retry,
            clock: self.clock.clone(),
            inner: self.inner.clone(),
            events: self.events.clone(),
            generation,
        };
        let task = tokio::spawn(job.run(refresh_token));

        async move {
            task.await.unwrap_or_else(|e| {
                warn!(error = %e, "Refresh task did not complete");
                Err(ClientError::terminated())
            })
        }
        .boxed()
        .shared()
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Clear tokens and tell subscribers to go back to the login page
    pub async fn terminate(&self) {
        end_session(&self.inner, &self.events, None).await;
    }

    async fn credentials(&self) -> Result<(String, u64), ClientError> {
        let inner = self.inner.read().await;
        match (&inner.session.access_token, inner.phase) {
            (_, SessionPhase::SessionTerminated) | (None, _) => Err(ClientError::NotAuthenticated),
            (Some(token), _) => Ok((token.clone(), inner.generation)),
        }
    }

    /// A replay went through after a refresh
    async fn settle(&self) {
        let mut inner = self.inner.write().await;
        if inner.phase == SessionPhase::Reauthenticated {
            inner.phase = SessionPhase::ActiveAccess;
        }
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let transport = &self.transport;
        self.retry
            .run(move || transport.send(request))
            .await
            .map_err(ClientError::from)
    }

    /// Map a rejected login into the session taxonomy
    fn rejection(&self, response: &ApiResponse) -> ClientError {
        match response.status {
            401 => ClientError::Session(SessionError::CredentialMismatch),
            403 => ClientError::Session(locked_error(response, self.clock.now())),
            _ => response.unexpected(),
        }
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("retry", &self.retry)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

/// One refresh exchange, detached from the caller that started it
struct RefreshJob {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    inner: Arc<RwLock<Inner>>,
    events: broadcast::Sender<SessionEvent>,
    /// Credentials being replaced
    generation: u64,
}

impl RefreshJob {
    async fn run(self, refresh_token: Option<String>) -> Result<(), ClientError> {
        let outcome = match refresh_token {
            Some(token) => self.exchange(&token).await,
            None => Err(SessionError::ExpiredToken),
        };
        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "Refresh failed, terminating session");
                return Err(self.fail().await);
            }
        };

        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        if inner.generation != self.generation {
            // Logged out or back in while the exchange was running
            debug!("Session changed during refresh, discarding tokens");
            return match inner.phase {
                SessionPhase::SessionTerminated => Err(ClientError::terminated()),
                _ => Ok(()),
            };
        }

        let applied = inner.session.apply_set_cookies(&response.set_cookies, now)
            || match response.json::<TokenResponse>() {
                Ok(tokens) => {
                    inner.session.apply_token_response(&tokens, now);
                    true
                }
                Err(_) => false,
            };
        if !applied {
            drop(inner);
            warn!("Refresh response carried no tokens, terminating session");
            return Err(self.fail().await);
        }
        inner.phase = SessionPhase::Reauthenticated;
        inner.generation += 1;
        drop(inner);

        debug!("Access token refreshed");
        let _ = self.events.send(SessionEvent::Refreshed);
        Ok(())
    }

    /// Exchange the refresh token; 5xx counts as a network failure
    async fn exchange(&self, refresh_token: &str) -> Result<ApiResponse, SessionError> {
        let request =
            ApiRequest::post(REFRESH_ENDPOINT).with_cookie(REFRESH_TOKEN_COOKIE, refresh_token);
        let request = &request;
        let transport = &self.transport;

        let response = self
            .retry
            .run(move || async move {
                let response = transport.send(request).await?;
                if response.status >= 500 {
                    return Err(SessionError::NetworkFailure(format!(
                        "refresh answered {}",
                        response.status
                    )));
                }
                Ok(response)
            })
            .await?;

        match response.status {
            200..=299 => Ok(response),
            // The server does not say which check failed
            401 => Err(SessionError::RefreshRevoked),
            403 => Err(locked_error(&response, self.clock.now())),
            status => Err(SessionError::NetworkFailure(format!(
                "unexpected refresh status {status}"
            ))),
        }
    }

    async fn fail(&self) -> ClientError {
        end_session(&self.inner, &self.events, Some(self.generation)).await;
        ClientError::terminated()
    }
}

/// Clear tokens and emit `SessionExpired`
///
/// With `Some(generation)` a session that has moved on since is left alone.
async fn end_session(
    inner: &RwLock<Inner>,
    events: &broadcast::Sender<SessionEvent>,
    generation: Option<u64>,
) {
    {
        let mut inner = inner.write().await;
        if generation.is_some_and(|g| g != inner.generation) {
            return;
        }
        if inner.phase == SessionPhase::SessionTerminated && !inner.session.is_authenticated() {
            return;
        }
        inner.session.clear();
        inner.phase = SessionPhase::SessionTerminated;
        inner.generation += 1;
    }
    info!("Session terminated");
    let _ = events.send(SessionEvent::SessionExpired {
        redirect_to: LOGIN_PATH.to_string(),
    });
}

fn locked_error(response: &ApiResponse, now: DateTime<Utc>) -> SessionError {
    let until = response
        .error_body()
        .and_then(|body| body.details)
        .and_then(|details| DateTime::parse_from_rfc3339(&details).ok())
        .map(|at| at.with_timezone(&Utc))
        .unwrap_or(now);
    SessionError::AccountLocked { until }
}
