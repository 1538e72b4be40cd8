//! Session timeout watcher
//!
//! A fixed-period task comparing the clock with the cookie-derived expiry
//! instants. It refreshes ahead of access expiry and ends the session once
//! the refresh token is gone. There is no activity tracking.

use crate::coordinator::{RefreshCoordinator, SessionPhase};
use gestion_core::ClientConfig;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Longest accepted refresh lead (one day)
const MAX_LEAD_SECS: u64 = 86_400;

/// Result of one watcher tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Nothing due yet
    Idle,
    Refreshed,
    /// The session was ended on this tick
    Terminated,
    /// The session had already ended
    Stopped,
}

pub struct SessionWatcher {
    coordinator: Arc<RefreshCoordinator>,
    lead: chrono::Duration,
    period: Duration,
}

impl SessionWatcher {
    pub fn new(
        coordinator: Arc<RefreshCoordinator>,
        lead: chrono::Duration,
        period: Duration,
    ) -> Self {
        Self {
            coordinator,
            lead,
            period,
        }
    }

    pub fn from_config(coordinator: Arc<RefreshCoordinator>, config: &ClientConfig) -> Self {
        Self::new(
            coordinator,
            chrono::Duration::seconds(config.refresh_lead_secs.min(MAX_LEAD_SECS) as i64),
            Duration::from_secs(config.watch_interval_secs.max(1)),
        )
    }

    pub async fn tick(&self) -> WatchOutcome {
        let generation = self.coordinator.generation().await;
        if self.coordinator.phase().await == SessionPhase::SessionTerminated {
            return WatchOutcome::Stopped;
        }

        let session = self.coordinator.session().await;
        let now = self.coordinator.clock().now();

        if session.refresh_expired(now) {
            info!("Refresh token expired, ending session");
            self.coordinator.terminate().await;
            return WatchOutcome::Terminated;
        }

        if !session.access_expires_within(now, self.lead) {
            return WatchOutcome::Idle;
        }

        debug!(expires_at = ?session.access_expires_at, "Access token due, refreshing");
        match self.coordinator.refresh_from(generation).await {
            Ok(()) => WatchOutcome::Refreshed,
            Err(err) => {
                // refresh_from has already cleared the tokens
                warn!(error = %err, "Background refresh failed");
                WatchOutcome::Terminated
            }
        }
    }

    /// Run on a background task until the session ends or the handle shuts it down
    ///
    /// Dropping the handle also stops the task.
    pub fn spawn(self) -> WatcherHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if matches!(self.tick().await, WatchOutcome::Terminated | WatchOutcome::Stopped) {
                            break;
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("Session watcher stopped");
        });

        WatcherHandle { shutdown, task }
    }
}

/// Control handle for a spawned [`SessionWatcher`]
pub struct WatcherHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the watcher to stop on its own
    pub async fn join(self) -> Result<(), JoinError> {
        let Self { shutdown, task } = self;
        let result = task.await;
        drop(shutdown);
        result
    }

    pub async fn shutdown(self) -> Result<(), JoinError> {
        let _ = self.shutdown.send(true);
        self.task.await
    }
}
