//! Gestion Client - Session client for the gestion API
//!
//! - [`RefreshCoordinator`]: holds the tokens, refreshes once on 401 and replays
//! - [`SessionWatcher`]: refreshes ahead of expiry and ends dead sessions
//! - [`RetryPolicy`]: bounded retry for network failures
//! - [`Transport`]: HTTP seam, implemented over reqwest by [`HttpTransport`]
//!
//! Tokens are never decoded on this side; expiry comes from cookie `Max-Age`.
//!
//! Author: hephaex@gmail.com

pub mod coordinator;
pub mod error;
pub mod retry;
pub mod session;
pub mod transport;
pub mod watcher;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use coordinator::{RefreshCoordinator, SessionEvent, SessionPhase};
pub use error::ClientError;
pub use retry::RetryPolicy;
pub use session::{parse_set_cookie, SessionState, SetCookie};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
pub use watcher::{SessionWatcher, WatchOutcome, WatcherHandle};
