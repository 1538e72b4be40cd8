//! Client error types

use gestion_core::{SessionError, LOGIN_PATH};
use thiserror::Error;

/// Errors surfaced by the session client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The server rejected the call with a session failure
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Tokens were cleared; the user has to log in again
    #[error("Session terminated, log in again at {redirect_to}")]
    SessionTerminated { redirect_to: String },

    #[error("Not logged in")]
    NotAuthenticated,

    #[error("Unexpected response {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),
}

impl ClientError {
    pub(crate) fn terminated() -> Self {
        Self::SessionTerminated {
            redirect_to: LOGIN_PATH.to_string(),
        }
    }

    /// Where the UI should navigate after this error, if anywhere
    pub fn redirect_to(&self) -> Option<&str> {
        match self {
            Self::SessionTerminated { redirect_to } => Some(redirect_to),
            Self::NotAuthenticated => Some(LOGIN_PATH),
            _ => None,
        }
    }
}
