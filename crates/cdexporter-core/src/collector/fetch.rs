//! One authenticated queue-status query per poll cycle.

use std::fmt;

use tracing::debug;

use crate::collector::session::Session;
use crate::collector::traits::ControlApi;

/// Error type for the queue query.
///
/// A non-success status may mean the session expired, but the upstream API
/// does not say so distinctly; callers treat every variant alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Non-success response status.
    Status { status: u16, body: String },
    /// Connect or read timed out.
    Timeout,
    /// The server could not be reached.
    Connect(String),
    /// Any other transport failure, including an unreadable body.
    Transport(String),
}

impl FetchError {
    /// True for failures that never reached an HTTP response.
    pub fn is_transport(&self) -> bool {
        !matches!(self, FetchError::Status { .. })
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Status { status, body } => {
                write!(f, "queue query returned status {}: {}", status, body)
            }
            FetchError::Timeout => write!(f, "queue query timed out"),
            FetchError::Connect(msg) => write!(f, "queue query connection failed: {}", msg),
            FetchError::Transport(msg) => write!(f, "queue query failed: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {}

/// Issues the per-cycle queue query.
pub struct QueueFetcher;

impl QueueFetcher {
    /// Fetches the raw queue-status body using the session's artifacts.
    ///
    /// Does not touch session state; invalidation is the caller's decision.
    pub fn fetch<A: ControlApi + ?Sized>(api: &A, session: &Session) -> Result<String, FetchError> {
        let body = api.query_queue(session)?;
        debug!(bytes = body.len(), "queue payload:\n[{}]", body);
        Ok(body)
    }
}
