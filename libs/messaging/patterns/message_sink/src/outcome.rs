//! Result of one forwarding attempt, as seen by the relay loop.

use crate::SinkError;
use std::fmt;

/// What happened to a message handed to [`crate::MessageSink::send`].
///
/// Only `Delivered` allows the source delivery to be acknowledged; every
/// other variant sends it back to the source queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// The destination accepted the message
    Delivered,
    /// The destination was reachable but refused to route this message
    Unroutable(String),
    /// Transport failure that survived the single reinitialize-and-resend
    ConnectivityFailure(String),
    /// Anything else
    UnknownFailure(String),
}

impl ForwardOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, ForwardOutcome::Delivered)
    }

    /// Short tag for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardOutcome::Delivered => "delivered",
            ForwardOutcome::Unroutable(_) => "unroutable",
            ForwardOutcome::ConnectivityFailure(_) => "connectivity_failure",
            ForwardOutcome::UnknownFailure(_) => "unknown_failure",
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            ForwardOutcome::Delivered => None,
            ForwardOutcome::Unroutable(reason)
            | ForwardOutcome::ConnectivityFailure(reason)
            | ForwardOutcome::UnknownFailure(reason) => Some(reason),
        }
    }

    /// Classify a failed attempt
    pub fn from_error(error: SinkError) -> Self {
        match error {
            SinkError::Unroutable(reason) => ForwardOutcome::Unroutable(reason),
            e if e.is_connection_error() => ForwardOutcome::ConnectivityFailure(e.to_string()),
            e => ForwardOutcome::UnknownFailure(e.to_string()),
        }
    }
}

impl From<SinkError> for ForwardOutcome {
    fn from(error: SinkError) -> Self {
        ForwardOutcome::from_error(error)
    }
}

impl fmt::Display for ForwardOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.detail() {
            Some(detail) => write!(f, "{}: {}", self.kind(), detail),
            None => f.write_str(self.kind()),
        }
    }
}
