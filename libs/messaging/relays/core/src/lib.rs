//! # Report Relay Core
//!
//! Moves messages from one durable source queue to exactly one destination
//! sink. Startup provisions the source topology, then the relay consumes one
//! message at a time and only acknowledges it at the source once the
//! destination has accepted it.
//!
//! ```text
//! source queue ──(prefetch 1)──> Relay ──send──> MessageSink
//!        ^                         │
//!        └──── ack / nack(requeue) ┘
//! ```

pub mod config;
pub mod health;
pub mod relay;
pub mod topology;

pub use config::{RelayConfig, RelaySection};
pub use health::{check_sink, check_source, HealthReport, HealthStatus};
pub use relay::{Relay, RelaySettings, RelayStats, PREFETCH_COUNT};
pub use topology::{TopologyDescriptor, TopologyProvisioner, TopologyReport};

use message_sink::SinkError;

/// Relay-specific errors. Every variant is fatal; per-message failures never
/// surface here.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source connection error: {0}")]
    Connection(#[source] SinkError),

    #[error("Provisioning '{object}' failed: {source}")]
    Provisioning { object: String, source: SinkError },

    #[error("Backend error: {0}")]
    Backend(#[source] SinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    pub fn provisioning(object: impl Into<String>, source: SinkError) -> Self {
        RelayError::Provisioning {
            object: object.into(),
            source,
        }
    }
}

/// Result type for relay operations
pub type RelayResult<T> = std::result::Result<T, RelayError>;
