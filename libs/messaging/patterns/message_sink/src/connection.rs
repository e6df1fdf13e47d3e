//! Connection lifecycle for sinks and the relay's source channel.
//!
//! A [`ConnectionManager`] exclusively owns one session (connection plus
//! channel or sender) produced by a [`Connector`]. It is never shared between
//! tasks, so replacing the session needs no lock: a reconnect drops the old
//! handles and installs new ones wholesale.

use crate::{ConnectionState, SinkError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Opens sessions against one endpoint
#[async_trait]
pub trait Connector: Send + Sync + Debug {
    type Session: Session;

    /// Establish a fresh session. Every call yields new handles.
    async fn connect(&self) -> Result<Self::Session, SinkError>;

    /// Endpoint description for logs, without credentials
    fn endpoint(&self) -> String;
}

/// Live handles produced by a [`Connector`]
#[async_trait]
pub trait Session: Send {
    /// Cheap local check: every handle exists and none is marked closed
    fn is_open(&self) -> bool;

    /// Release handles innermost first (sender, channel, connection).
    ///
    /// Every step is attempted even when an earlier one fails; the first
    /// failure is returned.
    async fn close(&mut self) -> Result<(), SinkError>;
}

/// Owns the session for a single sink or source consumer
pub struct ConnectionManager<C: Connector> {
    connector: C,
    session: Option<C::Session>,
    state: ConnectionState,
    connects: u64,
    reconnects: u64,
    last_error: Option<String>,
}

impl<C: Connector> Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.connector.endpoint())
            .field("state", &self.state)
            .field("reconnects", &self.reconnects)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            session: None,
            state: ConnectionState::Disconnected,
            connects: 0,
            reconnects: 0,
            last_error: None,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Successful initializations after the first one
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// No network round-trip: state is Connected and the session handles are open
    pub fn is_live(&self) -> bool {
        self.state.is_active() && self.session.as_ref().is_some_and(|s| s.is_open())
    }

    /// Full reconnect. The previous session, if any, is discarded and
    /// anything scoped to it (QoS, consumers, delivery tags) is gone.
    pub async fn initialize(&mut self) -> Result<&mut C::Session, SinkError> {
        if let Some(mut stale) = self.session.take() {
            if stale.is_open() {
                if let Err(e) = stale.close().await {
                    debug!(endpoint = %self.connector.endpoint(), error = %e, "Discarding stale session");
                }
            }
        }

        match self.connector.connect().await {
            Ok(session) => {
                if self.connects > 0 {
                    self.reconnects += 1;
                }
                self.connects += 1;
                self.state = self.state.on_initialized();
                info!(
                    endpoint = %self.connector.endpoint(),
                    reconnects = self.reconnects,
                    "Session established"
                );
                Ok(self.session.insert(session))
            }
            Err(e) => {
                self.state = self.state.on_failure();
                self.last_error = Some(e.to_string());
                warn!(endpoint = %self.connector.endpoint(), error = %e, "Session initialization failed");
                Err(e)
            }
        }
    }

    /// Return the live session, reinitializing when [`Self::is_live`] is false.
    ///
    /// No backoff happens here; callers looping on this apply a
    /// [`ReconnectPolicy`] themselves.
    pub async fn ensure_live(&mut self) -> Result<&mut C::Session, SinkError> {
        if self.is_live() {
            return self.session.as_mut().ok_or(SinkError::Closed);
        }
        self.initialize().await
    }

    /// Current session without liveness checks
    pub fn session_mut(&mut self) -> Option<&mut C::Session> {
        self.session.as_mut()
    }

    /// Record a detected I/O failure
    pub fn mark_degraded(&mut self, reason: impl Display) {
        let reason = reason.to_string();
        warn!(endpoint = %self.connector.endpoint(), reason = %reason, "Connection degraded");
        self.state = self.state.on_failure();
        self.last_error = Some(reason);
    }

    /// Release the session. Failures are logged, never returned.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!(endpoint = %self.connector.endpoint(), error = %e, "Error while closing session");
            }
        }
        self.state = self.state.on_closed();
        debug!(endpoint = %self.connector.endpoint(), "Session closed");
    }
}

/// Capped exponential backoff between reconnect attempts
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub retry_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,

    /// Maximum retry delay cap
    pub max_retry_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_retry_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// No waiting at all. Used by tests.
    pub fn immediate() -> Self {
        Self {
            retry_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_retry_delay: Duration::ZERO,
        }
    }

    /// Delay before the given 1-based attempt; attempt 0 waits nothing
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.retry_delay.as_secs_f64() * self.backoff_multiplier.max(1.0).powi(exponent);
        let cap = self.max_retry_delay.as_secs_f64();
        let secs = if secs.is_finite() { secs.min(cap) } else { cap };
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Reconnect policy in TOML form
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReconnectConfigToml {
    /// Initial retry delay in milliseconds
    pub retry_delay_ms: Option<u64>,

    /// Exponential backoff multiplier
    pub backoff_multiplier: Option<f64>,

    /// Maximum retry delay in seconds
    pub max_retry_delay_secs: Option<u64>,
}

impl Default for ReconnectConfigToml {
    fn default() -> Self {
        Self {
            retry_delay_ms: Some(100),
            backoff_multiplier: Some(2.0),
            max_retry_delay_secs: Some(30),
        }
    }
}

impl ReconnectConfigToml {
    pub fn to_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            retry_delay: Duration::from_millis(self.retry_delay_ms.unwrap_or(100)),
            backoff_multiplier: self.backoff_multiplier.unwrap_or(2.0),
            max_retry_delay: Duration::from_secs(self.max_retry_delay_secs.unwrap_or(30)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::InMemoryBroker;

    #[tokio::test]
    async fn test_manager_lifecycle() {
        let broker = InMemoryBroker::new();
        let mut manager = ConnectionManager::new(broker.connector());

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_live());

        manager.ensure_live().await.unwrap();
        assert!(manager.is_live());
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.reconnects(), 0);

        // Already live: no new connection
        manager.ensure_live().await.unwrap();
        assert_eq!(broker.connection_count(), 1);

        manager.close().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_live());
    }

    #[tokio::test]
    async fn test_reconnect_after_connection_loss() {
        let broker = InMemoryBroker::new();
        let mut manager = ConnectionManager::new(broker.connector());
        manager.initialize().await.unwrap();

        broker.drop_connections();
        assert!(!manager.is_live(), "liveness is a local check on handle state");

        manager.mark_degraded("socket closed");
        assert_eq!(manager.state(), ConnectionState::Degraded);
        assert_eq!(manager.last_error(), Some("socket closed"));

        manager.ensure_live().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.reconnects(), 1);
        assert_eq!(broker.connection_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_reinitialize_stays_degraded() {
        let broker = InMemoryBroker::new();
        let mut manager = ConnectionManager::new(broker.connector());
        manager.initialize().await.unwrap();
        manager.mark_degraded("heartbeat missed");

        broker.fail_next_connects(1);
        assert!(manager.ensure_live().await.is_err());
        assert_eq!(manager.state(), ConnectionState::Degraded);

        manager.ensure_live().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_backoff_is_capped_exponential() {
        let policy = ReconnectPolicy {
            retry_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_retry_delay: Duration::from_secs(1),
        };

        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_secs(1));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(1));
        assert_eq!(ReconnectPolicy::immediate().delay_for(7), Duration::ZERO);
    }

    #[test]
    fn test_reconnect_toml_conversion() {
        let toml = ReconnectConfigToml {
            retry_delay_ms: Some(250),
            backoff_multiplier: Some(1.5),
            max_retry_delay_secs: Some(60),
        };
        let policy = toml.to_policy();
        assert_eq!(policy.retry_delay, Duration::from_millis(250));
        assert_eq!(policy.backoff_multiplier, 1.5);
        assert_eq!(policy.max_retry_delay, Duration::from_secs(60));

        assert_eq!(ReconnectConfigToml::default().to_policy(), ReconnectPolicy::default());
    }
}
