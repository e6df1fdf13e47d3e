/// Information about a sink for monitoring/debugging
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkMetadata {
    /// Human-readable sink name
    pub name: String,

    /// Sink type (local_broker, cloud_queue, managed_bus, ...)
    pub sink_type: String,

    /// Connection endpoint if applicable
    pub endpoint: Option<String>,

    /// Current connection state
    pub state: ConnectionState,

    /// Messages sent successfully
    pub messages_sent: u64,

    /// Transmission attempts that failed
    pub messages_failed: u64,

    /// Successful reinitializations after the first connect
    pub reconnects: u64,

    /// Last error if any
    pub last_error: Option<String>,
}

impl SinkMetadata {
    /// Create new metadata with name and type
    pub fn new(name: impl Into<String>, sink_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sink_type: sink_type.into(),
            ..Default::default()
        }
    }

    /// Set endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set connection state
    pub fn with_state(mut self, state: ConnectionState) -> Self {
        self.state = state;
        self
    }

    /// Record successful message send
    pub fn record_success(&mut self) {
        self.messages_sent += 1;
    }

    /// Record failed message send
    pub fn record_failure(&mut self, error: Option<String>) {
        self.messages_failed += 1;
        self.last_error = error;
    }
}

/// Lifecycle of a broker connection/channel pair.
///
/// ```text
/// Disconnected ──initialize──> Connected ──I/O failure──> Degraded
///      ^                           ^                          │
///      │                           └──────reinitialize────────┘
///      └──────────────── close (from any state) ──────────────
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    Degraded,
}

impl ConnectionState {
    /// Check if connection is active
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// State after a successful initialize
    pub fn on_initialized(self) -> Self {
        ConnectionState::Connected
    }

    /// State after a detected I/O failure. Only a connected link can degrade.
    pub fn on_failure(self) -> Self {
        match self {
            ConnectionState::Connected | ConnectionState::Degraded => ConnectionState::Degraded,
            ConnectionState::Disconnected => ConnectionState::Disconnected,
        }
    }

    /// State after an explicit close
    pub fn on_closed(self) -> Self {
        ConnectionState::Disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let state = ConnectionState::default();
        assert_eq!(state, ConnectionState::Disconnected);
        assert_eq!(state.on_failure(), ConnectionState::Disconnected);

        let state = state.on_initialized();
        assert!(state.is_active());

        let state = state.on_failure();
        assert_eq!(state, ConnectionState::Degraded);
        assert!(!state.is_active());

        let state = state.on_initialized();
        assert_eq!(state, ConnectionState::Connected);

        assert_eq!(ConnectionState::Degraded.on_closed(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Connected.on_closed(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_sink_metadata_builder() {
        let mut metadata = SinkMetadata::new("test-sink", "test-type")
            .with_endpoint("amqp://localhost:5672")
            .with_state(ConnectionState::Connected);

        assert_eq!(metadata.name, "test-sink");
        assert_eq!(metadata.sink_type, "test-type");
        assert_eq!(metadata.endpoint, Some("amqp://localhost:5672".to_string()));
        assert_eq!(metadata.state, ConnectionState::Connected);

        metadata.record_success();
        assert_eq!(metadata.messages_sent, 1);

        metadata.record_failure(Some("Test error".to_string()));
        assert_eq!(metadata.messages_failed, 1);
        assert_eq!(metadata.last_error, Some("Test error".to_string()));
    }
}
