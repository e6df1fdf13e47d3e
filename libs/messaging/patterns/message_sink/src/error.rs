use crate::DeliveryTag;

/// Context information for send operations to aid in debugging
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendContext {
    /// Size of the message payload in bytes
    pub message_size: usize,
    /// Delivery tag of the source message, if known
    pub delivery_tag: Option<DeliveryTag>,
    /// Routing key the message arrived with
    pub routing_key: Option<String>,
    /// Destination the send was aimed at
    pub destination: Option<String>,
}

impl SendContext {
    pub fn new(message_size: usize) -> Self {
        Self {
            message_size,
            ..Default::default()
        }
    }

    pub fn with_delivery_tag(mut self, tag: DeliveryTag) -> Self {
        self.delivery_tag = Some(tag);
        self
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rejected by broker: {0}")]
    Rejected(String),

    #[error("Unroutable: {0}")]
    Unroutable(String),

    #[error("Send failed: {error} (size: {size}B, tag: {tag:?}, destination: {destination:?})",
            size = .context.message_size,
            tag = .context.delivery_tag,
            destination = .context.destination)]
    SendFailed { error: String, context: SendContext },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Sink closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl SinkError {
    /// Transport-level failures. These are the errors a sink answers with a
    /// single reinitialize-and-resend.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            SinkError::ConnectionFailed(_)
                | SinkError::ConnectionLost(_)
                | SinkError::Closed
                | SinkError::Io(_)
        )
    }

    /// A passive declaration reported the object as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, SinkError::NotFound(_))
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        SinkError::ConnectionFailed(msg.into())
    }

    pub fn connection_lost(msg: impl Into<String>) -> Self {
        SinkError::ConnectionLost(msg.into())
    }

    pub fn send_failed_with_context(msg: impl Into<String>, context: SendContext) -> Self {
        SinkError::SendFailed {
            error: msg.into(),
            context,
        }
    }

    pub fn send_failed(msg: impl Into<String>) -> Self {
        SinkError::SendFailed {
            error: msg.into(),
            context: SendContext::default(),
        }
    }

    pub fn unroutable(msg: impl Into<String>) -> Self {
        SinkError::Unroutable(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        SinkError::InvalidConfig(msg.into())
    }
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err.to_string())
    }
}
