use std::fmt;
use std::time::SystemTime;

/// Opaque per-channel token the source broker uses to identify a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DeliveryTag(pub u64);

impl DeliveryTag {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for DeliveryTag {
    fn from(tag: u64) -> Self {
        DeliveryTag(tag)
    }
}

/// A message received from the source queue.
///
/// The payload is forwarded byte-for-byte and never parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Raw message bytes, conventionally JSON
    pub payload: Vec<u8>,

    /// Routing and delivery metadata
    pub metadata: MessageMetadata,
}

impl Message {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            metadata: MessageMetadata::new(),
        }
    }

    pub fn with_metadata(payload: impl Into<Vec<u8>>, metadata: MessageMetadata) -> Self {
        Self {
            payload: payload.into(),
            metadata,
        }
    }

    /// Get message size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn delivery_tag(&self) -> DeliveryTag {
        self.metadata.delivery_tag
    }

    pub fn routing_key(&self) -> Option<&str> {
        self.metadata.routing_key.as_deref()
    }

    /// Payload as text, when it is valid UTF-8
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMetadata {
    /// Routing key the message was published with
    pub routing_key: Option<String>,

    /// Source-assigned delivery handle
    pub delivery_tag: DeliveryTag,

    /// Set by the broker when this is not the first delivery attempt
    pub redelivered: bool,

    /// Producer-assigned message id, if any
    pub message_id: Option<String>,

    /// When the relay received the delivery
    pub received_at: SystemTime,
}

impl Default for MessageMetadata {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageMetadata {
    pub fn new() -> Self {
        Self {
            routing_key: None,
            delivery_tag: DeliveryTag::default(),
            redelivered: false,
            message_id: None,
            received_at: SystemTime::now(),
        }
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    pub fn with_delivery_tag(mut self, tag: impl Into<DeliveryTag>) -> Self {
        self.delivery_tag = tag.into();
        self
    }

    pub fn with_redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }
}
