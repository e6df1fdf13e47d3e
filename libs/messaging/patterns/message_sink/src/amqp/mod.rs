//! AMQP 0-9-1 session abstraction
//!
//! The relay's source consumer, the topology provisioner and the local-broker
//! sink all talk to a broker through [`AmqpSession`]. The lapin-backed
//! implementation lives behind the `amqp` feature; tests use
//! [`crate::test_utils::InMemoryBroker`].

#[cfg(feature = "amqp")]
mod lapin_session;

#[cfg(feature = "amqp")]
pub use lapin_session::{LapinConnector, LapinDeliveries, LapinSession};

use crate::connection::Session;
use crate::{DeliveryTag, Message, SinkError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
}

impl ExchangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
        }
    }
}

/// Flags for exchange and queue declarations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeclareOptions {
    /// Existence check only; the broker closes the channel when the object is missing
    pub passive: bool,
    pub durable: bool,
    pub auto_delete: bool,
}

impl DeclareOptions {
    pub fn passive() -> Self {
        Self {
            passive: true,
            ..Default::default()
        }
    }

    pub fn active(durable: bool, auto_delete: bool) -> Self {
        Self {
            passive: false,
            durable,
            auto_delete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    /// Ask the broker to return the message instead of dropping it when no queue is bound
    pub mandatory: bool,
    /// Delivery mode 2
    pub persistent: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            mandatory: true,
            persistent: true,
        }
    }
}

/// Broker answer to a confirmed publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishStatus {
    Confirmed,
    /// A mandatory publish matched no queue; carries the broker's reply text
    Returned(String),
    Nacked,
}

/// One connection plus one channel on an AMQP broker
#[async_trait]
pub trait AmqpSession: Session {
    type Deliveries: DeliveryStream;

    async fn declare_exchange(
        &mut self,
        name: &str,
        kind: ExchangeKind,
        options: DeclareOptions,
    ) -> Result<(), SinkError>;

    async fn declare_queue(&mut self, name: &str, options: DeclareOptions) -> Result<(), SinkError>;

    async fn bind_queue(&mut self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), SinkError>;

    /// Limit unacknowledged deliveries on this channel
    async fn set_prefetch(&mut self, count: u16) -> Result<(), SinkError>;

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        options: PublishOptions,
    ) -> Result<PublishStatus, SinkError>;

    async fn consume(&mut self, queue: &str, consumer_tag: &str) -> Result<Self::Deliveries, SinkError>;

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), SinkError>;

    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), SinkError>;

    /// Replace the channel on the same connection, e.g. after a failed
    /// passive declaration closed it
    async fn reopen_channel(&mut self) -> Result<(), SinkError>;
}

/// Deliveries from a `basic.consume`
#[async_trait]
pub trait DeliveryStream: Send {
    /// `None` once the consumer is cancelled or its channel is gone
    async fn next_delivery(&mut self) -> Option<Result<Message, SinkError>>;
}
