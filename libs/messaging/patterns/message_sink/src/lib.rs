pub mod amqp;
pub mod config;
pub mod connection;
pub mod error;
pub mod factory;
pub mod message;
pub mod metadata;
pub mod outcome;
pub mod sinks;
pub mod test_utils;

use async_trait::async_trait;
use std::fmt::Debug;
use tracing::warn;

pub use amqp::{AmqpSession, DeclareOptions, DeliveryStream, ExchangeKind, PublishOptions, PublishStatus};
#[cfg(feature = "amqp")]
pub use amqp::{LapinConnector, LapinDeliveries, LapinSession};
pub use config::{
    BackendConfig, BrokerSettings, CloudQueueConfig, LocalBrokerConfig, ManagedBusConfig, Secret,
    DEFAULT_ORIGIN,
};
pub use connection::{ConnectionManager, Connector, ReconnectConfigToml, ReconnectPolicy, Session};
pub use error::{SendContext, SinkError};
pub use factory::SinkFactory;
pub use message::{DeliveryTag, Message, MessageMetadata};
pub use metadata::{ConnectionState, SinkMetadata};
pub use outcome::ForwardOutcome;
pub use sinks::{AmqpSink, BusSender, CloudQueueApi, CloudQueueSink, ServiceBusSink};

/// A destination for relayed messages that hides how it is reached
#[async_trait]
pub trait MessageSink: Send + Debug {
    /// Establish connection state and pre-create the sender for the
    /// configured destination. Calling it again is a full reconnect.
    async fn initialize(&mut self) -> Result<(), SinkError>;

    /// One transmission attempt, no retries
    async fn transmit(&mut self, message: &Message) -> Result<(), SinkError>;

    /// Forward a message and classify the result.
    ///
    /// A transport failure gets exactly one reinitialize-and-resend before
    /// it is reported as [`ForwardOutcome::ConnectivityFailure`].
    async fn send(&mut self, message: &Message) -> ForwardOutcome {
        match self.transmit(message).await {
            Ok(()) => ForwardOutcome::Delivered,
            Err(e) if e.is_connection_error() => {
                warn!(
                    destination = %self.destination(),
                    delivery_tag = %message.delivery_tag(),
                    error = %e,
                    "Transport failure, reinitializing sink once"
                );
                if let Err(init_error) = self.initialize().await {
                    return ForwardOutcome::ConnectivityFailure(init_error.to_string());
                }
                match self.transmit(message).await {
                    Ok(()) => ForwardOutcome::Delivered,
                    Err(retry_error) => ForwardOutcome::from_error(retry_error),
                }
            }
            Err(e) => ForwardOutcome::from_error(e),
        }
    }

    /// Release sender, session and connection in that order. Failures are
    /// logged, never returned.
    async fn close(&mut self);

    /// Check if currently connected
    fn is_connected(&self) -> bool;

    /// Destination description for logs, without credentials
    fn destination(&self) -> String;

    /// Get sink metadata for debugging/monitoring
    fn metadata(&self) -> SinkMetadata {
        SinkMetadata::default()
    }
}

#[async_trait]
impl<S: MessageSink + ?Sized> MessageSink for Box<S> {
    async fn initialize(&mut self) -> Result<(), SinkError> {
        (**self).initialize().await
    }

    async fn transmit(&mut self, message: &Message) -> Result<(), SinkError> {
        (**self).transmit(message).await
    }

    async fn send(&mut self, message: &Message) -> ForwardOutcome {
        (**self).send(message).await
    }

    async fn close(&mut self) {
        (**self).close().await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn destination(&self) -> String {
        (**self).destination()
    }

    fn metadata(&self) -> SinkMetadata {
        (**self).metadata()
    }
}
