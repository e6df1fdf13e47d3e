//! Local-broker sink: republishes onto another AMQP broker.
//!
//! Publishes are persistent and mandatory with publisher confirms enabled, so
//! a message no queue is bound for comes back as [`SinkError::Unroutable`]
//! instead of being dropped by the broker. A missing destination exchange is
//! unroutable too; the broker closes the channel for it, so the sink is
//! marked degraded and the next send reconnects.

use crate::amqp::{AmqpSession, PublishOptions, PublishStatus};
use crate::config::LocalBrokerConfig;
use crate::connection::{ConnectionManager, Connector};
use crate::{Message, MessageSink, SendContext, SinkError, SinkMetadata};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Where published messages go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmqpDestination {
    /// Default exchange, keyed by queue name
    Queue(String),
    /// Named exchange; `None` keeps the routing key the message arrived with
    Exchange {
        name: String,
        routing_key: Option<String>,
    },
}

impl AmqpDestination {
    pub fn from_config(config: &LocalBrokerConfig) -> Result<Self, SinkError> {
        if config.use_queue {
            let queue = config
                .queue
                .clone()
                .filter(|q| !q.is_empty())
                .ok_or_else(|| SinkError::invalid_config("queue is required in queue mode"))?;
            Ok(AmqpDestination::Queue(queue))
        } else {
            if config.exchange.is_empty() {
                return Err(SinkError::invalid_config("exchange is required in topic mode"));
            }
            Ok(AmqpDestination::Exchange {
                name: config.exchange.clone(),
                routing_key: config.routing_key.clone(),
            })
        }
    }

    fn target<'a>(&'a self, message: &'a Message) -> (&'a str, &'a str) {
        match self {
            AmqpDestination::Queue(queue) => ("", queue.as_str()),
            AmqpDestination::Exchange { name, routing_key } => (
                name.as_str(),
                routing_key
                    .as_deref()
                    .or_else(|| message.routing_key())
                    .unwrap_or_default(),
            ),
        }
    }
}

pub struct AmqpSink<C: Connector> {
    manager: ConnectionManager<C>,
    destination: AmqpDestination,
    options: PublishOptions,
    metadata: SinkMetadata,
}

impl<C: Connector> std::fmt::Debug for AmqpSink<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpSink")
            .field("manager", &self.manager)
            .field("destination", &self.destination)
            .finish()
    }
}

impl<C> AmqpSink<C>
where
    C: Connector,
    C::Session: AmqpSession,
{
    pub fn new(name: impl Into<String>, connector: C, destination: AmqpDestination) -> Self {
        let metadata = SinkMetadata::new(name, "local_broker").with_endpoint(connector.endpoint());
        Self {
            manager: ConnectionManager::new(connector),
            destination,
            options: PublishOptions::default(),
            metadata,
        }
    }

    pub fn from_config(name: impl Into<String>, connector: C, config: &LocalBrokerConfig) -> Result<Self, SinkError> {
        Ok(Self::new(name, connector, AmqpDestination::from_config(config)?))
    }

    pub fn connection(&self) -> &ConnectionManager<C> {
        &self.manager
    }
}

#[async_trait]
impl<C> MessageSink for AmqpSink<C>
where
    C: Connector,
    C::Session: AmqpSession,
{
    async fn initialize(&mut self) -> Result<(), SinkError> {
        self.manager.initialize().await.map(|_| ())
    }

    #[instrument(level = "debug", skip(self, message), fields(delivery_tag = %message.delivery_tag()))]
    async fn transmit(&mut self, message: &Message) -> Result<(), SinkError> {
        if !self.manager.is_live() {
            return Err(SinkError::Closed);
        }
        let (exchange, routing_key) = self.destination.target(message);
        let session = self.manager.session_mut().ok_or(SinkError::Closed)?;

        let result = match session.publish(exchange, routing_key, &message.payload, self.options).await {
            Ok(PublishStatus::Confirmed) => Ok(()),
            Ok(PublishStatus::Returned(reason)) => Err(SinkError::unroutable(format!(
                "{} (exchange: '{}', routing key: '{}')",
                reason, exchange, routing_key
            ))),
            Ok(PublishStatus::Nacked) => Err(SinkError::send_failed_with_context(
                "broker nacked publish",
                SendContext::new(message.size())
                    .with_delivery_tag(message.delivery_tag())
                    .with_destination(self.metadata.endpoint.clone().unwrap_or_default()),
            )),
            Err(SinkError::NotFound(reason)) => Err(SinkError::unroutable(format!(
                "{} (exchange: '{}', routing key: '{}')",
                reason, exchange, routing_key
            ))),
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => {
                self.metadata.record_success();
                debug!(exchange, routing_key, "Published");
            }
            Err(e) => {
                if e.is_connection_error() || !self.manager.is_live() {
                    self.manager.mark_degraded(e);
                }
                self.metadata.record_failure(Some(e.to_string()));
            }
        }
        result
    }

    async fn close(&mut self) {
        self.manager.close().await;
    }

    fn is_connected(&self) -> bool {
        self.manager.is_live()
    }

    fn destination(&self) -> String {
        match &self.destination {
            AmqpDestination::Queue(queue) => format!("{} queue '{}'", self.manager.endpoint(), queue),
            AmqpDestination::Exchange { name, .. } => {
                format!("{} exchange '{}'", self.manager.endpoint(), name)
            }
        }
    }

    fn metadata(&self) -> SinkMetadata {
        let mut metadata = self.metadata.clone().with_state(self.manager.state());
        metadata.reconnects = self.manager.reconnects();
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{InMemoryBroker, InMemoryConnector};
    use crate::{ExchangeKind, ForwardOutcome, MessageMetadata};

    fn queue_sink(broker: &InMemoryBroker, queue: &str) -> AmqpSink<InMemoryConnector> {
        AmqpSink::new("downstream", broker.connector(), AmqpDestination::Queue(queue.to_string()))
    }

    #[tokio::test]
    async fn test_queue_mode_publishes_to_default_exchange() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("forwarded");
        let mut sink = queue_sink(&broker, "forwarded");
        sink.initialize().await.unwrap();

        let outcome = sink.send(&Message::new(br#"{"id":1}"#.to_vec())).await;
        assert_eq!(outcome, ForwardOutcome::Delivered);
        assert_eq!(broker.queue_payloads("forwarded"), vec![br#"{"id":1}"#.to_vec()]);
        assert_eq!(sink.metadata().messages_sent, 1);
    }

    #[tokio::test]
    async fn test_topic_mode_uses_message_routing_key() {
        let broker = InMemoryBroker::new();
        broker.declare_exchange("reports", ExchangeKind::Direct);
        broker.declare_queue("status");
        broker.bind("status", "reports", "upload.status");

        let destination = AmqpDestination::Exchange {
            name: "reports".to_string(),
            routing_key: None,
        };
        let mut sink = AmqpSink::new("downstream", broker.connector(), destination);
        sink.initialize().await.unwrap();

        let message = Message::with_metadata(
            b"status".to_vec(),
            MessageMetadata::new().with_routing_key("upload.status"),
        );
        assert_eq!(sink.send(&message).await, ForwardOutcome::Delivered);
        assert_eq!(broker.queue_depth("status"), 1);
    }

    #[tokio::test]
    async fn test_unroutable_publish() {
        let broker = InMemoryBroker::new();
        let mut sink = queue_sink(&broker, "missing");
        sink.initialize().await.unwrap();

        let outcome = sink.send(&Message::new(b"lost".to_vec())).await;
        assert!(matches!(outcome, ForwardOutcome::Unroutable(ref r) if r.contains("NO_ROUTE")));
        // Unroutable is not a transport failure: no reconnect
        assert_eq!(broker.connection_count(), 1);
        assert!(sink.is_connected());
    }

    #[tokio::test]
    async fn test_missing_exchange_is_unroutable() {
        let broker = InMemoryBroker::new();
        let destination = AmqpDestination::Exchange {
            name: "absent".to_string(),
            routing_key: Some("upload.status".to_string()),
        };
        let mut sink = AmqpSink::new("downstream", broker.connector(), destination);
        sink.initialize().await.unwrap();

        let outcome = sink.send(&Message::new(b"early".to_vec())).await;
        assert!(matches!(outcome, ForwardOutcome::Unroutable(ref r) if r.contains("absent")));
        // The broker closed the channel; no reconnect yet, but the sink knows
        assert_eq!(broker.connection_count(), 1);
        assert_eq!(sink.metadata().state, crate::ConnectionState::Degraded);
        assert!(!sink.is_connected());

        broker.declare_exchange("absent", ExchangeKind::Direct);
        broker.declare_queue("status");
        broker.bind("status", "absent", "upload.status");
        assert_eq!(sink.send(&Message::new(b"later".to_vec())).await, ForwardOutcome::Delivered);
        assert_eq!(sink.metadata().reconnects, 1);
        assert_eq!(broker.queue_payloads("status"), vec![b"later".to_vec()]);
    }

    #[tokio::test]
    async fn test_nacked_publish_is_unknown_failure() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("forwarded");
        broker.nack_next_publishes(1);
        let mut sink = queue_sink(&broker, "forwarded");
        sink.initialize().await.unwrap();

        let outcome = sink.send(&Message::new(b"x".to_vec())).await;
        assert_eq!(outcome.kind(), "unknown_failure");
        assert_eq!(sink.metadata().messages_failed, 1);
    }

    #[tokio::test]
    async fn test_reconnects_once_after_connection_loss() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("forwarded");
        let mut sink = queue_sink(&broker, "forwarded");
        sink.initialize().await.unwrap();

        broker.drop_connections();
        let outcome = sink.send(&Message::new(b"after-reset".to_vec())).await;
        assert_eq!(outcome, ForwardOutcome::Delivered);
        assert_eq!(sink.metadata().reconnects, 1);
        assert_eq!(broker.connection_count(), 2);
    }

    #[test]
    fn test_destination_from_config() {
        let config: LocalBrokerConfig = toml::from_str(
            r#"
            exchange = "reports"
            use_queue = false
            [broker]
            host = "mq"
            "#,
        )
        .unwrap();
        assert_eq!(
            AmqpDestination::from_config(&config).unwrap(),
            AmqpDestination::Exchange {
                name: "reports".to_string(),
                routing_key: None
            }
        );

        let config = LocalBrokerConfig {
            use_queue: true,
            queue: None,
            ..config
        };
        assert!(AmqpDestination::from_config(&config).is_err());
    }
}
