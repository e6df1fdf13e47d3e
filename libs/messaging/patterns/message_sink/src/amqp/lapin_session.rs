use super::{AmqpSession, DeclareOptions, DeliveryStream, ExchangeKind, PublishOptions, PublishStatus};
use crate::config::BrokerSettings;
use crate::connection::{Connector, Session};
use crate::{DeliveryTag, Message, MessageMetadata, SinkError};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tracing::{debug, instrument, warn};

const REPLY_SUCCESS: u16 = 200;

/// Opens lapin connections to one broker
#[derive(Debug, Clone)]
pub struct LapinConnector {
    settings: BrokerSettings,
}

impl LapinConnector {
    pub fn new(settings: BrokerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }
}

#[async_trait]
impl Connector for LapinConnector {
    type Session = LapinSession;

    #[instrument(level = "debug", skip(self), fields(endpoint = %self.settings.endpoint()))]
    async fn connect(&self) -> Result<LapinSession, SinkError> {
        let uri = self.settings.uri()?;
        let connection = Connection::connect(&uri, ConnectionProperties::default())
            .await
            .map_err(|e| SinkError::connection_failed(format!("amqp connect: {}", e)))?;
        let channel = open_channel(&connection).await?;
        Ok(LapinSession {
            connection,
            channel,
        })
    }

    fn endpoint(&self) -> String {
        self.settings.endpoint()
    }
}

async fn open_channel(connection: &Connection) -> Result<Channel, SinkError> {
    let channel = connection
        .create_channel()
        .await
        .map_err(|e| classify("amqp channel", e))?;
    channel
        .confirm_select(ConfirmSelectOptions::default())
        .await
        .map_err(|e| classify("amqp confirm_select", e))?;
    Ok(channel)
}

/// Map a lapin error onto the sink taxonomy.
///
/// Soft channel errors keep the connection usable; anything at connection
/// level or below is a transport failure.
fn classify(operation: &str, error: lapin::Error) -> SinkError {
    match &error {
        lapin::Error::ProtocolError(amqp) => match amqp.kind() {
            AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND) => {
                SinkError::NotFound(format!("{}: {}", operation, error))
            }
            AMQPErrorKind::Soft(_) => SinkError::Rejected(format!("{}: {}", operation, error)),
            AMQPErrorKind::Hard(_) => SinkError::connection_lost(format!("{}: {}", operation, error)),
        },
        lapin::Error::IOError(_)
        | lapin::Error::InvalidChannelState(_)
        | lapin::Error::InvalidConnectionState(_) => {
            SinkError::connection_lost(format!("{}: {}", operation, error))
        }
        _ => SinkError::Other(format!("{}: {}", operation, error)),
    }
}

fn to_lapin_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
    }
}

pub struct LapinSession {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl Session for LapinSession {
    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        let mut first_error = None;

        if self.channel.status().connected() {
            if let Err(e) = self.channel.close(REPLY_SUCCESS, "relay shutdown").await {
                warn!(error = %e, "Failed to close channel");
                first_error.get_or_insert(classify("amqp channel close", e));
            }
        }
        if self.connection.status().connected() {
            if let Err(e) = self.connection.close(REPLY_SUCCESS, "relay shutdown").await {
                warn!(error = %e, "Failed to close connection");
                first_error.get_or_insert(classify("amqp connection close", e));
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AmqpSession for LapinSession {
    type Deliveries = LapinDeliveries;

    #[instrument(level = "debug", skip(self))]
    async fn declare_exchange(
        &mut self,
        name: &str,
        kind: ExchangeKind,
        options: DeclareOptions,
    ) -> Result<(), SinkError> {
        self.channel
            .exchange_declare(
                name,
                to_lapin_kind(kind),
                ExchangeDeclareOptions {
                    passive: options.passive,
                    durable: options.durable,
                    auto_delete: options.auto_delete,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| classify("exchange.declare", e))
    }

    #[instrument(level = "debug", skip(self))]
    async fn declare_queue(&mut self, name: &str, options: DeclareOptions) -> Result<(), SinkError> {
        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    passive: options.passive,
                    durable: options.durable,
                    auto_delete: options.auto_delete,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map(|_| ())
            .map_err(|e| classify("queue.declare", e))
    }

    #[instrument(level = "debug", skip(self))]
    async fn bind_queue(&mut self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), SinkError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| classify("queue.bind", e))
    }

    async fn set_prefetch(&mut self, count: u16) -> Result<(), SinkError> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(|e| classify("basic.qos", e))
    }

    #[instrument(level = "debug", skip(self, payload), fields(size = payload.len()))]
    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        options: PublishOptions,
    ) -> Result<PublishStatus, SinkError> {
        let mut properties = BasicProperties::default();
        if options.persistent {
            properties = properties.with_delivery_mode(2);
        }

        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    mandatory: options.mandatory,
                    ..Default::default()
                },
                payload,
                properties,
            )
            .await
            .map_err(|e| classify("basic.publish", e))?;

        match confirm.await.map_err(|e| classify("publisher confirm", e))? {
            Confirmation::Ack(None) | Confirmation::NotRequested => Ok(PublishStatus::Confirmed),
            Confirmation::Ack(Some(returned)) => Ok(PublishStatus::Returned(format!(
                "{} {}",
                returned.reply_code,
                returned.reply_text.as_str()
            ))),
            Confirmation::Nack(_) => Ok(PublishStatus::Nacked),
        }
    }

    async fn consume(&mut self, queue: &str, consumer_tag: &str) -> Result<LapinDeliveries, SinkError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| classify("basic.consume", e))?;
        debug!(queue, consumer_tag, "Consumer registered");
        Ok(LapinDeliveries { consumer })
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), SinkError> {
        self.channel
            .basic_ack(tag.value(), BasicAckOptions::default())
            .await
            .map_err(|e| classify("basic.ack", e))
    }

    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), SinkError> {
        self.channel
            .basic_nack(
                tag.value(),
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| classify("basic.nack", e))
    }

    async fn reopen_channel(&mut self) -> Result<(), SinkError> {
        self.channel = open_channel(&self.connection).await?;
        Ok(())
    }
}

/// Deliveries from a lapin consumer
pub struct LapinDeliveries {
    consumer: Consumer,
}

#[async_trait]
impl DeliveryStream for LapinDeliveries {
    async fn next_delivery(&mut self) -> Option<Result<Message, SinkError>> {
        let delivery = match self.consumer.next().await? {
            Ok(delivery) => delivery,
            Err(e) => return Some(Err(classify("consumer", e))),
        };

        let mut metadata = MessageMetadata::new()
            .with_delivery_tag(delivery.delivery_tag)
            .with_routing_key(delivery.routing_key.as_str())
            .with_redelivered(delivery.redelivered);
        if let Some(id) = delivery.properties.message_id() {
            metadata = metadata.with_message_id(id.as_str());
        }

        Some(Ok(Message::with_metadata(delivery.data, metadata)))
    }
}
