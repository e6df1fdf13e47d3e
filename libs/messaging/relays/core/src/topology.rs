//! # Topology Provisioner
//!
//! Makes sure the source exchange, queue and bindings exist before the first
//! message is consumed. Safe to run on every start:
//!
//! 1. passive-declare the exchange; on NOT_FOUND reopen the channel (the
//!    broker closed it) and declare it for real
//! 2. same for the queue
//! 3. bind the queue for every routing key; bindings are idempotent
//!
//! Only a failing active declaration (permissions, inequivalent arguments)
//! is fatal.

use crate::{RelayError, RelayResult};
use message_sink::{AmqpSession, DeclareOptions, ExchangeKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Exchange, queue and bindings the relay consumes from
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TopologyDescriptor {
    #[serde(default = "default_exchange")]
    pub exchange: String,

    #[serde(default)]
    pub exchange_kind: ExchangeKind,

    #[serde(default = "default_queue")]
    pub queue: String,

    #[serde(default = "default_true")]
    pub durable: bool,

    #[serde(default)]
    pub auto_delete: bool,

    #[serde(default = "default_routing_keys")]
    pub routing_keys: Vec<String>,
}

fn default_exchange() -> String {
    "upload_exchange".to_string()
}

fn default_queue() -> String {
    "upload_queue".to_string()
}

fn default_true() -> bool {
    true
}

fn default_routing_keys() -> Vec<String> {
    [
        "metadata.verify",
        "upload.started",
        "upload.status",
        "upload.completed",
        "upload.routed",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for TopologyDescriptor {
    fn default() -> Self {
        Self {
            exchange: default_exchange(),
            exchange_kind: ExchangeKind::default(),
            queue: default_queue(),
            durable: true,
            auto_delete: false,
            routing_keys: default_routing_keys(),
        }
    }
}

impl TopologyDescriptor {
    pub fn new(exchange: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            ..Default::default()
        }
    }

    pub fn with_routing_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routing_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> RelayResult<()> {
        if self.exchange.trim().is_empty() {
            return Err(RelayError::Config("topology.exchange must not be empty".to_string()));
        }
        if self.queue.trim().is_empty() {
            return Err(RelayError::Config("topology.queue must not be empty".to_string()));
        }
        if self.routing_keys.is_empty() {
            return Err(RelayError::Config(
                "topology.routing_keys needs at least one key".to_string(),
            ));
        }
        Ok(())
    }
}

/// What a provisioning run changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TopologyReport {
    pub exchange_created: bool,
    pub queue_created: bool,
    pub bindings: usize,
}

pub struct TopologyProvisioner;

impl TopologyProvisioner {
    /// Ensure `descriptor` exists on the broker behind `session`
    #[instrument(skip_all, fields(exchange = %descriptor.exchange, queue = %descriptor.queue))]
    pub async fn ensure<S: AmqpSession>(
        session: &mut S,
        descriptor: &TopologyDescriptor,
    ) -> RelayResult<TopologyReport> {
        let exchange_created = Self::ensure_exchange(session, descriptor).await?;
        let queue_created = Self::ensure_queue(session, descriptor).await?;

        for key in &descriptor.routing_keys {
            session
                .bind_queue(&descriptor.queue, &descriptor.exchange, key)
                .await
                .map_err(|e| RelayError::provisioning(format!("binding '{}'", key), e))?;
            debug!(routing_key = %key, "Queue bound");
        }

        let report = TopologyReport {
            exchange_created,
            queue_created,
            bindings: descriptor.routing_keys.len(),
        };
        info!(
            exchange_created = report.exchange_created,
            queue_created = report.queue_created,
            bindings = report.bindings,
            "Topology ensured"
        );
        Ok(report)
    }

    async fn ensure_exchange<S: AmqpSession>(
        session: &mut S,
        descriptor: &TopologyDescriptor,
    ) -> RelayResult<bool> {
        let name = &descriptor.exchange;
        let kind = descriptor.exchange_kind;

        match session.declare_exchange(name, kind, DeclareOptions::passive()).await {
            Ok(()) => {
                debug!(exchange = %name, "Exchange exists");
                Ok(false)
            }
            Err(e) if e.is_not_found() => {
                session
                    .reopen_channel()
                    .await
                    .map_err(|e| RelayError::provisioning(name.as_str(), e))?;
                let options = DeclareOptions::active(descriptor.durable, descriptor.auto_delete);
                session
                    .declare_exchange(name, kind, options)
                    .await
                    .map_err(|e| RelayError::provisioning(name.as_str(), e))?;
                info!(exchange = %name, kind = kind.as_str(), "Exchange created");
                Ok(true)
            }
            Err(e) => Err(RelayError::provisioning(name.as_str(), e)),
        }
    }

    async fn ensure_queue<S: AmqpSession>(
        session: &mut S,
        descriptor: &TopologyDescriptor,
    ) -> RelayResult<bool> {
        let name = &descriptor.queue;

        match session.declare_queue(name, DeclareOptions::passive()).await {
            Ok(()) => {
                debug!(queue = %name, "Queue exists");
                Ok(false)
            }
            Err(e) if e.is_not_found() => {
                session
                    .reopen_channel()
                    .await
                    .map_err(|e| RelayError::provisioning(name.as_str(), e))?;
                let options = DeclareOptions::active(descriptor.durable, descriptor.auto_delete);
                session
                    .declare_queue(name, options)
                    .await
                    .map_err(|e| RelayError::provisioning(name.as_str(), e))?;
                info!(queue = %name, durable = descriptor.durable, "Queue created");
                Ok(true)
            }
            Err(e) => Err(RelayError::provisioning(name.as_str(), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use message_sink::test_utils::{BrokerEvent, InMemoryBroker};
    use message_sink::{Connector, Session};

    #[test]
    fn test_default_descriptor() {
        let descriptor = TopologyDescriptor::default();
        assert_eq!(descriptor.exchange, "upload_exchange");
        assert_eq!(descriptor.queue, "upload_queue");
        assert_eq!(descriptor.exchange_kind, ExchangeKind::Direct);
        assert!(descriptor.durable);
        assert!(!descriptor.auto_delete);
        assert_eq!(descriptor.routing_keys.len(), 5);
        assert!(descriptor.validate().is_ok());

        let empty = TopologyDescriptor::default().with_routing_keys(Vec::<String>::new());
        assert!(matches!(empty.validate(), Err(RelayError::Config(_))));
    }

    #[tokio::test]
    async fn test_creates_missing_topology() {
        let broker = InMemoryBroker::new();
        let mut session = broker.connector().connect().await.unwrap();
        let first_channel = session.channel_id();

        let report = TopologyProvisioner::ensure(&mut session, &TopologyDescriptor::default())
            .await
            .unwrap();

        assert!(report.exchange_created);
        assert!(report.queue_created);
        assert_eq!(report.bindings, 5);
        assert_eq!(broker.exchange_kind("upload_exchange"), Some(ExchangeKind::Direct));
        assert!(broker.is_durable_queue("upload_queue"));
        assert!(broker
            .bindings()
            .contains(&("upload_queue".into(), "upload_exchange".into(), "upload.completed".into())));

        // Each failed passive declaration cost a channel
        assert_ne!(session.channel_id(), first_channel);
        assert!(session.is_open());
        let closed = broker
            .events()
            .iter()
            .filter(|e| matches!(e, BrokerEvent::ChannelClosed { reason, .. } if reason == "NOT_FOUND"))
            .count();
        assert_eq!(closed, 2);
    }

    #[tokio::test]
    async fn test_existing_objects_are_left_alone() {
        let broker = InMemoryBroker::new();
        broker.declare_exchange("upload_exchange", ExchangeKind::Direct);
        broker.declare_queue("upload_queue");
        let mut session = broker.connector().connect().await.unwrap();
        let channel = session.channel_id();

        let report = TopologyProvisioner::ensure(&mut session, &TopologyDescriptor::default())
            .await
            .unwrap();

        assert!(!report.exchange_created);
        assert!(!report.queue_created);
        assert_eq!(session.channel_id(), channel);
        assert!(!broker
            .events()
            .iter()
            .any(|e| matches!(e, BrokerEvent::ExchangeDeclared { passive: false, .. })));
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let broker = InMemoryBroker::new();
        let descriptor = TopologyDescriptor::default();
        let mut session = broker.connector().connect().await.unwrap();

        TopologyProvisioner::ensure(&mut session, &descriptor).await.unwrap();
        let after_first = broker.bindings();

        let second = TopologyProvisioner::ensure(&mut session, &descriptor).await.unwrap();
        assert!(!second.exchange_created);
        assert!(!second.queue_created);
        assert_eq!(broker.bindings(), after_first);
        assert!(broker.has_exchange("upload_exchange"));
        assert!(broker.has_queue("upload_queue"));
    }

    #[tokio::test]
    async fn test_refused_declaration_is_fatal() {
        let broker = InMemoryBroker::new();
        broker.deny_active_declares(true);
        let mut session = broker.connector().connect().await.unwrap();

        let err = TopologyProvisioner::ensure(&mut session, &TopologyDescriptor::default())
            .await
            .unwrap_err();

        match err {
            RelayError::Provisioning { object, source } => {
                assert_eq!(object, "upload_exchange");
                assert!(source.to_string().contains("ACCESS_REFUSED"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!broker.has_exchange("upload_exchange"));
        assert!(broker.bindings().is_empty());
    }

    #[tokio::test]
    async fn test_refusal_is_tolerated_when_objects_exist() {
        let broker = InMemoryBroker::new();
        broker.declare_exchange("upload_exchange", ExchangeKind::Direct);
        broker.declare_queue("upload_queue");
        broker.deny_active_declares(true);
        let mut session = broker.connector().connect().await.unwrap();

        let report = TopologyProvisioner::ensure(&mut session, &TopologyDescriptor::default())
            .await
            .unwrap();
        assert_eq!(report.bindings, 5);
    }
}
