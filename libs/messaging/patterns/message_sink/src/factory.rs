//! SinkFactory for creating a MessageSink from configuration
//!
//! This is the one place that looks at the `target` selector. Everything
//! downstream works against `Box<dyn MessageSink>`.

use crate::config::{BackendConfig, CloudQueueConfig, LocalBrokerConfig};
use crate::sinks::ServiceBusSink;
use crate::{MessageSink, SinkError};

/// Builds the configured destination sink
#[derive(Debug, Clone)]
pub struct SinkFactory {
    name: String,
}

impl Default for SinkFactory {
    fn default() -> Self {
        Self::new("relay")
    }
}

impl SinkFactory {
    /// `name` prefixes the sink names handed out
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Validate `config` and build the sink it selects. The sink is not
    /// initialized yet.
    pub fn build(&self, config: &BackendConfig) -> Result<Box<dyn MessageSink>, SinkError> {
        config.validate()?;
        let sink_name = format!("{}-{}", self.name, config.kind());

        let sink = match config {
            BackendConfig::LocalBroker(local) => local_broker_sink(sink_name, local)?,
            BackendConfig::CloudQueue(cloud) => cloud_queue_sink(sink_name, cloud)?,
            BackendConfig::ManagedBus(bus) => {
                Box::new(ServiceBusSink::from_config(sink_name, bus)?) as Box<dyn MessageSink>
            }
        };

        tracing::info!(
            target_kind = config.kind(),
            destination = %sink.destination(),
            "Created destination sink"
        );
        Ok(sink)
    }
}

#[cfg(feature = "amqp")]
fn local_broker_sink(name: String, config: &LocalBrokerConfig) -> Result<Box<dyn MessageSink>, SinkError> {
    use crate::{amqp::LapinConnector, sinks::AmqpSink};

    let connector = LapinConnector::new(config.broker.clone());
    Ok(Box::new(AmqpSink::from_config(name, connector, config)?))
}

#[cfg(not(feature = "amqp"))]
fn local_broker_sink(_name: String, _config: &LocalBrokerConfig) -> Result<Box<dyn MessageSink>, SinkError> {
    Err(missing_feature("local_broker", "amqp"))
}

#[cfg(feature = "aws")]
fn cloud_queue_sink(name: String, config: &CloudQueueConfig) -> Result<Box<dyn MessageSink>, SinkError> {
    use crate::sinks::{AwsConnector, CloudQueueSink};

    let connector = AwsConnector::new(config.clone());
    Ok(Box::new(CloudQueueSink::from_config(name, connector, config)?))
}

#[cfg(not(feature = "aws"))]
fn cloud_queue_sink(_name: String, _config: &CloudQueueConfig) -> Result<Box<dyn MessageSink>, SinkError> {
    Err(missing_feature("cloud_queue", "aws"))
}

#[cfg(any(not(feature = "amqp"), not(feature = "aws")))]
fn missing_feature(target: &str, feature: &str) -> SinkError {
    SinkError::invalid_config(format!(
        "target '{}' needs the `{}` feature, which this build does not include",
        target, feature
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ManagedBusConfig, Secret};

    #[test]
    fn test_build_managed_bus() {
        let config = BackendConfig::ManagedBus(ManagedBusConfig {
            connection_string: Secret::from(
                "Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=send;SharedAccessKey=abc",
            ),
            queue_name: Some("reports".to_string()),
            topic_name: None,
            use_queue: true,
        });

        let sink = SinkFactory::default().build(&config).unwrap();
        assert_eq!(sink.destination(), "reports (queue)");
        assert_eq!(sink.metadata().name, "relay-managed_bus");
        assert!(!sink.is_connected());
    }

    #[test]
    fn test_invalid_config_is_rejected_before_building() {
        let config = BackendConfig::ManagedBus(ManagedBusConfig {
            connection_string: Secret::default(),
            queue_name: Some("reports".to_string()),
            topic_name: None,
            use_queue: true,
        });
        let err = SinkFactory::default().build(&config).unwrap_err();
        assert!(matches!(err, SinkError::InvalidConfig(_)));
    }

    #[cfg(feature = "amqp")]
    #[test]
    fn test_build_local_broker() {
        let config: BackendConfig = toml::from_str(
            r#"
            target = "rabbitmq"
            queue = "forwarded"
            [broker]
            host = "downstream"
            password = "not-in-logs"
            "#,
        )
        .unwrap();

        let sink = SinkFactory::new("relay-a").build(&config).unwrap();
        assert_eq!(sink.destination(), "amqp://downstream:5672/%2F queue 'forwarded'");
        assert!(!sink.destination().contains("not-in-logs"));
        assert_eq!(sink.metadata().sink_type, "local_broker");
    }

    #[cfg(feature = "aws")]
    #[test]
    fn test_build_cloud_queue() {
        let config: BackendConfig = toml::from_str(
            r#"
            target = "aws"
            access_key_id = "AKIA"
            secret_access_key = "secret"
            region = "eu-west-1"
            topic_arn = "arn:aws:sns:eu-west-1:1:reports"
            use_queue = false
            "#,
        )
        .unwrap();

        let sink = SinkFactory::default().build(&config).unwrap();
        assert_eq!(sink.destination(), "topic arn:aws:sns:eu-west-1:1:reports");
        assert_eq!(sink.metadata().sink_type, "cloud_queue");
        assert_eq!(sink.metadata().endpoint.as_deref(), Some("aws://eu-west-1"));
    }

    #[cfg(not(feature = "aws"))]
    #[test]
    fn test_cloud_queue_needs_feature() {
        let config: BackendConfig = toml::from_str(
            r#"
            target = "aws"
            access_key_id = "AKIA"
            secret_access_key = "secret"
            region = "eu-west-1"
            queue_url = "https://sqs.eu-west-1.amazonaws.com/1/reports"
            "#,
        )
        .unwrap();

        let err = SinkFactory::default().build(&config).unwrap_err();
        assert!(err.to_string().contains("`aws` feature"));
    }
}
