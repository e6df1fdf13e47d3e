//! # Relay Configuration
//!
//! Two ways in:
//!
//! - a TOML file, layered with `environments/<env>.toml` and `RELAY__*`
//!   environment variables ([`RelayConfig::from_file`])
//! - a flat `.env` key-value file in the format the upload pipeline's other
//!   tools already use ([`RelayConfig::from_env_file`])
//!
//! ```toml
//! [relay]
//! name = "report-relay"
//!
//! [source]
//! host = "rabbit.internal"
//! username = "relay"
//! # password from RELAY__SOURCE__PASSWORD
//!
//! [topology]
//! exchange = "upload_exchange"
//! queue = "upload_queue"
//!
//! [destination]
//! target = "managed_bus"
//! connection_string = "Endpoint=sb://..."
//! queue_name = "reports"
//!
//! [reconnect]
//! retry_delay_ms = 100
//! max_retry_delay_secs = 30
//! ```

use crate::relay::RelaySettings;
use crate::topology::TopologyDescriptor;
use crate::{RelayError, RelayResult};
use message_sink::{
    BackendConfig, BrokerSettings, CloudQueueConfig, LocalBrokerConfig, ManagedBusConfig,
    ReconnectConfigToml, ReconnectPolicy, Secret, DEFAULT_ORIGIN,
};
use relay_config::{load_layered, EnvFile};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Prefix for environment overrides, e.g. `RELAY__SOURCE__HOST`
pub const ENV_PREFIX: &str = "RELAY";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub relay: RelaySection,

    #[serde(default)]
    pub source: BrokerSettings,

    #[serde(default)]
    pub topology: TopologyDescriptor,

    /// Where forwarded messages go
    pub destination: BackendConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfigToml,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RelaySection {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_name")]
    pub consumer_tag: String,

    /// Declare the source topology at startup
    #[serde(default = "default_provision")]
    pub provision: bool,
}

fn default_name() -> String {
    "report-relay".to_string()
}

fn default_provision() -> bool {
    true
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            name: default_name(),
            consumer_tag: default_name(),
            provision: true,
        }
    }
}

impl RelayConfig {
    /// Load from a TOML file plus overlays, then validate
    pub fn from_file(path: impl AsRef<Path>, environment: Option<&str>) -> RelayResult<Self> {
        let path = path.as_ref();
        let config: Self = load_layered(path, environment, ENV_PREFIX)
            .map_err(|e| RelayError::Config(format!("{:#}", e)))?;
        config.validate()?;
        info!(path = ?path, relay = %config.relay.name, target = config.destination.kind(), "Configuration loaded");
        Ok(config)
    }

    /// Load from a `KEY="value"` file, then validate
    pub fn from_env_file(path: impl AsRef<Path>) -> RelayResult<Self> {
        let env = EnvFile::load(path.as_ref()).map_err(|e| RelayError::Config(format!("{:#}", e)))?;
        Self::from_key_values(&env)
    }

    /// Build from flat key-value pairs.
    ///
    /// | key | default |
    /// |-----|---------|
    /// | `rabbitmq_host` | `localhost` |
    /// | `rabbitmq_user` / `rabbitmq_password` | `guest` |
    /// | `rabbitmq_vhost` | `/` |
    /// | `queue_name` | `upload_queue` |
    /// | `rabbitmq_exchange_name` | `upload_exchange` |
    /// | `target_service` | required: `aws`, `azure` or `rabbitmq` |
    /// | `use_queue` | `true` |
    ///
    /// Destination keys: `aws_access_key_id`, `aws_secret_access_key`,
    /// `aws_region`, `aws_queue_url`, `aws_topic_arn`, `aws_endpoint_url`;
    /// `azure_service_bus_connection_str`, `azure_queue_name`,
    /// `azure_topic_name`; `target_rabbitmq_host`, `target_rabbitmq_user`,
    /// `target_rabbitmq_password`, `target_rabbitmq_vhost`,
    /// `target_rabbitmq_exchange`, `target_rabbitmq_queue`,
    /// `target_rabbitmq_routing_key`.
    pub fn from_key_values(env: &EnvFile) -> RelayResult<Self> {
        let source = BrokerSettings::new(env.get_or("rabbitmq_host", "localhost"))
            .with_credentials(
                env.get_or("rabbitmq_user", "guest"),
                env.get_or("rabbitmq_password", "guest"),
            )
            .with_vhost(env.get_or("rabbitmq_vhost", "/"));

        let topology = TopologyDescriptor::new(
            env.get_or("rabbitmq_exchange_name", "upload_exchange"),
            env.get_or("queue_name", "upload_queue"),
        );

        let use_queue = env.get_bool("use_queue", true);
        let target = env.get_or("target_service", "").to_ascii_lowercase();
        let destination = match target.as_str() {
            "aws" => BackendConfig::CloudQueue(CloudQueueConfig {
                access_key_id: env.get_or("aws_access_key_id", ""),
                secret_access_key: Secret::from(env.get_or("aws_secret_access_key", "")),
                region: env.get_or("aws_region", ""),
                queue_url: optional(env, "aws_queue_url"),
                topic_arn: optional(env, "aws_topic_arn"),
                endpoint_url: optional(env, "aws_endpoint_url"),
                use_queue,
                origin: DEFAULT_ORIGIN.to_string(),
            }),
            "azure" => BackendConfig::ManagedBus(ManagedBusConfig {
                connection_string: Secret::from(env.get_or("azure_service_bus_connection_str", "")),
                queue_name: optional(env, "azure_queue_name"),
                topic_name: optional(env, "azure_topic_name"),
                use_queue,
            }),
            "rabbitmq" => BackendConfig::LocalBroker(LocalBrokerConfig {
                broker: BrokerSettings::new(env.get_or("target_rabbitmq_host", "localhost"))
                    .with_credentials(
                        env.get_or("target_rabbitmq_user", "guest"),
                        env.get_or("target_rabbitmq_password", "guest"),
                    )
                    .with_vhost(env.get_or("target_rabbitmq_vhost", "/")),
                exchange: env.get_or("target_rabbitmq_exchange", ""),
                routing_key: optional(env, "target_rabbitmq_routing_key"),
                queue: optional(env, "target_rabbitmq_queue"),
                use_queue,
            }),
            "" => return Err(RelayError::Config("target_service is required".to_string())),
            other => {
                return Err(RelayError::Config(format!(
                    "unknown target_service '{}', expected aws, azure or rabbitmq",
                    other
                )))
            }
        };

        let config = Self {
            relay: RelaySection::default(),
            source,
            topology,
            destination,
            reconnect: ReconnectConfigToml::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RelayResult<()> {
        if self.relay.consumer_tag.trim().is_empty() {
            return Err(RelayError::Config("relay.consumer_tag must not be empty".to_string()));
        }
        self.source
            .validate()
            .map_err(|e| RelayError::Config(format!("source: {}", e)))?;
        self.topology.validate()?;
        self.destination
            .validate()
            .map_err(|e| RelayError::Config(format!("destination: {}", e)))?;
        Ok(())
    }

    pub fn settings(&self) -> RelaySettings {
        RelaySettings::new(self.topology.queue.clone()).with_consumer_tag(self.relay.consumer_tag.clone())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        self.reconnect.to_policy()
    }
}

fn optional(env: &EnvFile, key: &str) -> Option<String> {
    env.get(key).filter(|v| !v.is_empty()).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    const MANAGED_BUS_TOML: &str = r#"
[source]
host = "rabbit.internal"
username = "relay"
password = "hunter2"

[destination]
target = "managed_bus"
connection_string = "Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=send;SharedAccessKey=abc"
queue_name = "reports"

[reconnect]
retry_delay_ms = 250
"#;

    #[test]
    fn test_toml_defaults() {
        let config: RelayConfig = toml::from_str(MANAGED_BUS_TOML).unwrap();
        config.validate().unwrap();

        assert_eq!(config.relay.name, "report-relay");
        assert!(config.relay.provision);
        assert_eq!(config.source.port, 5672);
        assert_eq!(config.source.vhost, "/");
        assert_eq!(config.topology, TopologyDescriptor::default());
        assert_eq!(config.destination.kind(), "managed_bus");
        assert_eq!(config.reconnect_policy().retry_delay, Duration::from_millis(250));
        assert_eq!(config.settings().queue, "upload_queue");

        // Secrets stay out of Debug output
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("SharedAccessKey=abc"));
    }

    #[test]
    fn test_from_file_with_environment_overlay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        fs::write(&path, MANAGED_BUS_TOML).unwrap();
        fs::create_dir(dir.path().join("environments")).unwrap();
        fs::write(
            dir.path().join("environments").join("staging.toml"),
            "[topology]\nqueue = \"staging_upload_queue\"\n",
        )
        .unwrap();

        let config = RelayConfig::from_file(&path, Some("staging")).unwrap();
        assert_eq!(config.topology.queue, "staging_upload_queue");
        assert_eq!(config.topology.exchange, "upload_exchange");
    }

    #[test]
    fn test_from_file_rejects_incomplete_destination() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        fs::write(
            &path,
            "[destination]\ntarget = \"azure\"\nconnection_string = \"Endpoint=sb://x/\"\n",
        )
        .unwrap();

        let err = RelayConfig::from_file(&path, None).unwrap_err();
        assert!(err.to_string().contains("queue_name"));
    }

    #[test]
    fn test_key_values_for_cloud_topic() {
        let env: EnvFile = [
            ("rabbitmq_host", "rabbit"),
            ("rabbitmq_password", "pw"),
            ("queue_name", "uploads"),
            ("target_service", "AWS"),
            ("use_queue", "false"),
            ("aws_access_key_id", "AKIA123"),
            ("aws_secret_access_key", "secret"),
            ("aws_region", "eu-west-1"),
            ("aws_topic_arn", "arn:aws:sns:eu-west-1:1:reports"),
        ]
        .into_iter()
        .collect();

        let config = RelayConfig::from_key_values(&env).unwrap();
        assert_eq!(config.source.host, "rabbit");
        assert_eq!(config.source.username, "guest");
        assert_eq!(config.source.password.expose(), "pw");
        assert_eq!(config.topology.queue, "uploads");
        assert_eq!(config.topology.exchange, "upload_exchange");
        match config.destination {
            BackendConfig::CloudQueue(cloud) => {
                assert!(!cloud.use_queue);
                assert_eq!(cloud.topic_arn.as_deref(), Some("arn:aws:sns:eu-west-1:1:reports"));
                assert_eq!(cloud.origin, DEFAULT_ORIGIN);
            }
            other => panic!("unexpected destination {other:?}"),
        }
    }

    #[test]
    fn test_key_values_for_local_broker() {
        let env: EnvFile = [
            ("target_service", "rabbitmq"),
            ("target_rabbitmq_host", "downstream"),
            ("target_rabbitmq_queue", "forwarded"),
        ]
        .into_iter()
        .collect();

        let config = RelayConfig::from_key_values(&env).unwrap();
        match config.destination {
            BackendConfig::LocalBroker(local) => {
                assert_eq!(local.broker.host, "downstream");
                assert_eq!(local.queue.as_deref(), Some("forwarded"));
                assert!(local.use_queue);
            }
            other => panic!("unexpected destination {other:?}"),
        }
    }

    #[test]
    fn test_key_values_need_a_known_target() {
        let missing: EnvFile = [("rabbitmq_host", "rabbit")].into_iter().collect();
        assert!(matches!(
            RelayConfig::from_key_values(&missing),
            Err(RelayError::Config(msg)) if msg.contains("target_service")
        ));

        let unknown: EnvFile = [("target_service", "kafka")].into_iter().collect();
        assert!(RelayConfig::from_key_values(&unknown)
            .unwrap_err()
            .to_string()
            .contains("kafka"));

        // Selected but incomplete
        let azure: EnvFile = [("target_service", "azure")].into_iter().collect();
        assert!(RelayConfig::from_key_values(&azure).is_err());
    }

    #[test]
    fn test_from_env_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(
            &path,
            r#"
rabbitmq_host="rabbit"
target_service="azure"
use_queue="True"
azure_service_bus_connection_str="Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=send;SharedAccessKey=abc="
azure_queue_name="reports"
"#,
        )
        .unwrap();

        let config = RelayConfig::from_env_file(&path).unwrap();
        assert!(config.destination.use_queue());
        assert_eq!(config.destination.kind(), "managed_bus");
    }
}
