//! Cloud queue/topic sink (SQS queue by URL, SNS topic by ARN).
//!
//! The cloud APIs carry text bodies, so a payload that is not valid UTF-8
//! cannot be forwarded unmodified and is refused before any network call.

use crate::config::CloudQueueConfig;
use crate::connection::{ConnectionManager, Connector, Session};
use crate::{Message, MessageSink, SendContext, SinkError, SinkMetadata};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Send operations on a cloud queue/topic client
#[async_trait]
pub trait CloudQueueApi: Session {
    async fn send_to_queue(&mut self, queue_url: &str, body: &str, origin: &str) -> Result<(), SinkError>;

    async fn publish_to_topic(&mut self, topic_arn: &str, body: &str, origin: &str) -> Result<(), SinkError>;
}

/// Chosen once at construction from `use_queue`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudDestination {
    Queue(String),
    Topic(String),
}

impl CloudDestination {
    pub fn from_config(config: &CloudQueueConfig) -> Result<Self, SinkError> {
        let (value, field) = if config.use_queue {
            (config.queue_url.clone(), "queue_url")
        } else {
            (config.topic_arn.clone(), "topic_arn")
        };
        let value = value
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SinkError::invalid_config(format!("{} is required", field)))?;
        Ok(if config.use_queue {
            CloudDestination::Queue(value)
        } else {
            CloudDestination::Topic(value)
        })
    }
}

pub struct CloudQueueSink<C: Connector> {
    manager: ConnectionManager<C>,
    destination: CloudDestination,
    origin: String,
    metadata: SinkMetadata,
}

impl<C: Connector> std::fmt::Debug for CloudQueueSink<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudQueueSink")
            .field("manager", &self.manager)
            .field("destination", &self.destination)
            .field("origin", &self.origin)
            .finish()
    }
}

impl<C> CloudQueueSink<C>
where
    C: Connector,
    C::Session: CloudQueueApi,
{
    pub fn new(name: impl Into<String>, connector: C, destination: CloudDestination, origin: impl Into<String>) -> Self {
        let metadata = SinkMetadata::new(name, "cloud_queue").with_endpoint(connector.endpoint());
        Self {
            manager: ConnectionManager::new(connector),
            destination,
            origin: origin.into(),
            metadata,
        }
    }

    pub fn from_config(name: impl Into<String>, connector: C, config: &CloudQueueConfig) -> Result<Self, SinkError> {
        let destination = CloudDestination::from_config(config)?;
        Ok(Self::new(name, connector, destination, config.origin.clone()))
    }
}

#[async_trait]
impl<C> MessageSink for CloudQueueSink<C>
where
    C: Connector,
    C::Session: CloudQueueApi,
{
    async fn initialize(&mut self) -> Result<(), SinkError> {
        self.manager.initialize().await.map(|_| ())
    }

    #[instrument(level = "debug", skip(self, message), fields(delivery_tag = %message.delivery_tag()))]
    async fn transmit(&mut self, message: &Message) -> Result<(), SinkError> {
        let body = message.payload_str().ok_or_else(|| {
            SinkError::send_failed_with_context(
                "payload is not valid UTF-8",
                SendContext::new(message.size())
                    .with_delivery_tag(message.delivery_tag())
                    .with_destination(self.destination()),
            )
        })?;
        if !self.manager.is_live() {
            return Err(SinkError::Closed);
        }
        let session = self.manager.session_mut().ok_or(SinkError::Closed)?;

        let result = match &self.destination {
            CloudDestination::Queue(url) => session.send_to_queue(url, body, &self.origin).await,
            CloudDestination::Topic(arn) => session.publish_to_topic(arn, body, &self.origin).await,
        };

        match &result {
            Ok(()) => {
                self.metadata.record_success();
                debug!(size = message.size(), "Forwarded to cloud destination");
            }
            Err(e) => {
                if e.is_connection_error() {
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
            CloudDestination::Queue(url) => format!("queue {}", url),
            CloudDestination::Topic(arn) => format!("topic {}", arn),
        }
    }

    fn metadata(&self) -> SinkMetadata {
        let mut metadata = self.metadata.clone().with_state(self.manager.state());
        metadata.reconnects = self.manager.reconnects();
        metadata
    }
}

#[cfg(feature = "aws")]
mod aws {
    use super::{CloudDestination, CloudQueueApi};
    use crate::config::CloudQueueConfig;
    use crate::connection::{Connector, Session};
    use crate::SinkError;
    use async_trait::async_trait;
    use aws_config::{BehaviorVersion, Region};
    use aws_sdk_sqs::config::Credentials;
    use aws_sdk_sqs::error::{DisplayErrorContext, SdkError};
    use aws_sdk_sqs::types::QueueAttributeName;
    use tracing::{debug, instrument};

    const CREDENTIALS_PROVIDER: &str = "report-relay";

    /// Builds SQS and SNS clients from static credentials and checks the
    /// configured queue or topic answers before handing them out
    #[derive(Debug, Clone)]
    pub struct AwsConnector {
        config: CloudQueueConfig,
    }

    impl AwsConnector {
        pub fn new(config: CloudQueueConfig) -> Self {
            Self { config }
        }
    }

    #[async_trait]
    impl Connector for AwsConnector {
        type Session = AwsSession;

        #[instrument(level = "debug", skip(self), fields(region = %self.config.region))]
        async fn connect(&self) -> Result<AwsSession, SinkError> {
            let destination = CloudDestination::from_config(&self.config)?;
            let credentials = Credentials::new(
                self.config.access_key_id.clone(),
                self.config.secret_access_key.expose().to_string(),
                None,
                None,
                CREDENTIALS_PROVIDER,
            );
            let mut loader = aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(self.config.region.clone()))
                .credentials_provider(credentials);
            if let Some(endpoint) = &self.config.endpoint_url {
                loader = loader.endpoint_url(endpoint.as_str());
            }
            let sdk_config = loader.load().await;

            let session = AwsSession {
                sqs: aws_sdk_sqs::Client::new(&sdk_config),
                sns: aws_sdk_sns::Client::new(&sdk_config),
                open: true,
            };
            session.check_reachable(&destination).await?;
            Ok(session)
        }

        fn endpoint(&self) -> String {
            match &self.config.endpoint_url {
                Some(endpoint) => endpoint.clone(),
                None => format!("aws://{}", self.config.region),
            }
        }
    }

    pub struct AwsSession {
        sqs: aws_sdk_sqs::Client,
        sns: aws_sdk_sns::Client,
        open: bool,
    }

    impl AwsSession {
        /// One metadata read on the destination; any failure means unreachable
        async fn check_reachable(&self, destination: &CloudDestination) -> Result<(), SinkError> {
            match destination {
                CloudDestination::Queue(url) => self
                    .sqs
                    .get_queue_attributes()
                    .queue_url(url)
                    .attribute_names(QueueAttributeName::QueueArn)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| unreachable("sqs get_queue_attributes", e))?,
                CloudDestination::Topic(arn) => self
                    .sns
                    .get_topic_attributes()
                    .topic_arn(arn)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| unreachable("sns get_topic_attributes", e))?,
            }
            debug!(destination = ?destination, "Cloud destination reachable");
            Ok(())
        }
    }

    fn unreachable<E, R>(operation: &str, error: SdkError<E, R>) -> SinkError
    where
        E: std::error::Error + 'static,
        R: std::fmt::Debug,
    {
        SinkError::connection_failed(format!("{}: {}", operation, DisplayErrorContext(&error)))
    }

    fn classify<E, R>(operation: &str, error: SdkError<E, R>) -> SinkError
    where
        E: std::error::Error + 'static,
        R: std::fmt::Debug,
    {
        let detail = format!("{}: {}", operation, DisplayErrorContext(&error));
        match error {
            SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => SinkError::connection_lost(detail),
            _ => SinkError::send_failed(detail),
        }
    }

    #[async_trait]
    impl Session for AwsSession {
        fn is_open(&self) -> bool {
            self.open
        }

        async fn close(&mut self) -> Result<(), SinkError> {
            self.open = false;
            Ok(())
        }
    }

    #[async_trait]
    impl CloudQueueApi for AwsSession {
        async fn send_to_queue(&mut self, queue_url: &str, body: &str, origin: &str) -> Result<(), SinkError> {
            let attribute = aws_sdk_sqs::types::MessageAttributeValue::builder()
                .data_type("String")
                .string_value(origin)
                .build()
                .map_err(|e| SinkError::Other(format!("sqs attribute: {}", e)))?;
            self.sqs
                .send_message()
                .queue_url(queue_url)
                .message_body(body)
                .message_attributes("Source", attribute)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| classify("sqs send_message", e))
        }

        async fn publish_to_topic(&mut self, topic_arn: &str, body: &str, origin: &str) -> Result<(), SinkError> {
            let attribute = aws_sdk_sns::types::MessageAttributeValue::builder()
                .data_type("String")
                .string_value(origin)
                .build()
                .map_err(|e| SinkError::Other(format!("sns attribute: {}", e)))?;
            self.sns
                .publish()
                .topic_arn(topic_arn)
                .message(body)
                .message_attributes("Source", attribute)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| classify("sns publish", e))
        }
    }

}

#[cfg(feature = "aws")]
pub use aws::{AwsConnector, AwsSession};
