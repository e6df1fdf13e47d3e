//! Managed-bus sink (Azure Service Bus queue or topic).
//!
//! The sender is pre-created at initialize: target URL plus a SAS token
//! signed from the connection string, checked with one request against the
//! entity. A rejected token counts as a transport failure, so the single
//! reinitialize-and-resend signs a fresh one.

use crate::config::ManagedBusConfig;
use crate::connection::{ConnectionManager, Connector, Session};
use crate::{Message, MessageSink, SendContext, SinkError, SinkMetadata};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, instrument, warn};

const TOKEN_TTL: Duration = Duration::from_secs(3600);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A pre-created sender for one queue or topic
#[async_trait]
pub trait BusSender: Session {
    async fn send_body(&mut self, body: &[u8]) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusDestination {
    Queue(String),
    Topic(String),
}

impl BusDestination {
    pub fn from_config(config: &ManagedBusConfig) -> Result<Self, SinkError> {
        let name = if config.use_queue {
            config.queue_name.clone()
        } else {
            config.topic_name.clone()
        };
        match name.filter(|n| !n.is_empty()) {
            Some(name) if config.use_queue => Ok(BusDestination::Queue(name)),
            Some(name) => Ok(BusDestination::Topic(name)),
            None => Err(SinkError::invalid_config(if config.use_queue {
                "queue_name is required in queue mode"
            } else {
                "topic_name is required in topic mode"
            })),
        }
    }

    pub fn entity(&self) -> &str {
        match self {
            BusDestination::Queue(name) | BusDestination::Topic(name) => name,
        }
    }
}

/// Parsed `Endpoint=sb://...;SharedAccessKeyName=...;SharedAccessKey=...`
#[derive(Clone, PartialEq, Eq)]
pub struct BusCredentials {
    pub namespace_host: String,
    pub key_name: String,
    key: String,
}

impl std::fmt::Debug for BusCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusCredentials")
            .field("namespace_host", &self.namespace_host)
            .field("key_name", &self.key_name)
            .finish_non_exhaustive()
    }
}

impl BusCredentials {
    pub fn parse(connection_string: &str) -> Result<Self, SinkError> {
        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;

        for part in connection_string.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((name, value)) = part.split_once('=') else {
                return Err(SinkError::invalid_config(format!(
                    "malformed connection string segment '{}'",
                    name_only(part)
                )));
            };
            match name.to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(value.to_string()),
                "sharedaccesskeyname" => key_name = Some(value.to_string()),
                "sharedaccesskey" => key = Some(value.to_string()),
                _ => {}
            }
        }

        let endpoint = endpoint.ok_or_else(|| SinkError::invalid_config("connection string has no Endpoint"))?;
        let namespace_host = url::Url::parse(&endpoint)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| SinkError::invalid_config(format!("invalid Endpoint '{}'", endpoint)))?;

        Ok(Self {
            namespace_host,
            key_name: key_name
                .ok_or_else(|| SinkError::invalid_config("connection string has no SharedAccessKeyName"))?,
            key: key.ok_or_else(|| SinkError::invalid_config("connection string has no SharedAccessKey"))?,
        })
    }

    /// `SharedAccessSignature` header value for `resource_uri`, valid until `expiry` (unix seconds)
    pub fn sas_token(&self, resource_uri: &str, expiry: u64) -> Result<String, SinkError> {
        let encoded_uri: String = url::form_urlencoded::byte_serialize(resource_uri.as_bytes()).collect();
        let string_to_sign = format!("{}\n{}", encoded_uri, expiry);

        let mut mac = Hmac::<Sha256>::new_from_slice(self.key.as_bytes())
            .map_err(|e| SinkError::invalid_config(format!("SharedAccessKey: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());
        let encoded_signature: String = url::form_urlencoded::byte_serialize(signature.as_bytes()).collect();

        Ok(format!(
            "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
            encoded_uri, encoded_signature, expiry, self.key_name
        ))
    }
}

fn name_only(segment: &str) -> &str {
    segment.split('=').next().unwrap_or_default()
}

/// Reaches Service Bus over its REST send endpoint
#[derive(Debug, Clone)]
pub struct HttpBusConnector {
    client: reqwest::Client,
    credentials: BusCredentials,
    destination: BusDestination,
    base_url: String,
}

impl HttpBusConnector {
    pub fn new(credentials: BusCredentials, destination: BusDestination) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SinkError::invalid_config(format!("http client: {}", e)))?;
        let base_url = format!("https://{}", credentials.namespace_host);
        Ok(Self {
            client,
            credentials,
            destination,
            base_url,
        })
    }

    pub fn from_config(config: &ManagedBusConfig) -> Result<Self, SinkError> {
        let credentials = BusCredentials::parse(config.connection_string.expose())?;
        Self::new(credentials, BusDestination::from_config(config)?)
    }

    /// Send to `base_url` instead of the namespace host (emulators, proxies).
    /// Tokens are still signed for the namespace resource.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn destination(&self) -> &BusDestination {
        &self.destination
    }

    fn resource_uri(&self) -> String {
        format!("https://{}/{}", self.credentials.namespace_host, self.destination.entity())
    }

    fn entity_url(&self) -> String {
        format!("{}/{}", self.base_url, self.destination.entity())
    }

    /// One authenticated read of the entity.
    ///
    /// A key with send rights only may not read entity metadata, so 401/403
    /// still proves the namespace answers. A missing entity, a 5xx or no
    /// answer at all fails the connect.
    async fn check_reachable(&self, entity_url: &str, token: &str) -> Result<(), SinkError> {
        let response = self
            .client
            .get(entity_url)
            .header(reqwest::header::AUTHORIZATION, token)
            .send()
            .await
            .map_err(|e| SinkError::connection_failed(format!("service bus unreachable: {}", e)))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!(entity = %self.destination.entity(), "Entity not readable with this key, sending anyway");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(SinkError::connection_failed(format!(
                "service bus entity '{}' does not exist",
                self.destination.entity()
            ))),
            status => Err(SinkError::connection_failed(format!(
                "service bus entity check responded {}",
                status
            ))),
        }
    }
}

#[async_trait]
impl Connector for HttpBusConnector {
    type Session = HttpBusSession;

    async fn connect(&self) -> Result<HttpBusSession, SinkError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| SinkError::Other(format!("system clock: {}", e)))?;
        let token = self
            .credentials
            .sas_token(&self.resource_uri(), (now + TOKEN_TTL).as_secs())?;
        let entity_url = self.entity_url();
        self.check_reachable(&entity_url, &token).await?;

        debug!(entity = %entity_url, "Sender created");
        Ok(HttpBusSession {
            client: self.client.clone(),
            send_url: format!("{}/messages", entity_url),
            token,
            open: true,
        })
    }

    fn endpoint(&self) -> String {
        format!("sb://{}/{}", self.credentials.namespace_host, self.destination.entity())
    }
}

pub struct HttpBusSession {
    client: reqwest::Client,
    send_url: String,
    token: String,
    open: bool,
}

#[async_trait]
impl Session for HttpBusSession {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.open = false;
        Ok(())
    }
}

#[async_trait]
impl BusSender for HttpBusSession {
    #[instrument(level = "debug", skip(self, body), fields(size = body.len()))]
    async fn send_body(&mut self, body: &[u8]) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.send_url)
            .header(reqwest::header::AUTHORIZATION, &self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| SinkError::connection_lost(format!("service bus request: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = format!("service bus responded {}", status);
        Err(match status {
            StatusCode::UNAUTHORIZED => SinkError::connection_lost(detail),
            StatusCode::TOO_MANY_REQUESTS => SinkError::connection_lost(detail),
            s if s.is_server_error() => SinkError::connection_lost(detail),
            StatusCode::NOT_FOUND => SinkError::send_failed(format!("{} (entity does not exist)", detail)),
            _ => SinkError::send_failed(detail),
        })
    }
}

pub struct ServiceBusSink<C: Connector> {
    name: String,
    manager: ConnectionManager<C>,
    destination: BusDestination,
    messages_sent: u64,
    messages_failed: u64,
    last_error: Option<String>,
}

impl<C: Connector> std::fmt::Debug for ServiceBusSink<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBusSink")
            .field("name", &self.name)
            .field("manager", &self.manager)
            .field("destination", &self.destination)
            .field("messages_sent", &self.messages_sent)
            .finish()
    }
}

impl<C> ServiceBusSink<C>
where
    C: Connector,
    C::Session: BusSender,
{
    pub fn new(name: impl Into<String>, connector: C, destination: BusDestination) -> Self {
        Self {
            name: name.into(),
            manager: ConnectionManager::new(connector),
            destination,
            messages_sent: 0,
            messages_failed: 0,
            last_error: None,
        }
    }

    /// Messages this instance has delivered
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    pub fn reconnects(&self) -> u64 {
        self.manager.reconnects()
    }
}

impl ServiceBusSink<HttpBusConnector> {
    pub fn from_config(name: impl Into<String>, config: &ManagedBusConfig) -> Result<Self, SinkError> {
        let connector = HttpBusConnector::from_config(config)?;
        let destination = connector.destination().clone();
        Ok(Self::new(name, connector, destination))
    }
}

#[async_trait]
impl<C> MessageSink for ServiceBusSink<C>
where
    C: Connector,
    C::Session: BusSender,
{
    async fn initialize(&mut self) -> Result<(), SinkError> {
        self.manager.initialize().await.map(|_| ())
    }

    async fn transmit(&mut self, message: &Message) -> Result<(), SinkError> {
        if !self.manager.is_live() {
            return Err(SinkError::Closed);
        }
        let sender = self.manager.session_mut().ok_or(SinkError::Closed)?;

        match sender.send_body(&message.payload).await {
            Ok(()) => {
                self.messages_sent += 1;
                debug!(
                    delivery_tag = %message.delivery_tag(),
                    messages_sent = self.messages_sent,
                    "Sent to service bus"
                );
                Ok(())
            }
            Err(e) => {
                self.messages_failed += 1;
                self.last_error = Some(e.to_string());
                if e.is_connection_error() {
                    self.manager.mark_degraded(&e);
                    return Err(e);
                }
                Err(match e {
                    SinkError::SendFailed { error, .. } => SinkError::send_failed_with_context(
                        error,
                        SendContext::new(message.size())
                            .with_delivery_tag(message.delivery_tag())
                            .with_destination(self.destination.entity()),
                    ),
                    other => other,
                })
            }
        }
    }

    async fn close(&mut self) {
        self.manager.close().await;
        info!(sink = %self.name, messages_sent = self.messages_sent, "Service bus sink closed");
    }

    fn is_connected(&self) -> bool {
        self.manager.is_live()
    }

    fn destination(&self) -> String {
        match &self.destination {
            BusDestination::Queue(name) => format!("{} (queue)", name),
            BusDestination::Topic(name) => format!("{} (topic)", name),
        }
    }

    fn metadata(&self) -> SinkMetadata {
        SinkMetadata {
            name: self.name.clone(),
            sink_type: "managed_bus".to_string(),
            endpoint: Some(self.manager.endpoint()),
            state: self.manager.state(),
            messages_sent: self.messages_sent,
            messages_failed: self.messages_failed,
            reconnects: self.manager.reconnects(),
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;
    use crate::ForwardOutcome;
    use mockito::Matcher;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Scripted outcomes shared by every session the connector hands out
    #[derive(Debug, Default)]
    struct Script {
        failures: VecDeque<SinkError>,
        bodies: Vec<Vec<u8>>,
        connects: u32,
    }

    #[derive(Debug, Clone, Default)]
    struct ScriptedBus {
        script: Arc<Mutex<Script>>,
    }

    impl ScriptedBus {
        fn fail_next(&self, errors: impl IntoIterator<Item = SinkError>) {
            self.script.lock().unwrap().failures.extend(errors);
        }
    }

    struct ScriptedSender {
        script: Arc<Mutex<Script>>,
        open: bool,
    }

    #[async_trait]
    impl Connector for ScriptedBus {
        type Session = ScriptedSender;

        async fn connect(&self) -> Result<ScriptedSender, SinkError> {
            self.script.lock().unwrap().connects += 1;
            Ok(ScriptedSender {
                script: self.script.clone(),
                open: true,
            })
        }

        fn endpoint(&self) -> String {
            "sb://scripted/reports".to_string()
        }
    }

    #[async_trait]
    impl Session for ScriptedSender {
        fn is_open(&self) -> bool {
            self.open
        }

        async fn close(&mut self) -> Result<(), SinkError> {
            self.open = false;
            Ok(())
        }
    }

    #[async_trait]
    impl BusSender for ScriptedSender {
        async fn send_body(&mut self, body: &[u8]) -> Result<(), SinkError> {
            let mut script = self.script.lock().unwrap();
            if let Some(error) = script.failures.pop_front() {
                return Err(error);
            }
            script.bodies.push(body.to_vec());
            Ok(())
        }
    }

    fn sink(bus: &ScriptedBus) -> ServiceBusSink<ScriptedBus> {
        ServiceBusSink::new("bus", bus.clone(), BusDestination::Queue("reports".to_string()))
    }

    #[tokio::test]
    async fn test_single_reconnect_then_delivered() {
        let bus = ScriptedBus::default();
        let mut sink = sink(&bus);
        sink.initialize().await.unwrap();
        bus.fail_next([SinkError::connection_lost("socket closed")]);

        let outcome = sink.send(&Message::new(b"{\"n\":1}".to_vec())).await;
        assert_eq!(outcome, ForwardOutcome::Delivered);
        assert_eq!(sink.reconnects(), 1);
        assert_eq!(bus.script.lock().unwrap().connects, 2);
        assert_eq!(sink.messages_sent(), 1);
    }

    #[tokio::test]
    async fn test_retry_failure_is_connectivity_failure() {
        let bus = ScriptedBus::default();
        let mut sink = sink(&bus);
        sink.initialize().await.unwrap();
        bus.fail_next([
            SinkError::connection_lost("socket closed"),
            SinkError::connection_lost("socket closed again"),
            SinkError::connection_lost("never reached"),
        ]);

        let outcome = sink.send(&Message::new(b"{}".to_vec())).await;
        assert!(matches!(outcome, ForwardOutcome::ConnectivityFailure(ref d) if d.contains("again")));
        assert_eq!(sink.reconnects(), 1);
        assert_eq!(sink.messages_sent(), 0);
        assert_eq!(sink.metadata().messages_failed, 2);
    }

    #[tokio::test]
    async fn test_counters_are_per_instance() {
        let first_bus = ScriptedBus::default();
        let second_bus = ScriptedBus::default();
        let mut first = sink(&first_bus);
        let mut second = sink(&second_bus);
        first.initialize().await.unwrap();
        second.initialize().await.unwrap();

        for _ in 0..3 {
            assert!(first.send(&Message::new(b"a".to_vec())).await.is_delivered());
        }
        assert!(second.send(&Message::new(b"b".to_vec())).await.is_delivered());

        assert_eq!(first.messages_sent(), 3);
        assert_eq!(second.messages_sent(), 1);
    }

    #[tokio::test]
    async fn test_missing_entity_is_not_retried() {
        let bus = ScriptedBus::default();
        let mut sink = sink(&bus);
        sink.initialize().await.unwrap();
        bus.fail_next([SinkError::send_failed("service bus responded 404 Not Found")]);

        let outcome = sink.send(&Message::new(b"{}".to_vec())).await;
        assert_eq!(outcome.kind(), "unknown_failure");
        assert!(outcome.detail().unwrap().contains("reports"));
        assert_eq!(sink.reconnects(), 0);
    }

    #[test]
    fn test_parse_connection_string() {
        let credentials = BusCredentials::parse(
            "Endpoint=sb://relay-ns.servicebus.windows.net/;SharedAccessKeyName=RootManageSharedAccessKey;SharedAccessKey=c2VjcmV0a2V5PQ==",
        )
        .unwrap();
        assert_eq!(credentials.namespace_host, "relay-ns.servicebus.windows.net");
        assert_eq!(credentials.key_name, "RootManageSharedAccessKey");
        assert!(!format!("{:?}", credentials).contains("c2VjcmV0"));

        assert!(BusCredentials::parse("Endpoint=sb://ns.servicebus.windows.net/").is_err());
        assert!(BusCredentials::parse("garbage").is_err());
    }

    #[test]
    fn test_sas_token_shape() {
        let credentials = BusCredentials::parse(
            "Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=send;SharedAccessKey=abc123",
        )
        .unwrap();
        let token = credentials
            .sas_token("https://ns.servicebus.windows.net/reports", 1_700_000_000)
            .unwrap();

        assert!(token.starts_with(
            "SharedAccessSignature sr=https%3A%2F%2Fns.servicebus.windows.net%2Freports&sig="
        ));
        assert!(token.ends_with("&se=1700000000&skn=send"));
        // Deterministic for the same key, resource and expiry
        assert_eq!(
            token,
            credentials
                .sas_token("https://ns.servicebus.windows.net/reports", 1_700_000_000)
                .unwrap()
        );
        assert_ne!(
            token,
            credentials
                .sas_token("https://ns.servicebus.windows.net/reports", 1_700_000_001)
                .unwrap()
        );
    }

    const CONNECTION_STRING: &str =
        "Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=send;SharedAccessKey=abc123";
    const SAS_HEADER: &str =
        r"^SharedAccessSignature sr=https%3A%2F%2Fns\.servicebus\.windows\.net%2Freports&sig=[^&]+&se=\d+&skn=send$";

    fn bus_config(use_queue: bool) -> ManagedBusConfig {
        ManagedBusConfig {
            connection_string: Secret::from(CONNECTION_STRING),
            queue_name: Some("reports".to_string()),
            topic_name: Some("reports".to_string()),
            use_queue,
        }
    }

    fn http_sink(server: &mockito::Server) -> ServiceBusSink<HttpBusConnector> {
        let connector = HttpBusConnector::from_config(&bus_config(true))
            .unwrap()
            .with_base_url(server.url());
        let destination = connector.destination().clone();
        ServiceBusSink::new("bus", connector, destination)
    }

    async fn entity_lookup(server: &mut mockito::Server, status: usize, hits: usize) -> mockito::Mock {
        server
            .mock("GET", "/reports")
            .match_header("authorization", Matcher::Regex(SAS_HEADER.to_string()))
            .with_status(status)
            .expect(hits)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_http_send_delivers_body_with_sas_header() {
        let mut server = mockito::Server::new_async().await;
        let lookup = entity_lookup(&mut server, 200, 1).await;
        let send = server
            .mock("POST", "/reports/messages")
            .match_header("authorization", Matcher::Regex(SAS_HEADER.to_string()))
            .match_header("content-type", "application/json")
            .match_body(Matcher::Exact(r#"{"stage":"upload.completed","size":3}"#.to_string()))
            .with_status(201)
            .expect(1)
            .create_async()
            .await;

        let mut sink = http_sink(&server);
        sink.initialize().await.unwrap();
        let outcome = sink
            .send(&Message::new(br#"{"stage":"upload.completed","size":3}"#.to_vec()))
            .await;

        assert_eq!(outcome, ForwardOutcome::Delivered);
        assert_eq!(sink.messages_sent(), 1);
        lookup.assert_async().await;
        send.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_transport_statuses_reinitialize_once() {
        for status in [401, 429, 503] {
            let mut server = mockito::Server::new_async().await;
            let lookup = entity_lookup(&mut server, 200, 2).await;
            let send = server
                .mock("POST", "/reports/messages")
                .with_status(status)
                .expect(2)
                .create_async()
                .await;

            let mut sink = http_sink(&server);
            sink.initialize().await.unwrap();
            let outcome = sink.send(&Message::new(b"{}".to_vec())).await;

            assert!(
                matches!(outcome, ForwardOutcome::ConnectivityFailure(ref d) if d.contains(&status.to_string())),
                "status {} gave {:?}",
                status,
                outcome
            );
            assert_eq!(sink.reconnects(), 1);
            lookup.assert_async().await;
            send.assert_async().await;
        }
    }

    #[tokio::test]
    async fn test_http_missing_entity_on_send_is_unknown_failure() {
        let mut server = mockito::Server::new_async().await;
        let _lookup = entity_lookup(&mut server, 200, 1).await;
        let send = server
            .mock("POST", "/reports/messages")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let mut sink = http_sink(&server);
        sink.initialize().await.unwrap();
        let outcome = sink.send(&Message::new(b"{}".to_vec())).await;

        assert_eq!(outcome.kind(), "unknown_failure");
        assert!(outcome.detail().unwrap().contains("404"));
        assert_eq!(sink.reconnects(), 0);
        send.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_only_key_is_accepted() {
        let mut server = mockito::Server::new_async().await;
        let lookup = entity_lookup(&mut server, 401, 1).await;

        let mut sink = http_sink(&server);
        sink.initialize().await.unwrap();
        assert!(sink.is_connected());
        assert_eq!(sink.destination(), "reports (queue)");
        assert_eq!(sink.metadata().endpoint.as_deref(), Some("sb://ns.servicebus.windows.net/reports"));
        lookup.assert_async().await;
    }

    #[tokio::test]
    async fn test_initialize_fails_for_missing_entity() {
        let mut server = mockito::Server::new_async().await;
        let _lookup = entity_lookup(&mut server, 404, 1).await;

        let mut sink = http_sink(&server);
        let err = sink.initialize().await.unwrap_err();
        assert!(matches!(err, SinkError::ConnectionFailed(ref d) if d.contains("'reports' does not exist")));
        assert!(!sink.is_connected());
    }

    #[tokio::test]
    async fn test_initialize_fails_for_unreachable_namespace() {
        let connector = HttpBusConnector::from_config(&bus_config(false))
            .unwrap()
            .with_base_url("http://127.0.0.1:1");
        let mut sink = ServiceBusSink::new("bus", connector, BusDestination::Topic("reports".to_string()));

        let err = sink.initialize().await.unwrap_err();
        assert!(matches!(err, SinkError::ConnectionFailed(ref d) if d.contains("unreachable")));
        assert!(!sink.is_connected());
    }
}
