//! Test doubles: an in-memory AMQP broker and scriptable sinks.
//!
//! Handles are cheap clones over shared state so a test can keep one copy
//! for assertions while the relay owns another.

use crate::amqp::{AmqpSession, DeclareOptions, DeliveryStream, ExchangeKind, PublishOptions, PublishStatus};
use crate::connection::{Connector, Session};
use crate::{
    ConnectionState, DeliveryTag, Message, MessageMetadata, MessageSink, SendContext, SinkError,
    SinkMetadata,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

/// Something observable that happened on the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    ExchangeDeclared { name: String, passive: bool },
    QueueDeclared { name: String, passive: bool },
    Bound { queue: String, exchange: String, routing_key: String },
    Published { exchange: String, routing_key: String, payload: Vec<u8> },
    Returned { exchange: String, routing_key: String },
    Delivered { tag: DeliveryTag, payload: Vec<u8> },
    Acked { tag: DeliveryTag, payload: Vec<u8> },
    Nacked { tag: DeliveryTag, payload: Vec<u8>, requeue: bool },
    ChannelClosed { channel: u64, reason: String },
}

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    routing_key: String,
    redelivered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExchangeState {
    kind: ExchangeKind,
    durable: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    durable: bool,
    messages: VecDeque<StoredMessage>,
}

#[derive(Debug)]
struct ChannelState {
    connection: u64,
    open: bool,
    prefetch: u16,
    next_tag: u64,
    unacked: BTreeMap<u64, (String, StoredMessage)>,
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeState>,
    queues: HashMap<String, QueueState>,
    bindings: BTreeSet<(String, String, String)>,
    live_connections: HashSet<u64>,
    channels: HashMap<u64, ChannelState>,
    next_id: u64,
    connections_opened: u64,
    fail_next_connects: u32,
    deny_active_declares: bool,
    nack_next_publishes: u32,
    events: Vec<BrokerEvent>,
}

impl BrokerState {
    fn open_channel(&mut self, connection: u64) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.channels.insert(
            id,
            ChannelState {
                connection,
                open: true,
                prefetch: 0,
                next_tag: 0,
                unacked: BTreeMap::new(),
            },
        );
        id
    }

    /// Close a channel and return its unacknowledged messages to their queues
    fn close_channel(&mut self, channel: u64, reason: &str) {
        let Some(state) = self.channels.get_mut(&channel) else {
            return;
        };
        if !state.open {
            return;
        }
        state.open = false;
        let unacked = std::mem::take(&mut state.unacked);
        for (_, (queue, mut message)) in unacked.into_iter().rev() {
            message.redelivered = true;
            if let Some(q) = self.queues.get_mut(&queue) {
                q.messages.push_front(message);
            }
        }
        self.events.push(BrokerEvent::ChannelClosed {
            channel,
            reason: reason.to_string(),
        });
    }

    fn close_connection(&mut self, connection: u64, reason: &str) {
        self.live_connections.remove(&connection);
        let channels: Vec<u64> = self
            .channels
            .iter()
            .filter(|(_, c)| c.connection == connection)
            .map(|(id, _)| *id)
            .collect();
        for id in channels {
            self.close_channel(id, reason);
        }
    }

    fn check_channel(&self, connection: u64, channel: u64) -> Result<(), SinkError> {
        if !self.live_connections.contains(&connection) {
            return Err(SinkError::connection_lost("connection closed"));
        }
        match self.channels.get(&channel) {
            Some(c) if c.open => Ok(()),
            _ => Err(SinkError::connection_lost("channel closed")),
        }
    }

    /// Queues a publish reaches
    fn route(&self, exchange: &str, routing_key: &str) -> Vec<String> {
        if exchange.is_empty() {
            return if self.queues.contains_key(routing_key) {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            };
        }
        let Some(state) = self.exchanges.get(exchange) else {
            return Vec::new();
        };
        let mut queues: Vec<String> = self
            .bindings
            .iter()
            .filter(|(q, e, key)| {
                e == exchange
                    && self.queues.contains_key(q)
                    && match state.kind {
                        ExchangeKind::Fanout => true,
                        ExchangeKind::Direct => key == routing_key,
                        ExchangeKind::Topic => key == "#" || key == routing_key,
                    }
            })
            .map(|(q, _, _)| q.clone())
            .collect();
        queues.dedup();
        queues
    }

    fn enqueue(&mut self, queues: &[String], routing_key: &str, payload: &[u8]) {
        for queue in queues {
            if let Some(q) = self.queues.get_mut(queue) {
                q.messages.push_back(StoredMessage {
                    payload: payload.to_vec(),
                    routing_key: routing_key.to_string(),
                    redelivered: false,
                });
            }
        }
    }
}

/// In-memory stand-in for an AMQP broker
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    changed: Arc<Notify>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut BrokerState) -> T) -> T {
        let result = f(&mut self.lock());
        self.changed.notify_waiters();
        result
    }

    pub fn connector(&self) -> InMemoryConnector {
        InMemoryConnector {
            broker: self.clone(),
        }
    }

    /// Fail the next `count` connection attempts
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().fail_next_connects = count;
    }

    /// Refuse every non-passive declaration, as a broker would for a user
    /// without configure permission
    pub fn deny_active_declares(&self, deny: bool) {
        self.lock().deny_active_declares = deny;
    }

    /// Negatively confirm the next `count` publishes
    pub fn nack_next_publishes(&self, count: u32) {
        self.lock().nack_next_publishes = count;
    }

    /// Sever every open connection. Unacknowledged deliveries go back to
    /// their queues flagged as redelivered.
    pub fn drop_connections(&self) {
        self.mutate(|state| {
            let connections: Vec<u64> = state.live_connections.iter().copied().collect();
            for connection in connections {
                state.close_connection(connection, "connection reset by peer");
            }
        });
    }

    /// Declare a durable queue directly, bypassing any session
    pub fn declare_queue(&self, name: &str) {
        self.mutate(|state| {
            state.queues.entry(name.to_string()).or_insert_with(|| QueueState {
                durable: true,
                ..Default::default()
            });
        });
    }

    /// Declare an exchange directly, bypassing any session
    pub fn declare_exchange(&self, name: &str, kind: ExchangeKind) {
        self.mutate(|state| {
            state
                .exchanges
                .entry(name.to_string())
                .or_insert(ExchangeState { kind, durable: true });
        });
    }

    pub fn bind(&self, queue: &str, exchange: &str, routing_key: &str) {
        self.mutate(|state| {
            state
                .bindings
                .insert((queue.to_string(), exchange.to_string(), routing_key.to_string()));
        });
    }

    /// Publish as an outside producer would. Returns whether any queue took it.
    pub fn publish(&self, exchange: &str, routing_key: &str, payload: impl AsRef<[u8]>) -> bool {
        let payload = payload.as_ref();
        self.mutate(|state| {
            let queues = state.route(exchange, routing_key);
            state.enqueue(&queues, routing_key, payload);
            !queues.is_empty()
        })
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.lock().exchanges.contains_key(name)
    }

    pub fn exchange_kind(&self, name: &str) -> Option<ExchangeKind> {
        self.lock().exchanges.get(name).map(|e| e.kind)
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.lock().queues.contains_key(name)
    }

    pub fn is_durable_queue(&self, name: &str) -> bool {
        self.lock().queues.get(name).is_some_and(|q| q.durable)
    }

    /// Sorted `(queue, exchange, routing_key)` triples
    pub fn bindings(&self) -> Vec<(String, String, String)> {
        self.lock().bindings.iter().cloned().collect()
    }

    /// Ready (not yet delivered) messages in a queue
    pub fn queue_depth(&self, name: &str) -> usize {
        self.lock().queues.get(name).map_or(0, |q| q.messages.len())
    }

    pub fn queue_payloads(&self, name: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get(name)
            .map(|q| q.messages.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Deliveries currently awaiting ack or nack, across all channels
    pub fn unacked_count(&self) -> usize {
        self.lock().channels.values().map(|c| c.unacked.len()).sum()
    }

    pub fn connection_count(&self) -> u64 {
        self.lock().connections_opened
    }

    pub fn events(&self) -> Vec<BrokerEvent> {
        self.lock().events.clone()
    }

    pub fn acked_payloads(&self) -> Vec<Vec<u8>> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                BrokerEvent::Acked { payload, .. } => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn nacked_payloads(&self) -> Vec<Vec<u8>> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                BrokerEvent::Nacked { payload, .. } => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Wait until the event log satisfies `predicate`, or fail after `timeout`
    pub async fn wait_for<F>(&self, timeout: Duration, predicate: F) -> Result<(), SinkError>
    where
        F: Fn(&[BrokerEvent]) -> bool,
    {
        let wait = async {
            loop {
                let changed = self.changed.notified();
                if predicate(&self.lock().events) {
                    return;
                }
                changed.await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| SinkError::Other("timed out waiting for broker events".to_string()))
    }

    /// Wait until `count` acknowledgements have been recorded
    pub async fn wait_for_acks(&self, count: usize, timeout: Duration) -> Result<(), SinkError> {
        self.wait_for(timeout, |events| {
            events
                .iter()
                .filter(|e| matches!(e, BrokerEvent::Acked { .. }))
                .count()
                >= count
        })
        .await
    }
}

/// Opens sessions on an [`InMemoryBroker`]
#[derive(Debug, Clone)]
pub struct InMemoryConnector {
    broker: InMemoryBroker,
}

impl InMemoryConnector {
    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    type Session = InMemorySession;

    async fn connect(&self) -> Result<InMemorySession, SinkError> {
        let broker = self.broker.clone();
        self.broker.mutate(|state| {
            if state.fail_next_connects > 0 {
                state.fail_next_connects -= 1;
                return Err(SinkError::connection_failed("connection refused"));
            }
            state.next_id += 1;
            let connection = state.next_id;
            state.live_connections.insert(connection);
            state.connections_opened += 1;
            let channel = state.open_channel(connection);
            Ok(InMemorySession {
                broker,
                connection,
                channel,
            })
        })
    }

    fn endpoint(&self) -> String {
        "memory://broker".to_string()
    }
}

/// One connection and one channel on an [`InMemoryBroker`]
#[derive(Debug)]
pub struct InMemorySession {
    broker: InMemoryBroker,
    connection: u64,
    channel: u64,
}

impl InMemorySession {
    pub fn channel_id(&self) -> u64 {
        self.channel
    }

    fn declare_outcome(
        state: &mut BrokerState,
        channel: u64,
        exists: bool,
        conflicts: bool,
        options: DeclareOptions,
        name: &str,
    ) -> Result<bool, SinkError> {
        if options.passive {
            if !exists {
                state.close_channel(channel, "NOT_FOUND");
                return Err(SinkError::NotFound(format!("no object '{}'", name)));
            }
            return Ok(false);
        }
        if state.deny_active_declares {
            state.close_channel(channel, "ACCESS_REFUSED");
            return Err(SinkError::Rejected(format!("ACCESS_REFUSED: declare '{}'", name)));
        }
        if exists && conflicts {
            state.close_channel(channel, "PRECONDITION_FAILED");
            return Err(SinkError::Rejected(format!(
                "PRECONDITION_FAILED: inequivalent arguments for '{}'",
                name
            )));
        }
        Ok(!exists)
    }
}

#[async_trait]
impl Session for InMemorySession {
    fn is_open(&self) -> bool {
        self.broker
            .lock()
            .check_channel(self.connection, self.channel)
            .is_ok()
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        let connection = self.connection;
        self.broker
            .mutate(|state| state.close_connection(connection, "closed by client"));
        Ok(())
    }
}

#[async_trait]
impl AmqpSession for InMemorySession {
    type Deliveries = InMemoryDeliveries;

    async fn declare_exchange(
        &mut self,
        name: &str,
        kind: ExchangeKind,
        options: DeclareOptions,
    ) -> Result<(), SinkError> {
        let (connection, channel) = (self.connection, self.channel);
        self.broker.mutate(|state| {
            state.check_channel(connection, channel)?;
            let existing = state.exchanges.get(name).copied();
            let conflicts = existing.is_some_and(|e| e.kind != kind || e.durable != options.durable);
            let create =
                Self::declare_outcome(state, channel, existing.is_some(), conflicts, options, name)?;
            if create {
                state.exchanges.insert(
                    name.to_string(),
                    ExchangeState {
                        kind,
                        durable: options.durable,
                    },
                );
            }
            state.events.push(BrokerEvent::ExchangeDeclared {
                name: name.to_string(),
                passive: options.passive,
            });
            Ok(())
        })
    }

    async fn declare_queue(&mut self, name: &str, options: DeclareOptions) -> Result<(), SinkError> {
        let (connection, channel) = (self.connection, self.channel);
        self.broker.mutate(|state| {
            state.check_channel(connection, channel)?;
            let existing = state.queues.get(name).map(|q| q.durable);
            let conflicts = existing.is_some_and(|durable| durable != options.durable);
            let create =
                Self::declare_outcome(state, channel, existing.is_some(), conflicts, options, name)?;
            if create {
                state.queues.insert(
                    name.to_string(),
                    QueueState {
                        durable: options.durable,
                        ..Default::default()
                    },
                );
            }
            state.events.push(BrokerEvent::QueueDeclared {
                name: name.to_string(),
                passive: options.passive,
            });
            Ok(())
        })
    }

    async fn bind_queue(&mut self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), SinkError> {
        let (connection, channel) = (self.connection, self.channel);
        self.broker.mutate(|state| {
            state.check_channel(connection, channel)?;
            if !state.queues.contains_key(queue) || !state.exchanges.contains_key(exchange) {
                state.close_channel(channel, "NOT_FOUND");
                return Err(SinkError::NotFound(format!("bind {} -> {}", exchange, queue)));
            }
            state
                .bindings
                .insert((queue.to_string(), exchange.to_string(), routing_key.to_string()));
            state.events.push(BrokerEvent::Bound {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            });
            Ok(())
        })
    }

    async fn set_prefetch(&mut self, count: u16) -> Result<(), SinkError> {
        let (connection, channel) = (self.connection, self.channel);
        self.broker.mutate(|state| {
            state.check_channel(connection, channel)?;
            if let Some(c) = state.channels.get_mut(&channel) {
                c.prefetch = count;
            }
            Ok(())
        })
    }

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        options: PublishOptions,
    ) -> Result<PublishStatus, SinkError> {
        let (connection, channel) = (self.connection, self.channel);
        self.broker.mutate(|state| {
            state.check_channel(connection, channel)?;
            if !exchange.is_empty() && !state.exchanges.contains_key(exchange) {
                state.close_channel(channel, "NOT_FOUND");
                return Err(SinkError::NotFound(format!("no exchange '{}'", exchange)));
            }
            if state.nack_next_publishes > 0 {
                state.nack_next_publishes -= 1;
                return Ok(PublishStatus::Nacked);
            }
            let queues = state.route(exchange, routing_key);
            if queues.is_empty() && options.mandatory {
                state.events.push(BrokerEvent::Returned {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                });
                return Ok(PublishStatus::Returned("312 NO_ROUTE".to_string()));
            }
            state.enqueue(&queues, routing_key, payload);
            state.events.push(BrokerEvent::Published {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                payload: payload.to_vec(),
            });
            Ok(PublishStatus::Confirmed)
        })
    }

    async fn consume(&mut self, queue: &str, _consumer_tag: &str) -> Result<InMemoryDeliveries, SinkError> {
        let (connection, channel) = (self.connection, self.channel);
        self.broker.mutate(|state| {
            state.check_channel(connection, channel)?;
            if !state.queues.contains_key(queue) {
                state.close_channel(channel, "NOT_FOUND");
                return Err(SinkError::NotFound(format!("no queue '{}'", queue)));
            }
            Ok(())
        })?;
        Ok(InMemoryDeliveries {
            broker: self.broker.clone(),
            connection,
            channel,
            queue: queue.to_string(),
        })
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), SinkError> {
        let (connection, channel) = (self.connection, self.channel);
        self.broker.mutate(|state| {
            state.check_channel(connection, channel)?;
            let removed = state
                .channels
                .get_mut(&channel)
                .and_then(|c| c.unacked.remove(&tag.value()));
            match removed {
                Some((_, message)) => {
                    state.events.push(BrokerEvent::Acked {
                        tag,
                        payload: message.payload,
                    });
                    Ok(())
                }
                None => {
                    state.close_channel(channel, "PRECONDITION_FAILED");
                    Err(SinkError::Rejected(format!("unknown delivery tag {}", tag)))
                }
            }
        })
    }

    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), SinkError> {
        let (connection, channel) = (self.connection, self.channel);
        self.broker.mutate(|state| {
            state.check_channel(connection, channel)?;
            let removed = state
                .channels
                .get_mut(&channel)
                .and_then(|c| c.unacked.remove(&tag.value()));
            match removed {
                Some((queue, mut message)) => {
                    state.events.push(BrokerEvent::Nacked {
                        tag,
                        payload: message.payload.clone(),
                        requeue,
                    });
                    if requeue {
                        message.redelivered = true;
                        if let Some(q) = state.queues.get_mut(&queue) {
                            q.messages.push_front(message);
                        }
                    }
                    Ok(())
                }
                None => {
                    state.close_channel(channel, "PRECONDITION_FAILED");
                    Err(SinkError::Rejected(format!("unknown delivery tag {}", tag)))
                }
            }
        })
    }

    async fn reopen_channel(&mut self) -> Result<(), SinkError> {
        let connection = self.connection;
        let old = self.channel;
        self.channel = self.broker.mutate(|state| {
            if !state.live_connections.contains(&connection) {
                return Err(SinkError::connection_lost("connection closed"));
            }
            state.close_channel(old, "reopened");
            Ok(state.open_channel(connection))
        })?;
        Ok(())
    }
}

/// Consumer on an [`InMemoryBroker`] queue that honours the channel prefetch
#[derive(Debug)]
pub struct InMemoryDeliveries {
    broker: InMemoryBroker,
    connection: u64,
    channel: u64,
    queue: String,
}

impl InMemoryDeliveries {
    fn try_next(&self) -> Option<Option<Message>> {
        let mut state = self.broker.lock();
        if state.check_channel(self.connection, self.channel).is_err() {
            return Some(None);
        }
        let ready = state.channels.get(&self.channel).is_some_and(|c| {
            c.prefetch == 0 || c.unacked.len() < usize::from(c.prefetch)
        });
        if !ready {
            return None;
        }
        let message = state.queues.get_mut(&self.queue)?.messages.pop_front()?;
        let channel = state.channels.get_mut(&self.channel)?;
        channel.next_tag += 1;
        let tag = DeliveryTag(channel.next_tag);
        channel
            .unacked
            .insert(tag.value(), (self.queue.clone(), message.clone()));
        state.events.push(BrokerEvent::Delivered {
            tag,
            payload: message.payload.clone(),
        });

        let metadata = MessageMetadata::new()
            .with_delivery_tag(tag)
            .with_routing_key(message.routing_key)
            .with_redelivered(message.redelivered);
        Some(Some(Message::with_metadata(message.payload, metadata)))
    }
}

#[async_trait]
impl DeliveryStream for InMemoryDeliveries {
    async fn next_delivery(&mut self) -> Option<Result<Message, SinkError>> {
        loop {
            let changed = self.broker.changed.notified();
            match self.try_next() {
                Some(Some(message)) => {
                    self.broker.changed.notify_waiters();
                    return Some(Ok(message));
                }
                Some(None) => return None,
                None => changed.await,
            }
        }
    }
}

#[derive(Debug)]
struct Script {
    body: Vec<u8>,
    error: SinkError,
    remaining: usize,
}

#[derive(Debug, Default)]
struct CollectorState {
    connected: bool,
    received: Vec<Message>,
    initializations: u64,
    transmit_attempts: u64,
    failed: u64,
    fail_next_initializations: u32,
    scripts: Vec<Script>,
    panic_bodies: Vec<Vec<u8>>,
    transmit_delay: Option<Duration>,
    closed: bool,
}

/// A sink that records what it is given, with scripted failures
#[derive(Debug, Clone)]
pub struct CollectorSink {
    name: String,
    state: Arc<Mutex<CollectorState>>,
}

impl Default for CollectorSink {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::with_name("test-collector")
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(CollectorState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CollectorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail the next `times` transmissions of `body` with `error`
    pub fn fail_body(&self, body: impl Into<Vec<u8>>, error: SinkError, times: usize) {
        self.lock().scripts.push(Script {
            body: body.into(),
            error,
            remaining: times,
        });
    }

    /// Panic whenever `body` is transmitted
    pub fn panic_on_body(&self, body: impl Into<Vec<u8>>) {
        self.lock().panic_bodies.push(body.into());
    }

    pub fn fail_next_initializations(&self, count: u32) {
        self.lock().fail_next_initializations = count;
    }

    /// Make every transmission take `delay`
    pub fn set_transmit_delay(&self, delay: Duration) {
        self.lock().transmit_delay = Some(delay);
    }

    pub fn force_disconnect(&self) {
        self.lock().connected = false;
    }

    pub fn received_messages(&self) -> Vec<Message> {
        self.lock().received.clone()
    }

    pub fn received_payloads(&self) -> Vec<Vec<u8>> {
        self.lock().received.iter().map(|m| m.payload.clone()).collect()
    }

    pub fn message_count(&self) -> usize {
        self.lock().received.len()
    }

    pub fn initializations(&self) -> u64 {
        self.lock().initializations
    }

    pub fn transmit_attempts(&self) -> u64 {
        self.lock().transmit_attempts
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[async_trait]
impl MessageSink for CollectorSink {
    async fn initialize(&mut self) -> Result<(), SinkError> {
        let mut state = self.lock();
        state.initializations += 1;
        if state.fail_next_initializations > 0 {
            state.fail_next_initializations -= 1;
            state.connected = false;
            return Err(SinkError::connection_failed("collector unreachable"));
        }
        state.connected = true;
        state.closed = false;
        Ok(())
    }

    async fn transmit(&mut self, message: &Message) -> Result<(), SinkError> {
        let delay = self.lock().transmit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let should_panic = {
            let mut state = self.lock();
            state.transmit_attempts += 1;
            if !state.connected {
                state.failed += 1;
                return Err(SinkError::Closed);
            }
            let scripted = state
                .scripts
                .iter_mut()
                .find(|s| s.body == message.payload && s.remaining > 0)
                .map(|s| {
                    s.remaining -= 1;
                    s.error.clone()
                });
            if let Some(error) = scripted {
                state.failed += 1;
                return Err(match error {
                    SinkError::SendFailed { error, .. } => SinkError::send_failed_with_context(
                        error,
                        SendContext::new(message.size())
                            .with_delivery_tag(message.delivery_tag())
                            .with_destination(self.name.clone()),
                    ),
                    other => other,
                });
            }
            let should_panic = state.panic_bodies.contains(&message.payload);
            if !should_panic {
                state.received.push(message.clone());
            }
            should_panic
        };

        if should_panic {
            panic!("collector asked to panic on delivery {}", message.delivery_tag());
        }
        Ok(())
    }

    async fn close(&mut self) {
        let mut state = self.lock();
        state.connected = false;
        state.closed = true;
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn destination(&self) -> String {
        format!("memory://{}", self.name)
    }

    fn metadata(&self) -> SinkMetadata {
        let state = self.lock();
        SinkMetadata {
            name: self.name.clone(),
            sink_type: "collector".to_string(),
            endpoint: Some(format!("memory://{}", self.name)),
            state: if state.connected {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            },
            messages_sent: state.received.len() as u64,
            messages_failed: state.failed,
            reconnects: state.initializations.saturating_sub(1),
            last_error: None,
        }
    }
}

/// A sink whose destination never accepts anything
#[derive(Debug)]
pub struct FailingSink {
    error: SinkError,
}

impl FailingSink {
    pub fn new(error: SinkError) -> Self {
        Self { error }
    }
}

impl Default for FailingSink {
    fn default() -> Self {
        Self::new(SinkError::send_failed("Simulated failure"))
    }
}

#[async_trait]
impl MessageSink for FailingSink {
    async fn initialize(&mut self) -> Result<(), SinkError> {
        if self.error.is_connection_error() {
            return Err(self.error.clone());
        }
        Ok(())
    }

    async fn transmit(&mut self, _message: &Message) -> Result<(), SinkError> {
        Err(self.error.clone())
    }

    async fn close(&mut self) {}

    fn is_connected(&self) -> bool {
        false
    }

    fn destination(&self) -> String {
        "memory://failing".to_string()
    }

    fn metadata(&self) -> SinkMetadata {
        SinkMetadata {
            name: "failing-sink".to_string(),
            sink_type: "test-failing".to_string(),
            last_error: Some(self.error.to_string()),
            ..Default::default()
        }
    }
}
