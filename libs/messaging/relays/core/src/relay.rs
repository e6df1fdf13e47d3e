//! # Relay Loop
//!
//! Single logical worker: one delivery is fetched, forwarded and disposed of
//! before the next is requested. With prefetch fixed at 1 the source broker
//! will not hand out message N+1 until message N is acked or requeued, so a
//! slow destination throttles ingestion instead of filling memory.
//!
//! Per delivery exactly one of `ack` or `nack(requeue)` is issued:
//!
//! | forward result                       | disposition    |
//! |--------------------------------------|----------------|
//! | `Delivered`                          | ack            |
//! | `Unroutable`, `ConnectivityFailure`  | nack + requeue |
//! | `UnknownFailure`, panic in `send`    | nack + requeue |
//!
//! A failed disposition is never retried: delivery tags are channel-scoped,
//! so the source session is rebuilt and the broker redelivers.

use crate::topology::{TopologyDescriptor, TopologyProvisioner};
use crate::{RelayError, RelayResult};
use futures::FutureExt;
use message_sink::{
    AmqpSession, ConnectionManager, Connector, DeliveryStream, ForwardOutcome, Message, MessageSink,
    ReconnectPolicy, SinkError,
};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info, instrument, warn};

/// Unacknowledged deliveries the source may hand out
pub const PREFETCH_COUNT: u16 = 1;

/// Where the relay consumes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    pub queue: String,
    pub consumer_tag: String,
}

impl RelaySettings {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            consumer_tag: "report-relay".to_string(),
        }
    }

    pub fn with_consumer_tag(mut self, consumer_tag: impl Into<String>) -> Self {
        self.consumer_tag = consumer_tag.into();
        self
    }
}

/// Counters for one relay instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub received: u64,
    pub acked: u64,
    pub requeued: u64,
    /// Panics caught while forwarding
    pub faults: u64,
    /// Deliveries the broker flagged as redelivered
    pub redelivered: u64,
    pub source_reconnects: u64,
}

/// Consumes the source queue and forwards every message to one backend
pub struct Relay<C: Connector, B> {
    settings: RelaySettings,
    source: ConnectionManager<C>,
    backend: B,
    topology: Option<TopologyDescriptor>,
    policy: ReconnectPolicy,
    stats: RelayStats,
}

impl<C, B> Relay<C, B>
where
    C: Connector,
    C::Session: AmqpSession,
    B: MessageSink,
{
    pub fn new(settings: RelaySettings, source: C, backend: B) -> Self {
        Self {
            settings,
            source: ConnectionManager::new(source),
            backend,
            topology: None,
            policy: ReconnectPolicy::default(),
            stats: RelayStats::default(),
        }
    }

    /// Provision `topology` on the source broker before consuming
    pub fn with_topology(mut self, topology: TopologyDescriptor) -> Self {
        self.topology = Some(topology);
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run until `shutdown` resolves.
    ///
    /// Startup failures (source connection, provisioning, backend
    /// initialization, first subscription) are returned. Once consuming,
    /// nothing short of `shutdown` stops the loop. `shutdown` is only
    /// observed between messages; an in-flight forward is always disposed
    /// of first.
    pub async fn run<F>(&mut self, shutdown: F) -> RelayResult<RelayStats>
    where
        F: Future<Output = ()> + Send,
    {
        if let Err(e) = self.start().await {
            error!(error = %e, "Relay startup failed");
            self.close().await;
            return Err(e);
        }

        let mut deliveries = match self.subscribe().await {
            Ok(stream) => Some(stream),
            Err(e) => {
                self.close().await;
                return Err(RelayError::Connection(e));
            }
        };
        info!(queue = %self.settings.queue, destination = %self.backend.destination(), "Relay consuming");

        tokio::pin!(shutdown);
        let mut resubscribe_attempt: u32 = 0;
        let mut connectivity_streak: u32 = 0;

        loop {
            let Some(stream) = deliveries.as_mut() else {
                let delay = self.policy.delay_for(resubscribe_attempt);
                tokio::select! {
                    biased;
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                resubscribe_attempt = resubscribe_attempt.saturating_add(1);

                match self.subscribe().await {
                    Ok(stream) => {
                        resubscribe_attempt = 0;
                        self.stats.source_reconnects = self.source.reconnects();
                        info!(reconnects = self.stats.source_reconnects, "Source consumer restored");
                        deliveries = Some(stream);
                    }
                    Err(e) => {
                        self.source.mark_degraded(&e);
                        warn!(attempt = resubscribe_attempt, error = %e, "Resubscribe failed");
                    }
                }
                continue;
            };

            let next = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                next = stream.next_delivery() => next,
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.source.mark_degraded(&e);
                    deliveries = None;
                    continue;
                }
                None => {
                    self.source.mark_degraded("consumer cancelled or channel closed");
                    deliveries = None;
                    continue;
                }
            };

            let outcome = self.forward(&message).await;

            if let Err(e) = self.dispose(&message, &outcome).await {
                // The broker requeues whatever this channel still held
                warn!(
                    delivery_tag = %message.delivery_tag(),
                    outcome = outcome.kind(),
                    error = %e,
                    "Disposition failed, rebuilding source consumer"
                );
                self.source.mark_degraded(&e);
                deliveries = None;
            }

            if matches!(outcome, ForwardOutcome::ConnectivityFailure(_)) {
                connectivity_streak = connectivity_streak.saturating_add(1);
                let delay = self.policy.delay_for(connectivity_streak);
                debug!(streak = connectivity_streak, delay_ms = delay.as_millis() as u64, "Backing off");
                tokio::select! {
                    biased;
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            } else {
                connectivity_streak = 0;
                if !outcome.is_delivered() {
                    // A requeued message can come straight back; let shutdown
                    // and other tasks get polled
                    tokio::task::yield_now().await;
                }
            }
        }

        info!(
            received = self.stats.received,
            acked = self.stats.acked,
            requeued = self.stats.requeued,
            "Shutdown requested, stopping relay"
        );
        self.close().await;
        Ok(self.stats.clone())
    }

    /// Connect the source, provision, initialize the backend
    async fn start(&mut self) -> RelayResult<()> {
        info!(
            source = %self.source.endpoint(),
            queue = %self.settings.queue,
            destination = %self.backend.destination(),
            "Starting relay"
        );

        let session = self.source.initialize().await.map_err(RelayError::Connection)?;
        if let Some(topology) = &self.topology {
            TopologyProvisioner::ensure(session, topology).await?;
        }

        self.backend.initialize().await.map_err(RelayError::Backend)?;
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<<C::Session as AmqpSession>::Deliveries, SinkError> {
        let session = self.source.ensure_live().await?;
        session.set_prefetch(PREFETCH_COUNT).await?;
        let stream = session
            .consume(&self.settings.queue, &self.settings.consumer_tag)
            .await?;
        debug!(queue = %self.settings.queue, prefetch = PREFETCH_COUNT, "Subscribed");
        Ok(stream)
    }

    /// Hand one message to the backend. Panics are caught and reported as
    /// an unknown failure.
    #[instrument(skip_all, fields(delivery_tag = %message.delivery_tag(), size = message.size()))]
    async fn forward(&mut self, message: &Message) -> ForwardOutcome {
        self.stats.received += 1;
        if message.metadata.redelivered {
            self.stats.redelivered += 1;
            warn!(
                routing_key = message.routing_key().unwrap_or(""),
                "Redelivered message, a repeated failure may be looping"
            );
        }

        match AssertUnwindSafe(self.backend.send(message)).catch_unwind().await {
            Ok(outcome) => {
                if !outcome.is_delivered() {
                    warn!(
                        destination = %self.backend.destination(),
                        outcome = outcome.kind(),
                        detail = outcome.detail().unwrap_or(""),
                        "Forward failed, requeueing"
                    );
                }
                outcome
            }
            Err(panic) => {
                self.stats.faults += 1;
                let detail = panic_message(panic.as_ref());
                error!(
                    destination = %self.backend.destination(),
                    detail = %detail,
                    "Backend panicked while forwarding"
                );
                ForwardOutcome::UnknownFailure(format!("backend panicked: {}", detail))
            }
        }
    }

    /// Exactly one ack or requeue for this delivery
    async fn dispose(&mut self, message: &Message, outcome: &ForwardOutcome) -> Result<(), SinkError> {
        let tag = message.delivery_tag();
        let session = self.source.session_mut().ok_or(SinkError::Closed)?;

        if outcome.is_delivered() {
            session.ack(tag).await?;
            self.stats.acked += 1;
            debug!(delivery_tag = %tag, "Acknowledged");
        } else {
            session.nack(tag, true).await?;
            self.stats.requeued += 1;
            debug!(delivery_tag = %tag, outcome = outcome.kind(), "Requeued");
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.backend.close().await;
        self.source.close().await;
        info!("Relay resources released");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings() {
        let settings = RelaySettings::new("upload_queue").with_consumer_tag("relay-7");
        assert_eq!(settings.queue, "upload_queue");
        assert_eq!(settings.consumer_tag, "relay-7");
        assert_eq!(RelaySettings::new("q").consumer_tag, "report-relay");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
