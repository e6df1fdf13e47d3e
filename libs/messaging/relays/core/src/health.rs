//! Startup health checks: connect, confirm the handles are open, close.

use message_sink::{Connector, MessageSink, Session};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub service: String,
    pub status: HealthStatus,
    pub reason: Option<String>,
}

impl HealthReport {
    pub fn up(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            status: HealthStatus::Up,
            reason: None,
        }
    }

    pub fn down(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            status: HealthStatus::Down,
            reason: Some(reason.into()),
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == HealthStatus::Up
    }

    fn log(self) -> Self {
        match &self.reason {
            None => info!(service = %self.service, "Health check passed"),
            Some(reason) => warn!(service = %self.service, reason = %reason, "Health check failed"),
        }
        self
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.status, &self.reason) {
            (HealthStatus::Up, _) => write!(f, "{}: UP", self.service),
            (HealthStatus::Down, Some(reason)) => write!(f, "{}: DOWN ({})", self.service, reason),
            (HealthStatus::Down, None) => write!(f, "{}: DOWN", self.service),
        }
    }
}

/// Open and close one session on the source broker
pub async fn check_source<C: Connector>(connector: &C, timeout: Duration) -> HealthReport {
    let service = connector.endpoint();

    let report = match tokio::time::timeout(timeout, connector.connect()).await {
        Err(_) => HealthReport::down(service, format!("connect timed out after {:?}", timeout)),
        Ok(Err(e)) => HealthReport::down(service, e.to_string()),
        Ok(Ok(mut session)) => {
            let open = session.is_open();
            if let Err(e) = session.close().await {
                debug!(error = %e, "Closing health check session failed");
            }
            if open {
                HealthReport::up(service)
            } else {
                HealthReport::down(service, "session closed right after connect")
            }
        }
    };
    report.log()
}

/// Initialize and close `sink`
pub async fn check_sink<S: MessageSink + ?Sized>(sink: &mut S, timeout: Duration) -> HealthReport {
    let service = sink.destination();

    let initialized = tokio::time::timeout(timeout, sink.initialize()).await;
    let report = match initialized {
        Err(_) => HealthReport::down(service, format!("initialize timed out after {:?}", timeout)),
        Ok(Err(e)) => HealthReport::down(service, e.to_string()),
        Ok(Ok(())) if sink.is_connected() => HealthReport::up(service),
        Ok(Ok(())) => HealthReport::down(service, "initialized but not connected"),
    };
    sink.close().await;
    report.log()
}
