//! Concrete sinks, one per destination kind

pub mod amqp;
pub mod cloud_queue;
pub mod service_bus;

pub use amqp::{AmqpDestination, AmqpSink};
#[cfg(feature = "aws")]
pub use cloud_queue::{AwsConnector, AwsSession};
pub use cloud_queue::{CloudDestination, CloudQueueApi, CloudQueueSink};
pub use service_bus::{BusDestination, BusSender, HttpBusConnector, HttpBusSession, ServiceBusSink};
