//! Report relay service

pub use message_sink as sink;
pub use relay_config as config;
pub use relay_core as core;

pub use relay_core::{Relay, RelayConfig, RelayError, RelaySettings, RelayStats};
