//! # Relay Configuration Loading
//!
//! Two ways to configure a relay process:
//!
//! - **Layered TOML**: a base file, an optional `environments/<env>.toml`
//!   overlay next to it, then prefixed environment variables.
//! - **Key-value `.env` files**: `KEY="value"` lines with `$VAR` expansion,
//!   the format the upload tooling already ships.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use relay_config::{load_layered, EnvFile};
//! # #[derive(serde::Deserialize)] struct Settings { name: String }
//!
//! let settings: Settings = load_layered("config/relay.toml", Some("staging"), "RELAY")?;
//! let env = EnvFile::load(".env")?;
//! tracing::debug!(config = ?env.redacted(), "Loaded .env");
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod env_file;
pub mod layered;

pub use env_file::{is_sensitive_key, EnvFile, REDACTED};
pub use layered::load_layered;
