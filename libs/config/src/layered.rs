//! Layered configuration loading
//!
//! Loads a TOML base file with environment-specific overrides and then
//! environment variables on top.

use anyhow::{Context, Result};
use config_crate::{Config, Environment, File};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Separator between prefix, sections and keys in environment overrides,
/// e.g. `RELAY__SOURCE__HOST`
pub const ENV_SEPARATOR: &str = "__";

/// Overlay file for `environment`, looked up next to the base file
pub fn environment_file(base: &Path, environment: &str) -> PathBuf {
    base.parent()
        .unwrap_or_else(|| Path::new("."))
        .join("environments")
        .join(format!("{}.toml", environment))
}

/// Load `T` from `base`, then `environments/<environment>.toml` if present,
/// then `<PREFIX>__SECTION__KEY` environment variables.
pub fn load_layered<T: DeserializeOwned>(
    base: impl AsRef<Path>,
    environment: Option<&str>,
    prefix: &str,
) -> Result<T> {
    let base = base.as_ref();
    let mut builder = Config::builder().add_source(File::from(base).required(true));

    // Add environment-specific overrides if specified
    if let Some(env) = environment {
        let env_file = environment_file(base, env);
        if env_file.exists() {
            info!("Loading environment config: {:?}", env_file);
            builder = builder.add_source(File::from(env_file));
        } else {
            warn!("Environment config not found: {:?}", env_file);
        }
    }

    builder = builder.add_source(
        Environment::with_prefix(prefix)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder
        .build()
        .with_context(|| format!("Failed to build configuration from {:?}", base))?;
    debug!(base = ?base, "Configuration sources merged");

    config
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize configuration from {:?}", base))
}
