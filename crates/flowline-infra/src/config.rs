//! Engine configuration loader.
//!
//! Reads `flowline.toml` and deserializes it into [`EngineConfig`]. A missing
//! file yields the defaults; a file that exists but does not parse or
//! validate is an error, since a node must not start on a half-read setup.

use std::path::Path;

use flowline_types::config::EngineConfig;
use flowline_types::error::ConfigError;

use crate::sqlite::pool::default_database_url;

/// Load and validate the engine configuration at `path`.
pub async fn load_engine_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return Ok(EngineConfig::default());
        }
        Err(err) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                reason: err.to_string(),
            });
        }
    };

    let config: EngineConfig =
        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.validate()?;
    tracing::debug!(path = %path.display(), group = %config.executor.group, "Loaded engine config");
    Ok(config)
}

/// Resolve the database URL.
///
/// Priority: explicit override (CLI flag or env var), then `database_url`
/// from the config file, then the default under the data directory.
pub fn resolve_database_url(config: &EngineConfig, override_url: Option<&str>) -> String {
    override_url
        .map(str::to_string)
        .or_else(|| config.database_url.clone())
        .unwrap_or_else(default_database_url)
}
