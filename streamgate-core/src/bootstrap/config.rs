//! Configuration loading

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::Config;

const CWD_CONFIG: &str = "config.yaml";
const MOUNTED_CONFIG: &str = "/config/config.yaml";

/// Load configuration from config file or environment variables
///
/// Config file search order:
/// 1. `explicit_path` (CLI `--config` or `STREAMGATE_CONFIG_PATH`)
/// 2. ./config.yaml (current working directory)
/// 3. /config/config.yaml (container mount path)
/// 4. Fall back to environment variables only
///
/// Runs before logging is installed, so progress goes to stderr.
pub fn load_config(explicit_path: Option<&str>) -> Result<Config> {
    let config_path = find_config_file(explicit_path)?;

    let config = if let Some(path) = config_path {
        eprintln!("Loading config from {path}");
        Config::from_file(&path).with_context(|| format!("Failed to load {path}"))?
    } else {
        eprintln!("No config file found, using environment variables");
        Config::from_env().context("Failed to load config from environment")?
    };

    // Fail fast on misconfigurations
    if let Err(errors) = config.validate() {
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    Ok(config)
}

/// Log a summary once logging is up
pub fn log_config_summary(config: &Config) {
    info!(
        http_address = %config.http_address(),
        token_backend = ?config.playback.token_backend,
        rate_limit_enabled = config.rate_limit.enabled,
        rate_limit_strategy = ?config.rate_limit.strategy,
        redis_configured = config.redis.is_configured(),
        streams = config.catalog.streams.len(),
        "Configuration loaded and validated"
    );
}

fn find_config_file(explicit_path: Option<&str>) -> Result<Option<String>> {
    if let Some(path) = explicit_path.map(str::trim).filter(|p| !p.is_empty()) {
        if !Path::new(path).exists() {
            anyhow::bail!("Config file {path} does not exist");
        }
        return Ok(Some(path.to_string()));
    }

    Ok([CWD_CONFIG, MOUNTED_CONFIG]
        .into_iter()
        .find(|candidate| Path::new(candidate).exists())
        .map(str::to_string))
}
