//! Redis connection setup shared by the token store and admission limiter

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::info;

use crate::config::RedisConfig;

/// Open a managed (auto-reconnecting) connection, bounded by the configured
/// connect timeout.
pub async fn connect_redis(config: &RedisConfig) -> Result<ConnectionManager> {
    let client = redis::Client::open(config.url.as_str()).context("Invalid Redis URL")?;
    let timeout = Duration::from_secs(config.connect_timeout_seconds.max(1));

    let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
        .await
        .map_err(|_| anyhow::anyhow!("Timed out connecting to Redis after {timeout:?}"))?
        .context("Failed to connect to Redis")?;

    info!(key_prefix = %config.key_prefix, "Connected to Redis");
    Ok(conn)
}

/// PING with a deadline; used by the health probe.
pub async fn ping_redis(conn: &ConnectionManager, timeout: Duration) -> Result<()> {
    let mut conn = conn.clone();
    let pong: String = tokio::time::timeout(timeout, redis::cmd("PING").query_async(&mut conn))
        .await
        .map_err(|_| anyhow::anyhow!("Redis ping timed out"))?
        .context("Redis ping failed")?;

    anyhow::ensure!(pong.eq_ignore_ascii_case("PONG"), "Unexpected ping reply: {pong}");
    Ok(())
}
