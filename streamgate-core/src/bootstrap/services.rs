//! Service initialization and backend selection

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    bootstrap::connect_redis,
    config::{RateLimitStrategy, TokenBackend},
    repository::InMemoryStreamCatalog,
    service::{
        AdmissionLimiter, DistributedAdmissionLimiter, InsecureStandaloneTokenStore,
        LocalAdmissionLimiter, MemoryTokenStore, RedisTokenStore, StreamAccessService,
        TokenStore,
    },
    Config,
};

/// Container for all initialized services
pub struct Services {
    /// Token issuance and access resolution
    pub access: Arc<StreamAccessService>,
    /// Admission limiter, `None` when rate limiting is disabled
    pub limiter: Option<Arc<dyn AdmissionLimiter>>,
    /// Shared Redis connection, when one is in use
    pub redis: Option<ConnectionManager>,
    /// Sweeper and pruner tasks, aborted on shutdown
    pub background_tasks: Vec<JoinHandle<()>>,
}

impl Services {
    /// Stop background housekeeping
    pub fn shutdown(&mut self) {
        for task in self.background_tasks.drain(..) {
            task.abort();
        }
    }
}

/// Initialize all core services
pub async fn init_services(config: &Config) -> anyhow::Result<Services> {
    info!("Initializing services...");

    let redis = connect_if_needed(config).await?;
    let mut background_tasks = Vec::new();

    let catalog = Arc::new(InMemoryStreamCatalog::with_streams(
        config.catalog.streams.iter().cloned(),
    ));
    info!(streams = catalog.len(), "Stream catalog loaded");

    let tokens = select_token_store(config, redis.as_ref(), &mut background_tasks)?;
    info!(backend = tokens.backend_name(), "Token store initialized");

    let access = Arc::new(StreamAccessService::new(
        catalog,
        tokens,
        config.playback.token_ttl(),
    ));

    let limiter = select_limiter(config, redis.as_ref(), &mut background_tasks);
    match &limiter {
        Some(limiter) => info!(strategy = limiter.strategy_name(), "Admission limiter initialized"),
        None => warn!("Rate limiting disabled"),
    }

    Ok(Services {
        access,
        limiter,
        redis,
        background_tasks,
    })
}

/// Redis is mandatory when a backend names it explicitly; under `auto` a
/// failed connection degrades to the in-process backends.
async fn connect_if_needed(config: &Config) -> anyhow::Result<Option<ConnectionManager>> {
    let required = config.playback.token_backend == TokenBackend::Redis
        || (config.rate_limit.enabled && config.rate_limit.strategy == RateLimitStrategy::Distributed);

    if !config.redis.is_configured() {
        if required {
            anyhow::bail!("Redis backend selected but redis.url is empty");
        }
        return Ok(None);
    }

    match connect_redis(&config.redis).await {
        Ok(conn) => Ok(Some(conn)),
        Err(e) if required => Err(e),
        Err(e) => {
            warn!(
                error = %e,
                "Redis unavailable, falling back to in-process token store and limiter. \
                 Tokens and limits are NOT shared across replicas."
            );
            Ok(None)
        }
    }
}

fn select_token_store(
    config: &Config,
    redis: Option<&ConnectionManager>,
    background_tasks: &mut Vec<JoinHandle<()>>,
) -> anyhow::Result<Arc<dyn TokenStore>> {
    let redis_store = |conn: &ConnectionManager| -> Arc<dyn TokenStore> {
        Arc::new(RedisTokenStore::new(
            conn.clone(),
            config.redis.key_prefix.clone(),
            config.redis.operation_timeout(),
        ))
    };
    let sweep_interval = Duration::from_secs(config.playback.token_sweep_interval_seconds.max(1));

    let store: Arc<dyn TokenStore> = match (config.playback.token_backend, redis) {
        (TokenBackend::Redis | TokenBackend::Auto, Some(conn)) => redis_store(conn),
        (TokenBackend::Redis, None) => {
            anyhow::bail!("Redis token backend selected but no Redis connection is available")
        }
        (TokenBackend::InsecureStandalone, _) => Arc::new(InsecureStandaloneTokenStore::new()),
        (TokenBackend::Memory | TokenBackend::Auto, _) => {
            let store = MemoryTokenStore::new();
            background_tasks.push(store.spawn_sweeper(sweep_interval));
            Arc::new(store)
        }
    };
    Ok(store)
}

fn select_limiter(
    config: &Config,
    redis: Option<&ConnectionManager>,
    background_tasks: &mut Vec<JoinHandle<()>>,
) -> Option<Arc<dyn AdmissionLimiter>> {
    let rl = &config.rate_limit;
    if !rl.enabled {
        return None;
    }

    let limiter: Arc<dyn AdmissionLimiter> = match (rl.strategy, redis) {
        (RateLimitStrategy::Distributed | RateLimitStrategy::Auto, Some(conn)) => {
            Arc::new(DistributedAdmissionLimiter::new(
                conn.clone(),
                config.redis.key_prefix.clone(),
                rl.burst,
                rl.window(),
                config.redis.operation_timeout(),
            ))
        }
        _ => {
            let limiter = LocalAdmissionLimiter::new(rl.requests_per_window, rl.burst, rl.window());
            background_tasks.push(limiter.spawn_pruner(rl.window().max(Duration::from_secs(1))));
            Arc::new(limiter)
        }
    };
    Some(limiter)
}
