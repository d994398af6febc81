use async_trait::async_trait;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter as GovernorRateLimiter};
use nonzero_ext::nonzero;
use redis::aio::ConnectionManager;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Redis key segment for admission counters
const RATE_LIMIT_PREFIX: &str = "ratelimit:";

/// Fixed-window counter: read TTL, increment, arm the window on first hit.
///
/// A key left without an expiry (TTL -1) is re-armed so it cannot pin a
/// client at the limit forever.
const FIXED_WINDOW_SCRIPT: &str = r"
local ttl = redis.call('PTTL', KEYS[1])
local current = redis.call('INCR', KEYS[1])
if current == 1 or ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    ttl = tonumber(ARGV[2])
end
local allowed = 0
if current <= tonumber(ARGV[1]) then
    allowed = 1
end
return {allowed, ttl}
";

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub permitted: bool,
    pub retry_after: Option<Duration>,
}

impl Admission {
    #[must_use]
    pub const fn permit() -> Self {
        Self {
            permitted: true,
            retry_after: None,
        }
    }

    #[must_use]
    pub const fn deny(retry_after: Duration) -> Self {
        Self {
            permitted: false,
            retry_after: Some(retry_after),
        }
    }

    /// Whole seconds for the `Retry-After` header: rounded up, never 0.
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        let Some(wait) = self.retry_after else {
            return 1;
        };
        let mut secs = wait.as_secs();
        if wait.subsec_nanos() > 0 {
            secs += 1;
        }
        secs.max(1)
    }

    /// `Err(Error::RateLimited)` for a denial.
    pub fn check(&self) -> Result<()> {
        if self.permitted {
            Ok(())
        } else {
            Err(Error::RateLimited {
                retry_after_secs: self.retry_after_secs(),
            })
        }
    }
}

/// Per-client request throttle applied before any playback work
#[async_trait]
pub trait AdmissionLimiter: Send + Sync {
    /// Record one request for `key` and decide whether it may proceed.
    async fn allow(&self, key: &str) -> Admission;

    fn strategy_name(&self) -> &'static str;
}

/// In-process token bucket backed by the `governor` crate (GCRA).
///
/// Each key owns an independent bucket of `burst` cells refilling at
/// `requests_per_window / window`. State is lost on restart.
#[derive(Clone)]
pub struct LocalAdmissionLimiter {
    limiter: Arc<DefaultKeyedRateLimiter<String>>,
}

impl std::fmt::Debug for LocalAdmissionLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAdmissionLimiter")
            .field("tracked_keys", &self.limiter.len())
            .finish()
    }
}

impl LocalAdmissionLimiter {
    #[must_use]
    pub fn new(requests_per_window: u32, burst: u32, window: Duration) -> Self {
        // One cell per period, bursting up to `burst` cells
        let period = window
            .checked_div(requests_per_window.max(1))
            .unwrap_or(Duration::from_millis(1))
            .max(Duration::from_nanos(1));
        Self::with_period(period, burst)
    }

    /// Bucket refilling one cell every `period`
    #[must_use]
    pub fn with_period(period: Duration, burst: u32) -> Self {
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(nonzero!(1u32)))
            .allow_burst(NonZeroU32::new(burst).unwrap_or(nonzero!(1u32)));

        Self {
            limiter: Arc::new(GovernorRateLimiter::keyed(quota)),
        }
    }

    /// Drop buckets that have fully refilled, returning how many keys remain.
    pub fn prune(&self) -> usize {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        self.limiter.len()
    }

    /// Run `prune` every `interval` until the returned handle is aborted.
    #[must_use]
    pub fn spawn_pruner(&self, interval: Duration) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let remaining = limiter.prune();
                debug!(remaining, "Pruned idle admission buckets");
            }
        })
    }
}

#[async_trait]
impl AdmissionLimiter for LocalAdmissionLimiter {
    async fn allow(&self, key: &str) -> Admission {
        match self.limiter.check_key(&key.to_string()) {
            Ok(()) => Admission::permit(),
            Err(not_until) => {
                Admission::deny(not_until.wait_time_from(DefaultClock::default().now()))
            }
        }
    }

    fn strategy_name(&self) -> &'static str {
        "local"
    }
}

/// Fixed-window counter shared by every replica through Redis.
///
/// The read-increment-expire sequence runs as one Lua script so concurrent
/// requests for the same key can never over-admit. Fails open when Redis is
/// unreachable.
#[derive(Clone)]
pub struct DistributedAdmissionLimiter {
    conn: ConnectionManager,
    key_prefix: String,
    limit: u32,
    window: Duration,
    op_timeout: Duration,
    script: Arc<redis::Script>,
}

impl std::fmt::Debug for DistributedAdmissionLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedAdmissionLimiter")
            .field("key_prefix", &self.key_prefix)
            .field("limit", &self.limit)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl DistributedAdmissionLimiter {
    #[must_use]
    pub fn new(
        conn: ConnectionManager,
        key_prefix: impl Into<String>,
        limit: u32,
        window: Duration,
        op_timeout: Duration,
    ) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
            limit: limit.max(1),
            window,
            op_timeout,
            script: Arc::new(redis::Script::new(FIXED_WINDOW_SCRIPT)),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{RATE_LIMIT_PREFIX}{key}", self.key_prefix)
    }

    async fn increment(&self, key: &str) -> redis::RedisResult<(i64, i64)> {
        let mut conn = self.conn.clone();
        let window_ms = u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX).max(1);

        let (allowed, ttl_ms): (i64, i64) = self
            .script
            .key(self.key(key))
            .arg(self.limit)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok((allowed, ttl_ms))
    }
}

#[async_trait]
impl AdmissionLimiter for DistributedAdmissionLimiter {
    async fn allow(&self, key: &str) -> Admission {
        match tokio::time::timeout(self.op_timeout, self.increment(key)).await {
            Ok(Ok((1, _))) => Admission::permit(),
            Ok(Ok((_, ttl_ms))) => {
                let ttl_ms = u64::try_from(ttl_ms).unwrap_or(0);
                let retry_after = if ttl_ms > 0 {
                    Duration::from_millis(ttl_ms)
                } else {
                    self.window
                };
                Admission::deny(retry_after)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Redis error during admission check, allowing request (fail open)");
                Admission::permit()
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.op_timeout.as_millis() as u64,
                    "Admission check timed out, allowing request (fail open)"
                );
                Admission::permit()
            }
        }
    }

    fn strategy_name(&self) -> &'static str {
        "distributed"
    }
}
