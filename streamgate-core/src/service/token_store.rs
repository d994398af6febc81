//! Playback token store
//!
//! Issues opaque tokens bound server-side to a stream (and optionally a viewer)
//! and validates them against a stream id.
//!
//! ## Storage Backends
//!
//! - **Redis** (multi-replica): bindings are written with a millisecond TTL and
//!   expire inside Redis; the store never deletes explicitly.
//! - **Memory** (single-replica): bindings live in a sharded map and are swept
//!   periodically; expired entries already read as absent.
//! - **Insecure standalone**: accepts every token. Only selectable by name.
//!
//! `validate` never reports *why* a token failed, so unknown, expired and
//! cross-stream tokens are indistinguishable to callers.

use async_trait::async_trait;
use base64::Engine;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::models::token::redact;
use crate::models::{PlaybackToken, TokenBinding};
use crate::{Error, Result};

/// Redis key segment for playback tokens
const PLAYBACK_TOKEN_PREFIX: &str = "playback:token:";
/// Token length in bytes (256 bits of entropy)
const TOKEN_LENGTH: usize = 32;

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Generate a fresh token bound to `stream_id` that expires after `ttl`.
    async fn issue(
        &self,
        stream_id: &str,
        viewer_id: Option<&str>,
        ttl: Duration,
    ) -> Result<PlaybackToken>;

    /// True only for a live token issued for exactly `stream_id`.
    async fn validate(&self, token: &str, stream_id: &str) -> bool;

    fn backend_name(&self) -> &'static str;
}

/// Generate a secure random token string
#[must_use]
pub fn generate_token() -> PlaybackToken {
    let mut rng = rand::thread_rng();
    let mut bytes = [0u8; TOKEN_LENGTH];
    rand::RngCore::fill_bytes(&mut rng, &mut bytes);

    PlaybackToken::from_string(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

fn new_binding(stream_id: &str, viewer_id: Option<&str>) -> TokenBinding {
    TokenBinding {
        stream_id: stream_id.to_string(),
        viewer_id: viewer_id
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string),
        issued_at: chrono::Utc::now().timestamp(),
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    binding: TokenBinding,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process token store for single-replica deployments
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStore {
    entries: Arc<DashMap<String, MemoryEntry>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Evict expired bindings, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run `sweep` every `interval` until the returned handle is aborted.
    #[must_use]
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = store.sweep();
                if removed > 0 {
                    debug!(removed, remaining = store.len(), "Swept expired playback tokens");
                }
            }
        })
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn issue(
        &self,
        stream_id: &str,
        viewer_id: Option<&str>,
        ttl: Duration,
    ) -> Result<PlaybackToken> {
        let token = generate_token();
        let entry = MemoryEntry {
            binding: new_binding(stream_id, viewer_id),
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(token.as_str().to_string(), entry);

        debug!(
            stream_id,
            token = %token.redacted(),
            ttl_ms = ttl.as_millis() as u64,
            mode = "memory",
            "Playback token issued"
        );
        Ok(token)
    }

    async fn validate(&self, token: &str, stream_id: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        let now = Instant::now();

        let matched = match self.entries.get(token) {
            None => return false,
            Some(entry) if entry.is_expired(now) => None,
            Some(entry) => Some(entry.binding.stream_id == stream_id),
        };

        match matched {
            Some(valid) => valid,
            None => {
                self.entries.remove_if(token, |_, entry| entry.is_expired(now));
                debug!(token = %redact(token), mode = "memory", "Playback token expired");
                false
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Shared token store for multi-replica deployments
#[derive(Clone)]
pub struct RedisTokenStore {
    conn: ConnectionManager,
    key_prefix: String,
    op_timeout: Duration,
}

impl std::fmt::Debug for RedisTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTokenStore")
            .field("key_prefix", &self.key_prefix)
            .field("op_timeout", &self.op_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisTokenStore {
    #[must_use]
    pub fn new(conn: ConnectionManager, key_prefix: impl Into<String>, op_timeout: Duration) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
            op_timeout,
        }
    }

    fn key(&self, token: &str) -> String {
        format!("{}{PLAYBACK_TOKEN_PREFIX}{token}", self.key_prefix)
    }

    async fn lookup(&self, token: &str) -> Result<Option<TokenBinding>> {
        let mut conn = self.conn.clone();
        let key = self.key(token);

        let json: Option<String> =
            tokio::time::timeout(self.op_timeout, conn.get::<_, Option<String>>(&key))
                .await
                .map_err(|_| Error::Internal("Token store lookup timed out".to_string()))??;

        json.map(|json| serde_json::from_str(&json).map_err(Error::from))
            .transpose()
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn issue(
        &self,
        stream_id: &str,
        viewer_id: Option<&str>,
        ttl: Duration,
    ) -> Result<PlaybackToken> {
        let token = generate_token();
        let json = serde_json::to_string(&new_binding(stream_id, viewer_id))?;
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let mut conn = self.conn.clone();
        let key = self.key(token.as_str());
        tokio::time::timeout(
            self.op_timeout,
            conn.pset_ex::<_, _, ()>(&key, json, ttl_ms),
        )
        .await
        .map_err(|_| Error::Internal("Token store write timed out".to_string()))??;

        debug!(
            stream_id,
            token = %token.redacted(),
            ttl_ms,
            mode = "redis",
            "Playback token issued"
        );
        Ok(token)
    }

    async fn validate(&self, token: &str, stream_id: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        match self.lookup(token).await {
            Ok(Some(binding)) => binding.stream_id == stream_id,
            Ok(None) => false,
            Err(e) => {
                // Fail closed: an unreachable store must not authorize playback
                warn!(
                    token = %redact(token),
                    error = %e,
                    "Token store unavailable during validation, rejecting token"
                );
                false
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// Issues real tokens but treats every token as valid.
///
/// Exists for running the edge without any backing store during local
/// development. Never selected unless configured by name.
#[derive(Debug, Clone, Default)]
pub struct InsecureStandaloneTokenStore {
    issuer: MemoryTokenStore,
}

impl InsecureStandaloneTokenStore {
    #[must_use]
    pub fn new() -> Self {
        warn!(
            "Playback token validation is DISABLED (insecure_standalone backend). \
             Every token is accepted for every stream. Do not run this in production."
        );
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InsecureStandaloneTokenStore {
    async fn issue(
        &self,
        stream_id: &str,
        viewer_id: Option<&str>,
        ttl: Duration,
    ) -> Result<PlaybackToken> {
        self.issuer.issue(stream_id, viewer_id, ttl).await
    }

    async fn validate(&self, token: &str, stream_id: &str) -> bool {
        debug!(token = %redact(token), stream_id, "Accepting token without validation");
        true
    }

    fn backend_name(&self) -> &'static str {
        "insecure_standalone"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(30);

    #[test]
    fn test_token_generation() {
        let token1 = generate_token();
        let token2 = generate_token();

        assert_ne!(token1, token2);
        // 32 bytes, unpadded base64
        assert_eq!(token1.as_str().len(), 43);
        assert!(!token1.as_str().contains('+'));
        assert!(!token1.as_str().contains('/'));
        assert!(!token1.as_str().contains('='));
    }

    #[tokio::test]
    async fn test_memory_token_validates_for_its_stream_only() {
        let store = MemoryTokenStore::new();
        let token = store.issue("stream-a", Some("viewer-1"), TTL).await.unwrap();

        assert!(store.validate(token.as_str(), "stream-a").await);
        assert!(!store.validate(token.as_str(), "stream-b").await);
        assert!(!store.validate(token.as_str(), "").await);
    }

    #[tokio::test]
    async fn test_memory_tokens_are_reusable_until_expiry() {
        let store = MemoryTokenStore::new();
        let token = store.issue("stream-a", None, TTL).await.unwrap();

        for _ in 0..3 {
            assert!(store.validate(token.as_str(), "stream-a").await);
        }
    }

    #[tokio::test]
    async fn test_unknown_and_empty_tokens_fail() {
        let store = MemoryTokenStore::new();
        assert!(!store.validate("never-issued", "stream-a").await);
        assert!(!store.validate("", "stream-a").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_token_expires_after_ttl() {
        let store = MemoryTokenStore::new();
        let token = store
            .issue("stream-a", None, Duration::from_secs(5))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(4999)).await;
        assert!(store.validate(token.as_str(), "stream-a").await);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!store.validate(token.as_str(), "stream-a").await);
        // Expired entry is dropped on read
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_and_unknown_are_indistinguishable() {
        let store = MemoryTokenStore::new();
        let token = store
            .issue("stream-a", None, Duration::from_secs(1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        let expired = store.validate(token.as_str(), "stream-a").await;
        let unknown = store.validate("never-issued", "stream-a").await;
        assert_eq!(expired, unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_expired() {
        let store = MemoryTokenStore::new();
        store
            .issue("stream-a", None, Duration::from_secs(1))
            .await
            .unwrap();
        let keep = store
            .issue("stream-a", None, Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.sweep(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.validate(keep.as_str(), "stream-a").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper_runs() {
        let store = MemoryTokenStore::new();
        store
            .issue("stream-a", None, Duration::from_secs(1))
            .await
            .unwrap();

        let handle = store.spawn_sweeper(Duration::from_secs(10));
        // First tick fires immediately, the second after the interval
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(store.is_empty());
        handle.abort();
    }

    #[tokio::test]
    async fn test_insecure_store_accepts_anything() {
        let store = InsecureStandaloneTokenStore::new();
        let token = store.issue("stream-a", None, TTL).await.unwrap();

        assert!(store.validate(token.as_str(), "stream-b").await);
        assert!(store.validate("garbage", "stream-a").await);
        assert_eq!(store.backend_name(), "insecure_standalone");
    }

    async fn redis_store() -> RedisTokenStore {
        let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
        let conn = ConnectionManager::new(client).await.unwrap();
        RedisTokenStore::new(conn, "streamgate-test:", Duration::from_secs(2))
    }

    #[tokio::test]
    #[ignore = "Requires Redis server"]
    async fn test_redis_token_round_trip() {
        let store = redis_store().await;
        let token = store.issue("stream-a", Some("viewer-1"), TTL).await.unwrap();

        assert!(store.validate(token.as_str(), "stream-a").await);
        assert!(!store.validate(token.as_str(), "stream-b").await);
        assert!(!store.validate("never-issued", "stream-a").await);
    }

    #[tokio::test]
    #[ignore = "Requires Redis server"]
    async fn test_redis_token_expires() {
        let store = redis_store().await;
        let token = store
            .issue("stream-a", None, Duration::from_millis(200))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!store.validate(token.as_str(), "stream-a").await);
    }

    async fn failing_redis_store() -> RedisTokenStore {
        let url = crate::test_helpers::spawn_failing_redis().await.unwrap();
        let client = redis::Client::open(url).unwrap();
        let conn = ConnectionManager::new(client).await.unwrap();
        RedisTokenStore::new(conn, "streamgate-test:", Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_redis_errors_surface_on_issue() {
        let store = failing_redis_store().await;
        assert!(store.issue("stream-a", None, TTL).await.is_err());
    }

    #[tokio::test]
    async fn test_redis_errors_fail_validation_closed() {
        let store = failing_redis_store().await;
        assert!(!store.validate("any-token", "stream-a").await);
    }
}
