//! # cache
//!
//! Recent-track cache: the most recent messages/observations from the
//! upstream feed, kept for bounded-memory retrieval, replay to new
//! subscribers, and time-windowed queries.
//!
//! ## Backend policy
//! Primary backend is a redis sorted set scored by epoch seconds; the
//! fallback is an in-process bounded deque. Every operation health-checks
//! the connection and silently degrades to the fallback on failure —
//! `stats().backend` reports which tier served the call. Reconnection is
//! attempted lazily on the next operation.
//!
//! All mutations and reads are serialized under a single mutex so the
//! backend swap and eviction stay race-free.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

// ── Items & stats ─────────────────────────────────────────────────────────────

/// One cached entry. `key` is the feed identifier (MMSI or radar target)
/// when the caller wants newest-per-key replacement semantics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheItem {
    /// ISO-8601 wall-clock stamp assigned at insertion.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub data: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_messages: u64,
    pub current_size: usize,
    pub valid_items: usize,
    pub max_size: usize,
    pub ttl_seconds: u64,
    pub backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

// ── Cache ─────────────────────────────────────────────────────────────────────

struct Inner {
    conn: Option<MultiplexedConnection>,
    fallback: VecDeque<(DateTime<Utc>, CacheItem)>,
    total_messages: u64,
    last_updated: Option<DateTime<Utc>>,
}

pub struct RecentTrackCache {
    client: Option<redis::Client>,
    redis_key: String,
    max_size: usize,
    ttl_seconds: u64,
    inner: Mutex<Inner>,
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

impl RecentTrackCache {
    /// Build a cache with the given redis URL (None disables redis and
    /// pins the cache to the in-memory tier).
    pub fn new(
        redis_url: Option<&str>,
        key_prefix: &str,
        max_size: usize,
        ttl_seconds: u64,
    ) -> Self {
        let client = redis_url.and_then(|url| match redis::Client::open(url) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!("cache: invalid redis URL, using in-memory fallback: {e}");
                None
            }
        });
        if client.is_some() {
            info!("cache: redis backend configured (prefix `{key_prefix}`)");
        } else {
            info!("cache: in-memory backend only");
        }
        Self {
            client,
            redis_key: format!("{key_prefix}websocket:messages"),
            max_size,
            ttl_seconds,
            inner: Mutex::new(Inner {
                conn: None,
                fallback: VecDeque::new(),
                total_messages: 0,
                last_updated: None,
            }),
        }
    }

    /// In-memory-only cache, used by tests and by deployments without a
    /// key/value store.
    pub fn in_memory(max_size: usize, ttl_seconds: u64) -> Self {
        Self::new(None, "test_", max_size, ttl_seconds)
    }

    /// Health check + lazy reconnect. Returns a connection clone when the
    /// redis tier is usable.
    async fn checked_conn(&self, inner: &mut Inner) -> Option<MultiplexedConnection> {
        if let Some(conn) = &inner.conn {
            let mut probe = conn.clone();
            let pong: redis::RedisResult<String> =
                redis::cmd("PING").query_async(&mut probe).await;
            match pong {
                Ok(_) => return Some(conn.clone()),
                Err(e) => {
                    warn!("cache: redis connection lost, attempting reconnect: {e}");
                    inner.conn = None;
                }
            }
        }
        let client = self.client.as_ref()?;
        match tokio::time::timeout(CONNECT_TIMEOUT, client.get_multiplexed_tokio_connection())
            .await
        {
            Ok(Ok(conn)) => {
                info!("cache: redis connection established");
                inner.conn = Some(conn.clone());
                Some(conn)
            }
            Ok(Err(e)) => {
                debug!("cache: redis unavailable, using in-memory fallback: {e}");
                None
            }
            Err(_) => {
                debug!("cache: redis connect timed out, using in-memory fallback");
                None
            }
        }
    }

    fn now_score(now: DateTime<Utc>) -> f64 {
        now.timestamp_millis() as f64 / 1000.0
    }

    fn is_valid(&self, stamp: &DateTime<Utc>, now: DateTime<Utc>) -> bool {
        (now - *stamp).num_milliseconds() as f64 / 1000.0 <= self.ttl_seconds as f64
    }

    fn parse_stamp(item: &CacheItem) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&item.timestamp)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    // ── Operations ────────────────────────────────────────────────────────────

    /// Insert one entry, stamped with the current wall clock. When `key`
    /// is given, any prior entry with the same key is replaced. Evicts the
    /// oldest entries beyond `max_size` and refreshes the backend TTL.
    pub async fn add(
        &self,
        data: serde_json::Value,
        metadata: serde_json::Value,
        key: Option<String>,
    ) {
        let now = Utc::now();
        let item = CacheItem {
            timestamp: now.to_rfc3339(),
            key,
            data,
            metadata,
        };

        let mut inner = self.inner.lock().await;
        inner.total_messages += 1;
        inner.last_updated = Some(now);

        if let Some(mut conn) = self.checked_conn(&mut inner).await {
            match self.redis_add(&mut conn, &item, now).await {
                Ok(()) => return,
                Err(e) => {
                    warn!("cache: redis add failed, falling back to memory: {e}");
                    inner.conn = None;
                }
            }
        }

        if let Some(k) = item.key.as_deref() {
            inner.fallback.retain(|(_, it)| it.key.as_deref() != Some(k));
        }
        inner.fallback.push_back((now, item));
        while inner.fallback.len() > self.max_size {
            inner.fallback.pop_front();
        }
    }

    async fn redis_add(
        &self,
        conn: &mut MultiplexedConnection,
        item: &CacheItem,
        now: DateTime<Utc>,
    ) -> redis::RedisResult<()> {
        // Newest-per-key replacement: drop the prior member carrying the
        // same key. Linear, like every other small-cache scan here.
        if let Some(k) = item.key.as_deref() {
            let members: Vec<String> = conn.zrange(&self.redis_key, 0, -1).await?;
            for member in members {
                if let Ok(existing) = serde_json::from_str::<CacheItem>(&member) {
                    if existing.key.as_deref() == Some(k) {
                        let _: i64 = conn.zrem(&self.redis_key, &member).await?;
                    }
                }
            }
        }

        let member = serde_json::to_string(item).unwrap_or_default();
        let _: i64 = conn
            .zadd(&self.redis_key, member, Self::now_score(now))
            .await?;

        let count: i64 = conn.zcard(&self.redis_key).await?;
        let max = self.max_size as i64;
        if count > max {
            let _: i64 = conn
                .zremrangebyrank(&self.redis_key, 0, (count - max - 1) as isize)
                .await?;
        }

        let _: bool = conn.expire(&self.redis_key, self.ttl_seconds as i64).await?;
        Ok(())
    }

    /// Most recent non-expired entries, newest first, up to `limit`.
    pub async fn get_recent(&self, limit: usize) -> Vec<CacheItem> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        if let Some(mut conn) = self.checked_conn(&mut inner).await {
            let members: redis::RedisResult<Vec<String>> = conn
                .zrevrange(&self.redis_key, 0, limit as isize - 1)
                .await;
            match members {
                Ok(members) => {
                    return members
                        .iter()
                        .filter_map(|m| serde_json::from_str::<CacheItem>(m).ok())
                        .filter(|item| {
                            Self::parse_stamp(item)
                                .map(|st| self.is_valid(&st, now))
                                .unwrap_or(false)
                        })
                        .collect();
                }
                Err(e) => {
                    warn!("cache: redis get_recent failed, falling back to memory: {e}");
                    inner.conn = None;
                }
            }
        }

        inner
            .fallback
            .iter()
            .rev()
            .filter(|(st, _)| self.is_valid(st, now))
            .take(limit)
            .map(|(_, item)| item.clone())
            .collect()
    }

    /// All entries whose stamp falls in `[start, end]`.
    pub async fn get_by_timerange(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<CacheItem> {
        let mut inner = self.inner.lock().await;

        if let Some(mut conn) = self.checked_conn(&mut inner).await {
            let members: redis::RedisResult<Vec<String>> = conn
                .zrangebyscore(
                    &self.redis_key,
                    Self::now_score(start),
                    Self::now_score(end),
                )
                .await;
            match members {
                Ok(members) => {
                    return members
                        .iter()
                        .filter_map(|m| serde_json::from_str(m).ok())
                        .collect();
                }
                Err(e) => {
                    warn!("cache: redis get_by_timerange failed, falling back to memory: {e}");
                    inner.conn = None;
                }
            }
        }

        inner
            .fallback
            .iter()
            .filter(|(st, _)| *st >= start && *st <= end)
            .map(|(_, item)| item.clone())
            .collect()
    }

    /// Entries whose `data[k]` equals `v`. Linear scan — O(N), fine for a
    /// cache this size.
    pub async fn search_by_key(&self, k: &str, v: &serde_json::Value) -> Vec<CacheItem> {
        self.scan(|item| item.data.get(k) == Some(v)).await
    }

    /// Entries whose data equals `data` exactly. O(N).
    pub async fn search_exact(&self, data: &serde_json::Value) -> Vec<CacheItem> {
        self.scan(|item| &item.data == data).await
    }

    async fn scan(&self, pred: impl Fn(&CacheItem) -> bool) -> Vec<CacheItem> {
        let mut inner = self.inner.lock().await;

        if let Some(mut conn) = self.checked_conn(&mut inner).await {
            let members: redis::RedisResult<Vec<String>> =
                conn.zrange(&self.redis_key, 0, -1).await;
            match members {
                Ok(members) => {
                    return members
                        .iter()
                        .filter_map(|m| serde_json::from_str::<CacheItem>(m).ok())
                        .filter(|item| pred(item))
                        .collect();
                }
                Err(e) => {
                    warn!("cache: redis search failed, falling back to memory: {e}");
                    inner.conn = None;
                }
            }
        }

        inner
            .fallback
            .iter()
            .map(|(_, item)| item)
            .filter(|item| pred(item))
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let total_messages = inner.total_messages;
        let last_updated = inner.last_updated.map(|dt| dt.to_rfc3339());

        if let Some(mut conn) = self.checked_conn(&mut inner).await {
            let counts: redis::RedisResult<(i64, i64)> = async {
                let size: i64 = conn.zcard(&self.redis_key).await?;
                let cutoff = Self::now_score(now) - self.ttl_seconds as f64;
                let valid: i64 = conn.zcount(&self.redis_key, cutoff, "+inf").await?;
                Ok((size, valid))
            }
            .await;
            match counts {
                Ok((size, valid)) => {
                    return CacheStats {
                        total_messages,
                        current_size: size as usize,
                        valid_items: valid as usize,
                        max_size: self.max_size,
                        ttl_seconds: self.ttl_seconds,
                        backend: "redis",
                        redis_key: Some(self.redis_key.clone()),
                        last_updated,
                    };
                }
                Err(e) => {
                    warn!("cache: redis stats failed, falling back to memory: {e}");
                    inner.conn = None;
                }
            }
        }

        let valid = inner
            .fallback
            .iter()
            .filter(|(st, _)| self.is_valid(st, now))
            .count();
        CacheStats {
            total_messages,
            current_size: inner.fallback.len(),
            valid_items: valid,
            max_size: self.max_size,
            ttl_seconds: self.ttl_seconds,
            backend: "memory",
            redis_key: None,
            last_updated,
        }
    }

    /// Drop everything from both tiers and reset the counters.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;

        if let Some(mut conn) = self.checked_conn(&mut inner).await {
            let deleted: redis::RedisResult<i64> = conn.del(&self.redis_key).await;
            if let Err(e) = deleted {
                warn!("cache: redis clear failed: {e}");
                inner.conn = None;
            }
        }

        inner.fallback.clear();
        inner.total_messages = 0;
        inner.last_updated = None;
    }

    /// Remove expired entries. Returns how many were dropped.
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        if let Some(mut conn) = self.checked_conn(&mut inner).await {
            let cutoff = Self::now_score(now) - self.ttl_seconds as f64;
            let removed: redis::RedisResult<i64> = conn
                .zrembyscore(&self.redis_key, "-inf", cutoff)
                .await;
            match removed {
                Ok(n) => {
                    if n > 0 {
                        debug!("cache: cleaned up {n} expired redis entries");
                    }
                    return n as usize;
                }
                Err(e) => {
                    warn!("cache: redis cleanup failed, falling back to memory: {e}");
                    inner.conn = None;
                }
            }
        }

        let before = inner.fallback.len();
        let ttl = self.ttl_seconds;
        inner
            .fallback
            .retain(|(st, _)| (now - *st).num_milliseconds() as f64 / 1000.0 <= ttl as f64);
        before - inner.fallback.len()
    }
}

// ── Tests (in-memory tier) ────────────────────────────────────────────────────
