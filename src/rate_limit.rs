//! Fixed-window request limiter keyed by client address.
//!
//! Counters live behind [`RateLimitStore`] so the in-process map can be
//! swapped for a shared cache without touching the admission logic. The
//! read-modify-write is not atomic: two requests from the same client that
//! race at the limit boundary may both be admitted.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::config::RateLimitConfig;
use crate::error::RelayError;

/// Counter state for one client within one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub count: u32,
    pub reset_at: Instant,
}

#[async_trait::async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<RateLimitRecord>;
    /// Store `record`, letting the backend forget it after `ttl`.
    async fn put(&self, key: &str, record: RateLimitRecord, ttl: Duration);
}

/// Process-local store. Entries expire lazily on read and in bulk through
/// [`InMemoryStore::purge_expired`].
#[derive(Default)]
pub struct InMemoryStore {
    entries: DashMap<String, (RateLimitRecord, Instant)>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry whose TTL has passed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Purge expired entries every `every` until the returned task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = self.purge_expired();
                if removed > 0 {
                    tracing::debug!(removed, remaining = self.len(), "purged expired rate limit records");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait::async_trait]
impl RateLimitStore for InMemoryStore {
    async fn get(&self, key: &str) -> Option<RateLimitRecord> {
        let now = Instant::now();
        let record = {
            let entry = self.entries.get(key)?;
            let (record, expires_at) = *entry.value();
            (expires_at > now).then_some(record)
        };
        if record.is_none() {
            self.entries.remove_if(key, |_, (_, expires_at)| *expires_at <= now);
        }
        record
    }

    async fn put(&self, key: &str, record: RateLimitRecord, ttl: Duration) {
        self.entries
            .insert(key.to_string(), (record, Instant::now() + ttl));
    }
}

/// Outcome of an admitted request. The counter write runs in the
/// background; callers may ignore `write_back` or await it.
#[derive(Debug)]
pub struct Admission {
    pub count: u32,
    pub write_back: JoinHandle<()>,
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, cfg: &RateLimitConfig) -> Self {
        Self {
            store,
            limit: cfg.limit,
            window: Duration::from_secs(cfg.window_secs),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn check(&self, key: &str) -> Result<Admission, RelayError> {
        self.check_at(key, Instant::now()).await
    }

    /// Admit or reject one request from `key` as of `now`.
    pub async fn check_at(&self, key: &str, now: Instant) -> Result<Admission, RelayError> {
        let record = match self.store.get(key).await {
            Some(active) if now < active.reset_at => {
                if active.count >= self.limit {
                    let remaining = active.reset_at.saturating_duration_since(now);
                    let retry_after_secs = ceil_secs(remaining).max(1);
                    tracing::debug!(client = %key, retry_after_secs, "rate limit exceeded");
                    return Err(RelayError::RateLimited { retry_after_secs });
                }
                RateLimitRecord {
                    count: active.count + 1,
                    ..active
                }
            }
            _ if self.limit == 0 => {
                let retry_after_secs = ceil_secs(self.window).max(1);
                return Err(RelayError::RateLimited { retry_after_secs });
            }
            _ => RateLimitRecord {
                count: 1,
                reset_at: now + self.window,
            },
        };

        let store = self.store.clone();
        let key_owned = key.to_string();
        let ttl = record.reset_at.saturating_duration_since(now);
        let write_back = tokio::spawn(async move {
            store.put(&key_owned, record, ttl).await;
        });
        Ok(Admission {
            count: record.count,
            write_back,
        })
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let millis = d.as_millis() as u64;
    millis.div_ceil(1000)
}

/// Identify the caller for rate limiting. With `trust_forwarded` the first
/// `X-Forwarded-For` hop wins; otherwise the socket peer is used. Requests
/// with neither share the `unknown` bucket.
pub fn client_key(headers: &HeaderMap, peer: Option<IpAddr>, trust_forwarded: bool) -> String {
    if trust_forwarded {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }
    peer.map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
