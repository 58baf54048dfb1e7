//! Remote-first result cache with a process-local LRU fallback.
//!
//! A shared redis store is probed once at construction; when it is absent or
//! down, the process runs on a fixed-capacity local cache instead. A remote
//! failure mid-call degrades to the local cache for that call only. Cache
//! trouble is never surfaced to callers — the worst case is a recompute.

use std::future::Future;
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::MailError;

const LOCAL_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(n) => n,
    None => unreachable!(),
};

/// Typed cache key built from the semantic fields that actually vary, so
/// representation differences can never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheKey<'a> {
    Search {
        criteria: &'a str,
        folders: &'a [String],
    },
    Message {
        uid: u32,
        folder: &'a str,
        criteria: &'a str,
    },
}

impl CacheKey<'_> {
    fn render(&self) -> String {
        match self {
            CacheKey::Search { criteria, folders } => {
                format!("mailsift:search:{}:{}", criteria, folders.join(","))
            }
            CacheKey::Message {
                uid,
                folder,
                criteria,
            } => format!("mailsift:message:{uid}:{folder}:{criteria}"),
        }
    }
}

pub struct Cache {
    remote: Option<ConnectionManager>,
    local: Mutex<LruCache<String, String>>,
}

impl Cache {
    /// Probe the remote store once; on failure (or no URL) run local-only
    /// for the rest of the process lifetime.
    pub async fn connect(url: Option<&str>) -> Self {
        let remote = match url {
            Some(url) => match Self::probe(url).await {
                Ok(manager) => {
                    info!("remote cache connected at {url}");
                    Some(manager)
                }
                Err(e) => {
                    warn!("remote cache unavailable, using local cache: {e}");
                    None
                }
            },
            None => None,
        };
        Self {
            remote,
            local: Mutex::new(LruCache::new(LOCAL_CAPACITY)),
        }
    }

    async fn probe(url: &str) -> Result<ConnectionManager, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let mut manager = client.get_connection_manager().await?;
        let _: () = redis::cmd("PING").query_async(&mut manager).await?;
        Ok(manager)
    }

    /// Return the cached value for `key`, or run `compute` and memoize its
    /// result. Errors from `compute` propagate and are not cached.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: CacheKey<'_>,
        ttl: Duration,
        compute: F,
    ) -> Result<T, MailError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, MailError>>,
    {
        let key = key.render();

        if let Some(manager) = &self.remote {
            let mut conn = manager.clone();
            match conn.get::<_, Option<String>>(&key).await {
                Ok(Some(payload)) => match serde_json::from_str(&payload) {
                    Ok(value) => return Ok(value),
                    Err(e) => warn!("stale cache payload for {key}: {e}"),
                },
                Ok(None) => {}
                Err(e) => {
                    warn!("remote cache read failed, degrading to local cache: {e}");
                    return self.local_get_or_compute(key, compute).await;
                }
            }

            let value = compute().await?;
            match serde_json::to_string(&value) {
                Ok(payload) => {
                    if let Err(e) = conn.set_ex::<_, _, ()>(&key, payload, ttl.as_secs()).await {
                        warn!("failed to store {key} in remote cache: {e}");
                    }
                }
                Err(e) => warn!("unserializable cache value for {key}: {e}"),
            }
            return Ok(value);
        }

        self.local_get_or_compute(key, compute).await
    }

    async fn local_get_or_compute<T, F, Fut>(&self, key: String, compute: F) -> Result<T, MailError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, MailError>>,
    {
        if let Some(payload) = self.local.lock().await.get(&key).cloned() {
            match serde_json::from_str(&payload) {
                Ok(value) => return Ok(value),
                Err(e) => warn!("stale local cache payload for {key}: {e}"),
            }
        }

        let value = compute().await?;
        if let Ok(payload) = serde_json::to_string(&value) {
            self.local.lock().await.put(key, payload);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn computes_once_per_key() {
        let cache = Cache::connect(None).await;
        let calls = AtomicUsize::new(0);
        let folders = vec!["Inbox".to_string()];
        let key = CacheKey::Search {
            criteria: "1234567890",
            folders: &folders,
        };

        for _ in 0..2 {
            let value: u32 = cache
                .get_or_compute(key.clone(), TTL, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_compute_separately() {
        let cache = Cache::connect(None).await;
        let calls = AtomicUsize::new(0);

        for folder in ["Inbox", "Sent"] {
            let _: u32 = cache
                .get_or_compute(
                    CacheKey::Message {
                        uid: 101,
                        folder,
                        criteria: "x",
                    },
                    TTL,
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(1)
                    },
                )
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn compute_errors_are_not_cached() {
        let cache = Cache::connect(None).await;
        let folders = vec!["Inbox".to_string()];
        let key = CacheKey::Search {
            criteria: "x",
            folders: &folders,
        };

        let first: Result<u32, _> = cache
            .get_or_compute(key.clone(), TTL, || async {
                Err(MailError::DataNotFound("boom".into()))
            })
            .await;
        assert!(first.is_err());

        let second: u32 = cache
            .get_or_compute(key, TTL, || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(second, 7);
    }

    #[test]
    fn key_rendering_is_unambiguous() {
        let folders = vec!["Inbox".to_string(), "Sent".to_string()];
        let search = CacheKey::Search {
            criteria: "123",
            folders: &folders,
        };
        let message = CacheKey::Message {
            uid: 123,
            folder: "Inbox",
            criteria: "",
        };
        assert_ne!(search.render(), message.render());
    }
}
