use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Per-user cache namespaces. Logout deletes each `{namespace}:{userId}`
/// key, and nothing else, so every cached read must live under one of these.
pub const USER_NAMESPACES: [&str; 5] =
    ["user-details", "programs", "courses", "materials", "material"];

pub fn user_key(namespace: &str, user_id: Uuid) -> String {
    format!("{namespace}:{user_id}")
}

/// Key-value TTL store seam. The service treats the cache as an external
/// collaborator: get, set-with-expiry, delete.
#[async_trait]
pub trait CacheClient: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;
    async fn del(&self, key: &str) -> anyhow::Result<()>;
}

/// Cached reads are best effort: a cache failure falls through to the
/// document store instead of failing the request.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn CacheClient, key: &str) -> Option<T> {
    match cache.get(key).await {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, key, "discarding unparsable cache entry");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, key, "cache read failed");
            None
        }
    }
}

pub async fn put_json<T: Serialize>(cache: &dyn CacheClient, key: &str, value: &T, ttl: Duration) {
    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, key, "cache serialization failed");
            return;
        }
    };
    if let Err(e) = cache.set_ex(key, &raw, ttl).await {
        warn!(error = %e, key, "cache write failed");
    }
}

pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl CacheClient for RedisCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

/// TTL map for tests and Redis-less local runs. Expired entries are dropped
/// lazily on read.
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheClient for InMemoryCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let expired = {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, expires_at)) if *expires_at > Instant::now() => {
                    return Ok(Some(value.clone()))
                }
                Some(_) => true,
                None => false,
            }
        };
        if expired {
            self.entries.write().await.remove(key);
        }
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_key_joins_namespace_and_id() {
        let id = Uuid::new_v4();
        assert_eq!(user_key("programs", id), format!("programs:{id}"));
    }

    #[tokio::test]
    async fn in_memory_roundtrip_and_delete() {
        let cache = InMemoryCache::new();
        cache
            .set_ex("k", "v", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        cache.del("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn in_memory_entries_expire() {
        let cache = InMemoryCache::new();
        cache
            .set_ex("k", "v", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn json_helpers_roundtrip() {
        let cache = InMemoryCache::new();
        put_json(&cache, "nums", &vec![1, 2, 3], Duration::from_secs(60)).await;
        let back: Option<Vec<i32>> = get_json(&cache, "nums").await;
        assert_eq!(back, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn unparsable_entries_read_as_miss() {
        let cache = InMemoryCache::new();
        cache
            .set_ex("bad", "not-json", Duration::from_secs(60))
            .await
            .unwrap();
        let back: Option<Vec<i32>> = get_json(&cache, "bad").await;
        assert_eq!(back, None);
    }
}
