//! Wrappers that let the process start serving before the bus/cache are
//! reachable, per spec.md §6's "lenient: start degraded" default. Each
//! wrapper holds the real client behind a lock, populated by a background
//! task that retries with the same backoff table `relaygate-config`
//! exposes for bus reconnects, and returns `Unavailable` for any call made
//! before the first successful connect.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use relaygate_bus::{BusClient, Handler, NatsBus, Subscription};
use relaygate_cache::{RedisSessionCache, SessionCache};
use relaygate_protocol::HotBufferEntry;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct LazyBus {
    inner: Arc<RwLock<Option<Arc<dyn BusClient>>>>,
}

impl LazyBus {
    pub fn spawn(url: String, raw_memory_subject: String, min_backoff: Duration, max_backoff: Duration) -> Self {
        let inner = Arc::new(RwLock::new(None));
        let retry_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            let mut backoff = min_backoff;
            loop {
                match NatsBus::connect(&url, &raw_memory_subject).await {
                    Ok(bus) => {
                        info!(%url, "bus connected (degraded startup recovered)");
                        *retry_inner.write().await = Some(Arc::new(bus) as Arc<dyn BusClient>);
                        return;
                    },
                    Err(err) => {
                        warn!(%err, %url, retry_in = ?backoff, "bus still unreachable, retrying");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(max_backoff);
                    },
                }
            }
        });
        Self { inner }
    }
}

#[async_trait]
impl BusClient for LazyBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>, headers: HashMap<String, String>) -> relaygate_bus::Result<()> {
        match self.inner.read().await.as_ref() {
            Some(bus) => bus.publish(subject, payload, headers).await,
            None => Err(relaygate_bus::Error::Unavailable("bus not yet connected".to_string())),
        }
    }

    async fn subscribe(&self, subject: &str, handler: Handler) -> relaygate_bus::Result<Subscription> {
        match self.inner.read().await.as_ref() {
            Some(bus) => bus.subscribe(subject, handler).await,
            None => Err(relaygate_bus::Error::Unavailable("bus not yet connected".to_string())),
        }
    }

    async fn unsubscribe(&self, subscription: Subscription) -> relaygate_bus::Result<()> {
        match self.inner.read().await.as_ref() {
            Some(bus) => bus.unsubscribe(subscription).await,
            None => Ok(()),
        }
    }

    async fn publish_stream(&self, subject: &str, payload: Vec<u8>) -> relaygate_bus::Result<()> {
        match self.inner.read().await.as_ref() {
            Some(bus) => bus.publish_stream(subject, payload).await,
            None => Err(relaygate_bus::Error::Unavailable("bus not yet connected".to_string())),
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.try_read().map(|guard| guard.is_some()).unwrap_or(false)
    }
}

pub struct LazyCache {
    inner: Arc<RwLock<Option<Arc<dyn SessionCache>>>>,
}

impl LazyCache {
    pub fn spawn(
        url: String,
        hot_msg_limit: usize,
        hot_ttl_min: u64,
        min_backoff: Duration,
        max_backoff: Duration,
    ) -> Self {
        let inner = Arc::new(RwLock::new(None));
        let retry_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            let mut backoff = min_backoff;
            loop {
                match RedisSessionCache::connect(&url, hot_msg_limit, hot_ttl_min).await {
                    Ok(cache) => {
                        info!("cache connected (degraded startup recovered)");
                        *retry_inner.write().await = Some(Arc::new(cache) as Arc<dyn SessionCache>);
                        return;
                    },
                    Err(err) => {
                        warn!(%err, retry_in = ?backoff, "cache still unreachable, retrying");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(max_backoff);
                    },
                }
            }
        });
        Self { inner }
    }
}

#[async_trait]
impl SessionCache for LazyCache {
    async fn append_chunk(&self, conversation_id: &str, entry: &HotBufferEntry) -> relaygate_cache::Result<()> {
        match self.inner.read().await.as_ref() {
            Some(cache) => cache.append_chunk(conversation_id, entry).await,
            None => Err(relaygate_cache::Error::Unavailable("cache not yet connected".to_string())),
        }
    }

    async fn read_recent(&self, conversation_id: &str, n: usize) -> relaygate_cache::Result<Vec<HotBufferEntry>> {
        match self.inner.read().await.as_ref() {
            Some(cache) => cache.read_recent(conversation_id, n).await,
            None => Err(relaygate_cache::Error::Unavailable("cache not yet connected".to_string())),
        }
    }

    async fn get_user_key(&self, user: &str, key: &str) -> relaygate_cache::Result<Option<String>> {
        match self.inner.read().await.as_ref() {
            Some(cache) => cache.get_user_key(user, key).await,
            None => Err(relaygate_cache::Error::Unavailable("cache not yet connected".to_string())),
        }
    }

    async fn set_user_key(&self, user: &str, key: &str, value: &str) -> relaygate_cache::Result<()> {
        match self.inner.read().await.as_ref() {
            Some(cache) => cache.set_user_key(user, key, value).await,
            None => Err(relaygate_cache::Error::Unavailable("cache not yet connected".to_string())),
        }
    }

    async fn is_revoked(&self, jwt_id: &str) -> relaygate_cache::Result<bool> {
        match self.inner.read().await.as_ref() {
            Some(cache) => cache.is_revoked(jwt_id).await,
            None => Err(relaygate_cache::Error::Unavailable("cache not yet connected".to_string())),
        }
    }

    async fn health_check(&self) -> relaygate_cache::Result<()> {
        match self.inner.read().await.as_ref() {
            Some(cache) => cache.health_check().await,
            None => Err(relaygate_cache::Error::Unavailable("cache not yet connected".to_string())),
        }
    }
}
