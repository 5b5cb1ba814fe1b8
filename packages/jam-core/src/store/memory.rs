//! In-process Session Store backend.
//!
//! Keys live in a `DashMap` with optional per-key expiry (checked lazily on
//! access and swept by [`MemoryStore::purge_expired`]). Pub/sub channels are
//! `tokio::sync::broadcast` senders; each subscription counts as one open
//! connection until its stream is dropped.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::{SessionStore, StoreError, StoreResult, StoreStream};
use crate::protocol_constants::STORE_CHANNEL_CAPACITY;

#[derive(Debug, Clone)]
enum Value {
    Scalar(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Decrements the open-subscription counter when a subscription stream drops.
struct ConnectionGuard {
    open: Arc<AtomicUsize>,
    channel: String,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self.open.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        log::debug!(
            "[Store] Subscription to {} released (open: {})",
            self.channel,
            remaining
        );
    }
}

/// DashMap-backed [`SessionStore`].
pub struct MemoryStore {
    keys: DashMap<String, Entry>,
    channels: DashMap<String, broadcast::Sender<Bytes>>,
    open_subscriptions: Arc<AtomicUsize>,
    available: AtomicBool,
    channel_capacity: usize,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::with_channel_capacity(STORE_CHANNEL_CAPACITY)
    }

    /// Creates an empty store whose pub/sub channels hold `capacity` messages.
    pub fn with_channel_capacity(capacity: usize) -> Self {
        Self {
            keys: DashMap::new(),
            channels: DashMap::new(),
            open_subscriptions: Arc::new(AtomicUsize::new(0)),
            available: AtomicBool::new(true),
            channel_capacity: capacity.max(1),
        }
    }

    /// Simulates an outage: while unavailable every operation fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of subscription streams currently holding a connection.
    #[must_use]
    pub fn open_subscriptions(&self) -> usize {
        self.open_subscriptions.load(Ordering::SeqCst)
    }

    /// Number of live (non-expired) keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.keys.iter().filter(|e| !e.value().is_expired(now)).count()
    }

    /// Remaining time to live of a key, if it has one.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.keys
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Removes expired keys and channels nobody listens to.
    ///
    /// Returns the number of keys removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.keys.len();
        self.keys.retain(|_, e| !e.is_expired(now));
        self.channels.retain(|_, tx| tx.receiver_count() > 0);
        before.saturating_sub(self.keys.len())
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store marked unavailable".into()))
        }
    }

    /// Drops `key` if it has expired, so the caller sees it as absent.
    fn evict_if_expired(&self, key: &str) {
        let now = Instant::now();
        self.keys.remove_if(key, |_, e| e.is_expired(now));
    }

    /// Common prologue for every keyed operation.
    fn prepare(&self, key: &str) -> StoreResult<()> {
        self.check_available()?;
        self.evict_if_expired(key);
        Ok(())
    }

    fn read_set(&self, key: &str) -> StoreResult<Option<HashSet<String>>> {
        match self.keys.get(key) {
            Some(e) => match &e.value {
                Value::Set(s) => Ok(Some(s.clone())),
                _ => Err(StoreError::WrongType(key.to_string())),
            },
            None => Ok(None),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.prepare(key)?;
        match self.keys.get(key) {
            Some(e) => match &e.value {
                Value::Scalar(v) => Ok(Some(v.clone())),
                _ => Err(StoreError::WrongType(key.to_string())),
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.check_available()?;
        let mut entry = Entry::new(Value::Scalar(value.to_string()));
        entry.expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.keys.insert(key.to_string(), entry);
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.prepare(key)?;
        match self.keys.get(key) {
            Some(e) => match &e.value {
                Value::Hash(h) => Ok(h.get(field).cloned()),
                _ => Err(StoreError::WrongType(key.to_string())),
            },
            None => Ok(None),
        }
    }

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> StoreResult<()> {
        self.prepare(key)?;
        let mut entry = self
            .keys
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
        match &mut entry.value {
            Value::Hash(h) => {
                for (field, value) in fields {
                    h.insert((*field).to_string(), value.clone());
                }
                Ok(())
            }
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> StoreResult<usize> {
        self.prepare(key)?;
        let (removed, now_empty) = match self.keys.get_mut(key) {
            Some(mut e) => match &mut e.value {
                Value::Hash(h) => {
                    let removed = fields.iter().filter(|f| h.remove(**f).is_some()).count();
                    (removed, h.is_empty())
                }
                _ => return Err(StoreError::WrongType(key.to_string())),
            },
            None => return Ok(0),
        };
        if now_empty {
            self.keys
                .remove_if(key, |_, e| matches!(&e.value, Value::Hash(h) if h.is_empty()));
        }
        Ok(removed)
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.prepare(key)?;
        match self.keys.get(key) {
            Some(e) => match &e.value {
                Value::Hash(h) => Ok(h.clone()),
                _ => Err(StoreError::WrongType(key.to_string())),
            },
            None => Ok(HashMap::new()),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.prepare(key)?;
        let mut entry = self
            .keys
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Set(HashSet::new())));
        match &mut entry.value {
            Value::Set(s) => Ok(s.insert(member.to_string())),
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.prepare(key)?;
        let (removed, now_empty) = match self.keys.get_mut(key) {
            Some(mut e) => match &mut e.value {
                Value::Set(s) => {
                    let removed = s.remove(member);
                    (removed, s.is_empty())
                }
                _ => return Err(StoreError::WrongType(key.to_string())),
            },
            None => return Ok(false),
        };
        if now_empty {
            self.keys
                .remove_if(key, |_, e| matches!(&e.value, Value::Set(s) if s.is_empty()));
        }
        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.prepare(key)?;
        Ok(self
            .read_set(key)?
            .map(|s| s.into_iter().collect())
            .unwrap_or_default())
    }

    async fn scard(&self, key: &str) -> StoreResult<usize> {
        self.prepare(key)?;
        Ok(self.read_set(key)?.map_or(0, |s| s.len()))
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.prepare(key)?;
        Ok(self.read_set(key)?.is_some_and(|s| s.contains(member)))
    }

    async fn del(&self, keys: &[String]) -> StoreResult<usize> {
        self.check_available()?;
        let now = Instant::now();
        Ok(keys
            .iter()
            .filter_map(|k| self.keys.remove(k))
            .filter(|(_, e)| !e.is_expired(now))
            .count())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.prepare(key)?;
        match self.keys.get_mut(key) {
            Some(mut e) => {
                e.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> StoreResult<usize> {
        self.check_available()?;
        let Some(tx) = self.channels.get(channel) else {
            return Ok(0);
        };
        // send() fails only when there are no receivers
        Ok(tx.send(payload).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<StoreStream> {
        self.check_available()?;
        let mut rx = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .subscribe();

        let open = self.open_subscriptions.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!("[Store] Subscribed to {} (open: {})", channel, open);
        let guard = ConnectionGuard {
            open: Arc::clone(&self.open_subscriptions),
            channel: channel.to_string(),
        };

        let stream = async_stream::stream! {
            let _guard = guard;
            loop {
                match rx.recv().await {
                    Ok(payload) => {
                        yield Ok(payload);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        yield Err(StoreError::Lagged(n));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn close_channel(&self, channel: &str) -> StoreResult<()> {
        self.check_available()?;
        // Dropping the only sender lets receivers drain, then end.
        self.channels.remove(channel);
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_available()
    }
}
