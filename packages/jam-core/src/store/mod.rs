//! Session Store abstraction.
//!
//! The jam core keeps all room state outside the process in a shared,
//! ephemeral key-value store with pub/sub. Services depend on the
//! [`SessionStore`] trait rather than a concrete backend; [`MemoryStore`]
//! is the in-process implementation used by the standalone server and tests.
//!
//! The trait deliberately offers no cross-key transactions. Callers must
//! treat every multi-step sequence as racy.

mod memory;

pub use memory::MemoryStore;

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;

/// Errors surfaced by a Session Store backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The key exists but holds a different kind of value.
    #[error("wrong value type at key {0}")]
    WrongType(String),

    /// A subscriber fell behind and missed this many messages.
    #[error("subscriber lagged by {0} message(s)")]
    Lagged(u64),

    /// A stored value could not be interpreted.
    #[error("invalid value at {key}.{field}")]
    InvalidValue { key: String, field: String },
}

/// Convenient Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A live subscription to one pub/sub channel.
///
/// The stream owns a dedicated store connection; dropping it unsubscribes
/// and releases that connection. It ends when the channel is closed.
pub type StoreStream = Pin<Box<dyn Stream<Item = StoreResult<Bytes>> + Send>>;

/// Primitive operations required of the shared Session Store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    // Scalars

    /// Reads a scalar value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes a scalar value, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    // Hashes

    /// Reads one field of a hash.
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// Sets several fields of a hash, creating it if needed.
    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> StoreResult<()>;

    /// Removes fields from a hash. Returns the number removed.
    async fn hdel(&self, key: &str, fields: &[&str]) -> StoreResult<usize>;

    /// Reads every field of a hash (empty when the key is absent).
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    // Sets

    /// Adds a member. Returns `true` if it was not already present.
    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Removes a member. Returns `true` if it was present.
    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Lists members (empty when the key is absent).
    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Counts members.
    async fn scard(&self, key: &str) -> StoreResult<usize>;

    /// Tests membership.
    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool>;

    // Keys

    /// Deletes keys. Returns the number that existed.
    async fn del(&self, keys: &[String]) -> StoreResult<usize>;

    /// Sets an expiry on an existing key. Returns `false` if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    // Pub/sub

    /// Publishes a payload. Returns the number of subscribers that received it.
    async fn publish(&self, channel: &str, payload: Bytes) -> StoreResult<usize>;

    /// Subscribes to a channel on a dedicated connection.
    async fn subscribe(&self, channel: &str) -> StoreResult<StoreStream>;

    /// Ends every current subscription to `channel` after pending messages drain.
    async fn close_channel(&self, channel: &str) -> StoreResult<()>;

    /// Cheap reachability probe used by readiness checks.
    async fn ping(&self) -> StoreResult<()>;
}
