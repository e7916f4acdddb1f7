//! Shared key-value backend used by every piece of cross-instance state.
//!
//! Fragment payloads, item metadata, completion markers, session bindings,
//! and locks all live behind [`KvStore`] so that every process subscribed to
//! the bus observes one consistent view. The trait mirrors the small command
//! surface of a networked key-value server: plain keys with optional expiry,
//! hash fields, atomic set-if-absent, TTL refresh, and prefix scans.
//!
//! [`MemoryKv`] keeps everything in-process and suits a single worker or
//! tests; it exposes a lazily created process-wide instance through
//! [`MemoryKv::shared`]. With the `redis` feature, [`RedisKv`] talks to a
//! Redis server so several processes share one view and one set of locks.

mod memory;
#[cfg(feature = "redis")]
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
pub use memory::MemoryKv;
#[cfg(feature = "redis")]
pub use self::redis::RedisKv;
use thiserror::Error;

/// Errors raised by a [`KvStore`] backend.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum KvError {
    /// The backend could not be reached or rejected the command.
    #[error("key-value backend unavailable: {0}")]
    Unavailable(String),
    /// A hash command targeted a plain key, or vice versa.
    #[error("key {key} holds a value of the wrong type")]
    WrongType {
        /// Key that holds the conflicting value.
        key: String,
    },
}

/// Asynchronous key-value client shared by all pipeline components.
///
/// Every method is a single atomic round trip. Keys that have passed their expiry
/// behave exactly as if they were absent.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Fetch a plain value.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, KvError>;

    /// Store a plain value, replacing any existing value and expiry.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), KvError>;

    /// Store a plain value only when `key` is absent.
    ///
    /// Returns `true` when the value was written.
    async fn set_nx(&self, key: &str, value: Bytes, ttl: Option<Duration>)
    -> Result<bool, KvError>;

    /// Report whether `key` currently exists.
    async fn exists(&self, key: &str) -> Result<bool, KvError>;

    /// Delete `keys`, returning how many existed.
    async fn delete(&self, keys: &[&str]) -> Result<usize, KvError>;

    /// Reset the expiry of an existing key.
    ///
    /// Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Fetch one field of a hash.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>, KvError>;

    /// Write one field of a hash, creating the hash when needed.
    ///
    /// When `ttl` is given the hash expiry is reset in the same atomic step,
    /// so a hash is never left behind without one.
    async fn hset(
        &self,
        key: &str,
        field: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), KvError>;

    /// Write one hash field only when it is absent.
    ///
    /// Returns `true` when the field was written. A given `ttl` is applied
    /// atomically whether or not the field was written.
    async fn hset_nx(
        &self,
        key: &str,
        field: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError>;

    /// Number of fields stored in a hash.
    async fn hlen(&self, key: &str) -> Result<usize, KvError>;

    /// Every field and value of a hash, in no particular order.
    async fn hgetall(&self, key: &str) -> Result<Vec<(String, Bytes)>, KvError>;

    /// Names of all live keys starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError>;

    /// Round-trip a no-op command to check connectivity.
    async fn ping(&self) -> Result<(), KvError>;
}
