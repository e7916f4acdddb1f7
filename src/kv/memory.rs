//! In-process [`KvStore`] built on a sharded concurrent map.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, OnceLock},
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, mapref::entry::Entry};

use super::{KvError, KvStore};
use crate::clock::{Clock, SystemClock};

#[derive(Clone, Debug)]
enum Value {
    Plain(Bytes),
    Hash(HashMap<String, Bytes>),
}

#[derive(Clone, Debug)]
struct Slot {
    value: Value,
    expires_at: Option<SystemTime>,
}

impl Slot {
    fn plain(value: Bytes, expires_at: Option<SystemTime>) -> Self {
        Self {
            value: Value::Plain(value),
            expires_at,
        }
    }

    fn empty_hash() -> Self {
        Self {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        }
    }

    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Concurrent in-memory key-value store with per-key expiry.
///
/// Expired keys are dropped lazily the next time they are touched, so memory
/// held by abandoned keys is reclaimed on access or by an explicit
/// [`purge_expired`](Self::purge_expired) pass. Single-key commands lock
/// only the shard owning the key, which makes [`KvStore::set_nx`] and
/// [`KvStore::hset_nx`] atomic with respect to concurrent callers.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use ingestor::kv::{KvStore, MemoryKv};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), ingestor::kv::KvError> {
/// let kv = MemoryKv::new();
/// assert!(kv.set_nx("lock:a", Bytes::from_static(b"1"), None).await?);
/// assert!(!kv.set_nx("lock:a", Bytes::from_static(b"1"), None).await?);
/// # Ok(())
/// # }
/// ```
pub struct MemoryKv {
    entries: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for MemoryKv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryKv")
            .field("keys", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryKv {
    fn default() -> Self { Self::new() }
}

impl MemoryKv {
    /// Create an empty store driven by the system clock.
    #[must_use]
    pub fn new() -> Self { Self::with_clock(Arc::new(SystemClock)) }

    /// Create an empty store whose expiry decisions use `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Return the process-wide shared store, creating it on first use.
    ///
    /// Every caller receives a handle to the same instance, so the ingest
    /// worker and the health probe observe identical state.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<MemoryKv>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(MemoryKv::new())))
    }

    /// Drop every expired key, returning how many were removed.
    ///
    /// `DashMap::retain` takes per-shard write locks, so concurrent commands
    /// may stall briefly while the sweep runs.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| !slot.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of keys held, including expired keys not yet purged.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Whether the store holds no keys at all.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    fn deadline(&self, ttl: Option<Duration>) -> Option<SystemTime> {
        ttl.map(|ttl| self.clock.now() + ttl)
    }

    /// Run `read` against the live value stored at `key`.
    fn read<R>(&self, key: &str, read: impl FnOnce(&Value) -> R) -> Option<R> {
        let now = self.clock.now();
        let guard = self.entries.get(key);
        let result = guard
            .as_ref()
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| read(&slot.value));
        drop(guard);
        if result.is_none() {
            self.entries.remove_if(key, |_, slot| slot.is_expired(now));
        }
        result
    }

    /// Run `write` against the hash at `key`, creating it when absent or
    /// expired, then apply `ttl` while the shard is still locked.
    fn write_hash<R>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        write: impl FnOnce(&mut HashMap<String, Bytes>) -> R,
    ) -> Result<R, KvError> {
        let now = self.clock.now();
        let mut slot = self
            .entries
            .entry(key.to_owned())
            .or_insert_with(Slot::empty_hash);
        if slot.is_expired(now) {
            *slot = Slot::empty_hash();
        }
        let result = match &mut slot.value {
            Value::Hash(fields) => write(fields),
            Value::Plain(_) => return Err(wrong_type(key)),
        };
        if let Some(ttl) = ttl {
            slot.expires_at = Some(now + ttl);
        }
        Ok(result)
    }

    fn read_hash<R>(
        &self,
        key: &str,
        read: impl FnOnce(&HashMap<String, Bytes>) -> R,
    ) -> Result<Option<R>, KvError> {
        self.read(key, |value| match value {
            Value::Hash(fields) => Ok(read(fields)),
            Value::Plain(_) => Err(wrong_type(key)),
        })
        .transpose()
    }
}

fn wrong_type(key: &str) -> KvError {
    KvError::WrongType {
        key: key.to_owned(),
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, KvError> {
        self.read(key, |value| match value {
            Value::Plain(bytes) => Ok(bytes.clone()),
            Value::Hash(_) => Err(wrong_type(key)),
        })
        .transpose()
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), KvError> {
        let expires_at = self.deadline(ttl);
        self.entries
            .insert(key.to_owned(), Slot::plain(value, expires_at));
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError> {
        let now = self.clock.now();
        let expires_at = self.deadline(ttl);
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(Slot::plain(value, expires_at));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::plain(value, expires_at));
                Ok(true)
            }
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        Ok(self.read(key, |_| ()).is_some())
    }

    async fn delete(&self, keys: &[&str]) -> Result<usize, KvError> {
        let now = self.clock.now();
        let removed = keys
            .iter()
            .filter_map(|key| self.entries.remove(*key))
            .filter(|(_, slot)| !slot.is_expired(now))
            .count();
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let now = self.clock.now();
        let Some(mut slot) = self.entries.get_mut(key) else {
            return Ok(false);
        };
        if slot.is_expired(now) {
            drop(slot);
            self.entries.remove_if(key, |_, slot| slot.is_expired(now));
            return Ok(false);
        }
        slot.expires_at = Some(now + ttl);
        Ok(true)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>, KvError> {
        Ok(self
            .read_hash(key, |fields| fields.get(field).cloned())?
            .flatten())
    }

    async fn hset(
        &self,
        key: &str,
        field: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), KvError> {
        self.write_hash(key, ttl, |fields| {
            fields.insert(field.to_owned(), value);
        })
    }

    async fn hset_nx(
        &self,
        key: &str,
        field: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError> {
        self.write_hash(key, ttl, |fields| {
            if fields.contains_key(field) {
                false
            } else {
                fields.insert(field.to_owned(), value);
                true
            }
        })
    }

    async fn hlen(&self, key: &str) -> Result<usize, KvError> {
        Ok(self.read_hash(key, HashMap::len)?.unwrap_or(0))
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, Bytes)>, KvError> {
        Ok(self
            .read_hash(key, |fields| {
                fields
                    .iter()
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect()
            })?
            .unwrap_or_default())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let now = self.clock.now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && !entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn ping(&self) -> Result<(), KvError> { Ok(()) }
}
