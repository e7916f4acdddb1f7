//! Bindings from a publishing source to its active logical item.
//!
//! Devices that omit an explicit item id still need their fragments grouped.
//! `SessionMapper` hands out a random [`ItemId`] per [`SourceId`] and keeps
//! it in the shared store for a short window, so every instance routes the
//! source's fragments to the same item. The binding is released once the
//! item has been persisted so the next capture starts a fresh item.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use log::debug;

use crate::{
    fragment::{ItemId, SourceId},
    kv::{KvError, KvStore},
};

const SESSION_PREFIX: &str = "session:";

fn session_key(source: &SourceId) -> String { format!("{SESSION_PREFIX}{source}") }

/// Source-to-item registry backed by the shared key-value store.
#[derive(Clone)]
pub struct SessionMapper {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl std::fmt::Debug for SessionMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMapper")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl SessionMapper {
    /// Default binding lifetime: one minute.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

    /// Create a mapper whose bindings live for `ttl`.
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self { Self { kv, ttl } }

    /// Lifetime applied to new bindings.
    #[must_use]
    pub const fn ttl(&self) -> Duration { self.ttl }

    /// Return the live item bound to `source`, minting one when absent.
    ///
    /// Creation is set-if-absent, so racing callers converge on a single
    /// binding. An existing binding keeps its original expiry.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] if the backing store is unavailable.
    pub async fn get_or_create(&self, source: &SourceId) -> Result<ItemId, KvError> {
        let key = session_key(source);
        if let Some(existing) = self.read(&key).await? {
            return Ok(existing);
        }

        let fresh = ItemId::random();
        if self
            .kv
            .set_nx(&key, Bytes::from(fresh.to_string()), Some(self.ttl))
            .await?
        {
            debug!("session opened: source={source}, item={fresh}");
            return Ok(fresh);
        }

        // Lost the race; adopt the winner's binding. If it already expired
        // again the fresh id is as good as any other.
        Ok(self.read(&key).await?.unwrap_or(fresh))
    }

    /// Drop the binding for `source`. Releasing an absent binding is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] if the backing store rejects the delete.
    pub async fn release(&self, source: &SourceId) -> Result<(), KvError> {
        let key = session_key(source);
        if self.kv.delete(&[key.as_str()]).await? > 0 {
            debug!("session released: source={source}");
        }
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<ItemId>, KvError> {
        Ok(self
            .kv
            .get(key)
            .await?
            .and_then(|raw| String::from_utf8(raw.to_vec()).ok())
            .filter(|id| !id.is_empty())
            .map(ItemId::from))
    }
}
