//! Non-blocking, expiring mutual exclusion across ingest instances.
//!
//! The lock covers only the assemble-and-persist section for one item.
//! Acquisition is a single set-if-absent attempt; a caller that loses simply
//! drops its attempt because the holder will finish the item. The TTL bounds
//! how long a crashed holder can block the item.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use log::{debug, warn};

use crate::{
    fragment::ItemId,
    kv::{KvError, KvStore},
};

const ASSEMBLE_PREFIX: &str = "lock:assemble:";

/// TTL-based lock over the shared key-value store.
#[derive(Clone)]
pub struct DistributedLock {
    kv: Arc<dyn KvStore>,
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock").finish_non_exhaustive()
    }
}

impl DistributedLock {
    /// Default lock lifetime: thirty seconds.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

    /// Create a lock client over `kv`.
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>) -> Self { Self { kv } }

    /// Lock name guarding assembly of `item`.
    #[must_use]
    pub fn assemble_name(item: &ItemId) -> String { format!("{ASSEMBLE_PREFIX}{item}") }

    /// Try once to take `name` for `ttl`.
    ///
    /// Returns `false` when another holder owns the lock. A backend failure
    /// is logged and also reported as `false`.
    pub async fn acquire(&self, name: &str, ttl: Duration) -> bool {
        match self
            .kv
            .set_nx(name, Bytes::from_static(b"1"), Some(ttl))
            .await
        {
            Ok(acquired) => {
                debug!("lock attempt: name={name}, acquired={acquired}");
                acquired
            }
            Err(e) => {
                warn!("lock acquire failed: name={name}, error={e}");
                false
            }
        }
    }

    /// Delete `name` unconditionally. Releasing a free lock is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] if the backing store rejects the delete.
    pub async fn release(&self, name: &str) -> Result<(), KvError> {
        self.kv.delete(&[name]).await.map(|_| ())
    }
}
