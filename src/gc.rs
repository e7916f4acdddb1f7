//! Proactive cleanup of abandoned partial transfers.
//!
//! Backend expiry reclaims stale records on its own; the collector makes the
//! cleanup prompt and observable. Each sweep walks every item that still has
//! metadata, measures how long it has been idle, and evicts those idle for
//! longer than the fragment TTL.

use std::{sync::Arc, time::Duration};

use log::{debug, info, warn};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::{
    clock::Clock,
    fragment::{FragmentStore, ItemId},
    kv::KvError,
    metrics::{self, Stage},
};

/// Result of one sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Items with metadata that were examined.
    pub scanned: usize,
    /// Items whose records were deleted.
    pub evicted: Vec<ItemId>,
}

/// Periodic sweeper over a [`FragmentStore`].
#[derive(Clone)]
pub struct GarbageCollector {
    store: FragmentStore,
    clock: Arc<dyn Clock>,
    max_idle: Duration,
}

impl std::fmt::Debug for GarbageCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GarbageCollector")
            .field("max_idle", &self.max_idle)
            .finish_non_exhaustive()
    }
}

impl GarbageCollector {
    /// Create a collector that evicts items idle for longer than `max_idle`.
    #[must_use]
    pub fn new(store: FragmentStore, clock: Arc<dyn Clock>, max_idle: Duration) -> Self {
        Self {
            store,
            clock,
            max_idle,
        }
    }

    /// Run one pass over every active item.
    ///
    /// Items whose metadata vanished or could not be read mid-sweep are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] only if the active items cannot be listed.
    pub async fn sweep(&self) -> Result<SweepReport, KvError> {
        let now = self.clock.unix_secs();
        let items = self.store.active_items().await?;
        let mut report = SweepReport {
            scanned: items.len(),
            evicted: Vec::new(),
        };

        for item in items {
            let progress = match self.store.progress(&item).await {
                Ok(Some(progress)) => progress,
                Ok(None) => continue,
                Err(e) => {
                    warn!("gc skipped unreadable item: item={item}, error={e}");
                    continue;
                }
            };
            let idle = now.saturating_sub(progress.last_activity);
            if idle <= self.max_idle.as_secs() {
                continue;
            }
            match self.store.evict(&item).await {
                Ok(()) => {
                    debug!(
                        "gc evicted item: item={item}, idle_secs={idle}, received={}/{}",
                        progress.received, progress.expected
                    );
                    report.evicted.push(item);
                }
                Err(e) => warn!("gc eviction failed: item={item}, error={e}"),
            }
        }

        metrics::add_gc_evictions(report.evicted.len() as u64);
        Ok(report)
    }

    /// Sweep every `every` until `shutdown` is cancelled.
    ///
    /// The first sweep runs after one full interval.
    pub async fn run(self, every: Duration, shutdown: CancellationToken) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => match self.sweep().await {
                    Ok(report) if !report.evicted.is_empty() => info!(
                        "gc sweep finished: scanned={}, evicted={}",
                        report.scanned,
                        report.evicted.len()
                    ),
                    Ok(_) => {}
                    Err(e) => {
                        warn!("gc sweep failed: error={e}");
                        metrics::inc_errors(Stage::Gc);
                    }
                },
            }
        }
        debug!("gc task stopped");
    }
}
