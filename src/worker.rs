//! Subscription-draining loop that feeds the pipeline.
//!
//! One [`IngestWorker`] pulls bus messages off a bounded queue and hands each
//! to the [`Orchestrator`] in turn, waiting for the whole pipeline before
//! taking the next message. Panics are contained per message so a single
//! poisoned payload cannot stall the subscription. The garbage collector
//! runs as a tracked background task and is stopped together with the loop.

use std::{panic::AssertUnwindSafe, time::Duration};

use futures::FutureExt;
use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    fragment::{BusMessage, TopicFilter},
    gc::GarbageCollector,
    metrics,
    panic::format_panic,
    pipeline::{Orchestrator, Outcome},
};

/// Counters reported when the worker stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Messages that reached the pipeline.
    pub handled: u64,
    /// Messages ignored because their topic did not match the filter.
    pub skipped: u64,
    /// Items persisted for the first time.
    pub persisted: u64,
    /// Messages whose handling panicked.
    pub panicked: u64,
}

/// Single consumer of the inbound message queue.
#[derive(Debug)]
pub struct IngestWorker {
    orchestrator: Orchestrator,
    filter: Option<TopicFilter>,
    gc: Option<(GarbageCollector, Duration)>,
}

impl IngestWorker {
    /// Create a worker that accepts every topic and runs no collector.
    #[must_use]
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            filter: None,
            gc: None,
        }
    }

    /// Only handle messages whose topic matches `filter`.
    #[must_use]
    pub fn with_topic_filter(mut self, filter: TopicFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Run `gc` every `every` while the worker is alive.
    #[must_use]
    pub fn with_gc(mut self, gc: GarbageCollector, every: Duration) -> Self {
        self.gc = Some((gc, every));
        self
    }

    /// Handle one message, containing any panic.
    ///
    /// Returns `None` when the message was filtered out or its handling
    /// panicked.
    pub async fn process(&self, message: BusMessage) -> Option<Outcome> {
        if let Some(filter) = &self.filter
            && !filter.matches(&message.topic)
        {
            debug!(
                "ignoring message outside subscription: topic={}, filter={filter}",
                message.topic
            );
            return None;
        }

        let topic = message.topic.clone();
        match AssertUnwindSafe(self.orchestrator.handle(message))
            .catch_unwind()
            .await
        {
            Ok(outcome) => {
                debug!("message handled: topic={topic}, outcome={}", outcome.label());
                Some(outcome)
            }
            Err(panic) => {
                metrics::inc_pipeline_panics();
                let panic_msg = format_panic(&*panic);
                // Emit via both `log` and `tracing` for tests that capture either.
                error!("message handler panicked: panic={panic_msg}, topic={topic}");
                tracing::error!(panic = %panic_msg, topic = %topic, "message handler panicked");
                None
            }
        }
    }

    /// Drain `inbound` until it closes or `shutdown` is cancelled.
    ///
    /// A message already being handled when shutdown fires is finished
    /// first; queued messages are abandoned.
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<BusMessage>,
        shutdown: CancellationToken,
    ) -> WorkerSummary {
        let tracker = TaskTracker::new();
        let gc_token = shutdown.child_token();
        if let Some((gc, every)) = self.gc.clone() {
            tracker.spawn(gc.run(every, gc_token.clone()));
        }

        let mut summary = WorkerSummary::default();
        loop {
            let message = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                message = inbound.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            let filtered_out = self
                .filter
                .as_ref()
                .is_some_and(|filter| !filter.matches(&message.topic));
            if filtered_out {
                summary.skipped += 1;
            }
            match self.process(message).await {
                Some(outcome) => {
                    summary.handled += 1;
                    if matches!(outcome, Outcome::Persisted(_)) {
                        summary.persisted += 1;
                    }
                }
                None if !filtered_out => {
                    summary.handled += 1;
                    summary.panicked += 1;
                }
                None => {}
            }
        }

        gc_token.cancel();
        tracker.close();
        tracker.wait().await;
        info!(
            "ingest worker stopped: handled={}, skipped={}, persisted={}, panicked={}",
            summary.handled, summary.skipped, summary.persisted, summary.panicked
        );
        summary
    }
}
