use crate::traits::{Classifier, FeedSource, Ledger, Notifier};
use crate::types::{CycleReport, FeedItem, Verdict};
use crate::utils::time::format_duration;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// What happened to one item during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    AlreadyKnown,
    LookupFailed,
    ClassificationFailed,
    PersistenceFailed,
    Persisted { relevant: bool },
}

/// Drives fetch, dedup, classify, persist and notify cycles.
pub struct Pipeline {
    source: Arc<dyn FeedSource>,
    ledger: Arc<dyn Ledger>,
    classifier: Arc<dyn Classifier>,
    notifier: Arc<dyn Notifier>,
    poll_interval: Duration,
    // detached notification tasks; errors stay inside each task
    notifications: Mutex<JoinSet<()>>,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn FeedSource>,
        ledger: Arc<dyn Ledger>,
        classifier: Arc<dyn Classifier>,
        notifier: Arc<dyn Notifier>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            ledger,
            classifier,
            notifier,
            poll_interval,
            notifications: Mutex::new(JoinSet::new()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run one full cycle over everything the source currently returns.
    pub async fn cycle(&self) -> CycleReport {
        self.run_cycle(None).await
    }

    /// One cycle at startup, then one per tick, until `shutdown` flips to
    /// true. A cycle in flight when shutdown arrives finishes its current
    /// item and starts no further ones.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Polling {} every {} (classifier ready: {}, notifier: {})",
            self.source.source_name(),
            format_duration(self.poll_interval),
            self.classifier.ready(),
            self.notifier.notifier_name()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.run_cycle(Some(&shutdown)).await;
                }
            }
        }

        info!("Stopping pipeline, shutdown requested");
    }

    /// Wait for every notification dispatched so far.
    pub async fn drain_notifications(&self) {
        let mut pending = std::mem::take(&mut *self.notification_tasks());
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                error!("Notification task aborted: {}", e);
            }
        }
    }

    async fn run_cycle(&self, shutdown: Option<&watch::Receiver<bool>>) -> CycleReport {
        let span = info_span!("cycle", cycle_id = %Uuid::new_v4());
        async move {
            let mut report = CycleReport::default();
            debug!("Polling {}", self.source.source_name());

            let items = match self.source.fetch().await {
                Ok(items) => items,
                Err(e) => {
                    error!("Failed to fetch feed {}: {}", self.source.source_name(), e);
                    report.fetch_failed = true;
                    return report;
                }
            };
            report.fetched = items.len();

            for item in items {
                if shutdown.is_some_and(|rx| *rx.borrow()) {
                    info!("Shutdown requested, leaving remaining items for a later run");
                    report.interrupted = true;
                    break;
                }

                match self.process_item(item).await {
                    ItemOutcome::AlreadyKnown => report.already_known += 1,
                    ItemOutcome::LookupFailed => report.lookup_failures += 1,
                    ItemOutcome::ClassificationFailed => report.classification_failures += 1,
                    ItemOutcome::PersistenceFailed => {
                        report.classified += 1;
                        report.persistence_failures += 1;
                    }
                    ItemOutcome::Persisted { relevant } => {
                        report.classified += 1;
                        report.persisted += 1;
                        if relevant {
                            report.relevant += 1;
                            report.notifications_dispatched += 1;
                        }
                    }
                }
            }

            info!(
                fetched = report.fetched,
                already_known = report.already_known,
                persisted = report.persisted,
                relevant = report.relevant,
                failures = report.lookup_failures
                    + report.classification_failures
                    + report.persistence_failures,
                "Cycle finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    /// Each step may fail; a failure ends processing of this item only.
    async fn process_item(&self, item: FeedItem) -> ItemOutcome {
        match self.ledger.exists(&item.guid).await {
            Ok(true) => {
                debug!(guid = %item.guid, "already processed, skipping");
                return ItemOutcome::AlreadyKnown;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(guid = %item.guid, "Existence check failed: {}", e);
                return ItemOutcome::LookupFailed;
            }
        }

        let verdict = match self.classifier.evaluate(&item.context()).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(guid = %item.guid, title = %item.title, "Classification failed: {}", e);
                return ItemOutcome::ClassificationFailed;
            }
        };

        if let Err(e) = self.ledger.upsert(&item, &verdict).await {
            warn!(guid = %item.guid, "Persisting verdict failed: {}", e);
            return ItemOutcome::PersistenceFailed;
        }

        info!(
            guid = %item.guid,
            relevant = verdict.relevant,
            category = %verdict.category,
            "Item classified"
        );

        let relevant = verdict.relevant;
        if relevant {
            self.dispatch_notification(item, verdict);
        }
        ItemOutcome::Persisted { relevant }
    }

    fn dispatch_notification(&self, item: FeedItem, verdict: Verdict) {
        let notifier = Arc::clone(&self.notifier);
        let task = async move {
            if let Err(e) = notifier.send(&item, &verdict).await {
                warn!(guid = %item.guid, "Notification via {} failed: {}", notifier.notifier_name(), e);
            }
        };

        let mut tasks = self.notification_tasks();
        // reap finished tasks so the set does not grow across cycles
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task.in_current_span());
    }

    fn notification_tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
