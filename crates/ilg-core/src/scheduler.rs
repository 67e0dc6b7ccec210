//! Due-set scheduler.
//!
//! - Ticks on a fixed interval (first tick fires immediately)
//! - Each tick rotates every due pair, one at a time, with a pacing delay
//! - One pair's failure never aborts the others
//! - Failures feed the retry policy (fast retry, backoff, quarantine)

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    domain::PairKey,
    pair::FailureReport,
    retry::RetryPolicy,
    rotation::{RotationError, RotationExecutor},
    store::PairStore,
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    pub tick: Duration,
    /// Delay between two consecutive rotations within one tick.
    pub pacing: Duration,
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(300),
            pacing: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub rotated: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct DueSetScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    cfg: SchedulerConfig,
    store: Arc<dyn PairStore>,
    executor: Arc<RotationExecutor>,
}

impl DueSetScheduler {
    pub fn new(
        cfg: SchedulerConfig,
        store: Arc<dyn PairStore>,
        executor: Arc<RotationExecutor>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                cfg,
                store,
                executor,
            }),
        }
    }

    /// Spawn the tick loop. It exits when `cancel` fires; an in-flight tick is
    /// abandoned between rotations.
    pub fn start(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let scheduler = self.clone();
        info!(
            tick_secs = self.inner.cfg.tick.as_secs(),
            "rotation scheduler started"
        );
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(scheduler.inner.cfg.tick);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                  _ = cancel.cancelled() => break,
                  _ = tick.tick() => {
                    tokio::select! {
                      _ = cancel.cancelled() => break,
                      res = scheduler.run_tick(Utc::now()) => {
                        if let Err(e) = res {
                          error!(error = %e, "scheduler tick failed");
                        }
                      }
                    }
                  }
                }
            }
            info!("rotation scheduler stopped");
        })
    }

    /// One pass over the due set as of `now`.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let due = self.inner.store.list_due(now).await?;
        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };

        if due.is_empty() {
            debug!("no linked pairs due for rotation");
            return Ok(report);
        }
        info!(count = due.len(), "linked pairs due for rotation");

        for (idx, pair) in due.iter().enumerate() {
            if idx > 0 && !self.inner.cfg.pacing.is_zero() {
                sleep(self.inner.cfg.pacing).await;
            }

            // The snapshot may be stale by now: a manual refresh or a removal
            // can land while we pace.
            match self.inner.executor.rotate_if_due(pair.key(), now).await {
                Ok(_) => report.rotated += 1,
                Err(e) if e.is_skip() => {
                    debug!(pair = %pair.key(), reason = %e, "skipping pair");
                    report.skipped += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    self.note_failure(pair.key(), &e).await;
                }
            }
        }

        info!(
            due = report.due,
            rotated = report.rotated,
            skipped = report.skipped,
            failed = report.failed,
            "rotation tick finished"
        );
        Ok(report)
    }

    async fn note_failure(&self, key: PairKey, err: &RotationError) {
        let failure = FailureReport {
            reason: err.to_string(),
            structural: err.is_structural(),
            at: Utc::now(),
        };
        let update = match self
            .inner
            .store
            .record_failure(key, failure, self.inner.cfg.retry)
            .await
        {
            Ok(update) => update,
            Err(e) => {
                error!(pair = %key, error = %e, "could not record rotation failure");
                return;
            }
        };

        let failures = update.consecutive_failures;
        if update.quarantine {
            warn!(pair = %key, failures, error = %err, "pair quarantined after repeated failures");
        } else {
            warn!(pair = %key, failures, error = %err, "rotation failed; will retry");
        }
    }
}
