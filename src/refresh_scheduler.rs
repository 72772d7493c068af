//! Periodic refresh tasks, one per field group plus the checkpoint writer.
//!
//! Every run happens under a named lease so that only one instance refreshes
//! a given group at a time. A run whose lease is held elsewhere is skipped
//! silently.

use anyhow::Result;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::lock_manager::{refresh_lock_name, LockManager};
use crate::metrics;
use crate::settings::RefreshIntervals;
use crate::state_sync::StateSync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshTask {
    PairTokensAndFarms,
    PairInfo,
    PairPrices,
    PairAnalytics,
    TokenMetadata,
    TokenPrices,
    TokenAnalytics,
    Checkpoint,
}

impl RefreshTask {
    pub const ALL: [RefreshTask; 8] = [
        RefreshTask::PairTokensAndFarms,
        RefreshTask::PairInfo,
        RefreshTask::PairPrices,
        RefreshTask::PairAnalytics,
        RefreshTask::TokenMetadata,
        RefreshTask::TokenPrices,
        RefreshTask::TokenAnalytics,
        RefreshTask::Checkpoint,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RefreshTask::PairTokensAndFarms => "pair_tokens_and_farms",
            RefreshTask::PairInfo => "pair_info",
            RefreshTask::PairPrices => "pair_prices",
            RefreshTask::PairAnalytics => "pair_analytics",
            RefreshTask::TokenMetadata => "token_metadata",
            RefreshTask::TokenPrices => "token_prices",
            RefreshTask::TokenAnalytics => "token_analytics",
            RefreshTask::Checkpoint => "checkpoint",
        }
    }

    pub fn interval(&self, intervals: &RefreshIntervals) -> Duration {
        let seconds = match self {
            RefreshTask::PairTokensAndFarms => intervals.pair_tokens_and_farms,
            RefreshTask::PairInfo => intervals.pair_info,
            RefreshTask::PairPrices => intervals.pair_prices,
            RefreshTask::PairAnalytics => intervals.pair_analytics,
            RefreshTask::TokenMetadata => intervals.token_metadata,
            RefreshTask::TokenPrices => intervals.token_prices,
            RefreshTask::TokenAnalytics => intervals.token_analytics,
            RefreshTask::Checkpoint => intervals.checkpoint,
        };
        Duration::from_secs(seconds.max(1))
    }
}

pub struct RefreshScheduler {
    sync: Arc<StateSync>,
    locks: Arc<dyn LockManager>,
    lock_ttl: Duration,
    intervals: RefreshIntervals,
}

impl RefreshScheduler {
    pub fn new(
        sync: Arc<StateSync>,
        locks: Arc<dyn LockManager>,
        lock_ttl: Duration,
        intervals: RefreshIntervals,
    ) -> Self {
        Self {
            sync,
            locks,
            lock_ttl,
            intervals,
        }
    }

    /// Runs `task` once if its lease can be taken. Returns `false` when skipped.
    pub async fn run_once(&self, task: RefreshTask) -> Result<bool> {
        let lock_name = refresh_lock_name(task.name());
        let lease = match self.locks.try_acquire(&lock_name, self.lock_ttl).await? {
            Some(lease) => lease,
            None => {
                debug!("Skipping {}: lease held elsewhere", task.name());
                metrics::increment_refresh_skipped(task.name());
                return Ok(false);
            }
        };

        let result = self.execute(task).await;
        if let Err(e) = self.locks.release(&lease).await {
            warn!("⚠️ Failed to release {}: {:#}", lock_name, e);
        }
        result.map(|_| true)
    }

    async fn execute(&self, task: RefreshTask) -> Result<()> {
        let outcome = match task {
            RefreshTask::PairTokensAndFarms => self.sync.refresh_pair_tokens_and_farms().await?,
            RefreshTask::PairInfo => self.sync.refresh_pair_info().await?,
            RefreshTask::PairPrices => self.sync.refresh_pair_prices().await?,
            RefreshTask::PairAnalytics => self.sync.refresh_pair_analytics().await?,
            RefreshTask::TokenMetadata => self.sync.refresh_token_metadata().await?,
            RefreshTask::TokenPrices => self.sync.refresh_token_prices().await?,
            RefreshTask::TokenAnalytics => self.sync.refresh_token_analytics().await?,
            RefreshTask::Checkpoint => {
                self.sync.save_checkpoint().await?;
                return Ok(());
            }
        };
        debug!(
            "🔄 {}: {} updated, {} failed",
            task.name(),
            outcome.updated,
            outcome.failed
        );
        Ok(())
    }

    /// Spawns one loop per task. Group refreshes fire immediately, the
    /// checkpoint writer waits one full interval first.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        RefreshTask::ALL
            .iter()
            .map(|task| {
                let scheduler = self.clone();
                let shutdown = shutdown.clone();
                let task = *task;
                tokio::spawn(async move { scheduler.run_loop(task, shutdown).await })
            })
            .collect()
    }

    async fn run_loop(&self, task: RefreshTask, mut shutdown: watch::Receiver<bool>) {
        let period = task.interval(&self.intervals);
        let start = match task {
            RefreshTask::Checkpoint => Instant::now() + period,
            _ => Instant::now(),
        };
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("🚀 Refresh task {} every {:?}", task.name(), period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once(task).await {
                        warn!("⚠️ Refresh {} failed: {:#}", task.name(), e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Refresh task {} stopped", task.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_names_are_unique() {
        let mut names: Vec<&str> = RefreshTask::ALL.iter().map(|t| t.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), RefreshTask::ALL.len());
    }

    #[test]
    fn test_intervals_follow_settings() {
        let intervals = RefreshIntervals::default();
        assert_eq!(
            RefreshTask::PairPrices.interval(&intervals),
            Duration::from_secs(intervals.pair_prices)
        );
        assert_eq!(
            RefreshTask::Checkpoint.interval(&intervals),
            Duration::from_secs(intervals.checkpoint)
        );

        let zero = RefreshIntervals {
            token_prices: 0,
            ..RefreshIntervals::default()
        };
        assert_eq!(RefreshTask::TokenPrices.interval(&zero), Duration::from_secs(1));
    }
}
