//! Periodic readiness evaluation over the entity store.
//!
//! The monitor never mutates the store. It derives one global status from
//! per-group staleness of every pair and of the tokens each pair depends on.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::global_state::GlobalState;
use crate::metrics;
use crate::types::{FieldGroup, PairGroup, TokenGroup};

/// Global readiness of the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadinessStatus {
    NotStarted,
    InProgress,
    Done,
    Failed,
}

impl ReadinessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadinessStatus::NotStarted => "NOT_STARTED",
            ReadinessStatus::InProgress => "IN_PROGRESS",
            ReadinessStatus::Done => "DONE",
            ReadinessStatus::Failed => "FAILED",
        }
    }

    fn gauge_value(&self) -> f64 {
        match self {
            ReadinessStatus::NotStarted => 0.0,
            ReadinessStatus::InProgress => 1.0,
            ReadinessStatus::Done => 2.0,
            ReadinessStatus::Failed => -1.0,
        }
    }
}

impl fmt::Display for ReadinessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one freshness pass, kept for logging.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FreshnessReport {
    pub stale_pairs: Vec<String>,
    pub stale_tokens: Vec<String>,
    pub missing_tokens: Vec<String>,
}

impl FreshnessReport {
    pub fn is_fresh(&self) -> bool {
        self.stale_pairs.is_empty() && self.stale_tokens.is_empty() && self.missing_tokens.is_empty()
    }
}

/// Derives [`ReadinessStatus`] from the store's own timestamps.
pub struct FreshnessMonitor {
    state: Arc<GlobalState>,
    status_tx: watch::Sender<ReadinessStatus>,
    check_interval: Duration,
}

impl FreshnessMonitor {
    pub fn new(state: Arc<GlobalState>, check_interval: Duration) -> Self {
        let (status_tx, _) = watch::channel(ReadinessStatus::NotStarted);
        Self {
            state,
            status_tx,
            check_interval,
        }
    }

    pub fn status(&self) -> ReadinessStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReadinessStatus> {
        self.status_tx.subscribe()
    }

    /// Called by the sync pipeline when the first population pass begins.
    pub fn mark_started(&self) {
        self.transition(ReadinessStatus::InProgress);
    }

    /// Called when an upstream source errors permanently during population.
    pub fn mark_failed(&self) {
        if self.status() == ReadinessStatus::InProgress {
            self.transition(ReadinessStatus::Failed);
        }
    }

    // Each transition is logged once; repeated evaluations with the same
    // outcome stay silent.
    fn transition(&self, next: ReadinessStatus) -> bool {
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            match next {
                ReadinessStatus::Failed => warn!("❌ Mirror readiness changed to {}", next),
                _ => info!("Mirror readiness changed to {}", next),
            }
            metrics::set_readiness(next.gauge_value());
        }
        changed
    }

    /// Collects every pair/token outside its thresholds at `now`.
    pub fn inspect(&self, now: DateTime<Utc>) -> FreshnessReport {
        let mut report = FreshnessReport {
            stale_pairs: self.state.pairs.stale_ids(PairGroup::all(), now),
            stale_tokens: self.state.tokens.stale_ids(TokenGroup::all(), now),
            missing_tokens: Vec::new(),
        };

        // Stored tokens were all checked above; only dependencies not in the
        // store remain.
        let mut checked = std::collections::HashSet::new();
        for pair in self.state.pairs.get_all() {
            for token_id in pair.token_ids() {
                if !checked.insert(token_id.to_string()) {
                    continue;
                }
                if !self.state.tokens.contains(token_id) {
                    report.missing_tokens.push(token_id.to_string());
                }
            }
        }
        report
    }

    /// Pure status computation for `now`; does not publish.
    pub fn evaluate(&self, now: DateTime<Utc>) -> ReadinessStatus {
        match self.status() {
            ReadinessStatus::NotStarted => return ReadinessStatus::NotStarted,
            ReadinessStatus::Failed => return ReadinessStatus::Failed,
            _ => {}
        }
        if !self.state.is_populated() || !self.inspect(now).is_fresh() {
            ReadinessStatus::InProgress
        } else {
            ReadinessStatus::Done
        }
    }

    /// Evaluates and publishes the status, returning it.
    pub fn check(&self, now: DateTime<Utc>) -> ReadinessStatus {
        let next = self.evaluate(now);
        if next == ReadinessStatus::InProgress && self.status() == ReadinessStatus::Done {
            let report = self.inspect(now);
            warn!(
                "⚠️ Store went stale: {} pairs, {} tokens stale, {} tokens missing",
                report.stale_pairs.len(),
                report.stale_tokens.len(),
                report.missing_tokens.len()
            );
        }
        self.transition(next);
        next
    }

    /// Runs [`check`](Self::check) every interval until `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("🚀 Freshness monitor running every {:?}", self.check_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check(Utc::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Freshness monitor stopped");
    }
}
