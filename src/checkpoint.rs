//! Daily snapshots of the entity store used to shortcut cold start.
//!
//! One checkpoint per calendar day. A write carrying a block nonce that is not
//! newer than the stored one is discarded, never retried.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::global_state::GlobalState;
use crate::metrics;
use crate::types::{PairSnapshot, TokenSnapshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateCheckpoint {
    pub date: NaiveDate,
    pub block_nonce: u64,
    pub created_at: DateTime<Utc>,
    pub pairs: Vec<PairSnapshot>,
    pub tokens: Vec<TokenSnapshot>,
}

impl StateCheckpoint {
    pub fn capture(state: &GlobalState, block_nonce: u64, now: DateTime<Utc>) -> Self {
        Self {
            date: now.date_naive(),
            block_nonce,
            created_at: now,
            pairs: state.pairs.get_all(),
            tokens: state.tokens.get_all(),
        }
    }

    pub fn pair(&self, address: &str) -> Option<&PairSnapshot> {
        self.pairs.iter().find(|p| p.address == address)
    }

    pub fn token(&self, identifier: &str) -> Option<&TokenSnapshot> {
        self.tokens.iter().find(|t| t.identifier == identifier)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointWrite {
    Written,
    /// A checkpoint with an equal or newer block nonce already exists.
    Discarded,
}

impl CheckpointWrite {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointWrite::Written => "written",
            CheckpointWrite::Discarded => "discarded",
        }
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Most recent checkpoint by day, then block nonce.
    async fn latest(&self) -> Result<Option<StateCheckpoint>>;

    async fn save(&self, checkpoint: &StateCheckpoint) -> Result<CheckpointWrite>;
}

/// Records the outcome of a save the way every store implementation reports it.
pub fn log_checkpoint_write(checkpoint: &StateCheckpoint, outcome: CheckpointWrite) {
    metrics::increment_checkpoint_writes(outcome.as_str());
    if outcome == CheckpointWrite::Discarded {
        warn!(
            "⚠️ Checkpoint for {} at nonce {} discarded: a newer one is already stored",
            checkpoint.date, checkpoint.block_nonce
        );
    }
}

#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<BTreeMap<NaiveDate, StateCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoint(checkpoint: StateCheckpoint) -> Self {
        let store = Self::new();
        if let Ok(mut checkpoints) = store.checkpoints.lock() {
            checkpoints.insert(checkpoint.date, checkpoint);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.checkpoints.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn latest(&self) -> Result<Option<StateCheckpoint>> {
        let checkpoints = self
            .checkpoints
            .lock()
            .map_err(|_| anyhow::anyhow!("checkpoint store poisoned"))?;
        Ok(checkpoints.values().next_back().cloned())
    }

    async fn save(&self, checkpoint: &StateCheckpoint) -> Result<CheckpointWrite> {
        let mut checkpoints = self
            .checkpoints
            .lock()
            .map_err(|_| anyhow::anyhow!("checkpoint store poisoned"))?;
        let outcome = match checkpoints.get(&checkpoint.date) {
            Some(existing) if existing.block_nonce >= checkpoint.block_nonce => {
                CheckpointWrite::Discarded
            }
            _ => {
                checkpoints.insert(checkpoint.date, checkpoint.clone());
                CheckpointWrite::Written
            }
        };
        drop(checkpoints);
        log_checkpoint_write(checkpoint, outcome);
        Ok(outcome)
    }
}
