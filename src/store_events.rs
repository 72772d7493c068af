//! Internal event channel feeding synced data into the entity store.
//!
//! Sync and refresh tasks never write the store directly once the service is
//! running. They send [`StoreEvent`]s to a single [`StoreEventApplier`] task
//! which patches the store and publishes the affected cache keys.

use anyhow::{anyhow, Result};
use chrono::Utc;
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::global_state::GlobalState;
use crate::invalidation::{entity_group_key, InvalidationBus};
use crate::metrics;
use crate::types::{
    EntityKind, EntitySnapshot, FieldGroup, PairPatch, PairSnapshot, TokenPatch, TokenSnapshot,
};

#[derive(Debug, Clone)]
pub enum StoreEvent {
    PutPair(PairSnapshot),
    PutToken(TokenSnapshot),
    UpdatePairGroup { address: String, patch: PairPatch },
    UpdateTokenGroup { identifier: String, patch: TokenPatch },
}

/// Cloneable sending half handed to sync tasks.
#[derive(Debug, Clone)]
pub struct StoreEventSender {
    tx: mpsc::Sender<StoreEvent>,
}

impl StoreEventSender {
    pub async fn send(&self, event: StoreEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| anyhow!("store event channel closed"))
    }
}

pub fn store_event_channel(capacity: usize) -> (StoreEventSender, mpsc::Receiver<StoreEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (StoreEventSender { tx }, rx)
}

pub struct StoreEventApplier {
    state: Arc<GlobalState>,
    bus: InvalidationBus,
}

impl StoreEventApplier {
    pub fn new(state: Arc<GlobalState>, bus: InvalidationBus) -> Self {
        Self { state, bus }
    }

    /// Applies one event and returns the cache keys it invalidated.
    pub fn apply(&self, event: StoreEvent) -> Vec<String> {
        let now = Utc::now();
        match event {
            StoreEvent::PutPair(pair) => {
                let keys = all_group_keys::<PairSnapshot>(EntityKind::Pair, pair.id());
                self.state.pairs.put(pair, now);
                keys
            }
            StoreEvent::PutToken(token) => {
                let keys = all_group_keys::<TokenSnapshot>(EntityKind::Token, token.id());
                self.state.tokens.put(token, now);
                keys
            }
            StoreEvent::UpdatePairGroup { address, patch } => {
                let group = self.state.pairs.patch(&address, patch, now);
                metrics::increment_store_patches(EntityKind::Pair.as_str(), group.name());
                vec![entity_group_key(EntityKind::Pair, &address, group.name())]
            }
            StoreEvent::UpdateTokenGroup { identifier, patch } => {
                let group = self.state.tokens.patch(&identifier, patch, now);
                metrics::increment_store_patches(EntityKind::Token.as_str(), group.name());
                vec![entity_group_key(EntityKind::Token, &identifier, group.name())]
            }
        }
    }

    fn apply_and_publish(&self, event: StoreEvent) {
        let keys = self.apply(event);
        self.bus.publish(keys);
    }

    /// Applies events until every sender is dropped or shutdown is signalled,
    /// then drains whatever is still queued.
    pub async fn run(self, mut rx: mpsc::Receiver<StoreEvent>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => self.apply_and_publish(event),
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        rx.close();
        let mut drained = 0usize;
        while let Some(event) = rx.recv().await {
            self.apply_and_publish(event);
            drained += 1;
        }
        if drained > 0 {
            debug!("Applied {} queued store events on shutdown", drained);
        }
        self.state.record_sizes();
        info!("Store event applier stopped");
    }
}

fn all_group_keys<T: EntitySnapshot>(kind: EntityKind, id: &str) -> Vec<String> {
    <T::Group as FieldGroup>::all()
        .iter()
        .map(|g| entity_group_key(kind, id, g.name()))
        .collect()
}
