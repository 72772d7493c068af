//! Process-wide entity store.
//!
//! Holds one insertion-ordered collection per entity kind plus, per entity,
//! the last time each field group was written. Writers replace a whole
//! snapshot or one field group of it; the last writer for a given group wins.

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::metrics;
use crate::types::{EntityKind, EntitySnapshot, FieldGroup, PairSnapshot, TokenSnapshot};

/// Staleness threshold per field group.
#[derive(Debug, Clone)]
pub struct GroupThresholds<G: FieldGroup> {
    thresholds: HashMap<G, Duration>,
}

impl<G: FieldGroup> GroupThresholds<G> {
    pub fn new(thresholds: HashMap<G, Duration>) -> Self {
        Self { thresholds }
    }

    /// Same threshold for every group.
    pub fn uniform(threshold: Duration) -> Self {
        Self {
            thresholds: G::all().iter().map(|g| (*g, threshold)).collect(),
        }
    }

    /// Groups without an explicit threshold are always stale.
    pub fn threshold(&self, group: G) -> Duration {
        self.thresholds.get(&group).copied().unwrap_or_else(Duration::zero)
    }
}

#[derive(Debug, Clone)]
struct StoredEntity<T: EntitySnapshot> {
    snapshot: T,
    last_update: HashMap<T::Group, DateTime<Utc>>,
}

/// Insertion-ordered `id -> snapshot` map with per-group update timestamps.
#[derive(Debug)]
pub struct EntityCollection<T: EntitySnapshot> {
    kind: EntityKind,
    entries: RwLock<IndexMap<String, StoredEntity<T>>>,
    thresholds: GroupThresholds<T::Group>,
}

impl<T: EntitySnapshot> EntityCollection<T> {
    pub fn new(kind: EntityKind, thresholds: GroupThresholds<T::Group>) -> Self {
        Self {
            kind,
            entries: RwLock::new(IndexMap::new()),
            thresholds,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn thresholds(&self) -> &GroupThresholds<T::Group> {
        &self.thresholds
    }

    // Writers never panic while holding the lock, so a poisoned guard still
    // protects a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, StoredEntity<T>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, StoredEntity<T>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.read().get(id).map(|e| e.snapshot.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// All snapshots in insertion order.
    pub fn get_all(&self) -> Vec<T> {
        self.read().values().map(|e| e.snapshot.clone()).collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Replaces the whole snapshot and marks every group as written at `now`.
    pub fn put(&self, snapshot: T, now: DateTime<Utc>) {
        let last_update = <T::Group as FieldGroup>::all()
            .iter()
            .map(|g| (*g, now))
            .collect();
        let id = snapshot.id().to_string();
        self.write().insert(
            id,
            StoredEntity {
                snapshot,
                last_update,
            },
        );
    }

    /// Overwrites one field group's data and timestamp, creating an empty
    /// snapshot first if the id is unknown. Returns the group written.
    pub fn patch(&self, id: &str, patch: T::Patch, now: DateTime<Utc>) -> T::Group {
        let group = T::patch_group(&patch);
        let mut entries = self.write();
        let entry = entries.entry(id.to_string()).or_insert_with(|| StoredEntity {
            snapshot: T::empty(id),
            last_update: HashMap::new(),
        });
        entry.snapshot.apply_patch(patch);
        entry.last_update.insert(group, now);
        debug!("Patched {} {} group {}", self.kind, id, group);
        group
    }

    pub fn remove(&self, id: &str) -> Option<T> {
        self.write().shift_remove(id).map(|e| e.snapshot)
    }

    pub fn last_update(&self, id: &str, group: T::Group) -> Option<DateTime<Utc>> {
        self.read()
            .get(id)
            .and_then(|e| e.last_update.get(&group).copied())
    }

    fn group_fresh(&self, entry: &StoredEntity<T>, group: T::Group, now: DateTime<Utc>) -> bool {
        entry
            .last_update
            .get(&group)
            .map(|at| now.signed_duration_since(*at) <= self.thresholds.threshold(group))
            .unwrap_or(false)
    }

    /// `true` when the entity exists and each of `groups` was written within its threshold.
    pub fn is_fresh(&self, id: &str, groups: &[T::Group], now: DateTime<Utc>) -> bool {
        self.read()
            .get(id)
            .map(|entry| groups.iter().all(|g| self.group_fresh(entry, *g, now)))
            .unwrap_or(false)
    }

    /// Ids of entities with at least one of `groups` outside its threshold.
    pub fn stale_ids(&self, groups: &[T::Group], now: DateTime<Utc>) -> Vec<String> {
        self.read()
            .iter()
            .filter(|(_, entry)| !groups.iter().all(|g| self.group_fresh(entry, *g, now)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// `true` when every stored entity is fresh for `groups`.
    pub fn all_fresh(&self, groups: &[T::Group], now: DateTime<Utc>) -> bool {
        self.read()
            .values()
            .all(|entry| groups.iter().all(|g| self.group_fresh(entry, *g, now)))
    }

    pub fn clear(&self) {
        self.write().clear();
    }
}

/// The entity store shared by the monitor, the sync pipeline and the query layer.
///
/// Constructed once at startup and handed out by `Arc`; there is no global
/// instance.
#[derive(Debug)]
pub struct GlobalState {
    pub pairs: EntityCollection<PairSnapshot>,
    pub tokens: EntityCollection<TokenSnapshot>,
    populated: AtomicBool,
    closed: AtomicBool,
}

impl GlobalState {
    pub fn new(
        pair_thresholds: GroupThresholds<crate::types::PairGroup>,
        token_thresholds: GroupThresholds<crate::types::TokenGroup>,
    ) -> Self {
        Self {
            pairs: EntityCollection::new(EntityKind::Pair, pair_thresholds),
            tokens: EntityCollection::new(EntityKind::Token, token_thresholds),
            populated: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Set once the cold-start population pass has finished.
    pub fn mark_populated(&self) {
        if !self.populated.swap(true, Ordering::SeqCst) {
            info!(
                "✅ Entity store populated: {} pairs, {} tokens",
                self.pairs.len(),
                self.tokens.len()
            );
        }
        self.record_sizes();
    }

    pub fn is_populated(&self) -> bool {
        self.populated.load(Ordering::SeqCst)
    }

    pub fn record_sizes(&self) {
        metrics::set_store_size(EntityKind::Pair.as_str(), self.pairs.len() as f64);
        metrics::set_store_size(EntityKind::Token.as_str(), self.tokens.len() as f64);
    }

    /// Drops all snapshots; further reads see an empty, unpopulated store.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.populated.store(false, Ordering::SeqCst);
        self.pairs.clear();
        self.tokens.clear();
        info!("Entity store closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
