//! Populates and refreshes the entity store from upstream sources.
//!
//! Cold start prefers the latest checkpoint: a pair is restored when it and
//! both of its tokens are present there, everything else is pulled fresh.
//! Analytics are only computed for fresh pulls. Ongoing refreshes patch one
//! field group at a time through the store event channel.

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::checkpoint::{CheckpointStore, CheckpointWrite, StateCheckpoint};
use crate::freshness_monitor::FreshnessMonitor;
use crate::global_state::GlobalState;
use crate::metrics;
use crate::store_events::{StoreEvent, StoreEventSender};
use crate::types::pair::PairTokensAndFarms;
use crate::types::{PairPatch, PairSnapshot, TokenPatch, TokenSnapshot};
use crate::upstream::{with_retry, PairTokenRefs, RetryPolicy, UpstreamSources};

/// Counts of one cold start pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColdStartReport {
    pub restored_pairs: usize,
    pub fetched_pairs: usize,
    pub restored_tokens: usize,
    pub fetched_tokens: usize,
    pub failed: usize,
}

/// Counts of one refresh pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub updated: usize,
    pub failed: usize,
}

pub struct StateSync {
    state: Arc<GlobalState>,
    sources: UpstreamSources,
    events: StoreEventSender,
    checkpoints: Arc<dyn CheckpointStore>,
    monitor: Arc<FreshnessMonitor>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl StateSync {
    pub fn new(
        state: Arc<GlobalState>,
        sources: UpstreamSources,
        events: StoreEventSender,
        checkpoints: Arc<dyn CheckpointStore>,
        monitor: Arc<FreshnessMonitor>,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            state,
            sources,
            events,
            checkpoints,
            monitor,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    // ==================== COLD START ====================

    /// First population pass. Registry exhaustion marks readiness `FAILED`.
    pub async fn cold_start(&self) -> Result<ColdStartReport> {
        let started = Instant::now();
        self.monitor.mark_started();

        let checkpoint = match self.checkpoints.latest().await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!("⚠️ Could not load checkpoint, pulling everything fresh: {:#}", e);
                None
            }
        };
        if let Some(cp) = &checkpoint {
            info!(
                "📦 Loaded checkpoint {} (nonce {}, {} pairs, {} tokens)",
                cp.date,
                cp.block_nonce,
                cp.pairs.len(),
                cp.tokens.len()
            );
        }

        let pairs_reader = self.sources.pairs.clone();
        let addresses = match with_retry(&self.retry, "pair_addresses", || {
            pairs_reader.pair_addresses()
        })
        .await
        {
            Ok(addresses) => addresses,
            Err(e) => {
                self.monitor.mark_failed();
                return Err(e.context("pair registry unavailable"));
            }
        };

        let mut report = ColdStartReport::default();
        let mut known_tokens: HashMap<String, TokenSnapshot> = HashMap::new();
        // Pairs waiting to be stored in registry order, with their update time.
        let mut ready: HashMap<String, (PairSnapshot, DateTime<Utc>)> = HashMap::new();
        let mut fresh_addresses = Vec::new();

        for address in &addresses {
            let restored = checkpoint
                .as_ref()
                .and_then(|cp| restorable(cp, address).map(|found| (found, cp.created_at)));
            match restored {
                Some(((pair, tokens), taken_at)) => {
                    // Restored data is only as fresh as the checkpoint itself.
                    for token in tokens {
                        if !known_tokens.contains_key(&token.identifier) {
                            self.state.tokens.put(token.clone(), taken_at);
                            known_tokens.insert(token.identifier.clone(), token);
                            report.restored_tokens += 1;
                        }
                    }
                    ready.insert(address.clone(), (pair, taken_at));
                    report.restored_pairs += 1;
                }
                None => fresh_addresses.push(address.clone()),
            }
        }

        // Token references of every fresh pair decide which tokens to pull.
        // `buffered` keeps registry order so the store order is deterministic.
        let refs: Vec<(String, Result<PairTokenRefs>)> = stream::iter(fresh_addresses)
            .map(|address| async move {
                let reader = &self.sources.pairs;
                let refs = with_retry(&self.retry, "pair_token_refs", || reader.token_refs(&address)).await;
                (address, refs)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut fresh_pairs = Vec::new();
        let mut missing_tokens = Vec::new();
        for (address, refs) in refs {
            match refs {
                Ok(refs) => {
                    for id in token_ids_of(&refs) {
                        if !known_tokens.contains_key(&id) && !missing_tokens.contains(&id) {
                            missing_tokens.push(id);
                        }
                    }
                    fresh_pairs.push((address, refs));
                }
                Err(_) => report.failed += 1,
            }
        }

        let tokens: Vec<Result<TokenSnapshot>> = stream::iter(missing_tokens)
            .map(|id| self.fetch_token(id))
            .buffered(self.concurrency)
            .collect()
            .await;
        for token in tokens {
            match token {
                Ok(token) => {
                    self.state.tokens.put(token.clone(), Utc::now());
                    known_tokens.insert(token.identifier.clone(), token);
                    report.fetched_tokens += 1;
                }
                Err(_) => report.failed += 1,
            }
        }

        let known = &known_tokens;
        let pairs: Vec<Result<PairSnapshot>> = stream::iter(fresh_pairs)
            .map(|(address, refs)| self.fetch_pair(address, refs, known))
            .buffered(self.concurrency)
            .collect()
            .await;
        let fetched_at = Utc::now();
        for pair in pairs {
            match pair {
                Ok(pair) => {
                    ready.insert(pair.address.clone(), (pair, fetched_at));
                    report.fetched_pairs += 1;
                }
                Err(_) => report.failed += 1,
            }
        }

        for address in &addresses {
            if let Some((pair, updated_at)) = ready.remove(address) {
                self.state.pairs.put(pair, updated_at);
            }
        }

        self.state.mark_populated();
        self.monitor.check(Utc::now());
        metrics::record_sync_duration("cold_start", started.elapsed());
        info!(
            "✅ Cold start done in {:?}: {} pairs restored, {} fetched, {} tokens restored, {} fetched, {} failed",
            started.elapsed(),
            report.restored_pairs,
            report.fetched_pairs,
            report.restored_tokens,
            report.fetched_tokens,
            report.failed
        );
        Ok(report)
    }

    async fn fetch_token(&self, identifier: String) -> Result<TokenSnapshot> {
        let sources = &self.sources;
        let retry = &self.retry;
        let metadata = with_retry(retry, "token_metadata", || sources.metadata.metadata(&identifier));
        let prices = with_retry(retry, "token_prices", || sources.tokens.prices(&identifier));
        let analytics = with_retry(retry, "token_analytics", || {
            sources.analytics.token_analytics(&identifier)
        });
        let (metadata, prices, analytics) = futures::try_join!(metadata, prices, analytics)?;
        Ok(TokenSnapshot {
            identifier,
            metadata,
            prices,
            analytics,
        })
    }

    async fn fetch_pair(
        &self,
        address: String,
        refs: PairTokenRefs,
        tokens: &HashMap<String, TokenSnapshot>,
    ) -> Result<PairSnapshot> {
        let sources = &self.sources;
        let retry = &self.retry;
        let info = with_retry(retry, "pair_info", || sources.pairs.info(&address));
        let prices = with_retry(retry, "pair_prices", || sources.pairs.prices(&address));
        let analytics = with_retry(retry, "pair_analytics", || {
            sources.analytics.pair_analytics(&address)
        });
        let (info, prices, analytics) = futures::try_join!(info, prices, analytics)?;
        Ok(PairSnapshot {
            tokens_and_farms: tokens_and_farms(&refs, |id| tokens.get(id).cloned()),
            address,
            info,
            prices,
            analytics,
        })
    }

    // ==================== REFRESH TASKS ====================

    /// Fetches one event per id with bounded concurrency and sends each as it completes.
    async fn refresh_each<F, Fut>(&self, task: &str, ids: Vec<String>, fetch: F) -> Result<RefreshOutcome>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<StoreEvent>>,
    {
        let started = Instant::now();
        let mut outcome = RefreshOutcome::default();
        let mut results = stream::iter(ids).map(fetch).buffer_unordered(self.concurrency);
        while let Some(result) = results.next().await {
            match result {
                Ok(event) => {
                    self.events.send(event).await?;
                    outcome.updated += 1;
                }
                Err(_) => outcome.failed += 1,
            }
        }
        metrics::record_sync_duration(task, started.elapsed());
        if outcome.failed > 0 {
            warn!(
                "⚠️ Refresh {}: {} updated, {} failed",
                task, outcome.updated, outcome.failed
            );
        }
        Ok(outcome)
    }

    /// Tokens worth tracking: everything stored plus every token a pair references.
    pub fn tracked_token_ids(&self) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut ids = Vec::new();
        let stored = self.state.tokens.ids();
        let referenced = self
            .state
            .pairs
            .get_all()
            .into_iter()
            .flat_map(|p| {
                p.token_ids()
                    .into_iter()
                    .map(str::to_string)
                    .chain(p.lp_token_id().map(str::to_string))
                    .collect::<Vec<_>>()
            });
        for id in stored.into_iter().chain(referenced) {
            if seen.insert(id.clone()) {
                ids.push(id);
            }
        }
        ids
    }

    /// Re-reads the registry. Known pairs get their token copies and farm
    /// wiring patched, pairs seen for the first time are fetched whole.
    pub async fn refresh_pair_tokens_and_farms(&self) -> Result<RefreshOutcome> {
        let reader = self.sources.pairs.clone();
        let addresses =
            with_retry(&self.retry, "pair_addresses", || reader.pair_addresses()).await?;
        self.refresh_each("pair_tokens_and_farms", addresses, |address| {
            self.pair_tokens_and_farms_event(address)
        })
        .await
    }

    async fn pair_tokens_and_farms_event(&self, address: String) -> Result<StoreEvent> {
        let reader = &self.sources.pairs;
        let refs = with_retry(&self.retry, "pair_token_refs", || reader.token_refs(&address)).await?;
        if self.state.pairs.contains(&address) {
            let group = tokens_and_farms(&refs, |id| self.state.tokens.get(id));
            return Ok(StoreEvent::UpdatePairGroup {
                address,
                patch: PairPatch::TokensAndFarms(group),
            });
        }
        info!("🆕 New pair {} found in registry", address);
        let known: HashMap<String, TokenSnapshot> = token_ids_of(&refs)
            .into_iter()
            .filter_map(|id| self.state.tokens.get(&id).map(|t| (id, t)))
            .collect();
        Ok(StoreEvent::PutPair(self.fetch_pair(address, refs, &known).await?))
    }

    pub async fn refresh_pair_info(&self) -> Result<RefreshOutcome> {
        let reader = self.sources.pairs.clone();
        let retry = self.retry.clone();
        self.refresh_each("pair_info", self.state.pairs.ids(), move |address| {
            let reader = reader.clone();
            let retry = retry.clone();
            async move {
                let info = with_retry(&retry, "pair_info", || reader.info(&address)).await?;
                Ok(StoreEvent::UpdatePairGroup {
                    address,
                    patch: PairPatch::Info(info),
                })
            }
        })
        .await
    }

    pub async fn refresh_pair_prices(&self) -> Result<RefreshOutcome> {
        let reader = self.sources.pairs.clone();
        let retry = self.retry.clone();
        self.refresh_each("pair_prices", self.state.pairs.ids(), move |address| {
            let reader = reader.clone();
            let retry = retry.clone();
            async move {
                let prices = with_retry(&retry, "pair_prices", || reader.prices(&address)).await?;
                Ok(StoreEvent::UpdatePairGroup {
                    address,
                    patch: PairPatch::Prices(prices),
                })
            }
        })
        .await
    }

    pub async fn refresh_pair_analytics(&self) -> Result<RefreshOutcome> {
        let reader = self.sources.analytics.clone();
        let retry = self.retry.clone();
        self.refresh_each("pair_analytics", self.state.pairs.ids(), move |address| {
            let reader = reader.clone();
            let retry = retry.clone();
            async move {
                let analytics =
                    with_retry(&retry, "pair_analytics", || reader.pair_analytics(&address)).await?;
                Ok(StoreEvent::UpdatePairGroup {
                    address,
                    patch: PairPatch::Analytics(analytics),
                })
            }
        })
        .await
    }

    pub async fn refresh_token_metadata(&self) -> Result<RefreshOutcome> {
        let api = self.sources.metadata.clone();
        let retry = self.retry.clone();
        self.refresh_each("token_metadata", self.tracked_token_ids(), move |identifier| {
            let api = api.clone();
            let retry = retry.clone();
            async move {
                let metadata = with_retry(&retry, "token_metadata", || api.metadata(&identifier)).await?;
                Ok(StoreEvent::UpdateTokenGroup {
                    identifier,
                    patch: TokenPatch::Metadata(metadata),
                })
            }
        })
        .await
    }

    pub async fn refresh_token_prices(&self) -> Result<RefreshOutcome> {
        let reader = self.sources.tokens.clone();
        let retry = self.retry.clone();
        self.refresh_each("token_prices", self.tracked_token_ids(), move |identifier| {
            let reader = reader.clone();
            let retry = retry.clone();
            async move {
                let prices = with_retry(&retry, "token_prices", || reader.prices(&identifier)).await?;
                Ok(StoreEvent::UpdateTokenGroup {
                    identifier,
                    patch: TokenPatch::Prices(prices),
                })
            }
        })
        .await
    }

    pub async fn refresh_token_analytics(&self) -> Result<RefreshOutcome> {
        let reader = self.sources.analytics.clone();
        let retry = self.retry.clone();
        self.refresh_each("token_analytics", self.tracked_token_ids(), move |identifier| {
            let reader = reader.clone();
            let retry = retry.clone();
            async move {
                let analytics =
                    with_retry(&retry, "token_analytics", || reader.token_analytics(&identifier))
                        .await?;
                Ok(StoreEvent::UpdateTokenGroup {
                    identifier,
                    patch: TokenPatch::Analytics(analytics),
                })
            }
        })
        .await
    }

    /// Persists the current store under today's date, watermarked by block nonce.
    pub async fn save_checkpoint(&self) -> Result<CheckpointWrite> {
        if !self.state.is_populated() {
            return Ok(CheckpointWrite::Discarded);
        }
        let started = Instant::now();
        let reader = self.sources.pairs.clone();
        let nonce = with_retry(&self.retry, "block_nonce", || reader.block_nonce()).await?;
        let checkpoint = StateCheckpoint::capture(&self.state, nonce, Utc::now());
        let outcome = self.checkpoints.save(&checkpoint).await?;
        metrics::record_sync_duration("checkpoint", started.elapsed());
        if outcome == CheckpointWrite::Written {
            info!(
                "💾 Checkpoint {} saved at nonce {} ({} pairs, {} tokens)",
                checkpoint.date,
                nonce,
                checkpoint.pairs.len(),
                checkpoint.tokens.len()
            );
        }
        Ok(outcome)
    }
}

/// The checkpoint copy of `address` with both of its tokens, if complete.
fn restorable(cp: &StateCheckpoint, address: &str) -> Option<(PairSnapshot, Vec<TokenSnapshot>)> {
    let pair = cp.pair(address)?;
    let ids = pair.token_ids();
    if ids.len() < 2 {
        return None;
    }
    let tokens = ids
        .iter()
        .map(|id| cp.token(id).cloned())
        .collect::<Option<Vec<_>>>()?;
    Some((pair.clone(), tokens))
}

fn token_ids_of(refs: &PairTokenRefs) -> Vec<String> {
    vec![refs.first_token_id.clone(), refs.second_token_id.clone()]
}

/// Denormalizes token copies into the pair's `tokensAndFarms` group.
fn tokens_and_farms<F>(refs: &PairTokenRefs, lookup: F) -> PairTokensAndFarms
where
    F: Fn(&str) -> Option<TokenSnapshot>,
{
    let copy = |id: &str| Some(lookup(id).unwrap_or_else(|| TokenSnapshot::new(id)));
    PairTokensAndFarms {
        first_token: copy(&refs.first_token_id),
        second_token: copy(&refs.second_token_id),
        liquidity_pool_token: refs.lp_token_id.as_deref().and_then(copy),
        has_farms: Some(refs.has_farms),
        has_dual_farms: Some(refs.has_dual_farms),
        farm_address: refs.farm_address.clone(),
        staking_proxy_address: refs.staking_proxy_address.clone(),
    }
}
