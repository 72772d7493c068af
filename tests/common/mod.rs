//! Shared fakes for integration tests.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dex_state_mirror::global_state::GroupThresholds;
use dex_state_mirror::interceptor::{GraphQlRequest, QueryResponse, Resolver};
use dex_state_mirror::types::pair::{PairAnalytics, PairInfo, PairInfoFields, PairPrices};
use dex_state_mirror::types::token::{TokenAnalytics, TokenMetadata, TokenPrices};
use dex_state_mirror::types::{PairSnapshot, TokenSnapshot};
use dex_state_mirror::upstream::{
    AnalyticsReader, PairChainReader, PairTokenRefs, TokenChainReader, TokenMetadataApi,
    UpstreamSources,
};
use dex_state_mirror::{FreshnessMonitor, GlobalState};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn new_state() -> Arc<GlobalState> {
    Arc::new(GlobalState::new(
        GroupThresholds::uniform(Duration::seconds(30)),
        GroupThresholds::uniform(Duration::seconds(30)),
    ))
}

pub fn token(identifier: &str, ticker: &str) -> TokenSnapshot {
    let mut token = TokenSnapshot::new(identifier);
    token.metadata.ticker = Some(ticker.to_string());
    token.metadata.token_type = Some("FungibleESDT".to_string());
    token
}

pub fn pair(address: &str, first: &str, second: &str, reserve0: &str, reserve1: &str) -> PairSnapshot {
    let mut pair = PairSnapshot::new(address);
    pair.tokens_and_farms.first_token = Some(TokenSnapshot::new(first));
    pair.tokens_and_farms.second_token = Some(TokenSnapshot::new(second));
    pair.info.info = Some(PairInfo {
        reserve0: reserve0.to_string(),
        reserve1: reserve1.to_string(),
        total_supply: "1000".to_string(),
    });
    pair.info.state = Some("Active".to_string());
    pair
}

/// Seeds pairs and their tokens at `now` and drives the monitor to `DONE`.
pub fn ready_store(pairs: Vec<PairSnapshot>, now: DateTime<Utc>) -> (Arc<GlobalState>, Arc<FreshnessMonitor>) {
    let state = new_state();
    for pair in pairs {
        for id in pair.token_ids() {
            if !state.tokens.contains(id) {
                state.tokens.put(token(id, id.split('-').next().unwrap_or(id)), now);
            }
        }
        state.pairs.put(pair, now);
    }
    state.mark_populated();
    let monitor = Arc::new(FreshnessMonitor::new(state.clone(), std::time::Duration::from_secs(1)));
    monitor.mark_started();
    monitor.check(now);
    (state, monitor)
}

/// Resolver that records every query it receives and answers with canned data.
#[derive(Default)]
pub struct RecordingResolver {
    pub seen: Mutex<Vec<GraphQlRequest>>,
    pub answer: Mutex<Map<String, Value>>,
}

impl RecordingResolver {
    pub fn answering(answer: Value) -> Self {
        let answer = match answer {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            seen: Mutex::new(Vec::new()),
            answer: Mutex::new(answer),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn last_query(&self) -> Option<String> {
        self.last_request().map(|r| r.query)
    }

    pub fn last_request(&self) -> Option<GraphQlRequest> {
        self.seen.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Resolver for RecordingResolver {
    async fn resolve(&self, request: &GraphQlRequest) -> Result<QueryResponse> {
        self.seen.lock().unwrap().push(request.clone());
        Ok(QueryResponse::from_data(self.answer.lock().unwrap().clone()))
    }
}

/// One fake chain backing every upstream trait.
#[derive(Default)]
pub struct FakeChain {
    pub pairs: Mutex<Vec<(String, PairTokenRefs)>>,
    pub reserves: Mutex<HashMap<String, String>>,
    pub token_prices: Mutex<HashMap<String, String>>,
    pub nonce: AtomicUsize,
    pub registry_down: AtomicBool,
    pub failing_pairs: Mutex<Vec<String>>,
    pub info_calls: AtomicUsize,
    pub analytics_calls: AtomicUsize,
    pub metadata_calls: AtomicUsize,
}

impl FakeChain {
    pub fn with_pair(self, address: &str, first: &str, second: &str) -> Self {
        self.pairs.lock().unwrap().push((
            address.to_string(),
            PairTokenRefs {
                first_token_id: first.to_string(),
                second_token_id: second.to_string(),
                lp_token_id: None,
                has_farms: false,
                has_dual_farms: false,
                farm_address: None,
                staking_proxy_address: None,
            },
        ));
        self
    }

    pub fn set_reserve(&self, address: &str, reserve0: &str) {
        self.reserves
            .lock()
            .unwrap()
            .insert(address.to_string(), reserve0.to_string());
    }

    pub fn set_token_price(&self, identifier: &str, price: &str) {
        self.token_prices
            .lock()
            .unwrap()
            .insert(identifier.to_string(), price.to_string());
    }

    pub fn fail_pair(&self, address: &str) {
        self.failing_pairs.lock().unwrap().push(address.to_string());
    }

    pub fn sources(self: &Arc<Self>) -> UpstreamSources {
        UpstreamSources {
            pairs: self.clone(),
            tokens: self.clone(),
            analytics: self.clone(),
            metadata: self.clone(),
        }
    }

    fn check_pair(&self, address: &str) -> Result<()> {
        if self.failing_pairs.lock().unwrap().iter().any(|a| a == address) {
            return Err(anyhow!("pair {} unavailable", address));
        }
        Ok(())
    }
}

#[async_trait]
impl PairChainReader for FakeChain {
    async fn pair_addresses(&self) -> Result<Vec<String>> {
        if self.registry_down.load(Ordering::SeqCst) {
            return Err(anyhow!("registry unavailable"));
        }
        Ok(self
            .pairs
            .lock()
            .unwrap()
            .iter()
            .map(|(address, _)| address.clone())
            .collect())
    }

    async fn block_nonce(&self) -> Result<u64> {
        Ok(self.nonce.load(Ordering::SeqCst) as u64)
    }

    async fn token_refs(&self, address: &str) -> Result<PairTokenRefs> {
        self.check_pair(address)?;
        self.pairs
            .lock()
            .unwrap()
            .iter()
            .find(|(a, _)| a == address)
            .map(|(_, refs)| refs.clone())
            .ok_or_else(|| anyhow!("unknown pair {}", address))
    }

    async fn info(&self, address: &str) -> Result<PairInfoFields> {
        self.check_pair(address)?;
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        let reserve0 = self
            .reserves
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_else(|| "100".to_string());
        Ok(PairInfoFields {
            info: Some(PairInfo {
                reserve0,
                reserve1: "200".to_string(),
                total_supply: "1000".to_string(),
            }),
            state: Some("Active".to_string()),
            ..Default::default()
        })
    }

    async fn prices(&self, address: &str) -> Result<PairPrices> {
        self.check_pair(address)?;
        Ok(PairPrices {
            locked_value_usd: Some("5000".to_string()),
            ..Default::default()
        })
    }
}

#[async_trait]
impl TokenChainReader for FakeChain {
    async fn prices(&self, identifier: &str) -> Result<TokenPrices> {
        let price = self
            .token_prices
            .lock()
            .unwrap()
            .get(identifier)
            .cloned()
            .unwrap_or_else(|| "1".to_string());
        Ok(TokenPrices {
            price: Some(price),
            ..Default::default()
        })
    }
}

#[async_trait]
impl AnalyticsReader for FakeChain {
    async fn pair_analytics(&self, _address: &str) -> Result<PairAnalytics> {
        self.analytics_calls.fetch_add(1, Ordering::SeqCst);
        Ok(PairAnalytics {
            trades_count: Some(7),
            ..Default::default()
        })
    }

    async fn token_analytics(&self, _identifier: &str) -> Result<TokenAnalytics> {
        self.analytics_calls.fetch_add(1, Ordering::SeqCst);
        Ok(TokenAnalytics {
            liquidity_usd: Some("2500".to_string()),
            ..Default::default()
        })
    }
}

#[async_trait]
impl TokenMetadataApi for FakeChain {
    async fn metadata(&self, identifier: &str) -> Result<TokenMetadata> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        Ok(TokenMetadata {
            name: Some(format!("{} token", identifier)),
            ticker: identifier.split('-').next().map(str::to_string),
            decimals: Some(18),
            token_type: Some("FungibleESDT".to_string()),
            ..Default::default()
        })
    }
}
