//! Store-side answers for pair queries.

use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::MirrorError;
use crate::global_state::{EntityCollection, GlobalState};
use crate::projection::{PAIRS_CONNECTION_TYPE, PAIR_TYPE};
use crate::store_query::{
    filter_object, matches_search, one_or_many, optional_decimal, QueryMeta, QueryShape,
    QueryableStore,
};
use crate::types::decimal::{at_least, parse_decimal};
use crate::types::{EntityKind, PairSnapshot};

/// Pair fields resolved elsewhere and never mirrored.
pub const PAIR_MISSING_FIELDS: &[&str] = &[
    "feesCollector",
    "lockedTokensInfo",
    "whitelistedManagedAddresses",
    "initialLiquidityAdder",
];

pub static PAIR_QUERIES: &[QueryMeta] = &[
    QueryMeta {
        name: "pairs",
        shape: QueryShape::List,
        identifier_field: "address",
        missing_fields: PAIR_MISSING_FIELDS,
        sortable: false,
    },
    QueryMeta {
        name: "filteredPairs",
        shape: QueryShape::Connection,
        identifier_field: "address",
        missing_fields: PAIR_MISSING_FIELDS,
        sortable: true,
    },
];

/// Filter arguments shared by `pairs` (top-level) and `filteredPairs` (`filters`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairsFilter {
    #[serde(default, deserialize_with = "one_or_many")]
    pub addresses: Option<Vec<String>>,
    #[serde(rename = "firstTokenID")]
    pub first_token_id: Option<String>,
    #[serde(rename = "secondTokenID")]
    pub second_token_id: Option<String>,
    pub issued_lp_token: Option<bool>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub state: Option<Vec<String>>,
    pub search_token: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub lp_token_ids: Option<Vec<String>>,
    pub has_farms: Option<bool>,
    pub has_dual_farms: Option<bool>,
    #[serde(default, deserialize_with = "optional_decimal")]
    pub min_volume: Option<BigDecimal>,
    #[serde(default, rename = "minLockedValueUSD", deserialize_with = "optional_decimal")]
    pub min_locked_value_usd: Option<BigDecimal>,
    pub min_trades_count: Option<u64>,
    pub min_trades_count_24h: Option<u64>,
    pub min_deployed_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairSortField {
    DeployedAt,
    Fees24h,
    TradesCount,
    TradesCount24h,
    Tvl,
    Volume24h,
    Apr,
}

impl PairSortField {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "DEPLOYED_AT" => Some(PairSortField::DeployedAt),
            "FEES_24H" => Some(PairSortField::Fees24h),
            "TRADES_COUNT" => Some(PairSortField::TradesCount),
            "TRADES_COUNT_24H" => Some(PairSortField::TradesCount24h),
            "TVL" => Some(PairSortField::Tvl),
            "VOLUME_24H" => Some(PairSortField::Volume24h),
            "APR" => Some(PairSortField::Apr),
            _ => None,
        }
    }
}

pub struct PairStore {
    state: Arc<GlobalState>,
}

impl PairStore {
    pub fn new(state: Arc<GlobalState>) -> Self {
        Self { state }
    }
}

fn token_side_matches(pair: &PairSnapshot, filter: &PairsFilter) -> bool {
    let first = pair.first_token_id();
    let second = pair.second_token_id();
    match (&filter.first_token_id, &filter.second_token_id) {
        (Some(a), Some(b)) => {
            (first == Some(a.as_str()) && second == Some(b.as_str()))
                || (first == Some(b.as_str()) && second == Some(a.as_str()))
        }
        (Some(a), None) => first == Some(a.as_str()),
        (None, Some(b)) => second == Some(b.as_str()),
        (None, None) => true,
    }
}

fn search_matches(pair: &PairSnapshot, needle: &str) -> bool {
    let tokens = [
        pair.tokens_and_farms.first_token.as_ref(),
        pair.tokens_and_farms.second_token.as_ref(),
    ];
    let haystacks: Vec<Option<&str>> = tokens
        .iter()
        .flatten()
        .flat_map(|t| {
            [
                Some(t.identifier.as_str()),
                t.metadata.name.as_deref(),
                t.metadata.ticker.as_deref(),
            ]
        })
        .collect();
    matches_search(needle, &haystacks)
}

impl QueryableStore for PairStore {
    type Entity = PairSnapshot;
    type Filters = PairsFilter;
    type SortField = PairSortField;

    fn entity_kind(&self) -> EntityKind {
        EntityKind::Pair
    }

    fn queries(&self) -> &'static [QueryMeta] {
        PAIR_QUERIES
    }

    fn collection(&self) -> &EntityCollection<PairSnapshot> {
        &self.state.pairs
    }

    fn entity_type(&self) -> &'static str {
        PAIR_TYPE
    }

    fn connection_type(&self) -> &'static str {
        PAIRS_CONNECTION_TYPE
    }

    fn parse_filters(
        &self,
        meta: &QueryMeta,
        args: &Map<String, Value>,
    ) -> Result<PairsFilter, MirrorError> {
        filter_object(meta, args)
    }

    fn apply_filters(&self, mut pairs: Vec<PairSnapshot>, f: &PairsFilter) -> Vec<PairSnapshot> {
        if let Some(addresses) = &f.addresses {
            pairs.retain(|p| addresses.contains(&p.address));
        }
        if f.first_token_id.is_some() || f.second_token_id.is_some() {
            pairs.retain(|p| token_side_matches(p, f));
        }
        if f.issued_lp_token == Some(true) {
            pairs.retain(|p| p.lp_token_id().is_some());
        }
        if let Some(lp_ids) = &f.lp_token_ids {
            pairs.retain(|p| p.lp_token_id().map(|id| lp_ids.iter().any(|l| l == id)).unwrap_or(false));
        }
        if let Some(states) = &f.state {
            pairs.retain(|p| {
                p.info
                    .state
                    .as_ref()
                    .map(|s| states.contains(s))
                    .unwrap_or(false)
            });
        }
        if let Some(needle) = &f.search_token {
            pairs.retain(|p| search_matches(p, needle));
        }
        if let Some(has_farms) = f.has_farms {
            pairs.retain(|p| p.tokens_and_farms.has_farms.unwrap_or(false) == has_farms);
        }
        if let Some(has_dual_farms) = f.has_dual_farms {
            pairs.retain(|p| p.tokens_and_farms.has_dual_farms.unwrap_or(false) == has_dual_farms);
        }
        if let Some(min) = &f.min_volume {
            pairs.retain(|p| at_least(p.analytics.volume_usd_24h.as_deref(), min));
        }
        if let Some(min) = &f.min_locked_value_usd {
            pairs.retain(|p| at_least(p.prices.locked_value_usd.as_deref(), min));
        }
        if let Some(min) = f.min_trades_count {
            pairs.retain(|p| p.analytics.trades_count.unwrap_or(0) >= min);
        }
        if let Some(min) = f.min_trades_count_24h {
            pairs.retain(|p| p.analytics.trades_count_24h.unwrap_or(0) >= min);
        }
        if let Some(min) = f.min_deployed_at {
            pairs.retain(|p| p.analytics.deployed_at.map(|d| d >= min).unwrap_or(false));
        }
        pairs
    }

    fn sort_field(&self, name: &str) -> Option<PairSortField> {
        PairSortField::parse(name)
    }

    fn sort_key(&self, pair: &PairSnapshot, field: PairSortField) -> Option<BigDecimal> {
        let decimal = |v: &Option<String>| v.as_deref().and_then(|s| parse_decimal(s).ok());
        match field {
            PairSortField::DeployedAt => pair.analytics.deployed_at.map(BigDecimal::from),
            PairSortField::Fees24h => decimal(&pair.analytics.fees_usd_24h),
            PairSortField::TradesCount => pair.analytics.trades_count.map(BigDecimal::from),
            PairSortField::TradesCount24h => pair.analytics.trades_count_24h.map(BigDecimal::from),
            PairSortField::Tvl => decimal(&pair.prices.locked_value_usd),
            PairSortField::Volume24h => decimal(&pair.analytics.volume_usd_24h),
            PairSortField::Apr => decimal(&pair.analytics.fees_apr),
        }
    }
}
