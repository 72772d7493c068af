//! Store-side answers for token queries.

use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::MirrorError;
use crate::global_state::{EntityCollection, GlobalState};
use crate::projection::{TOKENS_CONNECTION_TYPE, TOKEN_TYPE};
use crate::store_query::{
    filter_object, matches_search, one_or_many, optional_decimal, QueryMeta, QueryShape,
    QueryableStore,
};
use crate::types::decimal::{at_least, parse_decimal};
use crate::types::{EntityKind, TokenSnapshot};

/// Token fields resolved elsewhere and never mirrored.
pub const TOKEN_MISSING_FIELDS: &[&str] = &["balance", "supply", "circulatingSupply", "roles"];

/// `type` value that disables the type filter.
pub const ALL_TOKEN_TYPES: &str = "All";

pub static TOKEN_QUERIES: &[QueryMeta] = &[
    QueryMeta {
        name: "tokens",
        shape: QueryShape::List,
        identifier_field: "identifier",
        missing_fields: TOKEN_MISSING_FIELDS,
        sortable: false,
    },
    QueryMeta {
        name: "filteredTokens",
        shape: QueryShape::Connection,
        identifier_field: "identifier",
        missing_fields: TOKEN_MISSING_FIELDS,
        sortable: true,
    },
];

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokensFilter {
    #[serde(default, deserialize_with = "one_or_many")]
    pub identifiers: Option<Vec<String>>,
    #[serde(rename = "type")]
    pub token_type: Option<String>,
    pub search_token: Option<String>,
    #[serde(default, deserialize_with = "optional_decimal")]
    pub min_liquidity: Option<BigDecimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSortField {
    Price,
    Previous24hPrice,
    PriceChange24h,
    Volume24h,
    Previous24hVolume,
    Liquidity,
    TrendingScore,
    CreatedAt,
}

impl TokenSortField {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "PRICE" => Some(TokenSortField::Price),
            "PREVIOUS_24H_PRICE" => Some(TokenSortField::Previous24hPrice),
            "PRICE_CHANGE_24H" => Some(TokenSortField::PriceChange24h),
            "VOLUME_24H" => Some(TokenSortField::Volume24h),
            "PREVIOUS_24H_VOLUME" => Some(TokenSortField::Previous24hVolume),
            "LIQUIDITY" => Some(TokenSortField::Liquidity),
            "TRENDING_SCORE" => Some(TokenSortField::TrendingScore),
            "CREATED_AT" => Some(TokenSortField::CreatedAt),
            _ => None,
        }
    }
}

pub struct TokenStore {
    state: Arc<GlobalState>,
}

impl TokenStore {
    pub fn new(state: Arc<GlobalState>) -> Self {
        Self { state }
    }
}

impl QueryableStore for TokenStore {
    type Entity = TokenSnapshot;
    type Filters = TokensFilter;
    type SortField = TokenSortField;

    fn entity_kind(&self) -> EntityKind {
        EntityKind::Token
    }

    fn queries(&self) -> &'static [QueryMeta] {
        TOKEN_QUERIES
    }

    fn collection(&self) -> &EntityCollection<TokenSnapshot> {
        &self.state.tokens
    }

    fn entity_type(&self) -> &'static str {
        TOKEN_TYPE
    }

    fn connection_type(&self) -> &'static str {
        TOKENS_CONNECTION_TYPE
    }

    fn parse_filters(
        &self,
        meta: &QueryMeta,
        args: &Map<String, Value>,
    ) -> Result<TokensFilter, MirrorError> {
        filter_object(meta, args)
    }

    fn apply_filters(&self, mut tokens: Vec<TokenSnapshot>, f: &TokensFilter) -> Vec<TokenSnapshot> {
        if let Some(identifiers) = &f.identifiers {
            tokens.retain(|t| identifiers.contains(&t.identifier));
        }
        if let Some(token_type) = f.token_type.as_deref().filter(|t| *t != ALL_TOKEN_TYPES) {
            tokens.retain(|t| t.metadata.token_type.as_deref() == Some(token_type));
        }
        if let Some(needle) = &f.search_token {
            tokens.retain(|t| {
                matches_search(
                    needle,
                    &[
                        Some(t.identifier.as_str()),
                        t.metadata.name.as_deref(),
                        t.metadata.ticker.as_deref(),
                    ],
                )
            });
        }
        if let Some(min) = &f.min_liquidity {
            tokens.retain(|t| at_least(t.analytics.liquidity_usd.as_deref(), min));
        }
        tokens
    }

    fn sort_field(&self, name: &str) -> Option<TokenSortField> {
        TokenSortField::parse(name)
    }

    fn sort_key(&self, token: &TokenSnapshot, field: TokenSortField) -> Option<BigDecimal> {
        let raw = match field {
            TokenSortField::Price => &token.prices.price,
            TokenSortField::Previous24hPrice => &token.prices.previous_24h_price,
            TokenSortField::PriceChange24h => &token.prices.price_change_24h,
            TokenSortField::Volume24h => &token.analytics.volume_usd_24h,
            TokenSortField::Previous24hVolume => &token.analytics.previous_24h_volume,
            TokenSortField::Liquidity => &token.analytics.liquidity_usd,
            TokenSortField::TrendingScore => &token.analytics.trending_score,
            TokenSortField::CreatedAt => &token.metadata.created_at,
        };
        raw.as_deref().and_then(|s| parse_decimal(s).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::global_state::GroupThresholds;
    use crate::query_parser::parse_query;
    use crate::store_query::ServableStore;
    use crate::types::token::{TokenAnalytics, TokenMetadata, TokenPrices};
    use crate::types::TokenGroup;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn token(id: &str, name: &str, kind: &str, price: Option<&str>, liquidity: &str) -> TokenSnapshot {
        TokenSnapshot {
            identifier: id.to_string(),
            metadata: TokenMetadata {
                name: Some(name.to_string()),
                ticker: id.split('-').next().map(str::to_string),
                decimals: Some(18),
                token_type: Some(kind.to_string()),
                ..Default::default()
            },
            prices: TokenPrices {
                price: price.map(str::to_string),
                ..Default::default()
            },
            analytics: TokenAnalytics {
                liquidity_usd: Some(liquidity.to_string()),
                ..Default::default()
            },
        }
    }

    fn state() -> Arc<GlobalState> {
        let state = Arc::new(GlobalState::new(
            GroupThresholds::uniform(Duration::seconds(30)),
            GroupThresholds::uniform(Duration::seconds(30)),
        ));
        let now = Utc::now();
        state.tokens.put(token("WEGLD-bd4d79", "WrappedEGLD", "Core", Some("35.2"), "9000000"), now);
        state.tokens.put(token("MEX-455c57", "MEX", "Core", Some("0.0000021"), "4000000"), now);
        state.tokens.put(token("RIDE-7d18e9", "holoride", "Ecosystem", None, "150000"), now);
        state
    }

    fn run(store: &TokenStore, doc: &str) -> Value {
        let op = parse_query(doc).unwrap();
        let field = &op.selections[0];
        let args = field.arguments_json(&Map::new()).unwrap();
        store.respond(&field.name, &args, &field.subfields).unwrap()
    }

    fn identifiers(nodes: &[Value]) -> Vec<&str> {
        nodes.iter().map(|t| t["identifier"].as_str().unwrap()).collect()
    }

    #[test]
    fn test_tokens_type_filter_and_all() {
        let store = TokenStore::new(state());
        let result = run(&store, "{ tokens(type: \"Ecosystem\") { identifier name } }");
        assert_eq!(result, json!([{"identifier": "RIDE-7d18e9", "name": "holoride"}]));

        let result = run(&store, "{ tokens(type: \"All\") { identifier } }");
        assert_eq!(result.as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_tokens_identifiers_accepts_single_value() {
        let store = TokenStore::new(state());
        let result = run(&store, "{ tokens(identifiers: \"MEX-455c57\") { identifier } }");
        assert_eq!(identifiers(result.as_array().unwrap()), vec!["MEX-455c57"]);
    }

    #[test]
    fn test_filtered_tokens_sort_missing_price_as_zero() {
        let store = TokenStore::new(state());
        let page = run(
            &store,
            "{ filteredTokens(sorting: {sortField: PRICE, sortOrder: ASC}) { edges { node { identifier price } } } }",
        );
        let nodes: Vec<Value> = page["edges"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["node"].clone())
            .collect();
        assert_eq!(identifiers(&nodes), vec!["RIDE-7d18e9", "MEX-455c57", "WEGLD-bd4d79"]);
        assert_eq!(nodes[0]["price"], Value::Null);
    }

    #[test]
    fn test_filtered_tokens_search_and_liquidity() {
        let store = TokenStore::new(state());
        let page = run(
            &store,
            "{ filteredTokens(filters: {searchToken: \"e\", minLiquidity: 1000000}, pagination: {first: 1}) { edges { node { identifier } } pageInfo { hasNextPage } pageData { count limit offset } } }",
        );
        assert_eq!(page["edges"][0]["node"]["identifier"], "WEGLD-bd4d79");
        assert_eq!(page["pageInfo"]["hasNextPage"], true);
        assert_eq!(page["pageData"], json!({"count": 2, "limit": 1, "offset": 0}));
    }

    #[test]
    fn test_typename_is_declared_type() {
        let store = TokenStore::new(state());
        let result = run(&store, "{ tokens(limit: 1) { __typename assets { __typename pngURL } } }");
        assert_eq!(
            result,
            json!([{"__typename": "EsdtToken", "assets": null}])
        );
    }

    #[test]
    fn test_freshness_follows_requested_groups() {
        let state = state();
        let store = TokenStore::new(state.clone());
        let now = Utc::now();
        assert!(store.is_fresh_for(&[crate::selection::Field::new("price")], now));

        let later = now + Duration::seconds(31);
        state
            .tokens
            .patch("MEX-455c57", crate::types::TokenPatch::Metadata(TokenMetadata::default()), later);
        let name_only = [crate::selection::Field::new("name")];
        // other tokens still carry the original metadata timestamp
        assert!(!store.is_fresh_for(&name_only, later));
        assert!(state.tokens.is_fresh("MEX-455c57", &[TokenGroup::Metadata], later));
        assert!(store.is_fresh_for(&[crate::selection::Field::new("identifier")], later));
    }
}
