//! Integration tests for query interception over the pipeline
//!
//! Tests cover:
//! - Short-circuiting fully store-servable queries
//! - Rewriting and merging partially servable queries
//! - Forwarding when the store is not ready or stale
//! - Sorting and pagination through `filteredPairs`
//! - Variable pruning and store-error fallback

mod common;

use chrono::{Duration, Utc};
use common::{pair, ready_store, RecordingResolver};
use dex_state_mirror::interceptor::{GraphQlRequest, InterceptorChain, QueryPipeline};
use dex_state_mirror::projection::{project_entity, PAIR_TYPE};
use dex_state_mirror::query_parser::parse_query;
use dex_state_mirror::store_query::ServableStore;
use dex_state_mirror::{FreshnessMonitor, GlobalState, PairStore, StoreInterceptor, TokenStore};
use serde_json::{json, Map, Value};
use std::sync::Arc;

fn pipeline(
    state: &Arc<GlobalState>,
    monitor: &Arc<FreshnessMonitor>,
    resolver: Arc<RecordingResolver>,
) -> QueryPipeline {
    let stores: Vec<Arc<dyn ServableStore>> = vec![
        Arc::new(PairStore::new(state.clone())),
        Arc::new(TokenStore::new(state.clone())),
    ];
    let chain = InterceptorChain::new().with(Arc::new(StoreInterceptor::new(stores, monitor.clone())));
    QueryPipeline::new(chain, resolver)
}

fn request(query: &str) -> GraphQlRequest {
    GraphQlRequest {
        query: query.to_string(),
        variables: Map::new(),
    }
}

/// Fully servable query is answered without calling the resolver
#[tokio::test]
async fn test_short_circuit_serves_from_store() {
    let now = Utc::now();
    let (state, monitor) = ready_store(vec![pair("P1", "WEGLD-1", "USDC-1", "100", "200")], now);
    let resolver = Arc::new(RecordingResolver::default());
    let pipeline = pipeline(&state, &monitor, resolver.clone());

    let response = pipeline
        .execute(request("{ pairs { address info { reserve0 reserve1 } } }"))
        .await
        .unwrap();

    assert_eq!(resolver.calls(), 0, "resolver must not be invoked");
    assert_eq!(
        Value::Object(response.data.unwrap()),
        json!({ "pairs": [{ "address": "P1", "info": { "reserve0": "100", "reserve1": "200" } }] })
    );
}

/// Short-circuit output equals a direct projection of the stored snapshot
#[tokio::test]
async fn test_short_circuit_matches_direct_projection() {
    let now = Utc::now();
    let (state, monitor) = ready_store(
        vec![
            pair("P1", "WEGLD-1", "USDC-1", "100", "200"),
            pair("P2", "MEX-1", "USDC-1", "5", "6"),
        ],
        now,
    );
    let resolver = Arc::new(RecordingResolver::default());
    let pipeline = pipeline(&state, &monitor, resolver.clone());
    let query = "{ pairs { address state firstToken { identifier ticker } info { totalSupply } } }";

    let response = pipeline.execute(request(query)).await.unwrap();

    let operation = parse_query(query).unwrap();
    let fields = &operation.selections[0].subfields;
    let expected: Vec<Value> = state
        .pairs
        .get_all()
        .iter()
        .map(|p| project_entity(p, fields, PAIR_TYPE).unwrap())
        .collect();
    assert_eq!(response.data.unwrap()["pairs"], Value::Array(expected));
}

/// Missing fields go to the resolver and its values survive the merge
#[tokio::test]
async fn test_partial_query_is_rewritten_and_merged() {
    let now = Utc::now();
    let (state, monitor) = ready_store(vec![pair("P1", "WEGLD-1", "USDC-1", "100", "200")], now);
    let resolver = Arc::new(RecordingResolver::answering(json!({
        "pairs": [{ "address": "P1", "feesCollector": "erd1collector" }]
    })));
    let pipeline = pipeline(&state, &monitor, resolver.clone());

    let response = pipeline
        .execute(request("{ pairs { address feesCollector } }"))
        .await
        .unwrap();

    let sent = parse_query(&resolver.last_query().unwrap()).unwrap();
    let mut sent_fields: Vec<&str> = sent.selections[0]
        .subfields
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    sent_fields.sort();
    assert_eq!(sent_fields, vec!["address", "feesCollector"]);
    assert_eq!(
        response.data.unwrap()["pairs"],
        json!([{ "address": "P1", "feesCollector": "erd1collector" }])
    );
}

/// Merged entities carry the union of both halves, resolver values first
#[tokio::test]
async fn test_merge_unions_resolver_and_store_fields() {
    let now = Utc::now();
    let (state, monitor) = ready_store(vec![pair("P1", "WEGLD-1", "USDC-1", "100", "200")], now);
    let resolver = Arc::new(RecordingResolver::answering(json!({
        "pairs": [{ "address": "P1", "feesCollector": "erd1collector" }]
    })));
    let pipeline = pipeline(&state, &monitor, resolver.clone());

    let response = pipeline
        .execute(request("{ pairs { feesCollector info { reserve0 } } }"))
        .await
        .unwrap();

    // The identifier was only added to join the halves and is not returned.
    assert_eq!(
        response.data.unwrap()["pairs"],
        json!([{ "feesCollector": "erd1collector", "info": { "reserve0": "100" } }])
    );
}

/// Queries are forwarded unchanged until the monitor reports DONE
#[tokio::test]
async fn test_forwards_until_ready() {
    let now = Utc::now();
    let state = common::new_state();
    state.pairs.put(pair("P1", "WEGLD-1", "USDC-1", "100", "200"), now);
    let monitor = Arc::new(FreshnessMonitor::new(state.clone(), std::time::Duration::from_secs(1)));
    let resolver = Arc::new(RecordingResolver::answering(json!({ "pairs": [] })));
    let pipeline = pipeline(&state, &monitor, resolver.clone());
    let query = "{ pairs { address } }";

    let response = pipeline.execute(request(query)).await.unwrap();

    assert_eq!(resolver.last_query().as_deref(), Some(query));
    assert_eq!(response.data.unwrap()["pairs"], json!([]));
}

/// A stale backing group leaves the field to the resolver
#[tokio::test]
async fn test_stale_group_is_declined() {
    let then = Utc::now() - Duration::seconds(120);
    let (state, monitor) = ready_store(vec![pair("P1", "WEGLD-1", "USDC-1", "100", "200")], Utc::now());
    state.pairs.put(pair("P1", "WEGLD-1", "USDC-1", "100", "200"), then);
    let resolver = Arc::new(RecordingResolver::answering(json!({ "pairs": [] })));
    let pipeline = pipeline(&state, &monitor, resolver.clone());

    pipeline
        .execute(request("{ pairs { info { reserve0 } } }"))
        .await
        .unwrap();

    assert_eq!(resolver.calls(), 1);
}

/// Mixed documents keep request order across local and resolved fields
#[tokio::test]
async fn test_mixed_document_keeps_field_order() {
    let now = Utc::now();
    let (state, monitor) = ready_store(vec![pair("P1", "WEGLD-1", "USDC-1", "100", "200")], now);
    let resolver = Arc::new(RecordingResolver::answering(json!({ "factory": { "totalTxCount": 3 } })));
    let pipeline = pipeline(&state, &monitor, resolver.clone());

    let response = pipeline
        .execute(request("{ tokens { identifier } factory { totalTxCount } pairs { address } }"))
        .await
        .unwrap();

    let sent = parse_query(&resolver.last_query().unwrap()).unwrap();
    assert_eq!(sent.selections.len(), 1);
    assert_eq!(sent.selections[0].name, "factory");
    let keys: Vec<String> = response.data.unwrap().keys().cloned().collect();
    assert_eq!(keys, vec!["tokens", "factory", "pairs"]);
}

/// Unsupported sort field keeps store order on filteredPairs
#[tokio::test]
async fn test_unsupported_sort_keeps_store_order() {
    let now = Utc::now();
    let (state, monitor) = ready_store(
        vec![
            pair("P2", "MEX-1", "USDC-1", "1", "1"),
            pair("P1", "WEGLD-1", "USDC-1", "1", "1"),
            pair("P3", "RIDE-1", "USDC-1", "1", "1"),
        ],
        now,
    );
    let resolver = Arc::new(RecordingResolver::default());
    let pipeline = pipeline(&state, &monitor, resolver.clone());

    let response = pipeline
        .execute(request(
            r#"{ filteredPairs(pagination: { first: 10 }, sorting: { sortField: "NOT_A_FIELD", sortOrder: DESC }) {
                edges { node { address } }
            } }"#,
        ))
        .await
        .unwrap();

    assert_eq!(resolver.calls(), 0);
    let addresses: Vec<Value> = response.data.unwrap()["filteredPairs"]["edges"]
        .as_array()
        .unwrap()
        .iter()
        .map(|edge| edge["node"]["address"].clone())
        .collect();
    assert_eq!(addresses, vec![json!("P2"), json!("P1"), json!("P3")]);
}

/// Mutations are never intercepted
#[tokio::test]
async fn test_mutation_is_forwarded() {
    let now = Utc::now();
    let (state, monitor) = ready_store(vec![pair("P1", "WEGLD-1", "USDC-1", "100", "200")], now);
    let resolver = Arc::new(RecordingResolver::answering(json!({ "pairs": [] })));
    let pipeline = pipeline(&state, &monitor, resolver.clone());

    pipeline
        .execute(request("mutation { pairs { address } }"))
        .await
        .unwrap();

    assert_eq!(resolver.calls(), 1);
}

/// Variables only used by a locally served field are not forwarded
#[tokio::test]
async fn test_rewritten_query_drops_unused_variables() {
    let now = Utc::now();
    let (state, monitor) = ready_store(vec![pair("P1", "WEGLD-1", "USDC-1", "100", "200")], now);
    let resolver = Arc::new(RecordingResolver::answering(json!({ "farms": [] })));
    let pipeline = pipeline(&state, &monitor, resolver.clone());
    let mut variables = Map::new();
    variables.insert("f".to_string(), json!({ "state": ["Active"] }));

    let response = pipeline
        .execute(GraphQlRequest {
            query: "query Q($f: PairsFilter) { filteredPairs(filters: $f) { edges { node { address } } } farms { address } }"
                .to_string(),
            variables,
        })
        .await
        .unwrap();

    let sent = resolver.last_request().unwrap();
    assert_eq!(sent.query, "query Q { farms { address } }");
    assert!(sent.variables.is_empty());
    assert_eq!(
        response.data.unwrap()["filteredPairs"]["edges"][0]["node"]["address"],
        json!("P1")
    );
}

/// Arguments the store rejects send the original document to the resolver
#[tokio::test]
async fn test_store_argument_error_forwards_original_query() {
    let now = Utc::now();
    let (state, monitor) = ready_store(vec![pair("P1", "WEGLD-1", "USDC-1", "100", "200")], now);
    let resolver = Arc::new(RecordingResolver::answering(json!({ "filteredPairs": null })));
    let pipeline = pipeline(&state, &monitor, resolver.clone());
    let query = r#"{ tokens { identifier } filteredPairs(pagination: { first: 1, after: "not-a-cursor" }) { edges { node { address } } } }"#;

    pipeline.execute(request(query)).await.unwrap();

    assert_eq!(resolver.calls(), 1);
    assert_eq!(resolver.last_query().as_deref(), Some(query));
}

/// A variable missing from the request is a store error, not a query failure
#[tokio::test]
async fn test_missing_variable_forwards_original_query() {
    let now = Utc::now();
    let (state, monitor) = ready_store(vec![pair("P1", "WEGLD-1", "USDC-1", "100", "200")], now);
    let resolver = Arc::new(RecordingResolver::answering(json!({ "pairs": [] })));
    let pipeline = pipeline(&state, &monitor, resolver.clone());
    let query = "query Q($limit: Int) { pairs(limit: $limit) { address } }";

    let response = pipeline.execute(request(query)).await.unwrap();

    assert_eq!(resolver.last_query().as_deref(), Some(query));
    assert_eq!(response.data.unwrap()["pairs"], json!([]));
}
