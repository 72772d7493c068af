//! Integration tests for the assembled mirror service

mod common;

use common::{FakeChain, RecordingResolver};
use dex_state_mirror::checkpoint::MemoryCheckpointStore;
use dex_state_mirror::lock_manager::LocalLockManager;
use dex_state_mirror::{GraphQlRequest, MirrorService, ReadinessStatus, Settings};
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::Duration;

/// Full lifecycle: cold start, local answers, clean shutdown
#[tokio::test]
async fn test_service_serves_after_cold_start() {
    let chain = Arc::new(FakeChain::default().with_pair("erd1p1", "WEGLD-bd4d79", "USDC-c76f1f"));
    let resolver = Arc::new(RecordingResolver::default());
    let service = MirrorService::start(
        &Settings::default(),
        chain.sources(),
        Arc::new(MemoryCheckpointStore::new()),
        Arc::new(LocalLockManager::new()),
        resolver.clone(),
    )
    .await
    .unwrap();

    let mut readiness = service.subscribe_readiness();
    tokio::time::timeout(Duration::from_secs(5), async {
        while *readiness.borrow() != ReadinessStatus::Done {
            readiness.changed().await.unwrap();
        }
    })
    .await
    .expect("store never became ready");

    let response = service
        .execute(GraphQlRequest {
            query: "{ pairs { address firstToken { identifier } } }".to_string(),
            variables: Map::new(),
        })
        .await
        .unwrap();
    assert_eq!(resolver.calls(), 0);
    assert_eq!(
        response.data.unwrap()["pairs"],
        json!([{ "address": "erd1p1", "firstToken": { "identifier": "WEGLD-bd4d79" } }])
    );

    service.shutdown().await;
    assert!(service.state().is_closed());
    assert!(service.state().pairs.is_empty());
}

/// Registry outage leaves every query with the resolver
#[tokio::test]
async fn test_service_forwards_when_cold_start_fails() {
    let chain = Arc::new(FakeChain::default().with_pair("erd1p1", "WEGLD-bd4d79", "USDC-c76f1f"));
    chain.registry_down.store(true, std::sync::atomic::Ordering::SeqCst);
    let resolver = Arc::new(RecordingResolver::answering(json!({ "pairs": [] })));
    let mut settings = Settings::default();
    settings.sync.retry_attempts = 1;
    let service = MirrorService::start(
        &settings,
        chain.sources(),
        Arc::new(MemoryCheckpointStore::new()),
        Arc::new(LocalLockManager::new()),
        resolver.clone(),
    )
    .await
    .unwrap();

    let mut readiness = service.subscribe_readiness();
    tokio::time::timeout(Duration::from_secs(5), async {
        while *readiness.borrow() != ReadinessStatus::Failed {
            readiness.changed().await.unwrap();
        }
    })
    .await
    .expect("readiness never failed");

    service
        .execute(GraphQlRequest {
            query: "{ pairs { address } }".to_string(),
            variables: Map::new(),
        })
        .await
        .unwrap();
    assert_eq!(resolver.calls(), 1);

    service.shutdown().await;
}
