//! Wires the store, the sync pipeline and the query interception layer into
//! one running mirror.

use anyhow::{Context, Result};
use log::{info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use crate::database::PgCheckpointStore;
use crate::freshness_monitor::{FreshnessMonitor, ReadinessStatus};
use crate::global_state::GlobalState;
use crate::interceptor::{GraphQlRequest, InterceptorChain, QueryPipeline, QueryResponse, Resolver};
use crate::invalidation::{InvalidationBus, InvalidationEvent};
use crate::lock_manager::{LocalLockManager, LockManager};
use crate::metrics;
use crate::pair_store::PairStore;
use crate::redis_manager::{run_invalidation_bridge, RedisConfig, RedisLockManager, RedisManager};
use crate::refresh_scheduler::RefreshScheduler;
use crate::settings::Settings;
use crate::state_sync::StateSync;
use crate::store_events::{store_event_channel, StoreEventApplier};
use crate::store_interceptor::StoreInterceptor;
use crate::store_query::ServableStore;
use crate::token_store::TokenStore;
use crate::upstream::{RetryPolicy, UpstreamSources};

/// Initializes `env_logger` with `log.level` unless `RUST_LOG` is set.
pub fn init_logging(settings: &Settings) {
    let env = env_logger::Env::default().default_filter_or(settings.log.level.as_str());
    // A second call (tests, embedding apps) keeps the first logger.
    let _ = env_logger::Builder::from_env(env).try_init();
}

/// Postgres when a database URL is configured, otherwise an in-process store.
pub async fn checkpoint_store(settings: &Settings) -> Result<Arc<dyn CheckpointStore>> {
    let configured = settings.database.url.is_some() || std::env::var("DATABASE_URL").is_ok();
    if configured {
        let store = PgCheckpointStore::connect(&settings.database).await?;
        return Ok(Arc::new(store));
    }
    warn!("⚠️ No database configured, checkpoints are kept in memory only");
    Ok(Arc::new(MemoryCheckpointStore::new()))
}

fn redis_config(settings: &Settings) -> RedisConfig {
    RedisConfig {
        url: settings.redis.url.clone(),
        key_prefix: settings.redis.key_prefix.clone(),
    }
}

/// Redis leases when Redis is enabled, process-local ones otherwise.
pub async fn lock_manager(settings: &Settings) -> Result<Arc<dyn LockManager>> {
    if settings.redis.enabled {
        let redis = RedisManager::new(redis_config(settings)).await?;
        return Ok(Arc::new(RedisLockManager::new(redis)));
    }
    Ok(Arc::new(LocalLockManager::new()))
}

/// A running mirror. Dropping it without [`shutdown`](Self::shutdown) leaves
/// its background tasks running until the runtime stops.
pub struct MirrorService {
    state: Arc<GlobalState>,
    monitor: Arc<FreshnessMonitor>,
    bus: InvalidationBus,
    sync: Arc<StateSync>,
    pipeline: QueryPipeline,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MirrorService {
    /// Starts every background task and begins the cold start. Queries are
    /// forwarded to `resolver` until the store reports ready.
    pub async fn start(
        settings: &Settings,
        sources: UpstreamSources,
        checkpoints: Arc<dyn CheckpointStore>,
        locks: Arc<dyn LockManager>,
        resolver: Arc<dyn Resolver>,
    ) -> Result<Self> {
        metrics::describe_metrics();
        if settings.metrics.enabled {
            let addr = settings
                .metrics
                .listen_addr
                .parse()
                .with_context(|| format!("invalid metrics.listen_addr {}", settings.metrics.listen_addr))?;
            metrics::install_exporter(addr)?;
        }

        let state = Arc::new(GlobalState::new(
            settings.pair_thresholds(),
            settings.token_thresholds(),
        ));
        let monitor = Arc::new(FreshnessMonitor::new(state.clone(), settings.check_interval()));
        let bus = InvalidationBus::new(settings.invalidation.channel_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let (events, event_rx) = store_event_channel(settings.sync.event_channel_capacity);
        let applier = StoreEventApplier::new(state.clone(), bus.clone());
        tasks.push(tokio::spawn(applier.run(event_rx, shutdown_rx.clone())));
        tasks.push(tokio::spawn(monitor.clone().run(shutdown_rx.clone())));

        if settings.redis.enabled {
            match RedisManager::new(redis_config(settings)).await {
                Ok(redis) => tasks.push(tokio::spawn(run_invalidation_bridge(
                    redis,
                    bus.clone(),
                    shutdown_rx.clone(),
                ))),
                Err(e) => warn!("⚠️ Invalidations stay local, Redis unavailable: {:#}", e),
            }
        }

        let sync = Arc::new(StateSync::new(
            state.clone(),
            sources,
            events,
            checkpoints,
            monitor.clone(),
            RetryPolicy::from_settings(&settings.sync),
            settings.sync.concurrency,
        ));
        let scheduler = Arc::new(RefreshScheduler::new(
            sync.clone(),
            locks,
            settings.lock_ttl(),
            settings.sync.refresh.clone(),
        ));
        tasks.push(tokio::spawn(bootstrap(sync.clone(), scheduler, shutdown_rx)));

        let stores: Vec<Arc<dyn ServableStore>> = vec![
            Arc::new(PairStore::new(state.clone())),
            Arc::new(TokenStore::new(state.clone())),
        ];
        let chain = InterceptorChain::new().with(Arc::new(StoreInterceptor::new(stores, monitor.clone())));
        let pipeline = QueryPipeline::new(chain, resolver);

        info!("🚀 Mirror service started");
        Ok(Self {
            state,
            monitor,
            bus,
            sync,
            pipeline,
            shutdown_tx,
            tasks: Mutex::new(tasks),
        })
    }

    pub async fn execute(&self, request: GraphQlRequest) -> Result<QueryResponse> {
        self.pipeline.execute(request).await
    }

    pub fn readiness(&self) -> ReadinessStatus {
        self.monitor.status()
    }

    pub fn subscribe_readiness(&self) -> watch::Receiver<ReadinessStatus> {
        self.monitor.subscribe()
    }

    pub fn subscribe_invalidations(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.bus.subscribe()
    }

    pub fn state(&self) -> &Arc<GlobalState> {
        &self.state
    }

    pub fn sync(&self) -> &Arc<StateSync> {
        &self.sync
    }

    /// Stops every background task, then releases the store.
    pub async fn shutdown(&self) {
        info!("🛑 Shutting down mirror service");
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!("⚠️ Background task ended abnormally: {}", e);
            }
        }
        self.state.close();
        info!("✅ Mirror service stopped");
    }
}

/// Cold start, then the refresh loops. A failed cold start leaves readiness
/// at `FAILED` and starts no refreshes.
async fn bootstrap(
    sync: Arc<StateSync>,
    scheduler: Arc<RefreshScheduler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let cold_start = tokio::select! {
        result = sync.cold_start() => result,
        _ = shutdown.changed() => return,
    };
    if let Err(e) = cold_start {
        warn!("⚠️ Cold start failed, serving from upstream only: {:#}", e);
        return;
    }
    if *shutdown.borrow() {
        return;
    }
    let loops = scheduler.spawn(shutdown);
    futures::future::join_all(loops).await;
}
