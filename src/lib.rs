//! # DEX State Mirror
//!
//! An in-memory, read-through mirror of DEX pair and token state that sits
//! in front of a GraphQL resolver. Queries the store can answer from fresh
//! data are served locally, partially local queries are merged with the
//! resolver's answer, and everything else is forwarded unchanged.
//!
//! ## Overview
//!
//! - **Store**: one insertion-ordered collection per entity kind, with a
//!   last-update timestamp per field group
//! - **Freshness**: a periodic monitor publishing `NOT_STARTED`,
//!   `IN_PROGRESS`, `DONE` or `FAILED`
//! - **Query layer**: filter, sort, paginate and project stored entities
//!   the way the GraphQL schema would
//! - **Sync**: cold start from the latest checkpoint plus upstream, then
//!   per-group refresh loops guarded by lease locks
//!
//! ## Architecture
//!
//! ### Store Layer
//! [`GlobalState`] owns the snapshots. Writers go through a single event
//! channel; every write publishes `deleteCacheKeys` invalidations.
//!
//! ### Query Layer
//! [`QueryPipeline`] runs interceptors around a [`Resolver`]. The
//! [`StoreInterceptor`] claims fields backed by [`PairStore`] and
//! [`TokenStore`] when the monitor reports `DONE`.
//!
//! ### Sync Layer
//! [`StateSync`] pulls from [`UpstreamSources`]; [`RefreshScheduler`] runs
//! its refreshes and checkpoint writes on an interval.

// Core Types
/// Entity snapshots, field groups and decimal helpers
pub mod types;
/// Error types of the query layer
pub mod error;

// Store Layer
/// Entity store with per-group freshness
pub mod global_state;
/// Readiness state machine over the store
pub mod freshness_monitor;
/// Single-writer event channel into the store
pub mod store_events;
/// Cache invalidation keys and bus
pub mod invalidation;

// Query Layer
/// GraphQL operation model
pub mod selection;
/// Query document parser
pub mod query_parser;
/// Field projection of stored entities
pub mod projection;
/// Offset and cursor pagination
pub mod pagination;
/// Shared store query plumbing
pub mod store_query;
/// Pair queries
pub mod pair_store;
/// Token queries
pub mod token_store;
/// Interceptor chain and resolver seam
pub mod interceptor;
/// Interceptor answering from the store
pub mod store_interceptor;

// Sync Layer
/// Upstream source contracts and retry policy
pub mod upstream;
/// Cold start and group refreshes
pub mod state_sync;
/// Interval loops for refreshes and checkpoints
pub mod refresh_scheduler;
/// Daily state checkpoints
pub mod checkpoint;
/// Lease locks for refresh tasks
pub mod lock_manager;

// Infrastructure
/// PostgreSQL checkpoint persistence
pub mod database;
/// Redis locks and invalidation bridge (optional)
pub mod redis_manager;
/// Metrics collection (optional)
pub mod metrics;
/// Service wiring
pub mod service;

// Settings & Configuration
/// Configuration management
pub mod settings;

// Re-exports for convenience
pub use freshness_monitor::{FreshnessMonitor, ReadinessStatus};
pub use global_state::GlobalState;
pub use interceptor::{GraphQlRequest, QueryPipeline, QueryResponse, Resolver};
pub use pair_store::PairStore;
pub use refresh_scheduler::RefreshScheduler;
pub use service::MirrorService;
pub use settings::Settings;
pub use state_sync::StateSync;
pub use store_interceptor::StoreInterceptor;
pub use token_store::TokenStore;
pub use upstream::UpstreamSources;
