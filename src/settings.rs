use chrono::Duration as ChronoDuration;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::global_state::GroupThresholds;
use crate::types::{PairGroup, TokenGroup};

fn default_check_interval_seconds() -> u64 {
    30
}
fn default_slow_group_seconds() -> u64 {
    600
}
fn default_fast_group_seconds() -> u64 {
    30
}
fn default_metadata_seconds() -> u64 {
    3600
}

/// Staleness thresholds of pair field groups, in seconds.
#[derive(Debug, Deserialize, Clone)]
pub struct PairThresholds {
    #[serde(default = "default_slow_group_seconds")]
    pub tokens_and_farms: u64,
    #[serde(default = "default_fast_group_seconds")]
    pub info: u64,
    #[serde(default = "default_fast_group_seconds")]
    pub prices: u64,
    #[serde(default = "default_slow_group_seconds")]
    pub analytics: u64,
}

impl Default for PairThresholds {
    fn default() -> Self {
        Self {
            tokens_and_farms: default_slow_group_seconds(),
            info: default_fast_group_seconds(),
            prices: default_fast_group_seconds(),
            analytics: default_slow_group_seconds(),
        }
    }
}

/// Staleness thresholds of token field groups, in seconds.
#[derive(Debug, Deserialize, Clone)]
pub struct TokenThresholds {
    #[serde(default = "default_metadata_seconds")]
    pub metadata: u64,
    #[serde(default = "default_fast_group_seconds")]
    pub prices: u64,
    #[serde(default = "default_slow_group_seconds")]
    pub analytics: u64,
}

impl Default for TokenThresholds {
    fn default() -> Self {
        Self {
            metadata: default_metadata_seconds(),
            prices: default_fast_group_seconds(),
            analytics: default_slow_group_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Freshness {
    #[serde(default = "default_check_interval_seconds")]
    pub check_interval_seconds: u64,
    #[serde(default)]
    pub pair: PairThresholds,
    #[serde(default)]
    pub token: TokenThresholds,
}

impl Default for Freshness {
    fn default() -> Self {
        Self {
            check_interval_seconds: default_check_interval_seconds(),
            pair: PairThresholds::default(),
            token: TokenThresholds::default(),
        }
    }
}

fn default_concurrency() -> usize {
    10
}
fn default_retry_attempts() -> usize {
    5
}
fn default_retry_base_delay_ms() -> u64 {
    200
}
fn default_retry_max_delay_ms() -> u64 {
    10_000
}
fn default_channel_capacity() -> usize {
    1024
}
fn default_lock_ttl_seconds() -> u64 {
    120
}

/// Refresh cadence of every background task, in seconds.
#[derive(Debug, Deserialize, Clone)]
pub struct RefreshIntervals {
    #[serde(default = "default_pair_tokens_and_farms_interval")]
    pub pair_tokens_and_farms: u64,
    #[serde(default = "default_fast_refresh_interval")]
    pub pair_info: u64,
    #[serde(default = "default_fast_refresh_interval")]
    pub pair_prices: u64,
    #[serde(default = "default_analytics_interval")]
    pub pair_analytics: u64,
    #[serde(default = "default_token_metadata_interval")]
    pub token_metadata: u64,
    #[serde(default = "default_fast_refresh_interval")]
    pub token_prices: u64,
    #[serde(default = "default_analytics_interval")]
    pub token_analytics: u64,
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint: u64,
}

fn default_pair_tokens_and_farms_interval() -> u64 {
    300
}
fn default_fast_refresh_interval() -> u64 {
    12
}
fn default_analytics_interval() -> u64 {
    300
}
fn default_token_metadata_interval() -> u64 {
    1800
}
fn default_checkpoint_interval() -> u64 {
    600
}

impl Default for RefreshIntervals {
    fn default() -> Self {
        Self {
            pair_tokens_and_farms: default_pair_tokens_and_farms_interval(),
            pair_info: default_fast_refresh_interval(),
            pair_prices: default_fast_refresh_interval(),
            pair_analytics: default_analytics_interval(),
            token_metadata: default_token_metadata_interval(),
            token_prices: default_fast_refresh_interval(),
            token_analytics: default_analytics_interval(),
            checkpoint: default_checkpoint_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncSettings {
    /// Upstream fetches in flight during cold start and refreshes.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub event_channel_capacity: usize,
    #[serde(default = "default_lock_ttl_seconds")]
    pub lock_ttl_seconds: u64,
    #[serde(default)]
    pub refresh: RefreshIntervals,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            event_channel_capacity: default_channel_capacity(),
            lock_ttl_seconds: default_lock_ttl_seconds(),
            refresh: RefreshIntervals::default(),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct Upstream {
    /// Authoritative GraphQL endpoint for queries the store does not answer.
    #[serde(default)]
    pub graphql_url: Option<String>,
    /// Token metadata HTTP API base URL.
    #[serde(default)]
    pub metadata_api_url: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for Upstream {
    fn default() -> Self {
        Self {
            graphql_url: None,
            metadata_api_url: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}
fn default_connect_attempts() -> u32 {
    10
}
fn default_schema() -> String {
    "dex_mirror".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct Database {
    /// Falls back to `DATABASE_URL` when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_schema")]
    pub schema: String,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            connect_attempts: default_connect_attempts(),
            schema: default_schema(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_key_prefix() -> String {
    "mirror".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct Redis {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for Redis {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Invalidation {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for Invalidation {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct Metrics {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_addr")]
    pub listen_addr: String,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: default_metrics_addr(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub freshness: Freshness,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub upstream: Upstream,
    #[serde(default)]
    pub database: Database,
    #[serde(default)]
    pub redis: Redis,
    #[serde(default)]
    pub invalidation: Invalidation,
    #[serde(default)]
    pub metrics: Metrics,
    #[serde(default)]
    pub log: LogSettings,
}

impl Settings {
    /// Loads `.env`, an optional `Config.toml` and `MIRROR__`-prefixed overrides
    /// (e.g. `MIRROR__SYNC__CONCURRENCY=20`).
    pub fn new() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_sources("Config", true)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::from_sources(path, false)
    }

    fn from_sources(path: &str, with_env: bool) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(File::with_name(path).required(false));
        if with_env {
            builder = builder.add_source(
                Environment::with_prefix("MIRROR")
                    .separator("__")
                    .try_parsing(true),
            );
        }
        builder.build()?.try_deserialize()
    }

    pub fn pair_thresholds(&self) -> GroupThresholds<PairGroup> {
        let t = &self.freshness.pair;
        GroupThresholds::new(HashMap::from([
            (PairGroup::TokensAndFarms, seconds(t.tokens_and_farms)),
            (PairGroup::Info, seconds(t.info)),
            (PairGroup::Prices, seconds(t.prices)),
            (PairGroup::Analytics, seconds(t.analytics)),
        ]))
    }

    pub fn token_thresholds(&self) -> GroupThresholds<TokenGroup> {
        let t = &self.freshness.token;
        GroupThresholds::new(HashMap::from([
            (TokenGroup::Metadata, seconds(t.metadata)),
            (TokenGroup::Prices, seconds(t.prices)),
            (TokenGroup::Analytics, seconds(t.analytics)),
        ]))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.freshness.check_interval_seconds.max(1))
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.sync.lock_ttl_seconds.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream.request_timeout_ms)
    }
}

/// Largest threshold chrono can hold; larger values saturate to it.
const MAX_THRESHOLD_SECONDS: u64 = i64::MAX as u64 / 1000;

fn seconds(value: u64) -> ChronoDuration {
    ChronoDuration::seconds(value.min(MAX_THRESHOLD_SECONDS) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_group_thresholds() {
        let settings = Settings::default();
        let pairs = settings.pair_thresholds();
        assert_eq!(pairs.threshold(PairGroup::Info), ChronoDuration::seconds(30));
        assert_eq!(pairs.threshold(PairGroup::Analytics), ChronoDuration::seconds(600));
        let tokens = settings.token_thresholds();
        assert_eq!(tokens.threshold(TokenGroup::Metadata), ChronoDuration::seconds(3600));
        assert_eq!(settings.sync.concurrency, 10);
        assert!(!settings.redis.enabled);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[freshness.pair]\nprices = 45\n\n[sync]\nconcurrency = 3\n\n[sync.refresh]\ncheckpoint = 60"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.freshness.pair.prices, 45);
        assert_eq!(settings.freshness.pair.info, 30);
        assert_eq!(settings.sync.concurrency, 3);
        assert_eq!(settings.sync.refresh.checkpoint, 60);
        assert_eq!(settings.sync.refresh.pair_prices, 12);
        assert_eq!(settings.database.schema, "dex_mirror");
    }

    #[test]
    fn test_huge_threshold_saturates() {
        let mut settings = Settings::default();
        settings.freshness.pair.info = u64::MAX;
        settings.freshness.token.prices = i64::MAX as u64;

        let pairs = settings.pair_thresholds();
        let tokens = settings.token_thresholds();
        let max = ChronoDuration::seconds(MAX_THRESHOLD_SECONDS as i64);
        assert_eq!(pairs.threshold(PairGroup::Info), max);
        assert_eq!(tokens.threshold(TokenGroup::Prices), max);
        assert_eq!(pairs.threshold(PairGroup::Prices), ChronoDuration::seconds(30));
    }
}
