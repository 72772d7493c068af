//! Authoritative data sources the sync pipeline reads from.
//!
//! Chain readers, the analytics service and the metadata API are external
//! collaborators; only their narrow per-entity fetch contracts live here,
//! plus an HTTP client for the metadata API and the shared retry policy.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::metrics;
use crate::settings::SyncSettings;
use crate::types::pair::{PairAnalytics, PairInfoFields, PairPrices};
use crate::types::token::{TokenAnalytics, TokenAssets, TokenMetadata, TokenPrices};

/// Token references and farm wiring of a pair as read from chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairTokenRefs {
    pub first_token_id: String,
    pub second_token_id: String,
    pub lp_token_id: Option<String>,
    pub has_farms: bool,
    pub has_dual_farms: bool,
    pub farm_address: Option<String>,
    pub staking_proxy_address: Option<String>,
}

#[async_trait]
pub trait PairChainReader: Send + Sync {
    /// Canonical registry of pair addresses.
    async fn pair_addresses(&self) -> Result<Vec<String>>;

    /// Current block height used as checkpoint watermark.
    async fn block_nonce(&self) -> Result<u64>;

    async fn token_refs(&self, address: &str) -> Result<PairTokenRefs>;

    async fn info(&self, address: &str) -> Result<PairInfoFields>;

    async fn prices(&self, address: &str) -> Result<PairPrices>;
}

#[async_trait]
pub trait TokenChainReader: Send + Sync {
    async fn prices(&self, identifier: &str) -> Result<TokenPrices>;
}

#[async_trait]
pub trait AnalyticsReader: Send + Sync {
    async fn pair_analytics(&self, address: &str) -> Result<PairAnalytics>;

    async fn token_analytics(&self, identifier: &str) -> Result<TokenAnalytics>;
}

#[async_trait]
pub trait TokenMetadataApi: Send + Sync {
    async fn metadata(&self, identifier: &str) -> Result<TokenMetadata>;
}

/// Every upstream the sync pipeline needs.
#[derive(Clone)]
pub struct UpstreamSources {
    pub pairs: Arc<dyn PairChainReader>,
    pub tokens: Arc<dyn TokenChainReader>,
    pub analytics: Arc<dyn AnalyticsReader>,
    pub metadata: Arc<dyn TokenMetadataApi>,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(sync: &SyncSettings) -> Self {
        Self {
            attempts: sync.retry_attempts,
            base_delay: Duration::from_millis(sync.retry_base_delay_ms),
            max_delay: Duration::from_millis(sync.retry_max_delay_ms),
        }
    }

    /// Single attempt, for tests.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn delays(&self) -> impl Iterator<Item = Duration> {
        let factor = (self.base_delay.as_millis() as u64 / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_delay)
            .map(jitter)
            .take(self.attempts.saturating_sub(1))
    }
}

/// Runs `action` with exponential backoff and jitter.
///
/// Terminal exhaustion is logged at `error` as an operational alert before
/// the last error is returned.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut action: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;
    let result = Retry::spawn(policy.delays(), || {
        attempt += 1;
        if attempt > 1 {
            debug!("Retrying {} (attempt {})", operation, attempt);
        }
        action()
    })
    .await;

    if let Err(e) = &result {
        error!(
            "🚨 {} failed after {} attempts: {:#}",
            operation,
            policy.attempts.max(1),
            e
        );
        metrics::increment_sync_failures(operation);
    }
    result
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiAssets {
    website: Option<String>,
    description: Option<String>,
    status: Option<String>,
    png_url: Option<String>,
    svg_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiToken {
    name: Option<String>,
    ticker: Option<String>,
    decimals: Option<u32>,
    #[serde(rename = "type")]
    token_type: Option<String>,
    timestamp: Option<i64>,
    assets: Option<ApiAssets>,
}

impl From<ApiToken> for TokenMetadata {
    fn from(token: ApiToken) -> Self {
        TokenMetadata {
            name: token.name,
            ticker: token.ticker,
            decimals: token.decimals,
            token_type: token.token_type,
            created_at: token.timestamp.map(|t| t.to_string()),
            assets: token.assets.map(|a| TokenAssets {
                website: a.website,
                description: a.description,
                status: a.status,
                png_url: a.png_url,
                svg_url: a.svg_url,
            }),
        }
    }
}

/// Metadata API client: `GET <base>/tokens/<identifier>`.
pub struct HttpTokenMetadataApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTokenMetadataApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn token_url(&self, identifier: &str) -> String {
        format!("{}/tokens/{}", self.base_url, identifier)
    }
}

#[async_trait]
impl TokenMetadataApi for HttpTokenMetadataApi {
    async fn metadata(&self, identifier: &str) -> Result<TokenMetadata> {
        let url = self.token_url(identifier);
        let token: ApiToken = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("metadata request for {} failed", identifier))?
            .error_for_status()
            .with_context(|| format!("metadata API rejected {}", identifier))?
            .json()
            .await
            .with_context(|| format!("invalid metadata body for {}", identifier))?;
        Ok(token.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick(attempts: usize) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let calls = AtomicUsize::new(0);
        let value = with_retry(&quick(4), "flaky", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    anyhow::bail!("transient")
                }
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = with_retry(&quick(3), "broken", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { anyhow::bail!("down") }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_api_token_maps_to_metadata() {
        let raw = r#"{"identifier":"MEX-455c57","name":"MEX","ticker":"MEX","decimals":18,
            "type":"FungibleESDT","timestamp":1637250000,
            "assets":{"website":"https://xexchange.com","pngUrl":"https://x/mex.png"}}"#;
        let token: ApiToken = serde_json::from_str(raw).unwrap();
        let metadata = TokenMetadata::from(token);
        assert_eq!(metadata.ticker.as_deref(), Some("MEX"));
        assert_eq!(metadata.created_at.as_deref(), Some("1637250000"));
        assert_eq!(
            metadata.assets.and_then(|a| a.png_url).as_deref(),
            Some("https://x/mex.png")
        );
    }

    #[test]
    fn test_token_url_trims_trailing_slash() {
        let api = HttpTokenMetadataApi::new("https://api.example.com/", Duration::from_secs(1)).unwrap();
        assert_eq!(api.token_url("WEGLD-bd4d79"), "https://api.example.com/tokens/WEGLD-bd4d79");
    }
}
