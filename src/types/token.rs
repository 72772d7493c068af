use serde::{Deserialize, Serialize};
use std::fmt;

use super::{EntitySnapshot, FieldGroup};

/// Independently refreshed parts of a token snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TokenGroup {
    Metadata,
    Prices,
    Analytics,
}

impl FieldGroup for TokenGroup {
    fn all() -> &'static [Self] {
        &[TokenGroup::Metadata, TokenGroup::Prices, TokenGroup::Analytics]
    }

    fn name(&self) -> &'static str {
        match self {
            TokenGroup::Metadata => "metadata",
            TokenGroup::Prices => "prices",
            TokenGroup::Analytics => "analytics",
        }
    }

    fn of_field(field: &str) -> Option<Self> {
        match field {
            "name" | "ticker" | "decimals" | "type" | "createdAt" | "assets" => {
                Some(TokenGroup::Metadata)
            }
            "price" | "derivedEGLD" | "previous24hPrice" | "priceChange24h" => {
                Some(TokenGroup::Prices)
            }
            "volumeUSD24h" | "previous24hVolume" | "liquidityUSD" | "swapCount24h"
            | "trendingScore" => Some(TokenGroup::Analytics),
            _ => None,
        }
    }
}

impl fmt::Display for TokenGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Logo and description published by the token owner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAssets {
    pub website: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    #[serde(rename = "pngURL")]
    pub png_url: Option<String>,
    #[serde(rename = "svgURL")]
    pub svg_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    pub name: Option<String>,
    pub ticker: Option<String>,
    pub decimals: Option<u32>,
    #[serde(rename = "type")]
    pub token_type: Option<String>,
    pub created_at: Option<String>,
    pub assets: Option<TokenAssets>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPrices {
    pub price: Option<String>,
    #[serde(rename = "derivedEGLD")]
    pub derived_egld: Option<String>,
    pub previous_24h_price: Option<String>,
    pub price_change_24h: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAnalytics {
    #[serde(rename = "volumeUSD24h")]
    pub volume_usd_24h: Option<String>,
    pub previous_24h_volume: Option<String>,
    #[serde(rename = "liquidityUSD")]
    pub liquidity_usd: Option<String>,
    pub swap_count_24h: Option<u64>,
    pub trending_score: Option<String>,
}

/// Denormalized token as served under the `EsdtToken` type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSnapshot {
    pub identifier: String,
    #[serde(flatten)]
    pub metadata: TokenMetadata,
    #[serde(flatten)]
    pub prices: TokenPrices,
    #[serde(flatten)]
    pub analytics: TokenAnalytics,
}

impl TokenSnapshot {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }
}

/// Replacement value for exactly one token field group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TokenPatch {
    Metadata(TokenMetadata),
    Prices(TokenPrices),
    Analytics(TokenAnalytics),
}

impl EntitySnapshot for TokenSnapshot {
    type Group = TokenGroup;
    type Patch = TokenPatch;

    fn empty(id: &str) -> Self {
        TokenSnapshot::new(id)
    }

    fn id(&self) -> &str {
        &self.identifier
    }

    fn patch_group(patch: &TokenPatch) -> TokenGroup {
        match patch {
            TokenPatch::Metadata(_) => TokenGroup::Metadata,
            TokenPatch::Prices(_) => TokenGroup::Prices,
            TokenPatch::Analytics(_) => TokenGroup::Analytics,
        }
    }

    fn apply_patch(&mut self, patch: TokenPatch) {
        match patch {
            TokenPatch::Metadata(metadata) => self.metadata = metadata,
            TokenPatch::Prices(prices) => self.prices = prices,
            TokenPatch::Analytics(analytics) => self.analytics = analytics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_serializes_flat_camel_case() {
        let mut token = TokenSnapshot::new("WEGLD-bd4d79");
        token.apply_patch(TokenPatch::Prices(TokenPrices {
            price: Some("35.2".to_string()),
            derived_egld: Some("1".to_string()),
            ..Default::default()
        }));

        let value = serde_json::to_value(&token).unwrap();
        assert_eq!(value["identifier"], "WEGLD-bd4d79");
        assert_eq!(value["price"], "35.2");
        assert_eq!(value["derivedEGLD"], "1");
        assert!(value["liquidityUSD"].is_null());
        assert!(value.get("prices").is_none());
    }

    #[test]
    fn test_field_group_lookup() {
        assert_eq!(TokenGroup::of_field("price"), Some(TokenGroup::Prices));
        assert_eq!(TokenGroup::of_field("assets"), Some(TokenGroup::Metadata));
        assert_eq!(TokenGroup::of_field("identifier"), None);
    }
}
