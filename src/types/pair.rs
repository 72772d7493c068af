use serde::{Deserialize, Serialize};
use std::fmt;

use super::token::TokenSnapshot;
use super::{EntitySnapshot, FieldGroup};

/// Independently refreshed parts of a pair snapshot.
///
/// Each group has its own upstream cost, so each one is refreshed (and goes
/// stale) on its own schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PairGroup {
    TokensAndFarms,
    Analytics,
    Info,
    Prices,
}

impl FieldGroup for PairGroup {
    fn all() -> &'static [Self] {
        &[
            PairGroup::TokensAndFarms,
            PairGroup::Analytics,
            PairGroup::Info,
            PairGroup::Prices,
        ]
    }

    fn name(&self) -> &'static str {
        match self {
            PairGroup::TokensAndFarms => "tokensAndFarms",
            PairGroup::Analytics => "analytics",
            PairGroup::Info => "info",
            PairGroup::Prices => "prices",
        }
    }

    fn of_field(field: &str) -> Option<Self> {
        match field {
            "firstToken" | "secondToken" | "liquidityPoolToken" | "hasFarms" | "hasDualFarms"
            | "farmAddress" | "stakingProxyAddress" => Some(PairGroup::TokensAndFarms),
            "info" | "state" | "type" | "totalFeePercent" | "specialFeePercent"
            | "trustedSwapPairs" => Some(PairGroup::Info),
            "firstTokenPrice" | "secondTokenPrice" | "firstTokenPriceUSD"
            | "secondTokenPriceUSD" | "liquidityPoolTokenPriceUSD" | "lockedValueUSD" => {
                Some(PairGroup::Prices)
            }
            "volumeUSD24h" | "previous24hVolumeUSD" | "feesUSD24h" | "previous24hFeesUSD"
            | "feesAPR" | "tradesCount" | "tradesCount24h" | "deployedAt" => {
                Some(PairGroup::Analytics)
            }
            _ => None,
        }
    }
}

impl fmt::Display for PairGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairTokensAndFarms {
    pub first_token: Option<TokenSnapshot>,
    pub second_token: Option<TokenSnapshot>,
    pub liquidity_pool_token: Option<TokenSnapshot>,
    pub has_farms: Option<bool>,
    pub has_dual_farms: Option<bool>,
    pub farm_address: Option<String>,
    pub staking_proxy_address: Option<String>,
}

/// Reserves and supply, served as the nested `PairInfoModel`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairInfo {
    pub reserve0: String,
    pub reserve1: String,
    pub total_supply: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairInfoFields {
    pub info: Option<PairInfo>,
    pub state: Option<String>,
    #[serde(rename = "type")]
    pub pair_type: Option<String>,
    pub total_fee_percent: Option<f64>,
    pub special_fee_percent: Option<f64>,
    pub trusted_swap_pairs: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairPrices {
    pub first_token_price: Option<String>,
    pub second_token_price: Option<String>,
    #[serde(rename = "firstTokenPriceUSD")]
    pub first_token_price_usd: Option<String>,
    #[serde(rename = "secondTokenPriceUSD")]
    pub second_token_price_usd: Option<String>,
    #[serde(rename = "liquidityPoolTokenPriceUSD")]
    pub liquidity_pool_token_price_usd: Option<String>,
    #[serde(rename = "lockedValueUSD")]
    pub locked_value_usd: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairAnalytics {
    #[serde(rename = "volumeUSD24h")]
    pub volume_usd_24h: Option<String>,
    #[serde(rename = "previous24hVolumeUSD")]
    pub previous_24h_volume_usd: Option<String>,
    #[serde(rename = "feesUSD24h")]
    pub fees_usd_24h: Option<String>,
    #[serde(rename = "previous24hFeesUSD")]
    pub previous_24h_fees_usd: Option<String>,
    #[serde(rename = "feesAPR")]
    pub fees_apr: Option<String>,
    pub trades_count: Option<u64>,
    pub trades_count_24h: Option<u64>,
    pub deployed_at: Option<i64>,
}

/// Denormalized pair as served under the `PairModel` type.
///
/// Token copies are stored by value; they can drift from the token
/// collection until the next `tokensAndFarms` refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairSnapshot {
    pub address: String,
    #[serde(flatten)]
    pub tokens_and_farms: PairTokensAndFarms,
    #[serde(flatten)]
    pub info: PairInfoFields,
    #[serde(flatten)]
    pub prices: PairPrices,
    #[serde(flatten)]
    pub analytics: PairAnalytics,
}

impl PairSnapshot {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn first_token_id(&self) -> Option<&str> {
        self.tokens_and_farms
            .first_token
            .as_ref()
            .map(|t| t.identifier.as_str())
    }

    pub fn second_token_id(&self) -> Option<&str> {
        self.tokens_and_farms
            .second_token
            .as_ref()
            .map(|t| t.identifier.as_str())
    }

    pub fn lp_token_id(&self) -> Option<&str> {
        self.tokens_and_farms
            .liquidity_pool_token
            .as_ref()
            .map(|t| t.identifier.as_str())
    }

    /// Identifiers of the tokens whose freshness this pair depends on.
    pub fn token_ids(&self) -> Vec<&str> {
        self.first_token_id()
            .into_iter()
            .chain(self.second_token_id())
            .collect()
    }
}

/// Replacement value for exactly one pair field group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PairPatch {
    TokensAndFarms(PairTokensAndFarms),
    Info(PairInfoFields),
    Prices(PairPrices),
    Analytics(PairAnalytics),
}

impl EntitySnapshot for PairSnapshot {
    type Group = PairGroup;
    type Patch = PairPatch;

    fn empty(id: &str) -> Self {
        PairSnapshot::new(id)
    }

    fn id(&self) -> &str {
        &self.address
    }

    fn patch_group(patch: &PairPatch) -> PairGroup {
        match patch {
            PairPatch::TokensAndFarms(_) => PairGroup::TokensAndFarms,
            PairPatch::Info(_) => PairGroup::Info,
            PairPatch::Prices(_) => PairGroup::Prices,
            PairPatch::Analytics(_) => PairGroup::Analytics,
        }
    }

    fn apply_patch(&mut self, patch: PairPatch) {
        match patch {
            PairPatch::TokensAndFarms(fields) => self.tokens_and_farms = fields,
            PairPatch::Info(fields) => self.info = fields,
            PairPatch::Prices(fields) => self.prices = fields,
            PairPatch::Analytics(fields) => self.analytics = fields,
        }
    }
}
