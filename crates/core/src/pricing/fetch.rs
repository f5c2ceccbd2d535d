use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::product::ProductId;
use crate::domain::quote::{CouponId, MerchantCoupon, Quote};

/// Frozen purchase intent submitted to the quote service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchInput {
    pub product_id: ProductId,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon_id: Option<CouponId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_coupon: Option<MerchantCoupon>,
    #[serde(rename = "autoApplyPPP", default)]
    pub auto_apply_ppp: bool,
}

/// One fetch request, tagged with the generation of the snapshot that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchTicket {
    pub generation: u64,
    pub input: FetchInput,
}

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum QuoteFetchError {
    #[error("quote service unreachable: {0}")]
    Transport(String),
    #[error("quote service responded with status {0}")]
    Status(u16),
    #[error("quote service payload could not be decoded: {0}")]
    Decode(String),
    #[error("quote service returned no quote")]
    NoQuote,
    #[error("quote service did not respond within {0}ms")]
    Timeout(u64),
    #[error("quote fetch task aborted")]
    Aborted,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchResolution {
    pub generation: u64,
    pub input: FetchInput,
    pub result: Result<Quote, QuoteFetchError>,
}

#[async_trait]
pub trait QuoteFetcher: Send + Sync {
    async fn fetch_quote(&self, input: &FetchInput) -> Result<Quote, QuoteFetchError>;
}
