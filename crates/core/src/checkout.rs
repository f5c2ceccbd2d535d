//! Checkout handoff: turns a frozen purchase intent into the request the
//! payment provider integration consumes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::product::ProductId;
use crate::domain::quote::{CouponId, PurchaseId, Quote};
use crate::pricing::context::PricingContext;
use crate::pricing::states::PricingState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutParams {
    pub cancel_url: String,
    pub user_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub method: HttpMethod,
    pub product_id: ProductId,
    pub quantity: u32,
    pub coupon_id: Option<CouponId>,
    pub bulk: bool,
    pub upgrade_from_purchase_id: Option<PurchaseId>,
    pub cancel_url: String,
    pub user_id: Option<String>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CheckoutError {
    #[error("checkout handoff requires the Purchasing state, controller is {0}")]
    NotPurchasing(PricingState),
    #[error("no quote has been resolved for product `{0}`")]
    MissingQuote(ProductId),
    #[error("checkout cancel url must be an absolute http(s) url, got `{0}`")]
    InvalidCancelUrl(String),
}

/// Builds the checkout descriptor. The coupon sent is the one the quote
/// service actually applied, falling back to the code-entered coupon.
pub fn build_checkout_request(
    context: &PricingContext,
    quote: &Quote,
    params: &CheckoutParams,
) -> Result<CheckoutRequest, CheckoutError> {
    let cancel_url = params.cancel_url.trim();
    if !cancel_url.starts_with("http://") && !cancel_url.starts_with("https://") {
        return Err(CheckoutError::InvalidCancelUrl(params.cancel_url.clone()));
    }

    Ok(CheckoutRequest {
        method: HttpMethod::Post,
        product_id: context.product_id.clone(),
        quantity: context.quantity,
        coupon_id: quote.applied_coupon_id().or(context.coupon_id.as_ref()).cloned(),
        bulk: quote.bulk || context.is_team_purchase_active,
        upgrade_from_purchase_id: quote.upgrade_from_purchase_id.clone(),
        cancel_url: cancel_url.to_string(),
        user_id: params.user_id.clone(),
    })
}
