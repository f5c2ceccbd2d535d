use serde::{Deserialize, Serialize};

use crate::domain::product::ProductId;
use crate::domain::quote::{CouponId, MerchantCoupon, Quote};
use crate::pricing::fetch::FetchInput;

/// Initial purchase intent handed to a controller when it starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextSeed {
    pub product_id: ProductId,
    pub coupon_id: Option<CouponId>,
    pub merchant_coupon: Option<MerchantCoupon>,
    pub team_purchase: bool,
    pub auto_apply_ppp: bool,
}

impl ContextSeed {
    pub fn new(product_id: impl Into<String>) -> Self {
        Self {
            product_id: ProductId(product_id.into()),
            coupon_id: None,
            merchant_coupon: None,
            team_purchase: false,
            auto_apply_ppp: true,
        }
    }
}

/// Purchase intent plus the most recently applied quote.
///
/// Only [`PricingMachine`](crate::pricing::machine::PricingMachine) mutates a context;
/// everything else sees clones published through snapshots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricingContext {
    pub product_id: ProductId,
    pub quantity: u32,
    pub is_team_purchase_active: bool,
    pub is_ppp_active: bool,
    pub coupon_id: Option<CouponId>,
    pub active_merchant_coupon: Option<MerchantCoupon>,
    pub auto_apply_ppp: bool,
    pub ppp_coupon: Option<MerchantCoupon>,
    pub quote: Option<Quote>,
}

impl PricingContext {
    pub fn seeded(seed: ContextSeed) -> Self {
        let is_ppp_active = seed.merchant_coupon.as_ref().is_some_and(MerchantCoupon::is_ppp);
        let team_purchase = seed.team_purchase && !is_ppp_active;
        Self {
            product_id: seed.product_id,
            quantity: 1,
            is_team_purchase_active: team_purchase,
            is_ppp_active,
            coupon_id: seed.coupon_id,
            active_merchant_coupon: seed.merchant_coupon,
            auto_apply_ppp: seed.auto_apply_ppp && !team_purchase,
            ppp_coupon: None,
            quote: None,
        }
    }

    /// Freezes the fields the quote service prices against.
    pub fn fetch_input(&self) -> FetchInput {
        FetchInput {
            product_id: self.product_id.clone(),
            quantity: self.quantity,
            coupon_id: self.coupon_id.clone(),
            merchant_coupon: self.active_merchant_coupon.clone(),
            auto_apply_ppp: self.auto_apply_ppp,
        }
    }

    pub(crate) fn leave_team_mode(&mut self) {
        self.is_team_purchase_active = false;
        self.quantity = 1;
    }

    pub(crate) fn clear_discount_modes(&mut self) {
        self.active_merchant_coupon = None;
        self.is_ppp_active = false;
    }
}
