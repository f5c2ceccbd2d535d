use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const PPP_COUPON_TYPE: &str = "ppp";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CouponId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantCoupon {
    pub id: CouponId,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage_discount: Option<Decimal>,
}

impl MerchantCoupon {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: CouponId(id.into()), kind: None, percentage_discount: None }
    }

    pub fn ppp(id: impl Into<String>, percentage_discount: Decimal) -> Self {
        Self {
            id: CouponId(id.into()),
            kind: Some(PPP_COUPON_TYPE.to_string()),
            percentage_discount: Some(percentage_discount),
        }
    }

    pub fn is_ppp(&self) -> bool {
        self.kind.as_deref().is_some_and(|kind| kind.eq_ignore_ascii_case(PPP_COUPON_TYPE))
    }
}

/// Priced result for one purchase-intent snapshot, as returned by the quote service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub unit_price: Decimal,
    pub calculated_price: Decimal,
    #[serde(default)]
    pub applied_merchant_coupon: Option<MerchantCoupon>,
    #[serde(default)]
    pub available_coupons: Vec<MerchantCoupon>,
    #[serde(default)]
    pub upgrade_from_purchase_id: Option<PurchaseId>,
    #[serde(default)]
    pub fixed_discount_for_upgrade: Option<Decimal>,
    #[serde(default)]
    pub bulk: bool,
    #[serde(default = "unlimited_quantity")]
    pub quantity_available: i64,
}

fn unlimited_quantity() -> i64 {
    -1
}

impl Quote {
    pub fn ppp_coupon(&self) -> Option<&MerchantCoupon> {
        self.available_coupons.iter().find(|coupon| coupon.is_ppp())
    }

    pub fn applied_coupon_id(&self) -> Option<&CouponId> {
        self.applied_merchant_coupon.as_ref().map(|coupon| &coupon.id)
    }
}
