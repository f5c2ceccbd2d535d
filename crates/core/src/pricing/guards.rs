//! Pure predicates deciding whether a requested mutation is legal.
//!
//! Guards never mutate anything and know nothing about the transition table;
//! [`PricingMachine`](crate::pricing::machine::PricingMachine) consults [`evaluate`]
//! before applying an event.

use std::fmt;

use crate::domain::product::PricingRules;
use crate::pricing::context::PricingContext;
use crate::pricing::states::{PricingEvent, PricingState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Guard {
    QuantityBounds,
    TeamPurchase,
    PppAvailable,
    PurchaseReady,
    RetryAfterFailure,
}

impl Guard {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::QuantityBounds => "can_update_quantity",
            Self::TeamPurchase => "can_toggle_team_purchase",
            Self::PppAvailable => "is_ppp_available",
            Self::PurchaseReady => "can_initiate_purchase",
            Self::RetryAfterFailure => "can_retry_quote",
        }
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper quantity bound: a single seat outside team mode.
pub fn effective_quantity_limit(context: &PricingContext, rules: &PricingRules) -> u32 {
    if context.is_team_purchase_active {
        rules.team_quantity_limit.max(1)
    } else {
        1
    }
}

pub fn can_update_quantity(context: &PricingContext, rules: &PricingRules, requested: i64) -> bool {
    let limit = i64::from(effective_quantity_limit(context, rules));
    (1..=limit).contains(&requested)
}

pub fn can_toggle_team_purchase(state: PricingState) -> bool {
    !state.is_terminal()
}

/// A PPP coupon has been surfaced by an earlier quote for this product.
pub fn is_ppp_available(context: &PricingContext) -> bool {
    context.ppp_coupon.is_some()
}

/// Switching PPP off is always legal; switching it on needs a surfaced coupon.
pub fn can_toggle_ppp(state: PricingState, context: &PricingContext) -> bool {
    !state.is_terminal() && (context.is_ppp_active || is_ppp_available(context))
}

pub fn can_initiate_purchase(state: PricingState, context: &PricingContext) -> bool {
    state == PricingState::Ready && context.quote.is_some()
}

pub fn can_retry_quote(state: PricingState) -> bool {
    state == PricingState::Failed
}

/// Returns the guard the event violates, if any.
pub fn evaluate(
    state: PricingState,
    context: &PricingContext,
    rules: &PricingRules,
    event: &PricingEvent,
) -> Option<Guard> {
    let (allowed, guard) = match event {
        PricingEvent::UpdateQuantity(requested) => {
            (can_update_quantity(context, rules, *requested), Guard::QuantityBounds)
        }
        PricingEvent::ToggleTeamPurchase => (can_toggle_team_purchase(state), Guard::TeamPurchase),
        PricingEvent::TogglePpp => (can_toggle_ppp(state, context), Guard::PppAvailable),
        PricingEvent::SetMerchantCoupon(_) => return None,
        PricingEvent::PurchaseInitiated => {
            (can_initiate_purchase(state, context), Guard::PurchaseReady)
        }
        PricingEvent::RetryQuote => (can_retry_quote(state), Guard::RetryAfterFailure),
    };

    (!allowed).then_some(guard)
}
