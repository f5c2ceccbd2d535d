use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::quote::MerchantCoupon;
use crate::pricing::fetch::FetchTicket;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PricingState {
    Loading,
    Debouncing,
    Ready,
    /// Failure outcome of `Loading`; the last fetch for the current snapshot did not produce a quote.
    Failed,
    Purchasing,
}

impl PricingState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Purchasing)
    }

    /// No timer or fetch for the current snapshot is outstanding.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::Purchasing)
    }
}

impl fmt::Display for PricingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loading => "Loading",
            Self::Debouncing => "Debouncing",
            Self::Ready => "Ready",
            Self::Failed => "Failed",
            Self::Purchasing => "Purchasing",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PricingEvent {
    UpdateQuantity(i64),
    ToggleTeamPurchase,
    TogglePpp,
    SetMerchantCoupon(Option<MerchantCoupon>),
    PurchaseInitiated,
    RetryQuote,
}

impl PricingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateQuantity(_) => "UPDATE_QUANTITY",
            Self::ToggleTeamPurchase => "TOGGLE_TEAM_PURCHASE",
            Self::TogglePpp => "TOGGLE_PPP",
            Self::SetMerchantCoupon(_) => "SET_MERCHANT_COUPON",
            Self::PurchaseInitiated => "PURCHASE_INITIATED",
            Self::RetryQuote => "RETRY_QUOTE",
        }
    }
}

/// What caused a transition: an external event or one of the machine's own signals.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Trigger {
    Started,
    Event(PricingEvent),
    DebounceElapsed,
    QuoteResolved { generation: u64 },
    QuoteFailed { generation: u64 },
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => f.write_str("STARTED"),
            Self::Event(event) => f.write_str(event.name()),
            Self::DebounceElapsed => f.write_str("DEBOUNCE_ELAPSED"),
            Self::QuoteResolved { generation } => write!(f, "QUOTE_RESOLVED#{generation}"),
            Self::QuoteFailed { generation } => write!(f, "QUOTE_FAILED#{generation}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PricingAction {
    /// Start the debounce timer, replacing any live one.
    StartDebounce,
    CancelDebounce,
    FetchQuote(FetchTicket),
    AbortFetches,
    HandOffToCheckout,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub from: PricingState,
    pub to: PricingState,
    pub trigger: Trigger,
    pub actions: Vec<PricingAction>,
}

impl TransitionOutcome {
    pub fn fetch_ticket(&self) -> Option<&FetchTicket> {
        self.actions.iter().find_map(|action| match action {
            PricingAction::FetchQuote(ticket) => Some(ticket),
            _ => None,
        })
    }
}
