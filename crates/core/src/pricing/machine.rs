use thiserror::Error;

use crate::domain::product::PricingRules;
use crate::domain::quote::{MerchantCoupon, Quote};
use crate::pricing::context::{ContextSeed, PricingContext};
use crate::pricing::fetch::{FetchResolution, FetchTicket, QuoteFetchError};
use crate::pricing::guards::{self, Guard};
use crate::pricing::states::{PricingAction, PricingEvent, PricingState, Trigger, TransitionOutcome};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionRejected {
    #[error("{event} ignored because the controller is purchasing")]
    Terminal { event: &'static str },
    #[error("{event} rejected by `{guard}` in state {state}")]
    GuardRejected { state: PricingState, event: &'static str, guard: Guard },
}

/// What happened to a fetch result handed back to the machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Applied(TransitionOutcome),
    Failed(TransitionOutcome),
    /// Result belongs to a superseded snapshot and was dropped.
    Stale { generation: u64, current: u64 },
    Ignored,
}

/// Runtime-free pricing state machine.
///
/// Every entry into `Loading` bumps the generation and freezes a [`FetchTicket`];
/// only a result carrying the current generation may touch `context.quote`.
#[derive(Clone, Debug)]
pub struct PricingMachine {
    state: PricingState,
    context: PricingContext,
    rules: PricingRules,
    generation: u64,
    failure: Option<QuoteFetchError>,
    ppp_preference: bool,
}

impl PricingMachine {
    pub fn start(seed: ContextSeed, rules: PricingRules) -> (Self, TransitionOutcome) {
        let ppp_preference = seed.auto_apply_ppp;
        let mut machine = Self {
            state: PricingState::Loading,
            context: PricingContext::seeded(seed),
            rules,
            generation: 0,
            failure: None,
            ppp_preference,
        };
        let ticket = machine.enter_loading();
        let outcome = TransitionOutcome {
            from: PricingState::Loading,
            to: PricingState::Loading,
            trigger: Trigger::Started,
            actions: vec![PricingAction::FetchQuote(ticket)],
        };
        (machine, outcome)
    }

    pub fn state(&self) -> PricingState {
        self.state
    }

    pub fn context(&self) -> &PricingContext {
        &self.context
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn failure(&self) -> Option<&QuoteFetchError> {
        self.failure.as_ref()
    }

    pub fn handle(&mut self, event: PricingEvent) -> Result<TransitionOutcome, TransitionRejected> {
        let from = self.state;
        if from.is_terminal() {
            return Err(TransitionRejected::Terminal { event: event.name() });
        }
        if let Some(guard) = guards::evaluate(from, &self.context, &self.rules, &event) {
            return Err(TransitionRejected::GuardRejected { state: from, event: event.name(), guard });
        }

        let actions = match &event {
            PricingEvent::UpdateQuantity(requested) => {
                let Ok(quantity) = u32::try_from(*requested) else {
                    return Err(TransitionRejected::GuardRejected {
                        state: from,
                        event: event.name(),
                        guard: Guard::QuantityBounds,
                    });
                };
                self.context.quantity = quantity;
                self.state = PricingState::Debouncing;
                vec![PricingAction::StartDebounce]
            }
            PricingEvent::ToggleTeamPurchase => {
                self.toggle_team_purchase();
                self.reload(from)
            }
            PricingEvent::TogglePpp => {
                self.toggle_ppp();
                self.reload(from)
            }
            PricingEvent::SetMerchantCoupon(coupon) => {
                self.set_merchant_coupon(coupon.clone());
                self.reload(from)
            }
            PricingEvent::RetryQuote => self.reload(from),
            PricingEvent::PurchaseInitiated => {
                self.state = PricingState::Purchasing;
                vec![PricingAction::AbortFetches, PricingAction::HandOffToCheckout]
            }
        };

        Ok(TransitionOutcome { from, to: self.state, trigger: Trigger::Event(event), actions })
    }

    /// Quiet period after the last quantity edit has passed.
    pub fn debounce_elapsed(&mut self) -> Option<TransitionOutcome> {
        if self.state != PricingState::Debouncing {
            return None;
        }
        let ticket = self.enter_loading();
        Some(TransitionOutcome {
            from: PricingState::Debouncing,
            to: PricingState::Loading,
            trigger: Trigger::DebounceElapsed,
            actions: vec![PricingAction::FetchQuote(ticket)],
        })
    }

    pub fn resolve(&mut self, resolution: FetchResolution) -> Resolution {
        if self.state.is_terminal() {
            return Resolution::Ignored;
        }
        if resolution.generation != self.generation {
            return Resolution::Stale {
                generation: resolution.generation,
                current: self.generation,
            };
        }
        self.apply_current(resolution.result)
    }

    /// Fails the outstanding fetch for the current snapshot when no result can arrive anymore.
    pub fn fail_current(&mut self, error: QuoteFetchError) -> Resolution {
        if self.state != PricingState::Loading {
            return Resolution::Ignored;
        }
        self.apply_current(Err(error))
    }

    fn apply_current(&mut self, result: Result<Quote, QuoteFetchError>) -> Resolution {
        let from = self.state;
        if !matches!(from, PricingState::Loading | PricingState::Debouncing) {
            return Resolution::Ignored;
        }

        match result {
            Ok(quote) => {
                if let Some(ppp) = quote.ppp_coupon() {
                    self.context.ppp_coupon = Some(ppp.clone());
                }
                self.context.quote = Some(quote);
                self.failure = None;
                if from == PricingState::Loading {
                    self.state = PricingState::Ready;
                }
                Resolution::Applied(TransitionOutcome {
                    from,
                    to: self.state,
                    trigger: Trigger::QuoteResolved { generation: self.generation },
                    actions: Vec::new(),
                })
            }
            Err(error) => {
                self.failure = Some(error);
                if from == PricingState::Loading {
                    self.state = PricingState::Failed;
                }
                Resolution::Failed(TransitionOutcome {
                    from,
                    to: self.state,
                    trigger: Trigger::QuoteFailed { generation: self.generation },
                    actions: Vec::new(),
                })
            }
        }
    }

    fn reload(&mut self, from: PricingState) -> Vec<PricingAction> {
        let mut actions = Vec::with_capacity(2);
        if from == PricingState::Debouncing {
            actions.push(PricingAction::CancelDebounce);
        }
        actions.push(PricingAction::FetchQuote(self.enter_loading()));
        actions
    }

    fn enter_loading(&mut self) -> FetchTicket {
        self.generation += 1;
        self.state = PricingState::Loading;
        self.failure = None;
        FetchTicket { generation: self.generation, input: self.context.fetch_input() }
    }

    fn toggle_team_purchase(&mut self) {
        if self.context.is_team_purchase_active {
            self.context.leave_team_mode();
            self.context.auto_apply_ppp = self.ppp_preference;
        } else {
            self.context.is_team_purchase_active = true;
            self.context.quantity = self.rules.team_activation_quantity();
            self.context.auto_apply_ppp = false;
        }
        self.context.clear_discount_modes();
    }

    fn toggle_ppp(&mut self) {
        if self.context.is_ppp_active {
            self.context.clear_discount_modes();
            self.ppp_preference = false;
        } else {
            if self.context.is_team_purchase_active {
                self.context.leave_team_mode();
            }
            self.context.active_merchant_coupon = self.context.ppp_coupon.clone();
            self.context.is_ppp_active = true;
            self.ppp_preference = true;
        }
        self.context.auto_apply_ppp = self.ppp_preference;
    }

    fn set_merchant_coupon(&mut self, coupon: Option<MerchantCoupon>) {
        match coupon {
            Some(coupon) if coupon.is_ppp() => {
                if self.context.is_team_purchase_active {
                    self.context.leave_team_mode();
                    self.context.auto_apply_ppp = self.ppp_preference;
                }
                self.context.is_ppp_active = true;
                self.context.active_merchant_coupon = Some(coupon);
            }
            Some(coupon) => {
                self.context.is_ppp_active = false;
                self.context.active_merchant_coupon = Some(coupon);
            }
            None => self.context.clear_discount_modes(),
        }
    }
}
