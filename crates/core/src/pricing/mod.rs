//! Pricing quote controller: a pure state machine plus the async driver that
//! owns it.

pub mod context;
pub mod controller;
pub mod fetch;
pub mod guards;
pub mod machine;
pub mod states;

pub use context::{ContextSeed, PricingContext};
pub use controller::{ControllerError, ControllerSettings, PricingController, PricingSnapshot};
pub use fetch::{FetchInput, FetchResolution, FetchTicket, QuoteFetchError, QuoteFetcher};
pub use guards::Guard;
pub use machine::{PricingMachine, Resolution, TransitionRejected};
pub use states::{PricingAction, PricingEvent, PricingState, TransitionOutcome, Trigger};
