pub mod audit;
pub mod checkout;
pub mod config;
pub mod domain;
pub mod errors;
pub mod pricing;

pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use checkout::{build_checkout_request, CheckoutError, CheckoutParams, CheckoutRequest};
pub use config::{AppConfig, ConfigError, LoadOptions};
pub use domain::product::{PricingRules, ProductId};
pub use domain::quote::{CouponId, MerchantCoupon, PurchaseId, Quote};
pub use errors::{ApplicationError, InterfaceError};
pub use pricing::{
    ContextSeed, ControllerSettings, FetchInput, PricingContext, PricingController, PricingEvent,
    PricingMachine, PricingSnapshot, PricingState, QuoteFetchError, QuoteFetcher,
};
