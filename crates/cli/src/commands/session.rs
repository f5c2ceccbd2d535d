use std::sync::Arc;

use anyhow::{bail, Context};
use pricepoint_client::HttpQuoteFetcher;
use pricepoint_core::audit::{AuditSink, TracingAuditSink};
use pricepoint_core::checkout::{CheckoutParams, CheckoutRequest};
use pricepoint_core::config::{AppConfig, LoadOptions};
use pricepoint_core::errors::ApplicationError;
use pricepoint_core::pricing::{
    ContextSeed, ControllerSettings, PricingController, PricingEvent, PricingSnapshot,
    PricingState, QuoteFetcher,
};
use pricepoint_core::{CouponId, MerchantCoupon};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::commands::CommandResult;
use crate::logging::init_logging;

const COMMAND: &str = "session";

#[derive(Clone, Debug, Default)]
pub struct SessionArgs {
    pub product: String,
    pub coupon: Option<String>,
    pub team: bool,
    pub no_auto_ppp: bool,
    pub user: Option<String>,
    pub events: String,
}

impl SessionArgs {
    pub fn seed(&self) -> ContextSeed {
        ContextSeed {
            coupon_id: self.coupon.clone().map(CouponId),
            team_purchase: self.team,
            auto_apply_ppp: !self.no_auto_ppp,
            ..ContextSeed::new(self.product.clone())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub correlation_id: String,
    pub snapshot: PricingSnapshot,
    pub checkout: Option<CheckoutRequest>,
}

/// Parses a comma separated event script such as `qty=3,team,coupon=SPRING,purchase`.
pub fn parse_script(script: &str) -> anyhow::Result<Vec<PricingEvent>> {
    script
        .split(',')
        .map(str::trim)
        .filter(|step| !step.is_empty())
        .map(parse_step)
        .collect()
}

fn parse_step(step: &str) -> anyhow::Result<PricingEvent> {
    let (name, value) = match step.split_once('=') {
        Some((name, value)) => (name.trim(), Some(value.trim())),
        None => (step, None),
    };

    let event = match (name, value) {
        ("qty", Some(value)) => PricingEvent::UpdateQuantity(
            value.parse().with_context(|| format!("`{step}` needs an integer quantity"))?,
        ),
        ("team", None) => PricingEvent::ToggleTeamPurchase,
        ("ppp", None) => PricingEvent::TogglePpp,
        ("coupon", Some("")) => PricingEvent::SetMerchantCoupon(None),
        ("coupon", Some(id)) => PricingEvent::SetMerchantCoupon(Some(MerchantCoupon::new(id))),
        ("retry", None) => PricingEvent::RetryQuote,
        ("purchase", None) => PricingEvent::PurchaseInitiated,
        _ => bail!("unknown session step `{step}`"),
    };
    Ok(event)
}

/// Runs a controller over `events`. Purchase and retry steps wait for the
/// controller to settle first, mirroring a user who reacts to the price shown.
pub async fn drive(
    seed: ContextSeed,
    settings: ControllerSettings,
    fetcher: Arc<dyn QuoteFetcher>,
    audit: Arc<dyn AuditSink>,
    events: Vec<PricingEvent>,
) -> Result<PricingSnapshot, ApplicationError> {
    let controller = PricingController::spawn(seed, settings, fetcher, audit);
    info!(
        event_name = "cli.session_started",
        session_id = controller.session_id(),
        steps = events.len(),
        "pricing session started"
    );

    for event in events {
        if matches!(event, PricingEvent::PurchaseInitiated | PricingEvent::RetryQuote) {
            controller.settled().await?;
        }
        controller.send(event)?;
    }

    let snapshot = controller.settled().await?;
    controller.stop();
    Ok(snapshot)
}

pub fn run(args: SessionArgs) -> CommandResult {
    let correlation_id = Uuid::new_v4().to_string();
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(COMMAND, "config_validation", error.to_string(), 2)
        }
    };
    init_logging(&config.logging);

    let events = match parse_script(&args.events) {
        Ok(events) => events,
        Err(error) => return CommandResult::failure(COMMAND, "invalid_script", format!("{error:#}"), 2),
    };

    let fetcher = match HttpQuoteFetcher::from_config(&config.quote_service) {
        Ok(fetcher) => fetcher,
        Err(error) => {
            return CommandResult::failure(COMMAND, "quote_service_client", error.to_string(), 3)
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                5,
            )
        }
    };

    let result = runtime.block_on(drive(
        args.seed(),
        ControllerSettings::from(&config.pricing),
        Arc::new(fetcher),
        Arc::new(TracingAuditSink),
        events,
    ));

    match result {
        Ok(snapshot) => report(snapshot, &config, args.user, &correlation_id),
        Err(error) => interface_failure(error, &correlation_id, "controller", 5, None),
    }
}

/// Renders a settled snapshot, building the checkout request when the session ended purchasing.
pub fn report(
    snapshot: PricingSnapshot,
    config: &AppConfig,
    user: Option<String>,
    correlation_id: &str,
) -> CommandResult {
    let checkout = if snapshot.state == PricingState::Purchasing {
        let params = CheckoutParams { cancel_url: config.checkout.cancel_url.clone(), user_id: user };
        match snapshot.checkout_request(&params) {
            Ok(request) => Some(request),
            Err(error) => {
                return interface_failure(error.into(), correlation_id, "checkout", 4, None);
            }
        }
    } else {
        None
    };

    let state = snapshot.state;
    let failure = snapshot.failure.clone();
    let data = serde_json::to_value(SessionReport {
        correlation_id: correlation_id.to_owned(),
        snapshot,
        checkout,
    })
    .ok();

    match failure {
        Some(failure) if state == PricingState::Failed => {
            interface_failure(failure.into(), correlation_id, "quote_service", 4, data)
        }
        _ => CommandResult::success_with_data(COMMAND, format!("session settled in {state}"), data),
    }
}

fn interface_failure(
    error: ApplicationError,
    correlation_id: &str,
    error_class: &str,
    exit_code: u8,
    data: Option<Value>,
) -> CommandResult {
    let interface = error.into_interface(correlation_id);
    warn!(
        event_name = "cli.session_failed",
        correlation_id,
        error_class,
        error = %interface,
        "pricing session failed"
    );
    CommandResult::failure_with_data(
        COMMAND,
        error_class,
        format!("{} {interface} (correlation id {correlation_id})", interface.user_message()),
        exit_code,
        data,
    )
}
