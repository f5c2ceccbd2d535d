//! Async driver for [`PricingMachine`].
//!
//! A single tokio task owns the machine. The UI side holds a
//! [`PricingController`] handle and can only submit events and observe
//! [`PricingSnapshot`]s, so the context has exactly one writer.

use std::collections::HashMap;
use std::future::pending;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{Id, JoinError, JoinHandle, JoinSet};
use tokio::time::{sleep, timeout, Sleep};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::checkout::{build_checkout_request, CheckoutError, CheckoutParams, CheckoutRequest};
use crate::config::PricingConfig;
use crate::domain::product::PricingRules;
use crate::pricing::context::{ContextSeed, PricingContext};
use crate::pricing::fetch::{FetchResolution, FetchTicket, QuoteFetchError, QuoteFetcher};
use crate::pricing::machine::{PricingMachine, Resolution, TransitionRejected};
use crate::pricing::states::{PricingAction, PricingEvent, PricingState, TransitionOutcome};

const ACTOR: &str = "pricing-controller";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerSettings {
    pub rules: PricingRules,
    pub debounce: Duration,
    pub fetch_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            rules: PricingRules::default(),
            debounce: Duration::from_millis(350),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&PricingConfig> for ControllerSettings {
    fn from(config: &PricingConfig) -> Self {
        Self {
            rules: PricingRules {
                team_quantity_limit: config.team_quantity_limit,
                team_default_quantity: config.team_default_quantity,
            },
            debounce: Duration::from_millis(config.debounce_ms),
            fetch_timeout: Duration::from_millis(config.fetch_timeout_ms),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PricingSnapshot {
    pub state: PricingState,
    pub context: PricingContext,
    pub failure: Option<QuoteFetchError>,
    pub generation: u64,
    pub events_handled: u64,
}

impl PricingSnapshot {
    fn capture(machine: &PricingMachine, events_handled: u64) -> Self {
        Self {
            state: machine.state(),
            context: machine.context().clone(),
            failure: machine.failure().cloned(),
            generation: machine.generation(),
            events_handled,
        }
    }

    pub fn checkout_request(&self, params: &CheckoutParams) -> Result<CheckoutRequest, CheckoutError> {
        if self.state != PricingState::Purchasing {
            return Err(CheckoutError::NotPurchasing(self.state));
        }
        let quote = self
            .context
            .quote
            .as_ref()
            .ok_or_else(|| CheckoutError::MissingQuote(self.context.product_id.clone()))?;
        build_checkout_request(&self.context, quote, params)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("pricing controller has stopped")]
    Stopped,
}

pub struct PricingController {
    session_id: String,
    events: mpsc::UnboundedSender<PricingEvent>,
    snapshots: watch::Receiver<PricingSnapshot>,
    sent: AtomicU64,
    driver: JoinHandle<()>,
}

impl PricingController {
    /// Starts a controller on the current tokio runtime and issues the first quote fetch.
    pub fn spawn(
        seed: ContextSeed,
        settings: ControllerSettings,
        fetcher: Arc<dyn QuoteFetcher>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let session_id = Uuid::new_v4().to_string();
        let audit_context = AuditContext::new(seed.product_id.clone(), session_id.clone(), ACTOR);
        let (machine, started) = PricingMachine::start(seed, settings.rules);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(PricingSnapshot::capture(&machine, 0));

        let driver = Driver {
            machine,
            settings,
            fetcher,
            audit,
            audit_context,
            events: event_rx,
            snapshots: snapshot_tx,
            in_flight: JoinSet::new(),
            task_generations: HashMap::new(),
            debounce: None,
            events_handled: 0,
        };

        Self {
            session_id,
            events: event_tx,
            snapshots: snapshot_rx,
            sent: AtomicU64::new(0),
            driver: tokio::spawn(driver.run(started)),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn send(&self, event: PricingEvent) -> Result<(), ControllerError> {
        self.events.send(event).map_err(|_| ControllerError::Stopped)?;
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn snapshot(&self) -> PricingSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PricingSnapshot> {
        self.snapshots.clone()
    }

    /// Waits until every event sent so far has been handled and no timer or
    /// fetch for the current snapshot is outstanding.
    pub async fn settled(&self) -> Result<PricingSnapshot, ControllerError> {
        let sent = self.sent.load(Ordering::SeqCst);
        let mut receiver = self.snapshots.clone();
        let snapshot = receiver
            .wait_for(|snapshot| snapshot.events_handled >= sent && snapshot.state.is_settled())
            .await
            .map_err(|_| ControllerError::Stopped)?;
        Ok(snapshot.clone())
    }

    /// Unmounts the controller. Outstanding fetches are dropped with the driver.
    pub fn stop(self) {
        self.driver.abort();
    }
}

impl Drop for PricingController {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

enum Step {
    Event(PricingEvent),
    Closed,
    DebounceElapsed,
    Joined(Result<(Id, FetchResolution), JoinError>),
}

struct Driver {
    machine: PricingMachine,
    settings: ControllerSettings,
    fetcher: Arc<dyn QuoteFetcher>,
    audit: Arc<dyn AuditSink>,
    audit_context: AuditContext,
    events: mpsc::UnboundedReceiver<PricingEvent>,
    snapshots: watch::Sender<PricingSnapshot>,
    in_flight: JoinSet<FetchResolution>,
    /// Generation each outstanding fetch task was spawned for.
    task_generations: HashMap<Id, u64>,
    debounce: Option<Pin<Box<Sleep>>>,
    events_handled: u64,
}

impl Driver {
    async fn run(mut self, started: TransitionOutcome) {
        self.apply_outcome(started);
        self.publish();

        loop {
            let step = tokio::select! {
                biased;
                event = self.events.recv() => match event {
                    Some(event) => Step::Event(event),
                    None => Step::Closed,
                },
                Some(joined) = self.in_flight.join_next_with_id(), if !self.in_flight.is_empty() => {
                    Step::Joined(joined)
                }
                () = debounce_elapsed(&mut self.debounce) => Step::DebounceElapsed,
            };

            match step {
                Step::Closed => break,
                Step::Event(event) => self.on_event(event),
                Step::DebounceElapsed => {
                    self.debounce = None;
                    if let Some(outcome) = self.machine.debounce_elapsed() {
                        self.apply_outcome(outcome);
                    }
                }
                Step::Joined(Ok((id, resolution))) => {
                    self.task_generations.remove(&id);
                    self.on_resolution(resolution);
                }
                Step::Joined(Err(join_error)) => self.on_join_error(join_error),
            }
            self.publish();
        }

        self.in_flight.abort_all();
        debug!(
            event_name = "pricing.controller_stopped",
            product_id = %self.audit_context.product_id,
            session_id = %self.audit_context.session_id,
            "pricing controller event channel closed"
        );
    }

    fn on_event(&mut self, event: PricingEvent) {
        self.events_handled += 1;
        match self.machine.handle(event) {
            Ok(outcome) => self.apply_outcome(outcome),
            Err(rejected) => self.record_rejection(&rejected),
        }
    }

    fn on_resolution(&mut self, resolution: FetchResolution) {
        let generation = resolution.generation;
        let quantity = resolution.input.quantity;
        match self.machine.resolve(resolution) {
            Resolution::Applied(outcome) => self.apply_outcome(outcome),
            Resolution::Failed(outcome) => {
                let failure = self.machine.failure().map(ToString::to_string).unwrap_or_default();
                warn!(
                    event_name = "pricing.quote_failed",
                    product_id = %self.audit_context.product_id,
                    session_id = %self.audit_context.session_id,
                    generation,
                    error = %failure,
                    "quote fetch failed"
                );
                self.audit.emit(
                    self.audit_event("pricing.quote_failed", AuditCategory::Quote, AuditOutcome::Failed)
                        .with_metadata("generation", generation.to_string())
                        .with_metadata("error", failure),
                );
                self.apply_outcome(outcome);
            }
            Resolution::Stale { generation, current } => {
                debug!(
                    event_name = "pricing.quote_discarded",
                    product_id = %self.audit_context.product_id,
                    session_id = %self.audit_context.session_id,
                    generation,
                    current_generation = current,
                    quantity,
                    "discarded quote for superseded snapshot"
                );
                self.audit.emit(
                    self.audit_event(
                        "pricing.quote_discarded",
                        AuditCategory::Quote,
                        AuditOutcome::Discarded,
                    )
                    .with_metadata("generation", generation.to_string())
                    .with_metadata("current_generation", current.to_string()),
                );
            }
            Resolution::Ignored => {
                debug!(
                    event_name = "pricing.quote_ignored",
                    session_id = %self.audit_context.session_id,
                    generation,
                    state = %self.machine.state(),
                    "quote result arrived with nothing waiting for it"
                );
            }
        }
    }

    fn on_join_error(&mut self, join_error: JoinError) {
        let generation = self.task_generations.remove(&join_error.id());
        if join_error.is_cancelled() {
            return;
        }
        error!(
            event_name = "pricing.quote_task_panicked",
            session_id = %self.audit_context.session_id,
            generation,
            current_generation = self.machine.generation(),
            error = %join_error,
            "quote fetch task panicked"
        );
        // The current snapshot can only be answered by the task spawned for it.
        if generation != Some(self.machine.generation()) {
            return;
        }
        if let Resolution::Failed(outcome) = self.machine.fail_current(QuoteFetchError::Aborted) {
            self.apply_outcome(outcome);
        }
    }

    fn apply_outcome(&mut self, outcome: TransitionOutcome) {
        info!(
            event_name = "pricing.transition_applied",
            product_id = %self.audit_context.product_id,
            session_id = %self.audit_context.session_id,
            from = %outcome.from,
            to = %outcome.to,
            trigger = %outcome.trigger,
            generation = self.machine.generation(),
            quantity = self.machine.context().quantity,
            "pricing transition applied"
        );
        self.audit.emit(
            self.audit_event(
                "pricing.transition_applied",
                AuditCategory::Transition,
                AuditOutcome::Success,
            )
            .with_metadata("from", outcome.from.to_string())
            .with_metadata("to", outcome.to.to_string())
            .with_metadata("trigger", outcome.trigger.to_string()),
        );

        for action in outcome.actions {
            self.execute(action);
        }
    }

    fn execute(&mut self, action: PricingAction) {
        match action {
            PricingAction::StartDebounce => {
                self.debounce = Some(Box::pin(sleep(self.settings.debounce)));
            }
            PricingAction::CancelDebounce => self.debounce = None,
            PricingAction::FetchQuote(ticket) => self.spawn_fetch(ticket),
            PricingAction::AbortFetches => {
                self.in_flight.abort_all();
                self.task_generations.clear();
                self.debounce = None;
            }
            PricingAction::HandOffToCheckout => {
                let context = self.machine.context();
                info!(
                    event_name = "pricing.checkout_handoff",
                    product_id = %context.product_id,
                    session_id = %self.audit_context.session_id,
                    quantity = context.quantity,
                    team_purchase = context.is_team_purchase_active,
                    "purchase initiated; pricing context frozen"
                );
                let quantity = context.quantity.to_string();
                self.audit.emit(
                    self.audit_event(
                        "pricing.checkout_handoff",
                        AuditCategory::Checkout,
                        AuditOutcome::Success,
                    )
                    .with_metadata("quantity", quantity),
                );
            }
        }
    }

    fn spawn_fetch(&mut self, ticket: FetchTicket) {
        debug!(
            event_name = "pricing.quote_requested",
            product_id = %ticket.input.product_id,
            session_id = %self.audit_context.session_id,
            generation = ticket.generation,
            quantity = ticket.input.quantity,
            "spawning quote fetch"
        );

        let fetcher = Arc::clone(&self.fetcher);
        let limit = self.settings.fetch_timeout;
        let generation = ticket.generation;
        let task = self.in_flight.spawn(async move {
            let result = match timeout(limit, fetcher.fetch_quote(&ticket.input)).await {
                Ok(result) => result,
                Err(_) => {
                    Err(QuoteFetchError::Timeout(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)))
                }
            };
            FetchResolution { generation: ticket.generation, input: ticket.input, result }
        });
        self.task_generations.insert(task.id(), generation);
    }

    fn record_rejection(&self, rejected: &TransitionRejected) {
        debug!(
            event_name = "pricing.event_rejected",
            product_id = %self.audit_context.product_id,
            session_id = %self.audit_context.session_id,
            reason = %rejected,
            "pricing event rejected"
        );
        self.audit.emit(
            self.audit_event("pricing.event_rejected", AuditCategory::Intent, AuditOutcome::Rejected)
                .with_metadata("reason", rejected.to_string()),
        );
    }

    fn audit_event(
        &self,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> AuditEvent {
        AuditEvent::new(&self.audit_context, event_type, category, outcome)
    }

    fn publish(&self) {
        let next = PricingSnapshot::capture(&self.machine, self.events_handled);
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

async fn debounce_elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer.as_mut() {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use tokio::sync::oneshot;

    use crate::audit::InMemoryAuditSink;
    use crate::checkout::{CheckoutError, CheckoutParams};
    use crate::domain::product::PricingRules;
    use crate::domain::quote::{MerchantCoupon, Quote};
    use crate::pricing::context::ContextSeed;
    use crate::pricing::fetch::{FetchInput, QuoteFetchError, QuoteFetcher};
    use crate::pricing::states::{PricingEvent, PricingState};

    use super::{ControllerSettings, PricingController};

    type Responder = oneshot::Sender<Result<Quote, QuoteFetchError>>;

    /// Fetcher whose calls stay pending until the test answers them.
    #[derive(Default)]
    struct ScriptedFetcher {
        calls: Mutex<Vec<FetchInput>>,
        pending: Mutex<VecDeque<Responder>>,
    }

    impl ScriptedFetcher {
        fn calls(&self) -> Vec<FetchInput> {
            self.calls.lock().expect("calls lock").clone()
        }

        fn respond_next(&self, result: Result<Quote, QuoteFetchError>) {
            let responder = self.pending.lock().expect("pending lock").pop_front();
            let _ = responder.expect("a fetch should be pending").send(result);
        }

        fn respond_last(&self, result: Result<Quote, QuoteFetchError>) {
            let responder = self.pending.lock().expect("pending lock").pop_back();
            let _ = responder.expect("a fetch should be pending").send(result);
        }
    }

    #[async_trait]
    impl QuoteFetcher for ScriptedFetcher {
        async fn fetch_quote(&self, input: &FetchInput) -> Result<Quote, QuoteFetchError> {
            let (tx, rx) = oneshot::channel();
            self.calls.lock().expect("calls lock").push(input.clone());
            self.pending.lock().expect("pending lock").push_back(tx);
            rx.await.unwrap_or(Err(QuoteFetchError::Aborted))
        }
    }

    fn quote(calculated_cents: i64) -> Quote {
        Quote {
            unit_price: Decimal::new(999, 2),
            calculated_price: Decimal::new(calculated_cents, 2),
            applied_merchant_coupon: None,
            available_coupons: Vec::new(),
            upgrade_from_purchase_id: None,
            fixed_discount_for_upgrade: None,
            bulk: false,
            quantity_available: -1,
        }
    }

    fn settings(team_quantity_limit: u32) -> ControllerSettings {
        ControllerSettings {
            rules: PricingRules { team_quantity_limit, ..PricingRules::default() },
            ..ControllerSettings::default()
        }
    }

    fn team_seed() -> ContextSeed {
        ContextSeed { team_purchase: true, ..ContextSeed::new("course-rust") }
    }

    fn spawn(
        seed: ContextSeed,
        settings: ControllerSettings,
    ) -> (PricingController, Arc<ScriptedFetcher>, InMemoryAuditSink) {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let sink = InMemoryAuditSink::default();
        let controller =
            PricingController::spawn(seed, settings, fetcher.clone(), Arc::new(sink.clone()));
        (controller, fetcher, sink)
    }

    /// Lets spawned tasks run without moving the paused clock.
    async fn drain() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    async fn until_ready(controller: &PricingController) {
        let snapshot = controller.settled().await.expect("controller running");
        assert_eq!(snapshot.state, PricingState::Ready);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn debounced_quantity_fetches_once_and_applies_quote() {
        let (controller, fetcher, _sink) = spawn(team_seed(), settings(5));
        drain().await;
        fetcher.respond_next(Ok(quote(999)));
        until_ready(&controller).await;

        controller.send(PricingEvent::UpdateQuantity(3)).expect("send");
        drain().await;
        assert_eq!(controller.snapshot().state, PricingState::Debouncing);
        assert_eq!(controller.snapshot().context.quantity, 3);

        tokio::time::advance(Duration::from_millis(349)).await;
        drain().await;
        assert_eq!(controller.snapshot().state, PricingState::Debouncing);

        tokio::time::advance(Duration::from_millis(1)).await;
        drain().await;
        assert_eq!(controller.snapshot().state, PricingState::Loading);
        let calls = fetcher.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].quantity, 3);

        fetcher.respond_next(Ok(quote(2997)));
        let snapshot = controller.settled().await.expect("settled");
        assert_eq!(snapshot.state, PricingState::Ready);
        assert_eq!(
            snapshot.context.quote.map(|quote| quote.calculated_price),
            Some(Decimal::new(2997, 2))
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn quantity_burst_collapses_into_one_fetch_with_last_value() {
        let (controller, fetcher, _sink) = spawn(team_seed(), settings(100));
        drain().await;
        fetcher.respond_next(Ok(quote(999)));
        until_ready(&controller).await;

        for quantity in [2, 3, 4, 5, 6, 7] {
            controller.send(PricingEvent::UpdateQuantity(quantity)).expect("send");
            drain().await;
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        drain().await;
        assert_eq!(fetcher.calls().len(), 1, "timer must be reset by each edit");

        tokio::time::advance(Duration::from_millis(250)).await;
        drain().await;
        let calls = fetcher.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].quantity, 7);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn team_toggle_clears_coupon_and_reloads() {
        let (controller, fetcher, _sink) = spawn(
            ContextSeed {
                merchant_coupon: Some(MerchantCoupon::new("launch-week")),
                ..ContextSeed::new("course-rust")
            },
            ControllerSettings::default(),
        );
        drain().await;
        fetcher.respond_next(Ok(quote(999)));
        until_ready(&controller).await;

        controller.send(PricingEvent::ToggleTeamPurchase).expect("send");
        drain().await;
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, PricingState::Loading);
        assert_eq!(snapshot.context.quantity, 5);
        assert!(snapshot.context.active_merchant_coupon.is_none());

        fetcher.respond_next(Ok(quote(4995)));
        until_ready(&controller).await;
        assert_eq!(fetcher.calls()[1].quantity, 5);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn late_response_for_superseded_snapshot_is_discarded() {
        let (controller, fetcher, sink) = spawn(team_seed(), settings(100));
        drain().await;
        fetcher.respond_next(Ok(quote(999)));
        until_ready(&controller).await;

        controller.send(PricingEvent::UpdateQuantity(3)).expect("send 3");
        drain().await;
        tokio::time::advance(Duration::from_millis(350)).await;
        drain().await;
        controller.send(PricingEvent::UpdateQuantity(5)).expect("send 5");
        drain().await;
        tokio::time::advance(Duration::from_millis(350)).await;
        drain().await;

        let calls = fetcher.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!((calls[1].quantity, calls[2].quantity), (3, 5));

        fetcher.respond_last(Ok(quote(4995)));
        drain().await;
        fetcher.respond_next(Ok(quote(2997)));
        drain().await;

        let snapshot = controller.settled().await.expect("settled");
        assert_eq!(snapshot.state, PricingState::Ready);
        assert_eq!(snapshot.context.quantity, 5);
        assert_eq!(
            snapshot.context.quote.map(|quote| quote.calculated_price),
            Some(Decimal::new(4995, 2))
        );
        assert_eq!(sink.events_of_type("pricing.quote_discarded").len(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn purchase_is_terminal_and_builds_checkout() {
        let (controller, fetcher, sink) = spawn(team_seed(), settings(100));
        drain().await;
        fetcher.respond_next(Ok(quote(999)));
        until_ready(&controller).await;

        controller.send(PricingEvent::PurchaseInitiated).expect("purchase");
        for event in [
            PricingEvent::UpdateQuantity(4),
            PricingEvent::ToggleTeamPurchase,
            PricingEvent::SetMerchantCoupon(None),
        ] {
            controller.send(event).expect("send after purchase");
        }
        let snapshot = controller.settled().await.expect("settled");
        tokio::time::advance(Duration::from_secs(5)).await;
        drain().await;

        assert_eq!(snapshot.state, PricingState::Purchasing);
        assert_eq!(controller.snapshot().context, snapshot.context);
        assert_eq!(fetcher.calls().len(), 1);
        assert_eq!(sink.events_of_type("pricing.event_rejected").len(), 3);

        let request = snapshot
            .checkout_request(&CheckoutParams {
                cancel_url: "https://example.test/rust".to_owned(),
                user_id: None,
            })
            .expect("checkout request");
        assert_eq!(request.quantity, 1);
        assert!(request.bulk);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn purchase_before_first_quote_is_rejected() {
        let (controller, fetcher, _sink) = spawn(ContextSeed::new("course-rust"), settings(100));
        drain().await;
        controller.send(PricingEvent::PurchaseInitiated).expect("send");
        drain().await;
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, PricingState::Loading);
        assert_eq!(snapshot.events_handled, 1);
        assert!(matches!(
            snapshot.checkout_request(&CheckoutParams {
                cancel_url: "https://example.test".to_owned(),
                user_id: None
            }),
            Err(CheckoutError::NotPurchasing(PricingState::Loading))
        ));

        fetcher.respond_next(Ok(quote(999)));
        until_ready(&controller).await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn slow_service_times_out_into_failed_and_retry_recovers() {
        let (controller, fetcher, sink) = spawn(
            ContextSeed::new("course-rust"),
            ControllerSettings { fetch_timeout: Duration::from_secs(2), ..ControllerSettings::default() },
        );

        let snapshot = controller.settled().await.expect("settled");
        assert_eq!(snapshot.state, PricingState::Failed);
        assert_eq!(snapshot.failure, Some(QuoteFetchError::Timeout(2_000)));
        assert_eq!(sink.events_of_type("pricing.quote_failed").len(), 1);

        controller.send(PricingEvent::RetryQuote).expect("retry");
        drain().await;
        assert_eq!(controller.snapshot().state, PricingState::Loading);
        assert!(controller.snapshot().failure.is_none());

        fetcher.respond_last(Ok(quote(999)));
        until_ready(&controller).await;
        assert_eq!(fetcher.calls().len(), 2);
    }

    /// Answers the first call slowly with an error and panics on every later call.
    #[derive(Default)]
    struct PanickingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QuoteFetcher for PanickingFetcher {
        async fn fetch_quote(&self, _input: &FetchInput) -> Result<Quote, QuoteFetchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(500)).await;
                return Err(QuoteFetchError::Status(503));
            }
            panic!("quote client blew up");
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn panicked_current_fetch_fails_even_with_older_fetch_in_flight() {
        let fetcher = Arc::new(PanickingFetcher::default());
        let sink = InMemoryAuditSink::default();
        let controller = PricingController::spawn(
            ContextSeed::new("course-rust"),
            settings(100),
            fetcher.clone(),
            Arc::new(sink.clone()),
        );
        drain().await;

        controller.send(PricingEvent::ToggleTeamPurchase).expect("team on");
        let snapshot = controller.settled().await.expect("settled");
        assert_eq!(snapshot.state, PricingState::Failed);
        assert_eq!(snapshot.generation, 2);
        assert_eq!(snapshot.failure, Some(QuoteFetchError::Aborted));

        tokio::time::advance(Duration::from_secs(60)).await;
        drain().await;
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, PricingState::Failed);
        assert_eq!(snapshot.failure, Some(QuoteFetchError::Aborted));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(sink.events_of_type("pricing.quote_discarded").len(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn service_error_surfaces_failed_state() {
        let (controller, fetcher, _sink) = spawn(ContextSeed::new("course-rust"), settings(100));
        drain().await;
        fetcher.respond_next(Err(QuoteFetchError::Status(503)));

        let snapshot = controller.settled().await.expect("settled");
        assert_eq!(snapshot.state, PricingState::Failed);
        assert_eq!(snapshot.failure, Some(QuoteFetchError::Status(503)));
        assert!(snapshot.context.quote.is_none());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn stopping_closes_snapshot_stream() {
        let (controller, _fetcher, _sink) = spawn(ContextSeed::new("course-rust"), settings(100));
        let mut snapshots = controller.subscribe();
        drain().await;
        snapshots.borrow_and_update();
        controller.stop();
        drain().await;

        assert!(snapshots.changed().await.is_err());
    }
}
