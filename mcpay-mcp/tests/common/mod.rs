#![allow(dead_code, missing_docs, clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mcpay::error::ProviderError;
use mcpay::mode::CoordinationMode;
use mcpay::price::ToolPriceSpec;
use mcpay::provider::{
    BoxFuture, CreatedPayment, PaymentLink, PaymentProvider, PaymentStatus, Subscription,
    SubscriptionCheckout, SubscriptionProvider, SubscriptionStatus,
};
use mcpay::registry::Providers;
use mcpay_mcp::{
    CallToolParams, ElicitationAction, ElicitationRequest, Elicitor, PaymentGateBuilder,
    ProgressReporter, ProgressUpdate, Tool, ToolError, ToolListChanged, ToolListNotifier,
    TransportError,
};
use rust_decimal::Decimal;
use serde_json::{Map, Value, json};

/// A checkout-style provider whose payment status the test controls.
#[derive(Default)]
pub struct StubProvider {
    status: Mutex<Option<PaymentStatus>>,
    pending_polls: AtomicUsize,
    created: AtomicUsize,
    status_reads: AtomicUsize,
    outage: AtomicBool,
    reuse_ids: AtomicBool,
    subscriptions: Option<StubSubscriptions>,
}

impl StubProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_subscriptions(active: Vec<Subscription>) -> Arc<Self> {
        Arc::new(Self {
            subscriptions: Some(StubSubscriptions {
                active: Mutex::new(active),
            }),
            ..Self::default()
        })
    }

    /// Every status read from now on reports `status`.
    pub fn settle(&self, status: PaymentStatus) {
        *self.status.lock().unwrap() = Some(status);
    }

    /// The next `n` status reads report `pending` regardless of [`Self::settle`].
    pub fn pending_for(&self, n: usize) {
        self.pending_polls.store(n, Ordering::SeqCst);
    }

    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// Every payment created from now on gets the id `pay_1`.
    pub fn reuse_ids(&self) {
        self.reuse_ids.store(true, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn status_reads(&self) -> usize {
        self.status_reads.load(Ordering::SeqCst)
    }
}

impl PaymentProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn create_payment<'a>(
        &'a self,
        _amount: Decimal,
        _currency: &'a str,
        _description: &'a str,
    ) -> BoxFuture<'a, Result<CreatedPayment, ProviderError>> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let payment_id = if self.reuse_ids.load(Ordering::SeqCst) {
            "pay_1".to_owned()
        } else {
            format!("pay_{n}")
        };
        Box::pin(async move {
            Ok(CreatedPayment {
                link: PaymentLink::Url(format!("https://pay.example/{payment_id}")),
                payment_id,
            })
        })
    }

    fn get_payment_status<'a>(
        &'a self,
        _payment_id: &'a str,
    ) -> BoxFuture<'a, Result<PaymentStatus, ProviderError>> {
        self.status_reads.fetch_add(1, Ordering::SeqCst);
        let result = if self.outage.load(Ordering::SeqCst) {
            Err(ProviderError::transport("connection refused"))
        } else if self
            .pending_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            Ok(PaymentStatus::Pending)
        } else {
            Ok(self.status.lock().unwrap().unwrap_or(PaymentStatus::Pending))
        };
        Box::pin(async move { result })
    }

    fn subscriptions(&self) -> Option<&dyn SubscriptionProvider> {
        self.subscriptions
            .as_ref()
            .map(|s| s as &dyn SubscriptionProvider)
    }
}

pub struct StubSubscriptions {
    active: Mutex<Vec<Subscription>>,
}

impl SubscriptionProvider for StubSubscriptions {
    fn get_subscriptions<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Subscription>, ProviderError>> {
        let subscriptions = if user_id == "alice" {
            self.active.lock().unwrap().clone()
        } else {
            Vec::new()
        };
        Box::pin(async move { Ok(subscriptions) })
    }

    fn start_subscription<'a>(
        &'a self,
        plan_id: &'a str,
        _user_id: &'a str,
    ) -> BoxFuture<'a, Result<SubscriptionCheckout, ProviderError>> {
        let checkout = SubscriptionCheckout {
            subscription_id: Some(format!("sub_{plan_id}")),
            checkout_url: format!("https://pay.example/subscribe/{plan_id}"),
        };
        Box::pin(async move { Ok(checkout) })
    }

    fn cancel_subscription<'a>(
        &'a self,
        subscription_id: &'a str,
        _user_id: &'a str,
    ) -> BoxFuture<'a, Result<Subscription, ProviderError>> {
        let mut active = self.active.lock().unwrap();
        let result = active
            .iter_mut()
            .find(|s| s.id == subscription_id)
            .map(|s| {
                s.status = SubscriptionStatus::Cancelled;
                s.clone()
            })
            .ok_or_else(|| ProviderError::UnknownPayment(subscription_id.to_owned()));
        Box::pin(async move { result })
    }
}

pub fn subscription(id: &str, plan: &str, status: SubscriptionStatus) -> Subscription {
    Subscription {
        id: id.to_owned(),
        plan_id: plan.to_owned(),
        status,
        current_period_end: None,
    }
}

pub fn args(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

pub fn dog() -> Map<String, Value> {
    args(json!({"prompt": "a dog"}))
}

pub fn call(tool: &str, arguments: Map<String, Value>) -> CallToolParams {
    CallToolParams::new(tool, arguments)
}

pub fn with_payment_id(mut arguments: Map<String, Value>, payment_id: &str) -> Map<String, Value> {
    arguments.insert("payment_id".to_owned(), Value::from(payment_id));
    arguments
}

/// Builder with a free `ping`, and a `generate` tool priced at 1.00 USD that
/// counts its executions.
pub fn generate_gate(
    mode: CoordinationMode,
    provider: Arc<StubProvider>,
) -> (PaymentGateBuilder, Arc<AtomicUsize>) {
    flaky_generate_gate(mode, provider, 0)
}

/// Like [`generate_gate`], but the first `failures` runs of `generate` fail.
/// Failed runs are counted too.
pub fn flaky_generate_gate(
    mode: CoordinationMode,
    provider: Arc<StubProvider>,
    failures: usize,
) -> (PaymentGateBuilder, Arc<AtomicUsize>) {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let builder = PaymentGateBuilder::new(Providers::single(provider))
        .mode(mode)
        .free_tool(Tool::new("ping", "Liveness check"), |_args: Map<String, Value>| async {
            Ok::<_, ToolError>(json!("pong"))
        })
        .priced_tool(
            Tool::new("generate", "Generate an image"),
            ToolPriceSpec::price(Decimal::ONE, "USD").unwrap(),
            move |args: Map<String, Value>| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < failures {
                        return Err(ToolError::failed("renderer unavailable"));
                    }
                    let prompt = args.get("prompt").and_then(Value::as_str).unwrap_or_default();
                    Ok::<_, ToolError>(json!({"image": format!("{prompt}.png")}))
                }
            },
        )
        .unwrap();
    (builder, runs)
}

pub fn runs(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Answers elicitation requests from a script, then with `fallback`.
pub struct ScriptedElicitor {
    answers: Mutex<VecDeque<Result<ElicitationAction, TransportError>>>,
    fallback: ElicitationAction,
    pub requests: Mutex<Vec<ElicitationRequest>>,
}

impl ScriptedElicitor {
    pub fn always(action: ElicitationAction) -> Arc<Self> {
        Self::scripted(Vec::new(), action)
    }

    pub fn scripted(
        answers: Vec<Result<ElicitationAction, TransportError>>,
        fallback: ElicitationAction,
    ) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn attempts(&self) -> Vec<u32> {
        self.requests.lock().unwrap().iter().map(|r| r.attempt).collect()
    }
}

impl Elicitor for ScriptedElicitor {
    fn elicit(
        &self,
        request: ElicitationRequest,
    ) -> BoxFuture<'_, Result<ElicitationAction, TransportError>> {
        self.requests.lock().unwrap().push(request);
        let answer = self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(self.fallback));
        Box::pin(async move { answer })
    }
}

#[derive(Default)]
pub struct RecordingProgress {
    pub updates: Mutex<Vec<ProgressUpdate>>,
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, update: ProgressUpdate) -> BoxFuture<'_, ()> {
        self.updates.lock().unwrap().push(update);
        Box::pin(async {})
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<ToolListChanged>>,
}

impl RecordingNotifier {
    pub fn versions(&self) -> Vec<u64> {
        self.events.lock().unwrap().iter().map(|e| e.version).collect()
    }
}

impl ToolListNotifier for RecordingNotifier {
    fn tool_list_changed(&self, event: ToolListChanged) -> BoxFuture<'_, ()> {
        self.events.lock().unwrap().push(event);
        Box::pin(async {})
    }
}
