//! The tool gate.
//!
//! A [`PaymentGate`] owns every tool the host serves: free tools, tools
//! priced per call, subscription-gated tools, and the confirmation and
//! subscription-management tools it synthesizes for them. The host routes
//! every `tools/list` and `tools/call` through it.
//!
//! # Flow
//!
//! 1. Look the tool up; unknown names fail with `UnknownTool`
//! 2. Free tools run immediately
//! 3. Gated tools require a [`CallerContext`]
//! 4. AUTO is resolved to a concrete mode, which is checked against what the
//!    host and providers offer
//! 5. The mode's state machine either runs the tool body or returns a
//!    payment-pending outcome or a payment error
//!
//! # Example
//!
//! ```rust,ignore
//! let gate = PaymentGate::builder(providers)
//!     .mode(CoordinationMode::Resubmit)
//!     .priced_tool(
//!         Tool::new("generate", "Generate an image"),
//!         ToolPriceSpec::price(Decimal::ONE, "USD")?,
//!         |args| async move { Ok(render(args).await?) },
//!     )?
//!     .build()?;
//!
//! let result = gate.call_tool(params, Some(&ctx)).await;
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mcpay::config::{ElicitationConfig, EngineConfig, ProgressConfig};
use mcpay::error::{ConfigError, PaymentError, StoreError};
use mcpay::mode::CoordinationMode;
use mcpay::price::{Price, ToolPriceSpec};
use mcpay::provider::BoxFuture;
use mcpay::registry::{ProviderRegistry, Providers};
use mcpay::store::{MemoryStore, StateStore};
use mcpay::timestamp::UnixTimestamp;
use serde_json::{Map, Value};
#[cfg(feature = "telemetry")]
use tracing::Instrument;

use crate::context::CallerContext;
use crate::error::{CallError, ToolError};
use crate::outcome::ToolOutcome;
use crate::resolver::{ensure_supported, resolve_mode};
use crate::store::open_store;
use crate::subscription::SubscriptionTool;
use crate::transport::{ToolListChanged, ToolListNotifier};
use crate::types::{CallToolParams, CallToolResult, Tool};
use crate::visibility::VisibilitySet;
use crate::{CONFIRM_PAYMENT_TOOL, PAYMENT_ID_ARGUMENT};

/// The body of a tool.
///
/// Implemented for every `Fn(Map<String, Value>) -> impl Future<Output =
/// Result<Value, ToolError>>`, so closures can be registered directly.
pub trait ToolHandler: Send + Sync {
    /// Runs the tool with its arguments.
    fn call(&self, arguments: Map<String, Value>) -> BoxFuture<'_, Result<Value, ToolError>>;
}

impl<F, Fut> ToolHandler for F
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    fn call(&self, arguments: Map<String, Value>) -> BoxFuture<'_, Result<Value, ToolError>> {
        Box::pin(self(arguments))
    }
}

/// Name of the TWO_STEP confirmation tool for `tool`.
#[must_use]
pub fn confirmation_tool_name(tool: &str) -> String {
    format!("confirm_{tool}_payment")
}

pub(crate) enum ToolKind {
    Free(Arc<dyn ToolHandler>),
    Priced {
        price: Price,
        handler: Arc<dyn ToolHandler>,
    },
    Subscribed {
        accepted_plans: Vec<String>,
        handler: Arc<dyn ToolHandler>,
    },
    /// `confirm_<tool>_payment`, bound to one priced tool.
    Confirm { target: String },
    /// The generic DYNAMIC_TOOLS confirmation tool.
    ConfirmAny,
    Subscriptions(SubscriptionTool),
}

pub(crate) struct Entry {
    pub(crate) tool: Tool,
    pub(crate) kind: ToolKind,
}

/// Tunables shared by the mode state machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSettings {
    /// Configured mode; AUTO is resolved per call.
    pub mode: CoordinationMode,
    /// How long a pending invocation stays confirmable.
    pub payment_ttl: Duration,
    /// PROGRESS polling schedule.
    pub progress: ProgressConfig,
    /// ELICITATION prompting.
    pub elicitation: ElicitationConfig,
}

impl Default for GateSettings {
    fn default() -> Self {
        let config = EngineConfig::default();
        Self::from(&config)
    }
}

impl From<&EngineConfig> for GateSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            mode: config.mode,
            payment_ttl: config.payment_ttl(),
            progress: config.progress,
            elicitation: config.elicitation,
        }
    }
}

/// Routes tool calls through payment coordination.
pub struct PaymentGate {
    pub(crate) entries: Vec<Entry>,
    pub(crate) index: HashMap<String, usize>,
    pub(crate) providers: Providers,
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) settings: GateSettings,
    pub(crate) visibility: VisibilitySet,
    pub(crate) notifier: Option<Arc<dyn ToolListNotifier>>,
}

impl fmt::Debug for PaymentGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentGate")
            .field(
                "tools",
                &self.entries.iter().map(|e| e.tool.name.as_str()).collect::<Vec<_>>(),
            )
            .field("providers", &self.providers)
            .field("settings", &self.settings)
            .field("visibility_version", &self.visibility.version())
            .finish_non_exhaustive()
    }
}

impl PaymentGate {
    /// Starts building a gate over `providers`.
    #[must_use]
    pub fn builder(providers: Providers) -> PaymentGateBuilder {
        PaymentGateBuilder::new(providers)
    }

    /// Configured coordination mode.
    #[must_use]
    pub const fn mode(&self) -> CoordinationMode {
        self.settings.mode
    }

    /// Tunables in effect.
    #[must_use]
    pub const fn settings(&self) -> &GateSettings {
        &self.settings
    }

    /// The pending-invocation store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// The resolved providers.
    #[must_use]
    pub const fn providers(&self) -> &Providers {
        &self.providers
    }

    /// Per-session tool visibility.
    #[must_use]
    pub const fn visibility(&self) -> &VisibilitySet {
        &self.visibility
    }

    /// Tools visible to `session`, in registration order.
    ///
    /// Under DYNAMIC_TOOLS a priced tool with a pending payment in the
    /// session is hidden and `confirm_payment` is listed instead.
    #[must_use]
    pub fn list_tools(&self, session: Option<&str>) -> Vec<Tool> {
        self.entries
            .iter()
            .filter(|entry| match (&entry.kind, session) {
                (ToolKind::ConfirmAny, Some(session)) => self.visibility.has_pending(session),
                (ToolKind::ConfirmAny, None) => false,
                (ToolKind::Priced { .. }, Some(session)) => {
                    !self.visibility.is_hidden(session, &entry.tool.name)
                }
                _ => true,
            })
            .map(|entry| entry.tool.clone())
            .collect()
    }

    /// Handles a tool call, reporting every failure as an error result.
    pub async fn call_tool(&self, params: CallToolParams, ctx: Option<&CallerContext>) -> CallToolResult {
        match self.try_call_tool(params, ctx).await {
            Ok(outcome) => outcome.into_result(),
            Err(err) => err.into_result(),
        }
    }

    /// Handles a tool call.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Payment`] when the call is refused or the payment
    /// fails, and [`CallError::Tool`] when the tool body fails.
    pub async fn try_call_tool(
        &self,
        params: CallToolParams,
        ctx: Option<&CallerContext>,
    ) -> Result<ToolOutcome, CallError> {
        #[cfg(feature = "telemetry")]
        let span = tracing::info_span!("mcpay.call_tool", tool = %params.name);
        let fut = self.dispatch(params, ctx);
        #[cfg(feature = "telemetry")]
        let fut = fut.instrument(span);
        let outcome = fut.await;

        #[cfg(feature = "telemetry")]
        if let Err(err) = &outcome {
            tracing::debug!(code = err.code(), error = %err, "tool call refused or failed");
        }

        outcome
    }

    /// Removes every expired pending invocation from the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    pub async fn purge_expired(&self) -> Result<usize, StoreError> {
        self.store.purge_expired(UnixTimestamp::now()).await
    }

    async fn dispatch(
        &self,
        params: CallToolParams,
        ctx: Option<&CallerContext>,
    ) -> Result<ToolOutcome, CallError> {
        let entry = self
            .index
            .get(&params.name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| PaymentError::UnknownTool(params.name.clone()))?;

        match &entry.kind {
            ToolKind::Free(handler) => Ok(ToolOutcome::completed(
                handler.call(params.arguments).await?,
            )),
            ToolKind::Priced { price, .. } => {
                let ctx = require_context(ctx, &params.name)?;
                let mode = resolve_mode(self.settings.mode, ctx, &self.providers);
                ensure_supported(mode, ctx, &self.providers)?;

                #[cfg(feature = "telemetry")]
                tracing::debug!(tool = %params.name, %mode, "dispatching priced call");

                match mode {
                    CoordinationMode::TwoStep | CoordinationMode::DynamicTools => {
                        self.split(price, mode, &params, ctx).await
                    }
                    CoordinationMode::Elicitation => self.elicit(price, &params, ctx).await,
                    CoordinationMode::Progress => self.poll(price, &params, ctx).await,
                    CoordinationMode::X402 => self.x402(price, &params, ctx).await,
                    CoordinationMode::Resubmit | CoordinationMode::Auto => {
                        self.resubmit(price, &params, ctx).await
                    }
                }
            }
            ToolKind::Subscribed {
                accepted_plans,
                handler,
            } => {
                let ctx = require_context(ctx, &params.name)?;
                self.call_subscribed(
                    &params.name,
                    accepted_plans,
                    handler.as_ref(),
                    params.arguments,
                    ctx,
                )
                .await
            }
            ToolKind::Confirm { target } => {
                self.confirm(
                    Some(target.as_str()),
                    None,
                    None,
                    &params.arguments,
                    params.meta.as_ref(),
                )
                .await
            }
            ToolKind::ConfirmAny => {
                // Only the session the tool was hidden from may confirm it.
                let session = require_context(ctx, &params.name)?
                    .session_id()
                    .ok_or_else(|| PaymentError::MissingContext {
                        tool: params.name.clone(),
                    })?;
                self.confirm(
                    None,
                    None,
                    Some(session),
                    &params.arguments,
                    params.meta.as_ref(),
                )
                .await
            }
            ToolKind::Subscriptions(op) => {
                let ctx = require_context(ctx, &params.name)?;
                self.manage_subscriptions(*op, &params.arguments, ctx).await
            }
        }
    }

    /// Returns the body of a priced tool.
    pub(crate) fn handler_for(&self, tool: &str) -> Result<Arc<dyn ToolHandler>, PaymentError> {
        match self.index.get(tool).map(|&i| &self.entries[i].kind) {
            Some(ToolKind::Priced { handler, .. }) => Ok(Arc::clone(handler)),
            _ => Err(PaymentError::UnknownTool(tool.to_owned())),
        }
    }

    /// Every plan accepted by some subscription-gated tool, deduplicated.
    pub(crate) fn accepted_plans(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter_map(|entry| match &entry.kind {
                ToolKind::Subscribed { accepted_plans, .. } => Some(accepted_plans),
                _ => None,
            })
            .flatten()
            .filter(|plan| seen.insert(plan.as_str()))
            .cloned()
            .collect()
    }

    pub(crate) async fn notify(&self, event: ToolListChanged) {
        #[cfg(feature = "telemetry")]
        tracing::debug!(session = %event.session_id, version = event.version, "tool list changed");

        if let Some(notifier) = &self.notifier {
            notifier.tool_list_changed(event).await;
        }
    }
}

fn require_context<'a>(
    ctx: Option<&'a CallerContext>,
    tool: &str,
) -> Result<&'a CallerContext, PaymentError> {
    ctx.ok_or_else(|| PaymentError::MissingContext {
        tool: tool.to_owned(),
    })
}

/// Builder for [`PaymentGate`].
pub struct PaymentGateBuilder {
    providers: Providers,
    store: Option<Arc<dyn StateStore>>,
    settings: GateSettings,
    notifier: Option<Arc<dyn ToolListNotifier>>,
    entries: Vec<Entry>,
}

impl fmt::Debug for PaymentGateBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentGateBuilder")
            .field("providers", &self.providers)
            .field("settings", &self.settings)
            .field("tools", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl PaymentGateBuilder {
    /// Starts with default settings and an in-memory store.
    #[must_use]
    pub fn new(providers: Providers) -> Self {
        Self {
            providers,
            store: None,
            settings: GateSettings::default(),
            notifier: None,
            entries: Vec::new(),
        }
    }

    /// Resolves providers through `registry`, opens the configured store and
    /// applies the configured settings.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Config`] if providers cannot be resolved and
    /// [`PaymentError::Store`] if the store cannot be opened.
    pub fn from_config(config: &EngineConfig, registry: &ProviderRegistry) -> Result<Self, PaymentError> {
        let providers = config.resolve_providers(registry)?;
        let store = open_store(&config.store)?;

        #[cfg(feature = "telemetry")]
        tracing::info!(
            mode = %config.mode,
            providers = ?providers,
            store = ?config.store,
            "payment gate configured"
        );

        Ok(Self::new(providers).store(store).settings(GateSettings::from(config)))
    }

    /// Replaces every tunable at once.
    #[must_use]
    pub const fn settings(mut self, settings: GateSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the coordination mode.
    #[must_use]
    pub const fn mode(mut self, mode: CoordinationMode) -> Self {
        self.settings.mode = mode;
        self
    }

    /// Sets how long pending invocations stay confirmable.
    #[must_use]
    pub const fn payment_ttl(mut self, ttl: Duration) -> Self {
        self.settings.payment_ttl = ttl;
        self
    }

    /// Sets the PROGRESS polling schedule.
    #[must_use]
    pub const fn progress(mut self, progress: ProgressConfig) -> Self {
        self.settings.progress = progress;
        self
    }

    /// Sets ELICITATION prompting.
    #[must_use]
    pub const fn elicitation(mut self, elicitation: ElicitationConfig) -> Self {
        self.settings.elicitation = elicitation;
        self
    }

    /// Uses `store` for pending invocations.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Announces tool-list changes through `notifier`.
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn ToolListNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Registers a tool anyone may call.
    #[must_use]
    pub fn free_tool(mut self, tool: Tool, handler: impl ToolHandler + 'static) -> Self {
        self.entries.push(Entry {
            tool,
            kind: ToolKind::Free(Arc::new(handler)),
        });
        self
    }

    /// Registers a tool priced per call or gated by subscription.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::InvalidPriceSpec`] if the amount is not
    /// positive, the currency is empty, or the plan list is empty.
    pub fn priced_tool(
        mut self,
        tool: Tool,
        spec: ToolPriceSpec,
        handler: impl ToolHandler + 'static,
    ) -> Result<Self, PaymentError> {
        spec.validate()
            .map_err(|reason| PaymentError::InvalidPriceSpec {
                tool: tool.name.clone(),
                reason,
            })?;
        let handler: Arc<dyn ToolHandler> = Arc::new(handler);
        let kind = match spec {
            ToolPriceSpec::Price(price) => ToolKind::Priced { price, handler },
            ToolPriceSpec::Subscription { accepted_plans } => ToolKind::Subscribed {
                accepted_plans,
                handler,
            },
        };
        self.entries.push(Entry { tool, kind });
        Ok(self)
    }

    /// Finishes the gate, adding the confirmation and subscription tools the
    /// registered tools need.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Config`] if two tools share a name, or a
    /// subscription-gated tool exists without a subscription-capable provider.
    pub fn build(self) -> Result<PaymentGate, PaymentError> {
        let Self {
            providers,
            store,
            settings,
            notifier,
            mut entries,
        } = self;

        let mut synthesized = Vec::new();
        for entry in &mut entries {
            if !matches!(entry.kind, ToolKind::Priced { .. }) {
                continue;
            }
            match settings.mode {
                CoordinationMode::TwoStep => synthesized.push(confirm_tool_entry(&entry.tool.name)),
                CoordinationMode::DynamicTools => {}
                _ => {
                    entry.tool.input_schema = with_payment_id_property(entry.tool.input_schema.take());
                }
            }
        }
        if settings.mode == CoordinationMode::DynamicTools {
            synthesized.push(Entry {
                tool: Tool::new(
                    CONFIRM_PAYMENT_TOOL,
                    "Confirm a pending payment and run the tool it was made for.",
                )
                .with_input_schema(payment_id_schema()),
                kind: ToolKind::ConfirmAny,
            });
        }
        if entries
            .iter()
            .any(|e| matches!(e.kind, ToolKind::Subscribed { .. }))
        {
            if providers.subscription_capable().is_none() {
                return Err(ConfigError::Invalid(
                    "subscription-gated tools need a provider with subscription support".to_owned(),
                )
                .into());
            }
            synthesized.extend(SubscriptionTool::ALL.into_iter().map(|op| Entry {
                tool: op.descriptor(),
                kind: ToolKind::Subscriptions(op),
            }));
        }
        entries.extend(synthesized);

        let mut index = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if index.insert(entry.tool.name.clone(), i).is_some() {
                return Err(ConfigError::Invalid(format!(
                    "tool '{}' is registered more than once",
                    entry.tool.name
                ))
                .into());
            }
        }

        let store = store.unwrap_or_else(|| Arc::new(MemoryStore::new()));

        #[cfg(feature = "telemetry")]
        tracing::debug!(tools = entries.len(), mode = %settings.mode, "payment gate built");

        Ok(PaymentGate {
            entries,
            index,
            providers,
            store,
            settings,
            visibility: VisibilitySet::new(),
            notifier,
        })
    }
}

fn confirm_tool_entry(target: &str) -> Entry {
    Entry {
        tool: Tool::new(
            confirmation_tool_name(target),
            format!("Confirm payment for {target} and run it."),
        )
        .with_input_schema(payment_id_schema()),
        kind: ToolKind::Confirm {
            target: target.to_owned(),
        },
    }
}

fn payment_id_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            PAYMENT_ID_ARGUMENT: {"type": "string", "description": "Payment id from the payment prompt."}
        },
        "required": [PAYMENT_ID_ARGUMENT]
    })
}

/// Advertises the optional `payment_id` argument used to resubmit a call.
fn with_payment_id_property(mut schema: Value) -> Value {
    if let Some(properties) = schema
        .as_object_mut()
        .map(|obj| obj.entry("properties").or_insert_with(|| Value::Object(Map::new())))
        .and_then(Value::as_object_mut)
    {
        properties.entry(PAYMENT_ID_ARGUMENT).or_insert_with(|| {
            serde_json::json!({
                "type": "string",
                "description": "Payment id, when calling again after paying."
            })
        });
    }
    schema
}
