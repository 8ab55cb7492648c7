//! Subscription-gated tools and the tools that manage subscriptions.
//!
//! When any registered tool is gated by subscription, the gate also serves
//! `list_subscriptions`, `start_subscription` and `cancel_subscription` for
//! the authenticated user.

use mcpay::error::{ConfigError, PaymentError};
use mcpay::provider::SubscriptionProvider;
use serde_json::{Map, Value, json};

use crate::context::CallerContext;
use crate::error::{CallError, ToolError};
use crate::gate::{PaymentGate, ToolHandler};
use crate::outcome::ToolOutcome;
use crate::types::Tool;

/// A subscription-management tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionTool {
    /// `list_subscriptions`
    List,
    /// `start_subscription`
    Start,
    /// `cancel_subscription`
    Cancel,
}

impl SubscriptionTool {
    /// Every management tool, in listing order.
    pub const ALL: [Self; 3] = [Self::List, Self::Start, Self::Cancel];

    /// Tool name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::List => "list_subscriptions",
            Self::Start => "start_subscription",
            Self::Cancel => "cancel_subscription",
        }
    }

    /// Tool descriptor advertised in `tools/list`.
    #[must_use]
    pub fn descriptor(self) -> Tool {
        match self {
            Self::List => Tool::new(
                self.name(),
                "List your subscriptions and the plans that unlock gated tools.",
            ),
            Self::Start => Tool::new(self.name(), "Start a subscription to a plan.")
                .with_input_schema(json!({
                    "type": "object",
                    "properties": {"plan_id": {"type": "string"}},
                    "required": ["plan_id"]
                })),
            Self::Cancel => Tool::new(self.name(), "Cancel one of your subscriptions.")
                .with_input_schema(json!({
                    "type": "object",
                    "properties": {"subscription_id": {"type": "string"}},
                    "required": ["subscription_id"]
                })),
        }
    }
}

fn required_str<'a>(arguments: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("'{key}' is required")))
}

impl PaymentGate {
    fn subscription_provider(&self) -> Result<&dyn SubscriptionProvider, PaymentError> {
        self.providers
            .subscription_capable()
            .and_then(|provider| provider.subscriptions())
            .ok_or_else(|| {
                ConfigError::Invalid("no provider with subscription support is configured".to_owned())
                    .into()
            })
    }

    /// Runs a subscription-gated tool if the caller holds an active
    /// subscription to one of `accepted_plans`.
    pub(crate) async fn call_subscribed(
        &self,
        tool: &str,
        accepted_plans: &[String],
        handler: &dyn ToolHandler,
        arguments: Map<String, Value>,
        ctx: &CallerContext,
    ) -> Result<ToolOutcome, CallError> {
        let required = || PaymentError::SubscriptionRequired {
            tool: tool.to_owned(),
            accepted_plans: accepted_plans.to_vec(),
        };
        let Some(user_id) = ctx.identity.user_id.as_deref() else {
            return Err(required().into());
        };

        let subscriptions = self
            .subscription_provider()?
            .get_subscriptions(user_id)
            .await
            .map_err(PaymentError::from)?;
        let entitled = subscriptions.iter().any(|subscription| {
            subscription.status.grants_access()
                && accepted_plans.iter().any(|plan| *plan == subscription.plan_id)
        });
        if !entitled {
            #[cfg(feature = "telemetry")]
            tracing::debug!(tool, user_id, "no active subscription to an accepted plan");

            return Err(required().into());
        }

        Ok(ToolOutcome::completed(handler.call(arguments).await?))
    }

    pub(crate) async fn manage_subscriptions(
        &self,
        op: SubscriptionTool,
        arguments: &Map<String, Value>,
        ctx: &CallerContext,
    ) -> Result<ToolOutcome, CallError> {
        let user_id = ctx
            .identity
            .user_id
            .as_deref()
            .ok_or_else(|| PaymentError::MissingContext {
                tool: op.name().to_owned(),
            })?;
        let provider = self.subscription_provider()?;

        let result = match op {
            SubscriptionTool::List => {
                let subscriptions = provider
                    .get_subscriptions(user_id)
                    .await
                    .map_err(PaymentError::from)?;
                json!({
                    "subscriptions": subscriptions,
                    "acceptedPlans": self.accepted_plans(),
                })
            }
            SubscriptionTool::Start => {
                let plan_id = required_str(arguments, "plan_id")?;
                if !self.accepted_plans().iter().any(|plan| plan == plan_id) {
                    return Err(ToolError::InvalidArguments(format!(
                        "plan '{plan_id}' does not unlock any tool"
                    ))
                    .into());
                }
                let checkout = provider
                    .start_subscription(plan_id, user_id)
                    .await
                    .map_err(PaymentError::from)?;

                #[cfg(feature = "telemetry")]
                tracing::info!(plan_id, user_id, "subscription checkout started");

                serde_json::to_value(checkout).map_err(ToolError::from)?
            }
            SubscriptionTool::Cancel => {
                let subscription_id = required_str(arguments, "subscription_id")?;
                let subscription = provider
                    .cancel_subscription(subscription_id, user_id)
                    .await
                    .map_err(PaymentError::from)?;

                #[cfg(feature = "telemetry")]
                tracing::info!(subscription_id, user_id, "subscription cancelled");

                serde_json::to_value(subscription).map_err(ToolError::from)?
            }
        };
        Ok(ToolOutcome::completed(result))
    }
}
