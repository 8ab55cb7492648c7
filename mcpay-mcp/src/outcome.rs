//! Non-error results of a call through the gate.

use mcpay::invocation::PaymentPrompt;
use serde_json::{Map, Value};

use crate::extract::attach_payment_id_to_meta;
use crate::types::{CallToolResult, ContentItem};
use crate::STATUS_META_KEY;

/// How a call through the gate ended, short of an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// The tool body ran.
    Completed {
        /// What the tool returned.
        result: Value,
        /// Extra `_meta` for the result, e.g. the x402 settlement response.
        meta: Option<Map<String, Value>>,
    },

    /// The payment was already finalized by an earlier call. The tool body
    /// did not run again.
    AlreadyProcessed {
        /// The finalized payment.
        payment_id: String,
        /// The stored result, if the first execution has finished.
        result: Option<Value>,
    },

    /// The call is held until the payment completes (TWO_STEP, DYNAMIC_TOOLS).
    PaymentPending(Box<PaymentPrompt>),
}

impl ToolOutcome {
    /// A completed call without extra metadata.
    #[must_use]
    pub const fn completed(result: Value) -> Self {
        Self::Completed { result, meta: None }
    }

    /// The tool's result, if the body ran in this or an earlier call.
    #[must_use]
    pub const fn result(&self) -> Option<&Value> {
        match self {
            Self::Completed { result, .. } => Some(result),
            Self::AlreadyProcessed { result, .. } => result.as_ref(),
            Self::PaymentPending(_) => None,
        }
    }

    /// Renders the outcome as a host-facing tool result.
    #[must_use]
    pub fn into_result(self) -> CallToolResult {
        match self {
            Self::Completed { result, meta } => {
                let mut rendered = CallToolResult::from_value(result);
                rendered.meta = meta;
                rendered
            }
            Self::AlreadyProcessed { payment_id, result } => {
                let mut rendered = result.map_or_else(
                    || {
                        CallToolResult::from_value(serde_json::json!({
                            "status": "already_processed",
                            "paymentId": payment_id,
                            "message": format!("Payment {payment_id} was already processed"),
                        }))
                    },
                    CallToolResult::from_value,
                );
                let mut meta = Map::new();
                meta.insert(STATUS_META_KEY.to_owned(), Value::from("already_processed"));
                attach_payment_id_to_meta(&mut meta, &payment_id);
                rendered.meta = Some(meta);
                rendered
            }
            Self::PaymentPending(prompt) => {
                let mut meta = Map::new();
                meta.insert(STATUS_META_KEY.to_owned(), Value::from("payment_pending"));
                attach_payment_id_to_meta(&mut meta, &prompt.payment_id);
                CallToolResult {
                    content: vec![ContentItem::text(prompt.message.clone())],
                    is_error: false,
                    meta: Some(meta),
                    structured_content: serde_json::to_value(&*prompt).ok(),
                }
            }
        }
    }
}
