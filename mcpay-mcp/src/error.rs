//! Errors of gated tool calls and their wire representation.
//!
//! [`ToolError`] is what a tool body returns. [`CallError`] is what a call
//! through the gate can end in: either a [`PaymentError`] raised by the
//! engine or the tool's own failure. At the host boundary both become a
//! [`CallToolResult`] with `isError` set and an [`ErrorEnvelope`] under
//! [`ERROR_KEY`](crate::ERROR_KEY).

use mcpay::error::PaymentError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::CallToolResult;

/// Failure reported by a tool body.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ToolError {
    /// The arguments do not fit the tool.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and failed.
    #[error("{0}")]
    Failed(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ToolError {
    /// Shorthand for [`ToolError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Everything a call through the gate can fail with.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CallError {
    /// The engine refused or could not complete the payment.
    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// The tool body failed. For paid calls the payment has been taken.
    #[error("Tool call failed: {0}")]
    Tool(#[from] ToolError),
}

impl CallError {
    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Payment(err) => err.code(),
            Self::Tool(_) => "tool_error",
        }
    }

    /// Returns the payment error, if this is one.
    #[must_use]
    pub const fn as_payment(&self) -> Option<&PaymentError> {
        match self {
            Self::Payment(err) => Some(err),
            Self::Tool(_) => None,
        }
    }

    /// Builds the structured envelope sent to the caller.
    #[must_use]
    pub fn envelope(&self) -> ErrorEnvelope {
        let (retryable, payment_id, data) = match self {
            Self::Payment(err) => (
                err.is_retryable(),
                err.payment_id().map(str::to_owned),
                payment_error_data(err),
            ),
            Self::Tool(_) => (false, None, None),
        };
        ErrorEnvelope {
            code: self.code().to_owned(),
            message: self.to_string(),
            retryable,
            payment_id,
            data,
        }
    }

    /// Converts the error into a host-facing tool result.
    ///
    /// A payment-required error whose prompt carries an x402 payment request
    /// also gets the x402 error envelope, so x402 clients can pay without
    /// knowing this engine.
    #[must_use]
    pub fn into_result(self) -> CallToolResult {
        let mut structured = serde_json::Map::new();
        if let Self::Payment(PaymentError::PaymentRequired(prompt)) = &self
            && let Some(request) = &prompt.payment_request
        {
            structured.insert(
                crate::X402_ERROR_KEY.to_owned(),
                serde_json::json!({"code": crate::PAYMENT_REQUIRED_CODE, "data": request}),
            );
        }
        let envelope = serde_json::to_value(self.envelope()).unwrap_or_default();
        structured.insert(crate::ERROR_KEY.to_owned(), envelope);
        CallToolResult::error(Value::Object(structured))
    }
}

fn payment_error_data(err: &PaymentError) -> Option<Value> {
    match err {
        PaymentError::PaymentRequired(prompt) => serde_json::to_value(prompt).ok(),
        PaymentError::SubscriptionRequired { accepted_plans, .. } => {
            Some(serde_json::json!({"acceptedPlans": accepted_plans}))
        }
        PaymentError::PaymentFailed { status, .. } => Some(serde_json::json!({"status": status})),
        _ => None,
    }
}

/// Structured error payload under [`ERROR_KEY`](crate::ERROR_KEY).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    /// Machine-readable code, e.g. `payment_required`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Whether the same request may be retried unchanged.
    pub retryable: bool,
    /// The payment attempt the error refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    /// Code-specific details, e.g. the payment prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[cfg(test)]
mod tests {
    use mcpay::error::ProviderError;
    use mcpay::provider::PaymentStatus;

    use super::*;

    #[test]
    fn provider_errors_are_retryable() {
        let err = CallError::from(PaymentError::Provider(ProviderError::Response(
            "502".into(),
        )));
        let envelope = err.envelope();
        assert_eq!(envelope.code, "provider_error");
        assert!(envelope.retryable);
        assert!(envelope.message.starts_with("Payment service unavailable"));
    }

    #[test]
    fn failed_payment_envelope() {
        let result = CallError::from(PaymentError::PaymentFailed {
            payment_id: "pay_1".into(),
            status: PaymentStatus::Cancelled,
        })
        .into_result();
        assert!(result.is_error);
        let envelope = &result.structured_content.unwrap()[crate::ERROR_KEY];
        assert_eq!(envelope["code"], "payment_failed");
        assert_eq!(envelope["paymentId"], "pay_1");
        assert_eq!(envelope["data"]["status"], "cancelled");
        assert_eq!(envelope["retryable"], false);
    }

    #[test]
    fn tool_errors_pass_through() {
        let result = CallError::from(ToolError::failed("model overloaded")).into_result();
        let text = result.first_text().unwrap();
        assert!(text.contains("model overloaded"));
        assert!(text.contains("tool_error"));
    }
}
