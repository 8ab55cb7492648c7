//! Capabilities the host transport lends to the engine.
//!
//! The engine never talks to the wire itself. Blocking modes ask the caller
//! through an [`Elicitor`] or keep them informed through a
//! [`ProgressReporter`]; DYNAMIC_TOOLS announces tool-list changes through a
//! [`ToolListNotifier`].

use mcpay::provider::BoxFuture;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A question put to the caller while a call is held for payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElicitationRequest {
    /// Text shown to the user.
    pub message: String,
    /// The payment being waited on.
    pub payment_id: String,
    /// Checkout URL, for URL-based providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    /// Structured payment request, for x402 providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_request: Option<Value>,
    /// Price of the call.
    pub amount: Decimal,
    /// Currency of [`Self::amount`].
    pub currency: String,
    /// One-based attempt number.
    pub attempt: u32,
}

/// How the caller answered an [`ElicitationRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElicitationAction {
    /// The user says they have paid.
    Accept,
    /// The user refused to pay.
    Decline,
    /// The user dismissed the question.
    Cancel,
}

/// Error raised by a host capability.
#[derive(Debug, thiserror::Error)]
#[error("Transport error: {0}")]
pub struct TransportError(pub String);

/// In-call request/response exchange with the caller.
pub trait Elicitor: Send + Sync {
    /// Asks the caller and waits for the answer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the question cannot be delivered or the
    /// caller disconnects.
    fn elicit(
        &self,
        request: ElicitationRequest,
    ) -> BoxFuture<'_, Result<ElicitationAction, TransportError>>;
}

/// A progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    /// Monotonically increasing progress counter.
    pub progress: u32,
    /// Known total, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
    /// Text shown to the user.
    pub message: String,
}

/// One-way progress notifications to the caller.
pub trait ProgressReporter: Send + Sync {
    /// Sends a notification. Delivery failures are the host's concern.
    fn report(&self, update: ProgressUpdate) -> BoxFuture<'_, ()>;
}

/// A change of the tools visible to one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolListChanged {
    /// The session whose view changed.
    pub session_id: String,
    /// Visibility version after the change.
    pub version: u64,
}

/// Emits `notifications/tools/list_changed` on the host transport.
pub trait ToolListNotifier: Send + Sync {
    /// Announces a change. Delivery failures are the host's concern.
    fn tool_list_changed(&self, event: ToolListChanged) -> BoxFuture<'_, ()>;
}
