//! Pending invocations: tool calls suspended until payment completes.

use std::fmt;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::mode::CoordinationMode;
use crate::price::Price;
use crate::provider::{PaymentLink, PaymentStatus};
use crate::timestamp::UnixTimestamp;

/// Engine-local status of a pending invocation.
///
/// `Pending`, `Settling`, `Paid` and `Executing` are live. Every other status
/// is terminal and a store will refuse to move a record out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    /// Waiting for payment.
    Pending,
    /// One caller holds the record while it settles an x402 payload.
    Settling,
    /// Paid, but the tool body has not produced a result. The next
    /// confirmation runs it without charging again.
    Paid,
    /// One caller is running the tool body.
    Executing,
    /// Paid and executed; the result is stored.
    Confirmed,
    /// The provider reported failure, or verification failed.
    Failed,
    /// The payer or the provider cancelled.
    Cancelled,
    /// The wait ended without payment.
    Expired,
}

impl InvocationStatus {
    /// Returns `true` once nothing more can happen to the invocation.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Confirmed | Self::Failed | Self::Cancelled | Self::Expired
        )
    }

    /// Returns the wire name of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Settling => "settling",
            Self::Paid => "paid",
            Self::Executing => "executing",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Parses a wire name produced by [`Self::as_str`].
    #[must_use]
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "settling" => Some(Self::Settling),
            "paid" => Some(Self::Paid),
            "executing" => Some(Self::Executing),
            "confirmed" => Some(Self::Confirmed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<PaymentStatus> for InvocationStatus {
    fn from(status: PaymentStatus) -> Self {
        match status {
            PaymentStatus::Paid => Self::Paid,
            PaymentStatus::Pending => Self::Pending,
            PaymentStatus::Failed => Self::Failed,
            PaymentStatus::Cancelled => Self::Cancelled,
        }
    }
}

/// Who made the call. Used for audit and to scope per-session tool visibility.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerIdentity {
    /// Transport session the call arrived on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Authenticated user, if the host knows one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// One suspended tool call awaiting payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingInvocation {
    /// Provider-issued or engine-generated payment identifier.
    pub payment_id: String,
    /// The gated tool.
    pub tool_name: String,
    /// The original call's arguments, captured verbatim.
    pub arguments: Map<String, Value>,
    /// Digest of the canonicalised arguments, see [`fingerprint`].
    pub fingerprint: String,
    /// Price charged.
    pub amount: Decimal,
    /// Currency code of [`Self::amount`].
    pub currency: String,
    /// Mode in effect for this invocation.
    pub mode: CoordinationMode,
    /// Who made the call.
    pub caller: CallerIdentity,
    /// How the payer was asked to pay.
    pub payment_link: PaymentLink,
    /// When the invocation was suspended.
    pub created_at: UnixTimestamp,
    /// When it stops being eligible for confirmation.
    pub expires_at: UnixTimestamp,
    /// Engine-local status.
    pub status: InvocationStatus,
    /// Stored tool result once finalised, replayed to duplicate confirmations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl PendingInvocation {
    /// Creates a fresh `pending` record stamped with the current time.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        payment_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Map<String, Value>,
        price: &Price,
        mode: CoordinationMode,
        caller: CallerIdentity,
        payment_link: PaymentLink,
        ttl: Duration,
    ) -> Self {
        let created_at = UnixTimestamp::now();
        Self {
            payment_id: payment_id.into(),
            tool_name: tool_name.into(),
            fingerprint: fingerprint(&arguments),
            arguments,
            amount: price.amount,
            currency: price.currency.clone(),
            mode,
            caller,
            payment_link,
            created_at,
            expires_at: created_at + ttl,
            status: InvocationStatus::Pending,
            result: None,
        }
    }

    /// Returns `true` if the record is past its expiry at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: UnixTimestamp) -> bool {
        self.expires_at.has_passed(now)
    }

    /// Returns `true` if `arguments` fingerprint to the same digest as the
    /// arguments captured in this record.
    #[must_use]
    pub fn matches_arguments(&self, arguments: &Map<String, Value>) -> bool {
        fingerprint(arguments) == self.fingerprint
    }

    /// Returns a copy with a different status.
    #[must_use]
    pub fn with_status(mut self, status: InvocationStatus) -> Self {
        self.status = status;
        self
    }
}

/// Computes the fingerprint of a call's arguments.
///
/// Object keys are sorted recursively before hashing, so argument order never
/// changes the digest. The digest is a lowercase hex SHA-256.
#[must_use]
pub fn fingerprint(arguments: &Map<String, Value>) -> String {
    let canonical = canonicalize(&Value::Object(arguments.clone()));
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// What a caller is told when a call is held for payment.
///
/// Serialized into the structured content of TWO_STEP / DYNAMIC_TOOLS pending
/// results and into RESUBMIT / X402 payment-required errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPrompt {
    /// Human-readable instruction.
    pub message: String,
    /// The payment id to present on confirmation or resubmission.
    pub payment_id: String,
    /// Checkout URL, for URL-based providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    /// Structured payment request, for x402 providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_request: Option<Value>,
    /// Name of the tool to call next, for split modes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
    /// Price of the call.
    pub amount: Decimal,
    /// Currency of [`Self::amount`].
    pub currency: String,
    /// Provider-side status at the time the prompt was produced.
    pub status: PaymentStatus,
}

impl PaymentPrompt {
    /// Builds a prompt for a pending invocation.
    #[must_use]
    pub fn for_invocation(record: &PendingInvocation, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            payment_id: record.payment_id.clone(),
            payment_url: record.payment_link.as_url().map(str::to_owned),
            payment_request: record.payment_link.as_request().cloned(),
            next_step: None,
            amount: record.amount,
            currency: record.currency.clone(),
            status: PaymentStatus::Pending,
        }
    }

    /// Sets the next tool to call.
    #[must_use]
    pub fn with_next_step(mut self, next_step: impl Into<String>) -> Self {
        self.next_step = Some(next_step.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn fingerprint_ignores_key_order() {
        let a = args(json!({"prompt": "a dog", "size": {"w": 1, "h": 2}}));
        let b = args(json!({"size": {"h": 2, "w": 1}, "prompt": "a dog"}));
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_detects_drift() {
        let a = args(json!({"prompt": "a dog"}));
        let b = args(json!({"prompt": "a cat"}));
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn new_record_is_pending_and_expires_after_ttl() {
        let price = Price::new(Decimal::ONE, "USD").unwrap();
        let record = PendingInvocation::new(
            "pay_1",
            "generate",
            args(json!({"prompt": "a dog"})),
            &price,
            CoordinationMode::Resubmit,
            CallerIdentity::default(),
            PaymentLink::Url("https://pay.example/1".into()),
            Duration::from_secs(60),
        );
        assert_eq!(record.status, InvocationStatus::Pending);
        assert_eq!(record.expires_at.as_secs(), record.created_at.as_secs() + 60);
        assert!(record.matches_arguments(&args(json!({"prompt": "a dog"}))));
        assert!(!record.is_expired_at(record.created_at));
        assert!(record.is_expired_at(record.expires_at));
    }

    #[test]
    fn status_wire_names_round_trip() {
        for status in [
            InvocationStatus::Pending,
            InvocationStatus::Settling,
            InvocationStatus::Paid,
            InvocationStatus::Executing,
            InvocationStatus::Confirmed,
            InvocationStatus::Failed,
            InvocationStatus::Cancelled,
            InvocationStatus::Expired,
        ] {
            assert_eq!(InvocationStatus::from_wire(status.as_str()), Some(status));
        }
    }

    #[test]
    fn paid_but_unexecuted_records_stay_live() {
        assert!(!InvocationStatus::Paid.is_terminal());
        assert!(!InvocationStatus::Settling.is_terminal());
        assert!(!InvocationStatus::Executing.is_terminal());
        assert!(InvocationStatus::Confirmed.is_terminal());
        assert_eq!(InvocationStatus::from(PaymentStatus::Paid), InvocationStatus::Paid);
    }
}
