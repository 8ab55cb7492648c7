//! Helpers for reading and writing payment data in MCP `_meta` fields and
//! tool results.
//!
//! These work on [`serde_json::Map`]s, so hosts and clients can use them with
//! any MCP SDK.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use mcpay::invocation::PaymentPrompt;
use mcpay::provider::SettlementOutcome;
use serde_json::{Map, Value};

use crate::error::ErrorEnvelope;
use crate::types::{CallToolResult, ContentItem};
use crate::{
    ERROR_KEY, HEADERS_META_KEY, PAYMENT_ID_ARGUMENT, PAYMENT_ID_META_KEY, PAYMENT_META_KEY,
    PAYMENT_RESPONSE_META_KEY, PAYMENT_SIGNATURE_HEADER, X402_ERROR_KEY,
};

/// Alternative spelling of [`PAYMENT_ID_ARGUMENT`] accepted from callers.
const PAYMENT_ID_ARGUMENT_CAMEL: &str = "paymentId";

/// Finds the payment id a caller supplied, either as a tool argument or in
/// `_meta`. The argument wins if both are present.
///
/// # Examples
///
/// ```
/// use mcpay_mcp::extract::extract_payment_id;
///
/// let args = serde_json::json!({"prompt": "a dog", "payment_id": "pay_1"});
/// assert_eq!(
///     extract_payment_id(args.as_object().unwrap(), None).as_deref(),
///     Some("pay_1")
/// );
/// ```
#[must_use]
pub fn extract_payment_id(
    arguments: &Map<String, Value>,
    meta: Option<&Map<String, Value>>,
) -> Option<String> {
    [PAYMENT_ID_ARGUMENT, PAYMENT_ID_ARGUMENT_CAMEL]
        .iter()
        .find_map(|key| arguments.get(*key))
        .or_else(|| meta?.get(PAYMENT_ID_META_KEY))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
}

/// Returns the arguments without the payment id, i.e. the arguments the
/// original call was made with.
#[must_use]
pub fn strip_payment_arguments(arguments: &Map<String, Value>) -> Map<String, Value> {
    arguments
        .iter()
        .filter(|(key, _)| *key != PAYMENT_ID_ARGUMENT && *key != PAYMENT_ID_ARGUMENT_CAMEL)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Sets the payment id in `_meta`.
pub fn attach_payment_id_to_meta(meta: &mut Map<String, Value>, payment_id: &str) {
    meta.insert(PAYMENT_ID_META_KEY.to_owned(), Value::from(payment_id));
}

/// Extracts an x402 payment payload from `_meta["x402/payment"]`.
///
/// Returns `None` if no payment is present or it lacks `x402Version` or
/// `payload`.
///
/// ```
/// use mcpay_mcp::extract::extract_payment_from_meta;
///
/// let meta = serde_json::Map::new();
/// assert!(extract_payment_from_meta(&meta).is_none());
/// ```
#[must_use]
pub fn extract_payment_from_meta(meta: &Map<String, Value>) -> Option<Value> {
    let payment = meta.get(PAYMENT_META_KEY)?;
    is_payment_payload(payment).then(|| payment.clone())
}

/// Extracts an x402 payment payload from a base64 `Payment-Signature` entry
/// under `_meta["headers"]`. The header name is matched case-insensitively.
#[must_use]
pub fn extract_payment_signature(meta: &Map<String, Value>) -> Option<Value> {
    let headers = meta.get(HEADERS_META_KEY)?.as_object()?;
    let encoded = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(PAYMENT_SIGNATURE_HEADER))?
        .1
        .as_str()?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let payment: Value = serde_json::from_slice(&decoded).ok()?;
    is_payment_payload(&payment).then_some(payment)
}

/// Extracts an x402 payment from either designated field, preferring
/// `_meta["x402/payment"]`.
#[must_use]
pub fn extract_x402_payment(meta: &Map<String, Value>) -> Option<Value> {
    extract_payment_from_meta(meta).or_else(|| extract_payment_signature(meta))
}

/// Reads the payment id an x402 payment was signed for, from
/// `accepted.extra.paymentId`.
#[must_use]
pub fn payment_id_of_x402_payment(payment: &Value) -> Option<String> {
    payment
        .pointer("/accepted/extra/paymentId")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Attaches an x402 payment payload to `_meta`.
pub fn attach_payment_to_meta(meta: &mut Map<String, Value>, payment: Value) {
    meta.insert(PAYMENT_META_KEY.to_owned(), payment);
}

/// Attaches an x402 settlement response to a result's `_meta`.
///
/// Only [`SettlementOutcome::Settled`] is attached; a rejection never reaches
/// a successful result.
pub fn attach_payment_response_to_meta(meta: &mut Map<String, Value>, outcome: &SettlementOutcome) {
    if let SettlementOutcome::Settled {
        transaction,
        network,
        payer,
    } = outcome
    {
        let mut response = serde_json::json!({
            "success": true,
            "transaction": transaction,
            "network": network,
        });
        if let Some(payer) = payer {
            response["payer"] = Value::from(payer.as_str());
        }
        meta.insert(PAYMENT_RESPONSE_META_KEY.to_owned(), response);
    }
}

/// Extracts the x402 settlement response from a result's `_meta`.
#[must_use]
pub fn extract_payment_response_from_meta(meta: &Map<String, Value>) -> Option<Value> {
    meta.get(PAYMENT_RESPONSE_META_KEY).cloned()
}

/// Extracts the [`ErrorEnvelope`] from an error result.
#[must_use]
pub fn extract_error_from_result(result: &CallToolResult) -> Option<ErrorEnvelope> {
    if !result.is_error {
        return None;
    }
    let envelope = result.structured_content.as_ref()?.get(ERROR_KEY)?;
    serde_json::from_value(envelope.clone()).ok()
}

/// Extracts the payment prompt from a result.
///
/// Works for both shapes the engine produces: the structured content of a
/// payment-pending result, and the data of a `payment_required` error.
#[must_use]
pub fn extract_payment_prompt_from_result(result: &CallToolResult) -> Option<PaymentPrompt> {
    if result.is_error {
        let envelope = extract_error_from_result(result)?;
        if envelope.code != "payment_required" {
            return None;
        }
        return serde_json::from_value(envelope.data?).ok();
    }
    serde_json::from_value(result.structured_content.clone()?).ok()
}

/// Extracts an x402 `PaymentRequired` body from an error result.
///
/// Checks the `x402/error` envelope in `structuredContent` first, then falls
/// back to parsing each text item as JSON.
#[must_use]
pub fn extract_payment_required_from_result(result: &CallToolResult) -> Option<Value> {
    if !result.is_error {
        return None;
    }

    if let Some(sc) = &result.structured_content
        && let Some(required) = payment_required_in(sc)
    {
        return Some(required);
    }

    result
        .content
        .iter()
        .filter_map(ContentItem::as_text)
        .filter_map(|text| serde_json::from_str::<Value>(text).ok())
        .find_map(|value| payment_required_in(&value))
}

fn payment_required_in(value: &Value) -> Option<Value> {
    let candidate = value
        .get(X402_ERROR_KEY)
        .and_then(|envelope| envelope.get("data"))
        .unwrap_or(value);
    is_payment_required(candidate).then(|| candidate.clone())
}

fn is_payment_required(value: &Value) -> bool {
    let version = value.get("x402Version").and_then(Value::as_u64);
    let accepts = value.get("accepts").and_then(Value::as_array);
    matches!((version, accepts), (Some(v), Some(a)) if v >= 1 && !a.is_empty())
}

fn is_payment_payload(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    let version = obj.get("x402Version").and_then(Value::as_u64);
    matches!(version, Some(v) if v >= 1) && obj.contains_key("payload")
}
