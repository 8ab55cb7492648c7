//! The uniform interface every payment backend implements.
//!
//! A [`PaymentProvider`] creates charges and reports their status. Two
//! optional extensions sit on top of it:
//!
//! - [`SubscriptionProvider`] for subscription-gated tools
//! - [`X402Facilitation`] for providers that settle signed x402 payloads
//!
//! Providers expose the extensions through [`PaymentProvider::subscriptions`]
//! and [`PaymentProvider::x402`], so callers never need to downcast.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::timestamp::UnixTimestamp;

/// A boxed, pinned, `Send` future, used by the dyn-compatible traits of this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Provider-side status of a payment.
///
/// Distinct from the engine-local
/// [`InvocationStatus`](crate::invocation::InvocationStatus).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// The payment has been captured.
    Paid,
    /// The payer has not completed the payment yet.
    Pending,
    /// The payment failed.
    Failed,
    /// The payment was cancelled by the payer or the provider.
    Cancelled,
}

impl PaymentStatus {
    /// Returns `true` once the status can no longer change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Returns the wire name of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::Pending => "pending",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the payer is asked to pay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PaymentLink {
    /// A checkout URL the payer opens.
    Url(String),
    /// A structured payment request, e.g. an x402 `PaymentRequired` body.
    Request(serde_json::Value),
}

impl PaymentLink {
    /// Returns the URL, if this link is one.
    #[must_use]
    pub fn as_url(&self) -> Option<&str> {
        match self {
            Self::Url(url) => Some(url),
            Self::Request(_) => None,
        }
    }

    /// Returns the structured request, if this link is one.
    #[must_use]
    pub const fn as_request(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Url(_) => None,
            Self::Request(request) => Some(request),
        }
    }
}

/// Result of [`PaymentProvider::create_payment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPayment {
    /// Provider-issued payment identifier.
    pub payment_id: String,
    /// Where or how the payer pays.
    pub link: PaymentLink,
}

/// Extensions a provider offers beyond create/status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderCapabilities {
    /// Implements [`SubscriptionProvider`].
    pub subscriptions: bool,
    /// Implements [`X402Facilitation`].
    pub x402: bool,
}

/// A payment backend.
///
/// `create_payment` is called at most once per logical attempt; retries are
/// deduplicated by the engine through the state store, not by the provider.
/// `get_payment_status` must be a side-effect-free read.
pub trait PaymentProvider: Send + Sync {
    /// Short name used in logs and error payloads (e.g. `"stripe"`).
    fn name(&self) -> &str;

    /// Initiates a charge.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the amount or currency is rejected or the
    /// provider cannot be reached.
    fn create_payment<'a>(
        &'a self,
        amount: Decimal,
        currency: &'a str,
        description: &'a str,
    ) -> BoxFuture<'a, Result<CreatedPayment, ProviderError>>;

    /// Reads the current status of a payment.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the provider cannot be reached or does not
    /// know the payment.
    fn get_payment_status<'a>(
        &'a self,
        payment_id: &'a str,
    ) -> BoxFuture<'a, Result<PaymentStatus, ProviderError>>;

    /// Returns the subscription extension, if implemented.
    fn subscriptions(&self) -> Option<&dyn SubscriptionProvider> {
        None
    }

    /// Returns the x402 settlement extension, if implemented.
    fn x402(&self) -> Option<&dyn X402Facilitation> {
        None
    }

    /// Summarises which extensions are present.
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            subscriptions: self.subscriptions().is_some(),
            x402: self.x402().is_some(),
        }
    }
}

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Billing is current.
    Active,
    /// In a free trial.
    Trialing,
    /// Payment is overdue.
    PastDue,
    /// Cancelled but still usable until the period ends.
    CancelPending,
    /// Cancelled and no longer usable.
    Cancelled,
    /// Checkout was started but never completed.
    Incomplete,
}

impl SubscriptionStatus {
    /// Returns `true` if the subscription currently unlocks gated tools.
    #[must_use]
    pub const fn grants_access(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing | Self::CancelPending)
    }
}

/// A user's subscription as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Provider-issued subscription identifier.
    pub id: String,
    /// The plan subscribed to.
    pub plan_id: String,
    /// Current lifecycle state.
    pub status: SubscriptionStatus,
    /// End of the current billing period, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_period_end: Option<UnixTimestamp>,
}

/// Result of [`SubscriptionProvider::start_subscription`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionCheckout {
    /// Subscription id, if the provider creates it before checkout completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    /// Where the user completes the subscription.
    pub checkout_url: String,
}

/// Subscription management for subscription-gated tools.
pub trait SubscriptionProvider: Send + Sync {
    /// Lists the user's subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the provider cannot be reached.
    fn get_subscriptions<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Subscription>, ProviderError>>;

    /// Starts a subscription to `plan_id` for the user.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the plan is unknown or the provider cannot be reached.
    fn start_subscription<'a>(
        &'a self,
        plan_id: &'a str,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<SubscriptionCheckout, ProviderError>>;

    /// Cancels one of the user's subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the subscription does not belong to the user
    /// or the provider cannot be reached.
    fn cancel_subscription<'a>(
        &'a self,
        subscription_id: &'a str,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Subscription, ProviderError>>;
}

/// Outcome of verifying and settling an x402 payment payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// The payment was verified and settled.
    Settled {
        /// Settlement transaction reference.
        transaction: String,
        /// Network the payment settled on.
        network: String,
        /// Payer address, if reported.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payer: Option<String>,
    },
    /// The payload was rejected by verification or settlement.
    Rejected {
        /// Machine-readable reason from the facilitator.
        reason: String,
    },
}

/// x402 settlement for providers whose payments are signed by the payer.
///
/// `request` is the structured request previously returned in
/// [`PaymentLink::Request`]; `payment` is the decoded payment payload the
/// caller resubmitted.
pub trait X402Facilitation: Send + Sync {
    /// Verifies the payload against the request and settles it.
    ///
    /// A cryptographically invalid payload is not an error: it is reported as
    /// [`SettlementOutcome::Rejected`].
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the facilitator cannot be reached.
    fn verify_and_settle<'a>(
        &'a self,
        request: &'a serde_json::Value,
        payment: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<SettlementOutcome, ProviderError>>;
}
