//! Error types for the payment coordination engine.
//!
//! Each layer has its own error enum: [`ProviderError`] for payment backends,
//! [`StoreError`] for pending-invocation persistence, [`ConfigError`] for the
//! registry and configuration loader, [`PriceError`] for tool price metadata,
//! and [`PaymentError`] for everything a gated tool call can end in.

use rust_decimal::Decimal;

use crate::invocation::{InvocationStatus, PaymentPrompt};
use crate::mode::CoordinationMode;
use crate::provider::PaymentStatus;

/// Boxed error type used for opaque transport failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors reported by a payment provider.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// The amount was rejected by the provider.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// The currency is not supported by the provider.
    #[error("Unsupported currency '{0}'")]
    UnsupportedCurrency(String),

    /// The provider does not know the payment id.
    #[error("Unknown payment '{0}'")]
    UnknownPayment(String),

    /// The provider could not be reached or the request failed in transit.
    #[error("Provider request failed: {0}")]
    Transport(#[source] BoxError),

    /// The provider answered with something the engine cannot interpret.
    #[error("Unexpected provider response: {0}")]
    Response(String),

    /// The provider does not implement an optional extension.
    #[error("{0} is not supported by this provider")]
    Unsupported(&'static str),
}

impl ProviderError {
    /// Wraps any error as a [`ProviderError::Transport`].
    pub fn transport(err: impl Into<BoxError>) -> Self {
        Self::Transport(err.into())
    }
}

/// Errors reported by a pending-invocation state store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// A terminal record would have been overwritten with a different status.
    #[error("Payment '{payment_id}' is already {status} and cannot be overwritten")]
    TerminalRecord {
        /// The payment id of the existing record.
        payment_id: String,
        /// The terminal status the record is in.
        status: InvocationStatus,
    },

    /// A record already exists under a payment id that was expected to be new.
    #[error("Payment '{payment_id}' is already held by another call")]
    Duplicate {
        /// The payment id that was reissued.
        payment_id: String,
    },

    /// A record could not be encoded or decoded.
    #[error("Failed to encode pending invocation: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The storage backend failed.
    #[error("State store backend error: {0}")]
    Backend(#[source] BoxError),
}

impl StoreError {
    /// Wraps any error as a [`StoreError::Backend`].
    pub fn backend(err: impl Into<BoxError>) -> Self {
        Self::Backend(err.into())
    }
}

/// Invalid price metadata on a gated tool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PriceError {
    /// The amount is zero or negative.
    #[error("Amount must be greater than zero, got {0}")]
    NonPositiveAmount(Decimal),

    /// The currency code is empty.
    #[error("Currency must not be empty")]
    EmptyCurrency,

    /// The currency code contains something other than ASCII letters and digits.
    #[error("Currency '{0}' is not a valid code")]
    InvalidCurrency(String),

    /// A subscription gate lists no plans.
    #[error("acceptedPlans must not be empty")]
    NoPlans,

    /// A subscription gate lists a blank plan id.
    #[error("acceptedPlans must not contain blank plan ids")]
    BlankPlan,
}

/// Errors raised while registering providers or loading configuration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A provider was registered under an empty name.
    #[error("Provider name must not be empty")]
    EmptyProviderName,

    /// A provider name is already bound to a constructor for another type.
    #[error("Provider '{name}' is already registered as {registered}, cannot rebind to {attempted}")]
    IncompatibleProvider {
        /// The contested registry key.
        name: String,
        /// Type path of the existing registration.
        registered: &'static str,
        /// Type path of the rejected registration.
        attempted: &'static str,
    },

    /// Neither a registered key nor a known type path.
    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    /// A provider constructor rejected its options.
    #[error("Invalid options for provider '{provider}': {message}")]
    InvalidOptions {
        /// The provider key or type path.
        provider: String,
        /// Why the options were rejected.
        message: String,
    },

    /// No providers were configured.
    #[error("At least one payment provider must be configured")]
    NoProviders,

    /// The configuration file could not be read.
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration is structurally valid but semantically wrong.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Everything a gated tool call can end in, other than a normal result.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PaymentError {
    /// The tool's price metadata is invalid.
    #[error("Invalid price for tool '{tool}': {reason}")]
    InvalidPriceSpec {
        /// The tool being registered.
        tool: String,
        /// What is wrong with the price.
        #[source]
        reason: PriceError,
    },

    /// The host did not supply a caller context for a gated call.
    #[error("Tool '{tool}' requires a caller context")]
    MissingContext {
        /// The tool being called.
        tool: String,
    },

    /// The payment provider failed.
    #[error("Payment service unavailable: {0}")]
    Provider(#[from] ProviderError),

    /// The supplied payment id does not refer to a usable pending invocation.
    #[error("Invalid payment reference '{payment_id}': {reason}")]
    InvalidPaymentReference {
        /// The payment id supplied by the caller.
        payment_id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An x402 payment payload failed verification or settlement.
    #[error("Payment verification failed for '{payment_id}': {reason}")]
    PaymentVerificationFailed {
        /// The payment id of the attempt.
        payment_id: String,
        /// The facilitator's reason.
        reason: String,
    },

    /// The payment did not complete before the wait ended.
    #[error("Payment '{payment_id}' timed out")]
    PaymentTimeout {
        /// The payment id of the attempt.
        payment_id: String,
    },

    /// The caller cancelled or declined the payment.
    #[error("Payment '{payment_id}' was cancelled")]
    PaymentCancelled {
        /// The payment id of the attempt.
        payment_id: String,
    },

    /// The provider reported the payment as failed or cancelled.
    #[error("Payment '{payment_id}' ended as {status}")]
    PaymentFailed {
        /// The payment id of the attempt.
        payment_id: String,
        /// The provider-side status.
        status: PaymentStatus,
    },

    /// The call needs payment before it can run; carries the payment prompt.
    #[error("Payment required: {}", .0.message)]
    PaymentRequired(Box<PaymentPrompt>),

    /// The caller has no active subscription to any accepted plan.
    #[error("Tool '{tool}' requires an active subscription to one of: {}", .accepted_plans.join(", "))]
    SubscriptionRequired {
        /// The tool being called.
        tool: String,
        /// Plans that unlock the tool.
        accepted_plans: Vec<String>,
    },

    /// The selected mode needs a host capability or provider extension that is absent.
    #[error("Mode {mode} cannot be used: {reason}")]
    UnsupportedMode {
        /// The mode that was selected.
        mode: CoordinationMode,
        /// What is missing.
        reason: String,
    },

    /// No tool is registered under the name.
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    /// The state store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Provider resolution or configuration failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PaymentError {
    /// Machine-readable error code used in structured error payloads.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidPriceSpec { .. } => "invalid_price_spec",
            Self::MissingContext { .. } => "missing_context",
            Self::Provider(_) => "provider_error",
            Self::InvalidPaymentReference { .. } => "invalid_payment_reference",
            Self::PaymentVerificationFailed { .. } => "payment_verification_failed",
            Self::PaymentTimeout { .. } => "payment_timeout",
            Self::PaymentCancelled { .. } => "payment_cancelled",
            Self::PaymentFailed { .. } => "payment_failed",
            Self::PaymentRequired(_) => "payment_required",
            Self::SubscriptionRequired { .. } => "subscription_required",
            Self::UnsupportedMode { .. } => "unsupported_mode",
            Self::UnknownTool(_) => "unknown_tool",
            Self::Store(_) => "store_error",
            Self::Config(_) => "config_error",
        }
    }

    /// Returns `true` if the caller may retry the same request unchanged.
    ///
    /// Only provider and store outages qualify; every other variant is either
    /// a caller mistake or terminal for the payment attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider(_) | Self::Store(_))
    }

    /// Returns the payment id the error refers to, if any.
    #[must_use]
    pub fn payment_id(&self) -> Option<&str> {
        match self {
            Self::InvalidPaymentReference { payment_id, .. }
            | Self::PaymentVerificationFailed { payment_id, .. }
            | Self::PaymentTimeout { payment_id }
            | Self::PaymentCancelled { payment_id }
            | Self::PaymentFailed { payment_id, .. } => Some(payment_id),
            Self::PaymentRequired(prompt) => Some(&prompt.payment_id),
            _ => None,
        }
    }
}
