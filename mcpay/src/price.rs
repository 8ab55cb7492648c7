//! Static price metadata attached to gated tools.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::PriceError;

/// A fixed per-call price.
///
/// Construct through [`Price::new`], which rejects non-positive amounts and
/// empty currency codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    /// Strictly positive amount.
    pub amount: Decimal,
    /// ISO 4217-style currency code, upper-cased.
    pub currency: String,
}

impl Price {
    /// Creates a validated price.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError`] if `amount <= 0` or the currency code is empty
    /// or not alphanumeric.
    pub fn new(amount: Decimal, currency: impl AsRef<str>) -> Result<Self, PriceError> {
        let price = Self {
            amount,
            currency: currency.as_ref().trim().to_ascii_uppercase(),
        };
        price.validate()?;
        Ok(price)
    }

    /// Re-checks the invariants of a price that was deserialized directly.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Price::new`].
    pub fn validate(&self) -> Result<(), PriceError> {
        if self.amount <= Decimal::ZERO {
            return Err(PriceError::NonPositiveAmount(self.amount));
        }
        if self.currency.is_empty() {
            return Err(PriceError::EmptyCurrency);
        }
        if !self.currency.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(PriceError::InvalidCurrency(self.currency.clone()));
        }
        Ok(())
    }
}

/// Payment requirement of a gated tool. Immutable after registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ToolPriceSpec {
    /// Every call is paid for individually.
    Price(Price),
    /// Calls are free for holders of an active subscription to one of the plans.
    #[serde(rename_all = "camelCase")]
    Subscription {
        /// Plans that unlock the tool.
        accepted_plans: Vec<String>,
    },
}

impl ToolPriceSpec {
    /// Shorthand for a validated per-call price.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Price::new`].
    pub fn price(amount: Decimal, currency: impl AsRef<str>) -> Result<Self, PriceError> {
        Price::new(amount, currency).map(Self::Price)
    }

    /// Shorthand for a subscription gate.
    #[must_use]
    pub fn subscription<I, S>(plans: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Subscription {
            accepted_plans: plans.into_iter().map(Into::into).collect(),
        }
    }

    /// Checks the spec before a tool is registered with it.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError`] for an invalid price or an empty (or blank)
    /// plan list.
    pub fn validate(&self) -> Result<(), PriceError> {
        match self {
            Self::Price(price) => price.validate(),
            Self::Subscription { accepted_plans } => {
                if accepted_plans.is_empty() {
                    return Err(PriceError::NoPlans);
                }
                if accepted_plans.iter().any(|p| p.trim().is_empty()) {
                    return Err(PriceError::BlankPlan);
                }
                Ok(())
            }
        }
    }

    /// Returns the per-call price, if this is a price gate.
    #[must_use]
    pub const fn as_price(&self) -> Option<&Price> {
        match self {
            Self::Price(price) => Some(price),
            Self::Subscription { .. } => None,
        }
    }
}
