//! Coordination modes.
//!
//! A coordination mode is the interaction pattern used to hold a tool call
//! until it has been paid for. Which one fits depends on what the calling
//! client can do (answer an in-call question, receive progress notifications,
//! watch its tool list change, sign an x402 payment).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The interaction pattern used to gate a tool call behind payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationMode {
    /// Picks one of the concrete modes per call from the caller's capabilities.
    #[default]
    Auto,
    /// First call returns a payment link; a separate confirmation tool releases the call.
    TwoStep,
    /// The same tool is called twice, the second time with the payment id.
    Resubmit,
    /// The call blocks while the caller is asked to pay through an in-call request.
    Elicitation,
    /// The call blocks while the engine polls the provider and reports progress.
    Progress,
    /// Like [`Self::TwoStep`], but the advertised tool list changes while payment is pending.
    DynamicTools,
    /// Resubmission carrying a signed x402 payment payload.
    X402,
}

impl CoordinationMode {
    /// All modes, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Auto,
        Self::TwoStep,
        Self::Resubmit,
        Self::Elicitation,
        Self::Progress,
        Self::DynamicTools,
        Self::X402,
    ];

    /// Returns the configuration name of the mode (e.g. `"two_step"`).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::TwoStep => "two_step",
            Self::Resubmit => "resubmit",
            Self::Elicitation => "elicitation",
            Self::Progress => "progress",
            Self::DynamicTools => "dynamic_tools",
            Self::X402 => "x402",
        }
    }

    /// Returns `true` for modes that hold the calling request open while waiting.
    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        matches!(self, Self::Elicitation | Self::Progress)
    }

    /// Returns `true` for modes that split the call across a separate confirmation tool.
    #[must_use]
    pub const fn uses_confirmation_tool(&self) -> bool {
        matches!(self, Self::TwoStep | Self::DynamicTools)
    }
}

impl fmt::Display for CoordinationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoordinationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .ok_or_else(|| format!("unknown coordination mode '{s}'"))
    }
}
