//! Per-call mode selection.

use mcpay::error::PaymentError;
use mcpay::mode::CoordinationMode;
use mcpay::registry::Providers;

use crate::context::CallerContext;

/// Picks the concrete mode for one call.
///
/// A configured concrete mode is returned unchanged. AUTO prefers X402 when
/// an x402-capable provider is configured and the caller signs x402
/// payments, then ELICITATION when the caller answers elicitation and the
/// host supplied the channel, and falls back to RESUBMIT. Runs before any
/// state is persisted.
#[must_use]
pub fn resolve_mode(
    configured: CoordinationMode,
    ctx: &CallerContext,
    providers: &Providers,
) -> CoordinationMode {
    if configured != CoordinationMode::Auto {
        return configured;
    }
    if ctx.capabilities.x402 && providers.x402_capable().is_some() {
        CoordinationMode::X402
    } else if ctx.capabilities.elicitation && ctx.elicitor.is_some() {
        CoordinationMode::Elicitation
    } else {
        CoordinationMode::Resubmit
    }
}

/// Checks that a concrete mode can run with what the host and providers offer.
///
/// # Errors
///
/// Returns [`PaymentError::UnsupportedMode`] when ELICITATION lacks an
/// elicitation channel, DYNAMIC_TOOLS lacks a session, or X402 lacks an
/// x402-capable provider.
pub fn ensure_supported(
    mode: CoordinationMode,
    ctx: &CallerContext,
    providers: &Providers,
) -> Result<(), PaymentError> {
    let missing = match mode {
        CoordinationMode::Elicitation if ctx.elicitor.is_none() => {
            Some("the host supplied no elicitation channel")
        }
        CoordinationMode::DynamicTools if ctx.session_id().is_none() => {
            Some("the call has no session to change the tool list of")
        }
        CoordinationMode::X402 if providers.x402_capable().is_none() => {
            Some("no x402-capable provider is configured")
        }
        CoordinationMode::Auto => Some("AUTO must be resolved before dispatch"),
        _ => None,
    };
    missing.map_or(Ok(()), |reason| {
        Err(PaymentError::UnsupportedMode {
            mode,
            reason: reason.to_owned(),
        })
    })
}
