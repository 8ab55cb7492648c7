//! X402: the caller signs a payment against the structured request and
//! resubmits the call with the signed payload in `_meta`.

use mcpay::error::PaymentError;
use mcpay::invocation::InvocationStatus;
use mcpay::mode::CoordinationMode;
use mcpay::price::Price;
use mcpay::provider::SettlementOutcome;
use serde_json::Map;

use super::{Resumed, invalid_reference, payment_required};
use crate::context::CallerContext;
use crate::error::CallError;
use crate::extract::{
    attach_payment_response_to_meta, extract_payment_id, extract_x402_payment,
    payment_id_of_x402_payment, strip_payment_arguments,
};
use crate::gate::PaymentGate;
use crate::outcome::ToolOutcome;
use crate::types::CallToolParams;
use crate::PAYMENT_META_KEY;

impl PaymentGate {
    pub(crate) async fn x402(
        &self,
        price: &Price,
        params: &CallToolParams,
        ctx: &CallerContext,
    ) -> Result<ToolOutcome, CallError> {
        let arguments = strip_payment_arguments(&params.arguments);
        let payment = params.meta.as_ref().and_then(extract_x402_payment);
        let payment_id = extract_payment_id(&params.arguments, params.meta.as_ref())
            .or_else(|| payment.as_ref().and_then(payment_id_of_x402_payment));

        let Some(payment_id) = payment_id else {
            let record = self
                .begin(&params.name, price, CoordinationMode::X402, arguments, ctx)
                .await?;
            let message = format!(
                "Payment of {} {} is required. Sign the attached x402 payment request and call {} again with the payment in _meta[\"{PAYMENT_META_KEY}\"].",
                record.amount, record.currency, record.tool_name,
            );
            return Err(payment_required(&record, message));
        };

        let record = match self
            .resume(&payment_id, Some(params.name.as_str()), Some(&arguments), None)
            .await?
        {
            Resumed::Live(record) => record,
            Resumed::Done(outcome) => return Ok(outcome),
        };

        let Some(payment) = payment else {
            let message = format!(
                "Payment {} has no signed payload. Attach it in _meta[\"{PAYMENT_META_KEY}\"] and call {} again.",
                record.payment_id, record.tool_name,
            );
            return Err(payment_required(&record, message));
        };

        if payment_id_of_x402_payment(&payment).is_some_and(|signed| signed != record.payment_id) {
            return Err(invalid_reference(
                &record.payment_id,
                "the payment was signed for another request",
            )
            .into());
        }

        let request = record.payment_link.as_request().ok_or_else(|| {
            invalid_reference(&record.payment_id, "not an x402 payment request")
        })?;
        let facilitation = self
            .provider_for(CoordinationMode::X402)?
            .x402()
            .ok_or_else(|| PaymentError::UnsupportedMode {
                mode: CoordinationMode::X402,
                reason: "the provider does not settle x402 payments".to_owned(),
            })?;

        // One caller settles the payload; the rest replay its outcome.
        let claimed = self
            .store
            .transition(
                &record.payment_id,
                InvocationStatus::Pending,
                InvocationStatus::Settling,
            )
            .await
            .map_err(PaymentError::from)?;
        if !claimed {
            return self.replay(&record.payment_id).await;
        }

        let outcome = match facilitation.verify_and_settle(request, &payment).await {
            Ok(outcome) => outcome,
            Err(err) => {
                // Nothing settled: hand the record back for a retry.
                self.settled(&record.payment_id, InvocationStatus::Pending)
                    .await?;
                return Err(PaymentError::from(err).into());
            }
        };

        match outcome {
            SettlementOutcome::Settled { .. } => {
                #[cfg(feature = "telemetry")]
                tracing::info!(payment_id = %record.payment_id, "x402 payment settled");

                self.settled(&record.payment_id, InvocationStatus::Paid)
                    .await?;
                let mut meta = Map::new();
                attach_payment_response_to_meta(&mut meta, &outcome);
                self.finalize(record, InvocationStatus::Paid, Some(meta))
                    .await
            }
            SettlementOutcome::Rejected { reason } => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(payment_id = %record.payment_id, %reason, "x402 payment rejected");

                self.settled(&record.payment_id, InvocationStatus::Failed)
                    .await?;
                Err(PaymentError::PaymentVerificationFailed {
                    payment_id: record.payment_id,
                    reason,
                }
                .into())
            }
        }
    }

    /// Moves a record this caller holds in `settling` to `to`.
    async fn settled(&self, payment_id: &str, to: InvocationStatus) -> Result<(), PaymentError> {
        let _moved = self
            .store
            .transition(payment_id, InvocationStatus::Settling, to)
            .await?;

        #[cfg(feature = "telemetry")]
        tracing::debug!(payment_id, status = %to, moved = _moved, "x402 settlement recorded");

        Ok(())
    }
}
