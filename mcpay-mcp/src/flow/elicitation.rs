//! ELICITATION: the call stays open while the caller is asked, inside the
//! call, to confirm they have paid.

use mcpay::error::PaymentError;
use mcpay::invocation::{InvocationStatus, PendingInvocation};
use mcpay::mode::CoordinationMode;
use mcpay::price::Price;
use mcpay::provider::PaymentStatus;

use super::{Resumed, link_hint};
use crate::context::CallerContext;
use crate::error::CallError;
use crate::gate::PaymentGate;
use crate::outcome::ToolOutcome;
use crate::transport::{ElicitationAction, ElicitationRequest};
use crate::types::CallToolParams;

fn request_for(record: &PendingInvocation, attempt: u32) -> ElicitationRequest {
    let message = if attempt == 1 {
        format!(
            "{} costs {} {}. Complete the payment at {}, then accept to continue.",
            record.tool_name,
            record.amount,
            record.currency,
            link_hint(record),
        )
    } else {
        format!(
            "Payment {} is not complete yet. Finish it at {}, then accept to continue.",
            record.payment_id,
            link_hint(record),
        )
    };
    ElicitationRequest {
        message,
        payment_id: record.payment_id.clone(),
        payment_url: record.payment_link.as_url().map(str::to_owned),
        payment_request: record.payment_link.as_request().cloned(),
        amount: record.amount,
        currency: record.currency.clone(),
        attempt,
    }
}

impl PaymentGate {
    pub(crate) async fn elicit(
        &self,
        price: &Price,
        params: &CallToolParams,
        ctx: &CallerContext,
    ) -> Result<ToolOutcome, CallError> {
        let Some(elicitor) = ctx.elicitor.as_deref() else {
            return Err(PaymentError::UnsupportedMode {
                mode: CoordinationMode::Elicitation,
                reason: "the host supplied no elicitation channel".to_owned(),
            }
            .into());
        };

        let record = match self
            .begin_or_resume(price, CoordinationMode::Elicitation, params, ctx)
            .await?
        {
            Resumed::Live(record) => record,
            Resumed::Done(outcome) => return Ok(outcome),
        };

        let attempts = self.settings.elicitation.max_attempts.max(1);
        for attempt in 1..=attempts {
            let answer = tokio::select! {
                biased;
                () = ctx.cancellation.cancelled() => {
                    self.abandon(&record, InvocationStatus::Expired).await?;
                    return Err(cancelled(&record));
                }
                answer = elicitor.elicit(request_for(&record, attempt)) => answer,
            };

            match answer {
                Ok(ElicitationAction::Accept) => {}
                Ok(ElicitationAction::Decline | ElicitationAction::Cancel) => {
                    self.abandon(&record, InvocationStatus::Cancelled).await?;
                    return Err(cancelled(&record));
                }
                Err(_err) => {
                    #[cfg(feature = "telemetry")]
                    tracing::warn!(payment_id = %record.payment_id, error = %_err, "elicitation failed");

                    self.abandon(&record, InvocationStatus::Expired).await?;
                    return Err(cancelled(&record));
                }
            }

            match self.provider_status(&record).await? {
                PaymentStatus::Paid => {
                    return self
                        .finalize(record, InvocationStatus::Pending, None)
                        .await;
                }
                PaymentStatus::Pending => {
                    #[cfg(feature = "telemetry")]
                    tracing::debug!(
                        payment_id = %record.payment_id,
                        attempt,
                        "caller accepted but payment is still pending"
                    );
                }
                status => return Err(self.payment_failed(&record, status).await),
            }
        }

        self.abandon(&record, InvocationStatus::Expired).await?;
        Err(PaymentError::PaymentTimeout {
            payment_id: record.payment_id,
        }
        .into())
    }
}

fn cancelled(record: &PendingInvocation) -> CallError {
    PaymentError::PaymentCancelled {
        payment_id: record.payment_id.clone(),
    }
    .into()
}
