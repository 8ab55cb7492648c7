//! RESUBMIT: the caller pays, then calls the same tool again with the
//! payment id.

use mcpay::invocation::InvocationStatus;
use mcpay::mode::CoordinationMode;
use mcpay::price::Price;
use mcpay::provider::PaymentStatus;

use super::{Resumed, link_hint, payment_required};
use crate::context::CallerContext;
use crate::error::CallError;
use crate::extract::{extract_payment_id, strip_payment_arguments};
use crate::gate::PaymentGate;
use crate::outcome::ToolOutcome;
use crate::types::CallToolParams;

impl PaymentGate {
    pub(crate) async fn resubmit(
        &self,
        price: &Price,
        params: &CallToolParams,
        ctx: &CallerContext,
    ) -> Result<ToolOutcome, CallError> {
        let arguments = strip_payment_arguments(&params.arguments);

        let Some(payment_id) = extract_payment_id(&params.arguments, params.meta.as_ref()) else {
            let record = self
                .begin(&params.name, price, CoordinationMode::Resubmit, arguments, ctx)
                .await?;
            let message = format!(
                "Payment of {} {} is required. Complete it at {}, then call {} again with payment_id {}.",
                record.amount,
                record.currency,
                link_hint(&record),
                record.tool_name,
                record.payment_id,
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

        match self.provider_status(&record).await? {
            PaymentStatus::Paid => {
                self.finalize(record, InvocationStatus::Pending, None)
                    .await
            }
            PaymentStatus::Pending => {
                let message = format!(
                    "Payment {} has not been completed yet. Complete it at {}, then call {} again.",
                    record.payment_id,
                    link_hint(&record),
                    record.tool_name,
                );
                Err(payment_required(&record, message))
            }
            status => Err(self.payment_failed(&record, status).await),
        }
    }
}
