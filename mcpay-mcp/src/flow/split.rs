//! TWO_STEP and DYNAMIC_TOOLS: the paid call and its confirmation are
//! separate tool calls.

use mcpay::error::PaymentError;
use mcpay::invocation::{InvocationStatus, PaymentPrompt};
use mcpay::mode::CoordinationMode;
use mcpay::price::Price;
use mcpay::provider::PaymentStatus;
use serde_json::{Map, Value};

use super::{Resumed, link_hint};
use crate::CONFIRM_PAYMENT_TOOL;
use crate::context::CallerContext;
use crate::error::{CallError, ToolError};
use crate::extract::{extract_payment_id, strip_payment_arguments};
use crate::gate::{PaymentGate, confirmation_tool_name};
use crate::outcome::ToolOutcome;
use crate::types::CallToolParams;

impl PaymentGate {
    /// First half of a split call: creates the payment and holds the call.
    ///
    /// A call that already carries a payment id is treated as its own
    /// confirmation.
    pub(crate) async fn split(
        &self,
        price: &Price,
        mode: CoordinationMode,
        params: &CallToolParams,
        ctx: &CallerContext,
    ) -> Result<ToolOutcome, CallError> {
        let arguments = strip_payment_arguments(&params.arguments);
        if extract_payment_id(&params.arguments, params.meta.as_ref()).is_some() {
            let session = if mode == CoordinationMode::DynamicTools {
                ctx.session_id()
            } else {
                None
            };
            return self
                .confirm(
                    Some(params.name.as_str()),
                    Some(&arguments),
                    session,
                    &params.arguments,
                    params.meta.as_ref(),
                )
                .await;
        }

        let record = self.begin(&params.name, price, mode, arguments, ctx).await?;

        let next_step = if mode == CoordinationMode::DynamicTools {
            if let Some(session) = ctx.session_id()
                && let Some(event) =
                    self.visibility
                        .hide(session, &record.tool_name, &record.payment_id)
            {
                self.notify(event).await;
            }
            CONFIRM_PAYMENT_TOOL.to_owned()
        } else {
            confirmation_tool_name(&record.tool_name)
        };

        let message = format!(
            "Payment of {} {} is required for {}. Complete it at {}, then call {next_step} with payment_id {}.",
            record.amount,
            record.currency,
            record.tool_name,
            link_hint(&record),
            record.payment_id,
        );
        Ok(ToolOutcome::PaymentPending(Box::new(
            PaymentPrompt::for_invocation(&record, message).with_next_step(next_step),
        )))
    }

    /// Second half of a split call: runs the held tool once the provider
    /// reports it paid.
    ///
    /// `target` restricts which tool the payment may have been made for;
    /// `original` is the argument set of a call resubmitted to the paid tool
    /// itself, which must match the held call. `session`, when given, must
    /// be the session the call was held for.
    pub(crate) async fn confirm(
        &self,
        target: Option<&str>,
        original: Option<&Map<String, Value>>,
        session: Option<&str>,
        arguments: &Map<String, Value>,
        meta: Option<&Map<String, Value>>,
    ) -> Result<ToolOutcome, CallError> {
        let payment_id = extract_payment_id(arguments, meta).ok_or_else(|| {
            ToolError::InvalidArguments(format!("'{}' is required", crate::PAYMENT_ID_ARGUMENT))
        })?;

        let record = match self.resume(&payment_id, target, original, session).await? {
            Resumed::Live(record) => record,
            Resumed::Done(outcome) => return Ok(outcome),
        };

        match self.provider_status(&record).await? {
            PaymentStatus::Paid => {
                let outcome = self
                    .finalize(record.clone(), InvocationStatus::Pending, None)
                    .await;
                self.release(&record).await;
                outcome
            }
            PaymentStatus::Pending => {
                let next_step = if record.mode == CoordinationMode::DynamicTools {
                    CONFIRM_PAYMENT_TOOL.to_owned()
                } else {
                    confirmation_tool_name(&record.tool_name)
                };
                let message = format!(
                    "Payment {} has not been completed yet. Complete it at {}, then call {next_step} again.",
                    record.payment_id,
                    link_hint(&record),
                );
                Ok(ToolOutcome::PaymentPending(Box::new(
                    PaymentPrompt::for_invocation(&record, message).with_next_step(next_step),
                )))
            }
            status => {
                // An abandoned split attempt leaves nothing behind.
                self.store
                    .delete(&record.payment_id)
                    .await
                    .map_err(PaymentError::from)?;
                self.release(&record).await;

                #[cfg(feature = "telemetry")]
                tracing::info!(payment_id = %record.payment_id, %status, "payment attempt removed");

                Err(PaymentError::PaymentFailed {
                    payment_id: record.payment_id,
                    status,
                }
                .into())
            }
        }
    }
}
