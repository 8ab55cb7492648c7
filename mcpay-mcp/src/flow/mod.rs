//! Mode state machines.
//!
//! Every mode walks the same states: `NotStarted -> AwaitingPayment ->
//! Confirmed | Abandoned | Expired`. The shared steps live here: creating
//! the payment and persisting the suspended call, resuming it from a
//! caller-supplied payment id, and finalizing it exactly once.
//!
//! Finalizing claims the record (`pending | paid -> executing`) before the
//! tool body runs. A body that fails leaves it `paid` for a retry.

mod elicitation;
mod progress;
mod resubmit;
mod split;
mod x402;

use std::sync::Arc;

use mcpay::error::PaymentError;
use mcpay::invocation::{InvocationStatus, PaymentPrompt, PendingInvocation};
use mcpay::mode::CoordinationMode;
use mcpay::price::Price;
use mcpay::provider::{PaymentProvider, PaymentStatus};
use mcpay::timestamp::UnixTimestamp;
use serde_json::{Map, Value};

use crate::context::CallerContext;
use crate::error::CallError;
use crate::extract::{extract_payment_id, strip_payment_arguments};
use crate::gate::PaymentGate;
use crate::outcome::ToolOutcome;
use crate::types::CallToolParams;

/// A suspended call looked up by payment id.
pub(crate) enum Resumed {
    /// Still waiting for payment.
    Live(PendingInvocation),
    /// Nothing left to wait for: the stored result, an in-flight marker, or
    /// the result of rerunning a paid call whose tool body failed before.
    Done(ToolOutcome),
}

fn invalid_reference(payment_id: &str, reason: impl Into<String>) -> PaymentError {
    PaymentError::InvalidPaymentReference {
        payment_id: payment_id.to_owned(),
        reason: reason.into(),
    }
}

fn payment_required(record: &PendingInvocation, message: impl Into<String>) -> CallError {
    PaymentError::PaymentRequired(Box::new(PaymentPrompt::for_invocation(record, message))).into()
}

/// Where the payer goes, for human-readable messages.
fn link_hint(record: &PendingInvocation) -> String {
    record
        .payment_link
        .as_url()
        .map_or_else(|| "the attached payment request".to_owned(), str::to_owned)
}

impl PaymentGate {
    /// The provider that serves `mode`: the first x402-capable one for X402,
    /// the first configured one otherwise.
    pub(crate) fn provider_for(
        &self,
        mode: CoordinationMode,
    ) -> Result<&Arc<dyn PaymentProvider>, PaymentError> {
        if mode == CoordinationMode::X402 {
            return self
                .providers
                .x402_capable()
                .ok_or_else(|| PaymentError::UnsupportedMode {
                    mode,
                    reason: "no x402-capable provider is configured".to_owned(),
                });
        }
        Ok(self.providers.primary())
    }

    /// Creates the payment and persists the suspended call.
    pub(crate) async fn begin(
        &self,
        tool: &str,
        price: &Price,
        mode: CoordinationMode,
        arguments: Map<String, Value>,
        ctx: &CallerContext,
    ) -> Result<PendingInvocation, PaymentError> {
        let provider = self.provider_for(mode)?;
        let description = format!("Payment for {tool}");
        let created = provider
            .create_payment(price.amount, &price.currency, &description)
            .await?;
        let record = PendingInvocation::new(
            created.payment_id,
            tool,
            arguments,
            price,
            mode,
            ctx.identity.clone(),
            created.link,
            self.settings.payment_ttl,
        );
        self.store.insert(record.clone()).await?;

        #[cfg(feature = "telemetry")]
        tracing::info!(
            payment_id = %record.payment_id,
            tool,
            %mode,
            provider = provider.name(),
            amount = %price.amount,
            currency = %price.currency,
            "payment created, call suspended"
        );

        Ok(record)
    }

    /// Looks up a suspended call for confirmation or resubmission.
    ///
    /// `tool`, `arguments` and `session`, when given, must match what the
    /// record captured. A pending record past its expiry is moved to
    /// `expired`. A record that was paid but never produced a result runs
    /// its tool body here.
    pub(crate) async fn resume(
        &self,
        payment_id: &str,
        tool: Option<&str>,
        arguments: Option<&Map<String, Value>>,
        session: Option<&str>,
    ) -> Result<Resumed, CallError> {
        let record = self.current(payment_id).await?;

        if let Some(session) = session
            && record.caller.session_id.as_deref() != Some(session)
        {
            return Err(invalid_reference(payment_id, "issued to another session").into());
        }
        if let Some(tool) = tool
            && record.tool_name != tool
        {
            return Err(invalid_reference(
                payment_id,
                format!("issued for tool '{}'", record.tool_name),
            )
            .into());
        }
        if let Some(arguments) = arguments
            && !record.matches_arguments(arguments)
        {
            return Err(
                invalid_reference(payment_id, "arguments differ from the original call").into(),
            );
        }

        match record.status {
            InvocationStatus::Pending if record.is_expired_at(UnixTimestamp::now()) => {
                self.abandon(&record, InvocationStatus::Expired).await?;
                Err(invalid_reference(payment_id, "payment window has expired").into())
            }
            InvocationStatus::Pending => Ok(Resumed::Live(record)),
            InvocationStatus::Paid => self
                .finalize(record, InvocationStatus::Paid, None)
                .await
                .map(Resumed::Done),
            _ => Ok(Resumed::Done(replayed(record)?)),
        }
    }

    /// Resumes the call named by a caller-supplied payment id, or starts a
    /// new one. Used by the blocking modes.
    pub(crate) async fn begin_or_resume(
        &self,
        price: &Price,
        mode: CoordinationMode,
        params: &CallToolParams,
        ctx: &CallerContext,
    ) -> Result<Resumed, CallError> {
        let arguments = strip_payment_arguments(&params.arguments);
        match extract_payment_id(&params.arguments, params.meta.as_ref()) {
            Some(payment_id) => {
                self.resume(&payment_id, Some(params.name.as_str()), Some(&arguments), None)
                    .await
            }
            None => Ok(self
                .begin(&params.name, price, mode, arguments, ctx)
                .await
                .map(Resumed::Live)?),
        }
    }

    /// Reads the provider-side status of a suspended call.
    ///
    /// A provider failure leaves the record untouched, so the caller can
    /// retry without a new payment being created.
    pub(crate) async fn provider_status(
        &self,
        record: &PendingInvocation,
    ) -> Result<PaymentStatus, PaymentError> {
        let provider = self.provider_for(record.mode)?;
        let status = provider.get_payment_status(&record.payment_id).await;

        #[cfg(feature = "telemetry")]
        match &status {
            Ok(status) => tracing::debug!(payment_id = %record.payment_id, %status, "payment status"),
            Err(err) => tracing::warn!(
                payment_id = %record.payment_id,
                error = %err,
                "payment status check failed, record left pending"
            ),
        }

        Ok(status?)
    }

    /// Moves a pending record to a terminal status other than `confirmed`.
    pub(crate) async fn abandon(
        &self,
        record: &PendingInvocation,
        to: InvocationStatus,
    ) -> Result<(), PaymentError> {
        let _moved = self
            .store
            .transition(&record.payment_id, InvocationStatus::Pending, to)
            .await?;

        #[cfg(feature = "telemetry")]
        tracing::info!(
            payment_id = %record.payment_id,
            status = %to,
            moved = _moved,
            "payment attempt ended without execution"
        );

        self.release(record).await;
        Ok(())
    }

    /// Records a provider-side failure and builds the error for it.
    ///
    /// A store failure while recording wins over the payment failure.
    pub(crate) async fn payment_failed(
        &self,
        record: &PendingInvocation,
        status: PaymentStatus,
    ) -> CallError {
        match self.abandon(record, status.into()).await {
            Ok(()) => PaymentError::PaymentFailed {
                payment_id: record.payment_id.clone(),
                status,
            }
            .into(),
            Err(err) => err.into(),
        }
    }

    /// Gives a DYNAMIC_TOOLS session its tool back once the payment is settled.
    pub(crate) async fn release(&self, record: &PendingInvocation) {
        if record.mode != CoordinationMode::DynamicTools {
            return;
        }
        let Some(session) = record.caller.session_id.as_deref() else {
            return;
        };
        if let Some(event) = self
            .visibility
            .restore(session, &record.tool_name, &record.payment_id)
        {
            self.notify(event).await;
        }
    }

    /// Runs the tool body for a paid call, exactly once per payment.
    ///
    /// Only the caller whose `from -> executing` transition succeeds runs
    /// the body. Every other caller gets the stored result back as
    /// [`ToolOutcome::AlreadyProcessed`]. A failing body moves the record to
    /// `paid`, so a later confirmation retries it without a new payment.
    pub(crate) async fn finalize(
        &self,
        record: PendingInvocation,
        from: InvocationStatus,
        meta: Option<Map<String, Value>>,
    ) -> Result<ToolOutcome, CallError> {
        let handler = self.handler_for(&record.tool_name)?;
        let payment_id = record.payment_id.clone();
        let mut from = from;
        loop {
            let won = self
                .store
                .transition(&payment_id, from, InvocationStatus::Executing)
                .await
                .map_err(PaymentError::from)?;
            if won {
                break;
            }
            let current = self.current(&payment_id).await?;
            // A failed earlier run left it paid: take it over.
            if current.status == InvocationStatus::Paid && from != InvocationStatus::Paid {
                from = InvocationStatus::Paid;
                continue;
            }
            return Ok(replayed(current)?);
        }

        #[cfg(feature = "telemetry")]
        tracing::info!(
            payment_id = %payment_id,
            tool = %record.tool_name,
            "payment confirmed, running tool"
        );

        match handler.call(record.arguments.clone()).await {
            Ok(result) => {
                let mut finalized = record.with_status(InvocationStatus::Confirmed);
                finalized.result = Some(result.clone());
                if let Err(_err) = self.store.put(finalized).await {
                    #[cfg(feature = "telemetry")]
                    tracing::warn!(error = %_err, "failed to store tool result for replay");
                }
                Ok(ToolOutcome::Completed { result, meta })
            }
            Err(err) => {
                if let Err(_err) = self
                    .store
                    .transition(&payment_id, InvocationStatus::Executing, InvocationStatus::Paid)
                    .await
                {
                    #[cfg(feature = "telemetry")]
                    tracing::warn!(error = %_err, "failed to reopen paid record after tool error");
                }

                #[cfg(feature = "telemetry")]
                tracing::warn!(
                    payment_id = %payment_id,
                    error = %err,
                    "tool failed after payment, left open for retry"
                );

                Err(err.into())
            }
        }
    }

    /// Answers a caller that found the record claimed by someone else.
    pub(crate) async fn replay(&self, payment_id: &str) -> Result<ToolOutcome, CallError> {
        let record = self.current(payment_id).await?;
        if record.status == InvocationStatus::Paid {
            return self.finalize(record, InvocationStatus::Paid, None).await;
        }
        Ok(replayed(record)?)
    }

    async fn current(&self, payment_id: &str) -> Result<PendingInvocation, PaymentError> {
        self.store
            .get(payment_id)
            .await?
            .ok_or_else(|| invalid_reference(payment_id, "unknown payment id"))
    }
}

/// What a caller sees for a record another call owns or has finished.
fn replayed(record: PendingInvocation) -> Result<ToolOutcome, PaymentError> {
    match record.status {
        // In flight elsewhere, or done.
        InvocationStatus::Confirmed
        | InvocationStatus::Executing
        | InvocationStatus::Settling
        | InvocationStatus::Paid => Ok(ToolOutcome::AlreadyProcessed {
            payment_id: record.payment_id,
            result: record.result,
        }),
        InvocationStatus::Pending => Err(invalid_reference(
            &record.payment_id,
            "payment is not complete yet",
        )),
        status => Err(invalid_reference(
            &record.payment_id,
            format!("payment is already {status}"),
        )),
    }
}
