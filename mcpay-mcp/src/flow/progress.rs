//! PROGRESS: the call stays open and polls the provider with exponential
//! backoff, keeping the caller informed through progress notifications.

use std::time::Duration;

use mcpay::error::PaymentError;
use mcpay::invocation::InvocationStatus;
use mcpay::mode::CoordinationMode;
use mcpay::price::Price;
use mcpay::provider::PaymentStatus;
use rand::Rng;
use tokio::time::{Instant, sleep, sleep_until};

use super::{Resumed, link_hint};
use crate::context::CallerContext;
use crate::error::CallError;
use crate::gate::PaymentGate;
use crate::outcome::ToolOutcome;
use crate::transport::ProgressUpdate;
use crate::types::CallToolParams;

/// Scales `delay` by a random factor in `[0.8, 1.2]`.
fn jittered(delay: Duration) -> Duration {
    let factor = rand::rng().random_range(0.8..=1.2);
    delay.mul_f64(factor)
}

/// Next backoff step: double, capped at `max`.
fn next_interval(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

impl PaymentGate {
    pub(crate) async fn poll(
        &self,
        price: &Price,
        params: &CallToolParams,
        ctx: &CallerContext,
    ) -> Result<ToolOutcome, CallError> {
        let record = match self
            .begin_or_resume(price, CoordinationMode::Progress, params, ctx)
            .await?
        {
            Resumed::Live(record) => record,
            Resumed::Done(outcome) => return Ok(outcome),
        };

        let schedule = self.settings.progress;
        let mut deadline = Instant::now() + schedule.timeout();
        if let Some(caller_deadline) = ctx.deadline {
            deadline = deadline.min(caller_deadline);
        }

        let mut tick = 0_u32;
        self.report(
            ctx,
            &mut tick,
            format!(
                "Waiting for payment of {} {}. Complete it at {}.",
                record.amount,
                record.currency,
                link_hint(&record),
            ),
        )
        .await;

        let mut interval = schedule.initial_interval();
        loop {
            tokio::select! {
                biased;
                () = ctx.cancellation.cancelled() => {
                    self.abandon(&record, InvocationStatus::Expired).await?;
                    return Err(PaymentError::PaymentCancelled {
                        payment_id: record.payment_id,
                    }
                    .into());
                }
                () = sleep_until(deadline) => {
                    self.abandon(&record, InvocationStatus::Expired).await?;
                    return Err(PaymentError::PaymentTimeout {
                        payment_id: record.payment_id,
                    }
                    .into());
                }
                () = sleep(jittered(interval)) => {}
            }
            interval = next_interval(interval, schedule.max_interval());

            match self.provider_status(&record).await {
                Ok(PaymentStatus::Paid) => {
                    self.report(ctx, &mut tick, "Payment received, running the tool.".to_owned())
                        .await;
                    return self.finalize(record, InvocationStatus::Pending, None).await;
                }
                Ok(PaymentStatus::Pending) => {
                    self.report(
                        ctx,
                        &mut tick,
                        format!("Still waiting for payment {}.", record.payment_id),
                    )
                    .await;
                }
                Ok(status) => return Err(self.payment_failed(&record, status).await),
                // Keep polling: the record stays pending and the deadline
                // still bounds the wait.
                Err(_) => {}
            }
        }
    }

    async fn report(&self, ctx: &CallerContext, tick: &mut u32, message: String) {
        let Some(reporter) = ctx.progress.as_deref() else {
            return;
        };
        *tick += 1;
        reporter
            .report(ProgressUpdate {
                progress: *tick,
                total: None,
                message,
            })
            .await;
    }
}
