//! End-to-end behaviour of the coordination modes through the tool gate.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    RecordingNotifier, RecordingProgress, ScriptedElicitor, StubProvider, args, call, dog,
    flaky_generate_gate, generate_gate, runs, with_payment_id,
};
use mcpay::config::{ElicitationConfig, ProgressConfig};
use mcpay::error::PaymentError;
use mcpay::invocation::InvocationStatus;
use mcpay::mode::CoordinationMode;
use mcpay::provider::PaymentStatus;
use mcpay_mcp::extract::{extract_error_from_result, extract_payment_prompt_from_result};
use mcpay_mcp::{CallError, CallerContext, ElicitationAction, ToolError, ToolOutcome, TransportError};
use serde_json::json;

fn payment_id_of(err: &CallError) -> String {
    err.as_payment()
        .and_then(PaymentError::payment_id)
        .map(str::to_owned)
        .unwrap()
}

#[tokio::test]
async fn resubmit_runs_once_after_payment() {
    let provider = StubProvider::new();
    let (builder, counter) = generate_gate(CoordinationMode::Resubmit, Arc::clone(&provider));
    let gate = builder.build().unwrap();
    let ctx = CallerContext::for_session("s1");

    let first = gate.call_tool(call("generate", dog()), Some(&ctx)).await;
    assert!(first.is_error);
    let envelope = extract_error_from_result(&first).unwrap();
    assert_eq!(envelope.code, "payment_required");
    let prompt = extract_payment_prompt_from_result(&first).unwrap();
    assert_eq!(prompt.payment_id, "pay_1");
    assert_eq!(prompt.payment_url.as_deref(), Some("https://pay.example/pay_1"));
    assert_eq!(prompt.amount.to_string(), "1");
    assert_eq!(runs(&counter), 0);

    provider.settle(PaymentStatus::Paid);
    let paid = gate
        .try_call_tool(call("generate", with_payment_id(dog(), "pay_1")), Some(&ctx))
        .await
        .unwrap();
    assert_eq!(
        paid,
        ToolOutcome::completed(json!({"image": "a dog.png"}))
    );
    assert_eq!(runs(&counter), 1);

    let again = gate
        .try_call_tool(call("generate", with_payment_id(dog(), "pay_1")), Some(&ctx))
        .await
        .unwrap();
    assert_eq!(
        again,
        ToolOutcome::AlreadyProcessed {
            payment_id: "pay_1".into(),
            result: Some(json!({"image": "a dog.png"})),
        }
    );
    assert_eq!(runs(&counter), 1);
    assert_eq!(provider.created(), 1);

    let record = gate.store().get("pay_1").await.unwrap().unwrap();
    assert_eq!(record.status, InvocationStatus::Confirmed);
    assert_eq!(record.mode, CoordinationMode::Resubmit);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_resubmissions_execute_once() {
    let provider = StubProvider::new();
    let (builder, counter) = generate_gate(CoordinationMode::Resubmit, Arc::clone(&provider));
    let gate = Arc::new(builder.build().unwrap());
    let ctx = CallerContext::for_session("s1");

    let err = gate
        .try_call_tool(call("generate", dog()), Some(&ctx))
        .await
        .unwrap_err();
    let payment_id = payment_id_of(&err);
    provider.settle(PaymentStatus::Paid);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let gate = Arc::clone(&gate);
            let ctx = ctx.clone();
            let params = call("generate", with_payment_id(dog(), &payment_id));
            tokio::spawn(async move { gate.try_call_tool(params, Some(&ctx)).await })
        })
        .collect();

    let mut completed = 0;
    let mut replayed = 0;
    for task in tasks {
        match task.await.unwrap().unwrap() {
            ToolOutcome::Completed { .. } => completed += 1,
            ToolOutcome::AlreadyProcessed { .. } => replayed += 1,
            ToolOutcome::PaymentPending(_) => panic!("paid call reported pending"),
        }
    }
    assert_eq!(completed, 1);
    assert_eq!(replayed, 7);
    assert_eq!(runs(&counter), 1);
}

#[tokio::test]
async fn two_step_never_runs_before_payment() {
    let provider = StubProvider::new();
    let (builder, counter) = generate_gate(CoordinationMode::TwoStep, Arc::clone(&provider));
    let gate = builder.build().unwrap();
    let ctx = CallerContext::for_session("s1");

    let ToolOutcome::PaymentPending(prompt) = gate
        .try_call_tool(call("generate", dog()), Some(&ctx))
        .await
        .unwrap()
    else {
        panic!("expected a pending payment");
    };
    assert_eq!(prompt.next_step.as_deref(), Some("confirm_generate_payment"));

    let confirm = || call("confirm_generate_payment", with_payment_id(serde_json::Map::new(), &prompt.payment_id));

    let pending = gate.try_call_tool(confirm(), Some(&ctx)).await.unwrap();
    assert!(matches!(pending, ToolOutcome::PaymentPending(_)));
    assert_eq!(runs(&counter), 0);

    provider.settle(PaymentStatus::Paid);
    let done = gate.try_call_tool(confirm(), Some(&ctx)).await.unwrap();
    assert_eq!(done.result(), Some(&json!({"image": "a dog.png"})));
    let replay = gate.try_call_tool(confirm(), Some(&ctx)).await.unwrap();
    assert!(matches!(replay, ToolOutcome::AlreadyProcessed { .. }));
    assert_eq!(runs(&counter), 1);

    let err = gate
        .try_call_tool(call("confirm_generate_payment", serde_json::Map::new()), Some(&ctx))
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::Tool(ToolError::InvalidArguments(_))));
}

#[tokio::test]
async fn dynamic_tools_hide_and_restore_the_paid_tool() {
    let provider = StubProvider::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let (builder, counter) = generate_gate(CoordinationMode::DynamicTools, Arc::clone(&provider));
    let gate = builder.notifier(notifier.clone()).build().unwrap();
    let ctx = CallerContext::for_session("s1");
    let names = |session| -> Vec<String> {
        gate.list_tools(Some(session)).into_iter().map(|t| t.name).collect()
    };

    assert_eq!(names("s1"), ["ping", "generate"]);

    let ToolOutcome::PaymentPending(prompt) = gate
        .try_call_tool(call("generate", dog()), Some(&ctx))
        .await
        .unwrap()
    else {
        panic!("expected a pending payment");
    };
    assert_eq!(prompt.next_step.as_deref(), Some("confirm_payment"));
    assert_eq!(names("s1"), ["ping", "confirm_payment"]);
    assert_eq!(names("s2"), ["ping", "generate"]);
    assert_eq!(notifier.versions(), [1]);

    provider.settle(PaymentStatus::Paid);
    let done = gate
        .try_call_tool(
            call("confirm_payment", with_payment_id(serde_json::Map::new(), &prompt.payment_id)),
            Some(&ctx),
        )
        .await
        .unwrap();
    assert!(matches!(done, ToolOutcome::Completed { .. }));
    assert_eq!(runs(&counter), 1);
    assert_eq!(names("s1"), ["ping", "generate"]);
    assert_eq!(notifier.versions(), [1, 2]);
    assert_eq!(gate.visibility().version(), 2);
}

#[tokio::test]
async fn dynamic_tools_need_a_session() {
    let (builder, _) = generate_gate(CoordinationMode::DynamicTools, StubProvider::new());
    let gate = builder.build().unwrap();
    let err = gate
        .try_call_tool(call("generate", dog()), Some(&CallerContext::default()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "unsupported_mode");
}

#[tokio::test(start_paused = true)]
async fn progress_times_out_and_expires_the_record() {
    let provider = StubProvider::new();
    let progress = Arc::new(RecordingProgress::default());
    let (builder, counter) = generate_gate(CoordinationMode::Progress, Arc::clone(&provider));
    let gate = builder
        .progress(ProgressConfig {
            initial_interval_ms: 1_000,
            max_interval_ms: 4_000,
            timeout_secs: 10,
        })
        .build()
        .unwrap();
    let ctx = CallerContext::for_session("s1").with_progress(progress.clone());

    let err = gate
        .try_call_tool(call("generate", dog()), Some(&ctx))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CallError::Payment(PaymentError::PaymentTimeout { ref payment_id }) if payment_id == "pay_1"
    ));
    assert_eq!(runs(&counter), 0);
    assert!(provider.status_reads() >= 2);

    let record = gate.store().get("pay_1").await.unwrap().unwrap();
    assert_eq!(record.status, InvocationStatus::Expired);

    let updates = progress.updates.lock().unwrap();
    assert!(updates.len() >= 2);
    assert!(updates.windows(2).all(|w| w[0].progress < w[1].progress));
}

#[tokio::test(start_paused = true)]
async fn progress_runs_the_tool_once_paid() {
    let provider = StubProvider::new();
    provider.pending_for(2);
    provider.settle(PaymentStatus::Paid);
    let (builder, counter) = generate_gate(CoordinationMode::Progress, Arc::clone(&provider));
    let gate = builder.build().unwrap();

    let outcome = gate
        .try_call_tool(call("generate", dog()), Some(&CallerContext::for_session("s1")))
        .await
        .unwrap();
    assert_eq!(outcome.result(), Some(&json!({"image": "a dog.png"})));
    assert_eq!(provider.status_reads(), 3);
    assert_eq!(runs(&counter), 1);
}

#[tokio::test(start_paused = true)]
async fn progress_stops_when_the_caller_cancels() {
    let provider = StubProvider::new();
    let (builder, counter) = generate_gate(CoordinationMode::Progress, Arc::clone(&provider));
    let gate = builder.build().unwrap();
    let ctx = CallerContext::for_session("s1");
    ctx.cancellation.cancel();

    let err = gate
        .try_call_tool(call("generate", dog()), Some(&ctx))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "payment_cancelled");
    assert_eq!(runs(&counter), 0);
    let record = gate.store().get("pay_1").await.unwrap().unwrap();
    assert_eq!(record.status, InvocationStatus::Expired);
}

#[tokio::test]
async fn elicitation_decline_cancels_without_running() {
    let provider = StubProvider::new();
    let (builder, counter) = generate_gate(CoordinationMode::Elicitation, Arc::clone(&provider));
    let gate = builder.build().unwrap();
    let elicitor = ScriptedElicitor::always(ElicitationAction::Decline);
    let ctx = CallerContext::for_session("s1").with_elicitor(elicitor.clone());

    let err = gate
        .try_call_tool(call("generate", dog()), Some(&ctx))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "payment_cancelled");
    assert_eq!(runs(&counter), 0);
    assert_eq!(elicitor.attempts(), [1]);

    let record = gate.store().get("pay_1").await.unwrap().unwrap();
    assert_eq!(record.status, InvocationStatus::Cancelled);
}

#[tokio::test]
async fn elicitation_asks_again_until_paid() {
    let provider = StubProvider::new();
    provider.pending_for(1);
    provider.settle(PaymentStatus::Paid);
    let (builder, counter) = generate_gate(CoordinationMode::Elicitation, Arc::clone(&provider));
    let gate = builder.build().unwrap();
    let elicitor = ScriptedElicitor::always(ElicitationAction::Accept);
    let ctx = CallerContext::for_session("s1").with_elicitor(elicitor.clone());

    let outcome = gate
        .try_call_tool(call("generate", dog()), Some(&ctx))
        .await
        .unwrap();
    assert!(matches!(outcome, ToolOutcome::Completed { .. }));
    assert_eq!(elicitor.attempts(), [1, 2]);
    assert_eq!(runs(&counter), 1);
}

#[tokio::test]
async fn elicitation_gives_up_after_max_attempts() {
    let provider = StubProvider::new();
    let (builder, counter) = generate_gate(CoordinationMode::Elicitation, Arc::clone(&provider));
    let gate = builder
        .elicitation(ElicitationConfig { max_attempts: 2 })
        .build()
        .unwrap();
    let elicitor = ScriptedElicitor::always(ElicitationAction::Accept);
    let ctx = CallerContext::for_session("s1").with_elicitor(elicitor.clone());

    let err = gate
        .try_call_tool(call("generate", dog()), Some(&ctx))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "payment_timeout");
    assert_eq!(elicitor.attempts(), [1, 2]);
    assert_eq!(runs(&counter), 0);
    let record = gate.store().get("pay_1").await.unwrap().unwrap();
    assert_eq!(record.status, InvocationStatus::Expired);
}

#[tokio::test]
async fn elicitation_transport_failure_expires_the_attempt() {
    let provider = StubProvider::new();
    let (builder, _) = generate_gate(CoordinationMode::Elicitation, Arc::clone(&provider));
    let gate = builder.build().unwrap();
    let elicitor = ScriptedElicitor::scripted(
        vec![Err(TransportError("client went away".into()))],
        ElicitationAction::Accept,
    );
    let ctx = CallerContext::for_session("s1").with_elicitor(elicitor);

    let err = gate
        .try_call_tool(call("generate", dog()), Some(&ctx))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "payment_cancelled");
    let record = gate.store().get("pay_1").await.unwrap().unwrap();
    assert_eq!(record.status, InvocationStatus::Expired);
}

#[tokio::test]
async fn elicitation_without_a_channel_creates_no_payment() {
    let provider = StubProvider::new();
    let (builder, _) = generate_gate(CoordinationMode::Elicitation, Arc::clone(&provider));
    let gate = builder.build().unwrap();

    let err = gate
        .try_call_tool(call("generate", dog()), Some(&CallerContext::for_session("s1")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "unsupported_mode");
    assert_eq!(provider.created(), 0);
}

#[tokio::test]
async fn auto_falls_back_to_resubmit() {
    let provider = StubProvider::new();
    let (builder, _) = generate_gate(CoordinationMode::Auto, Arc::clone(&provider));
    let gate = builder.build().unwrap();

    let err = gate
        .try_call_tool(call("generate", dog()), Some(&CallerContext::for_session("s1")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "payment_required");
    let record = gate.store().get(&payment_id_of(&err)).await.unwrap().unwrap();
    assert_eq!(record.mode, CoordinationMode::Resubmit);
}

#[tokio::test]
async fn argument_drift_is_rejected() {
    let provider = StubProvider::new();
    let (builder, counter) = generate_gate(CoordinationMode::Resubmit, Arc::clone(&provider));
    let gate = builder.build().unwrap();
    let ctx = CallerContext::for_session("s1");

    let err = gate
        .try_call_tool(call("generate", dog()), Some(&ctx))
        .await
        .unwrap_err();
    let payment_id = payment_id_of(&err);
    provider.settle(PaymentStatus::Paid);

    let cat = common::args(json!({"prompt": "a cat"}));
    let err = gate
        .try_call_tool(call("generate", with_payment_id(cat, &payment_id)), Some(&ctx))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_payment_reference");
    assert_eq!(runs(&counter), 0);

    let record = gate.store().get(&payment_id).await.unwrap().unwrap();
    assert_eq!(record.status, InvocationStatus::Pending);

    // Key order does not matter.
    let reordered = common::args(json!({"prompt": "a dog"}));
    let ok = gate
        .try_call_tool(call("generate", with_payment_id(reordered, &payment_id)), Some(&ctx))
        .await
        .unwrap();
    assert!(matches!(ok, ToolOutcome::Completed { .. }));
}

#[tokio::test]
async fn provider_outage_leaves_the_record_pending() {
    let provider = StubProvider::new();
    let (builder, counter) = generate_gate(CoordinationMode::Resubmit, Arc::clone(&provider));
    let gate = builder.build().unwrap();
    let ctx = CallerContext::for_session("s1");

    let err = gate
        .try_call_tool(call("generate", dog()), Some(&ctx))
        .await
        .unwrap_err();
    let payment_id = payment_id_of(&err);

    provider.set_outage(true);
    let err = gate
        .try_call_tool(call("generate", with_payment_id(dog(), &payment_id)), Some(&ctx))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "provider_error");
    assert!(err.envelope().retryable);
    let record = gate.store().get(&payment_id).await.unwrap().unwrap();
    assert_eq!(record.status, InvocationStatus::Pending);

    provider.set_outage(false);
    provider.settle(PaymentStatus::Paid);
    let ok = gate
        .try_call_tool(call("generate", with_payment_id(dog(), &payment_id)), Some(&ctx))
        .await
        .unwrap();
    assert!(matches!(ok, ToolOutcome::Completed { .. }));
    assert_eq!(runs(&counter), 1);
    assert_eq!(provider.created(), 1);
}

#[tokio::test]
async fn failed_payments_are_terminal() {
    let provider = StubProvider::new();
    let (builder, counter) = generate_gate(CoordinationMode::Resubmit, Arc::clone(&provider));
    let gate = builder.build().unwrap();
    let ctx = CallerContext::for_session("s1");

    let err = gate
        .try_call_tool(call("generate", dog()), Some(&ctx))
        .await
        .unwrap_err();
    let payment_id = payment_id_of(&err);
    provider.settle(PaymentStatus::Failed);

    let err = gate
        .try_call_tool(call("generate", with_payment_id(dog(), &payment_id)), Some(&ctx))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "payment_failed");
    assert_eq!(err.envelope().data, Some(json!({"status": "failed"})));

    let err = gate
        .try_call_tool(call("generate", with_payment_id(dog(), &payment_id)), Some(&ctx))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_payment_reference");
    assert_eq!(runs(&counter), 0);
}

#[tokio::test]
async fn expired_payments_cannot_be_used_and_are_purged() {
    let provider = StubProvider::new();
    let (builder, counter) = generate_gate(CoordinationMode::Resubmit, Arc::clone(&provider));
    let gate = builder.payment_ttl(Duration::ZERO).build().unwrap();
    let ctx = CallerContext::for_session("s1");

    let err = gate
        .try_call_tool(call("generate", dog()), Some(&ctx))
        .await
        .unwrap_err();
    let payment_id = payment_id_of(&err);
    provider.settle(PaymentStatus::Paid);

    let err = gate
        .try_call_tool(call("generate", with_payment_id(dog(), &payment_id)), Some(&ctx))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_payment_reference");
    assert_eq!(runs(&counter), 0);
    let record = gate.store().get(&payment_id).await.unwrap().unwrap();
    assert_eq!(record.status, InvocationStatus::Expired);

    assert_eq!(gate.purge_expired().await.unwrap(), 1);
    assert!(gate.store().get(&payment_id).await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_payment_ids_are_rejected() {
    let (builder, _) = generate_gate(CoordinationMode::Resubmit, StubProvider::new());
    let gate = builder.build().unwrap();

    let result = gate
        .call_tool(
            call("generate", with_payment_id(dog(), "pay_404")),
            Some(&CallerContext::for_session("s1")),
        )
        .await;
    let envelope = extract_error_from_result(&result).unwrap();
    assert_eq!(envelope.code, "invalid_payment_reference");
    assert_eq!(envelope.payment_id.as_deref(), Some("pay_404"));
    assert!(!envelope.retryable);
}

#[tokio::test]
async fn two_step_failure_removes_the_attempt() {
    let provider = StubProvider::new();
    let (builder, counter) = generate_gate(CoordinationMode::TwoStep, Arc::clone(&provider));
    let gate = builder.build().unwrap();
    let ctx = CallerContext::for_session("s1");

    let pending = gate
        .try_call_tool(call("generate", dog()), Some(&ctx))
        .await
        .unwrap();
    let ToolOutcome::PaymentPending(prompt) = pending else {
        panic!("expected a pending payment");
    };
    provider.settle(PaymentStatus::Cancelled);

    let err = gate
        .try_call_tool(
            call(
                "confirm_generate_payment",
                with_payment_id(serde_json::Map::new(), &prompt.payment_id),
            ),
            Some(&ctx),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CallError::Payment(PaymentError::PaymentFailed { status: PaymentStatus::Cancelled, .. })
    ));
    assert!(gate.store().get(&prompt.payment_id).await.unwrap().is_none());
    assert_eq!(runs(&counter), 0);
}

#[tokio::test]
async fn tool_failure_after_payment_can_be_retried() {
    let provider = StubProvider::new();
    let (builder, counter) =
        flaky_generate_gate(CoordinationMode::Resubmit, Arc::clone(&provider), 1);
    let gate = builder.build().unwrap();
    let ctx = CallerContext::for_session("s1");
    let paid_call = || call("generate", with_payment_id(dog(), "pay_1"));

    let _ = gate.call_tool(call("generate", dog()), Some(&ctx)).await;
    provider.settle(PaymentStatus::Paid);

    let err = gate.try_call_tool(paid_call(), Some(&ctx)).await.unwrap_err();
    assert_eq!(err.code(), "tool_error");
    let record = gate.store().get("pay_1").await.unwrap().unwrap();
    assert_eq!(record.status, InvocationStatus::Paid);
    assert_eq!(record.result, None);

    // The retry does not ask the provider again.
    let reads = provider.status_reads();
    let retried = gate.try_call_tool(paid_call(), Some(&ctx)).await.unwrap();
    assert_eq!(retried, ToolOutcome::completed(json!({"image": "a dog.png"})));
    assert_eq!(provider.status_reads(), reads);
    assert_eq!(runs(&counter), 2);

    let replay = gate.try_call_tool(paid_call(), Some(&ctx)).await.unwrap();
    assert_eq!(
        replay,
        ToolOutcome::AlreadyProcessed {
            payment_id: "pay_1".into(),
            result: Some(json!({"image": "a dog.png"})),
        }
    );
    assert_eq!(runs(&counter), 2);
    assert_eq!(provider.created(), 1);
}

#[tokio::test]
async fn reissued_payment_ids_do_not_replace_the_held_call() {
    let provider = StubProvider::new();
    let (builder, counter) = generate_gate(CoordinationMode::Resubmit, Arc::clone(&provider));
    let gate = builder.build().unwrap();
    let ctx = CallerContext::for_session("s1");

    let _ = gate.call_tool(call("generate", dog()), Some(&ctx)).await;
    provider.reuse_ids();

    let cat = args(json!({"prompt": "a cat"}));
    let err = gate
        .try_call_tool(call("generate", cat), Some(&ctx))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "store_error");

    let record = gate.store().get("pay_1").await.unwrap().unwrap();
    assert_eq!(record.arguments, dog());
    assert_eq!(record.status, InvocationStatus::Pending);

    provider.settle(PaymentStatus::Paid);
    let paid = gate
        .try_call_tool(call("generate", with_payment_id(dog(), "pay_1")), Some(&ctx))
        .await
        .unwrap();
    assert_eq!(paid, ToolOutcome::completed(json!({"image": "a dog.png"})));
    assert_eq!(runs(&counter), 1);
}

#[tokio::test]
async fn confirm_payment_is_scoped_to_the_holding_session() {
    let provider = StubProvider::new();
    let (builder, counter) = generate_gate(CoordinationMode::DynamicTools, Arc::clone(&provider));
    let gate = builder.build().unwrap();
    let owner = CallerContext::for_session("s1");
    let other = CallerContext::for_session("s2");

    let ToolOutcome::PaymentPending(prompt) = gate
        .try_call_tool(call("generate", dog()), Some(&owner))
        .await
        .unwrap()
    else {
        panic!("expected a pending payment");
    };
    provider.settle(PaymentStatus::Paid);
    let confirm = || {
        call(
            "confirm_payment",
            with_payment_id(serde_json::Map::new(), &prompt.payment_id),
        )
    };

    let err = gate.try_call_tool(confirm(), Some(&other)).await.unwrap_err();
    assert_eq!(err.code(), "invalid_payment_reference");
    assert_eq!(runs(&counter), 0);

    let err = gate
        .try_call_tool(confirm(), Some(&CallerContext::default()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "missing_context");

    let done = gate.try_call_tool(confirm(), Some(&owner)).await.unwrap();
    assert!(matches!(done, ToolOutcome::Completed { .. }));

    // Nor can another session collect the stored result.
    let err = gate.try_call_tool(confirm(), Some(&other)).await.unwrap_err();
    assert_eq!(err.code(), "invalid_payment_reference");
    assert_eq!(runs(&counter), 1);
}
