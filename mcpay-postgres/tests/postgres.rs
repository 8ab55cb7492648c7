//! Store contract against a live database.
//!
//! Runs only when `MCPAY_TEST_POSTGRES_URL` points at a scratch database.

#![allow(clippy::unwrap_used)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mcpay::config::PostgresStoreConfig;
use mcpay::error::StoreError;
use mcpay::invocation::{CallerIdentity, InvocationStatus, PendingInvocation};
use mcpay::mode::CoordinationMode;
use mcpay::price::Price;
use mcpay::provider::PaymentLink;
use mcpay::store::StateStore;
use mcpay::timestamp::UnixTimestamp;
use mcpay_postgres::PostgresStore;
use rust_decimal::Decimal;
use serde_json::json;

fn store() -> Option<PostgresStore> {
    let url = std::env::var("MCPAY_TEST_POSTGRES_URL").ok()?;
    Some(PostgresStore::connect(&PostgresStoreConfig::new(url)).unwrap())
}

/// Payment ids unique to this run, so runs can share a database.
fn id(name: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{name}_{}_{nanos}", std::process::id())
}

fn record(id: &str) -> PendingInvocation {
    PendingInvocation::new(
        id,
        "generate",
        json!({"prompt": "a dog"}).as_object().cloned().unwrap(),
        &Price::new(Decimal::ONE, "USD").unwrap(),
        CoordinationMode::Resubmit,
        CallerIdentity {
            session_id: Some("s1".into()),
            user_id: None,
        },
        PaymentLink::Url(format!("https://pay.example/{id}")),
        Duration::from_secs(600),
    )
}

#[tokio::test]
async fn insert_get_delete() {
    let Some(store) = store() else { return };
    let id = id("insert");
    let original = record(&id);

    store.insert(original.clone()).await.unwrap();
    assert_eq!(store.get(&id).await.unwrap(), Some(original.clone()));

    let mut reissued = record(&id);
    reissued.tool_name = "other".into();
    let err = store.insert(reissued).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate { .. }));
    assert_eq!(store.get(&id).await.unwrap(), Some(original));

    store.delete(&id).await.unwrap();
    assert_eq!(store.get(&id).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handles_on_separate_pools_share_one_winner() {
    let (Some(a), Some(b)) = (store(), store()) else {
        return;
    };
    let id = id("race");
    a.insert(record(&id)).await.unwrap();

    let (ra, rb) = tokio::join!(
        a.transition(&id, InvocationStatus::Pending, InvocationStatus::Executing),
        b.transition(&id, InvocationStatus::Pending, InvocationStatus::Executing),
    );
    let winners = [ra.unwrap(), rb.unwrap()].into_iter().filter(|w| *w).count();
    assert_eq!(winners, 1);
    assert_eq!(
        b.get(&id).await.unwrap().unwrap().status,
        InvocationStatus::Executing
    );
}

#[tokio::test]
async fn terminal_records_are_not_resurrected() {
    let Some(store) = store() else { return };
    let id = id("terminal");
    store
        .put(record(&id).with_status(InvocationStatus::Failed))
        .await
        .unwrap();

    let err = store.put(record(&id)).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::TerminalRecord {
            status: InvocationStatus::Failed,
            ..
        }
    ));
    let err = store
        .transition(&id, InvocationStatus::Failed, InvocationStatus::Pending)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::TerminalRecord { .. }));

    // Storing the result of a confirmed record keeps its status.
    let done = id.clone() + "_done";
    store.insert(record(&done)).await.unwrap();
    assert!(
        store
            .transition(&done, InvocationStatus::Pending, InvocationStatus::Confirmed)
            .await
            .unwrap()
    );
    let mut finalized = record(&done).with_status(InvocationStatus::Confirmed);
    finalized.result = Some(json!({"image": "a dog.png"}));
    store.put(finalized.clone()).await.unwrap();
    assert_eq!(store.get(&done).await.unwrap(), Some(finalized));
}

#[tokio::test]
async fn purge_removes_expired_records() {
    let Some(store) = store() else { return };
    let dead = id("dead");
    let live = id("live");
    let mut expired = record(&dead);
    expired.expires_at = UnixTimestamp::from_secs(10);
    store.insert(expired).await.unwrap();
    store.insert(record(&live)).await.unwrap();

    assert!(store.purge_expired(UnixTimestamp::now()).await.unwrap() >= 1);
    assert!(store.get(&dead).await.unwrap().is_none());
    assert!(store.get(&live).await.unwrap().is_some());
}
