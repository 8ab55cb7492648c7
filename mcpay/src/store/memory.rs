use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{StateStore, check_overwrite, check_transition};
use crate::error::StoreError;
use crate::invocation::{InvocationStatus, PendingInvocation};
use crate::provider::BoxFuture;
use crate::timestamp::UnixTimestamp;

/// In-process state store backed by a concurrent map.
///
/// Fast, but records are lost on restart and invisible to other server
/// instances. Use `mcpay_sqlite::SqliteStore` for restart-tolerant
/// single-host deployments and `mcpay_postgres::PostgresStore` across hosts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, PendingInvocation>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held, including terminal ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl StateStore for MemoryStore {
    fn insert(&self, record: PendingInvocation) -> BoxFuture<'_, Result<(), StoreError>> {
        let result = match self.records.entry(record.payment_id.clone()) {
            Entry::Occupied(occupied) => Err(StoreError::Duplicate {
                payment_id: occupied.key().clone(),
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                Ok(())
            }
        };
        Box::pin(async move { result })
    }

    fn put(&self, record: PendingInvocation) -> BoxFuture<'_, Result<(), StoreError>> {
        // The entry guard holds the shard lock, so check and write are one step.
        let result = match self.records.entry(record.payment_id.clone()) {
            Entry::Occupied(mut occupied) => {
                check_overwrite(occupied.get(), &record).map(|()| {
                    occupied.insert(record);
                })
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                Ok(())
            }
        };
        Box::pin(async move { result })
    }

    fn get<'a>(
        &'a self,
        payment_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<PendingInvocation>, StoreError>> {
        let record = self.records.get(payment_id).map(|r| r.value().clone());
        Box::pin(async move { Ok(record) })
    }

    fn delete<'a>(&'a self, payment_id: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        self.records.remove(payment_id);
        Box::pin(async { Ok(()) })
    }

    fn transition<'a>(
        &'a self,
        payment_id: &'a str,
        from: InvocationStatus,
        to: InvocationStatus,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        let result = check_transition(payment_id, from, to).map(|()| {
            self.records.get_mut(payment_id).is_some_and(|mut record| {
                if record.status == from {
                    record.status = to;
                    true
                } else {
                    false
                }
            })
        });
        Box::pin(async move { result })
    }

    fn purge_expired(&self, now: UnixTimestamp) -> BoxFuture<'_, Result<usize, StoreError>> {
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired_at(now));
        let purged = before.saturating_sub(self.records.len());
        Box::pin(async move { Ok(purged) })
    }
}
