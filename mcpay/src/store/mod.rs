//! Pending-invocation state stores.
//!
//! A [`StateStore`] maps a payment id to the [`PendingInvocation`] it
//! suspended. Every operation is atomic per key from the caller's point of
//! view; different payment ids never contend.
//!
//! Two backends satisfy the contract:
//!
//! - [`MemoryStore`] - in-process, lost on restart, not shared between servers
//! - `SqliteStore` (in the `mcpay-sqlite` crate) - durable and shared by every
//!   process that opens the same database file
//! - `PostgresStore` (in the `mcpay-postgres` crate) - a networked backend
//!   shared by servers on any number of hosts
//!
//! Mode state machines only ever talk to `dyn StateStore`, so swapping the
//! backend never changes their behavior.

mod memory;

pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::invocation::{InvocationStatus, PendingInvocation};
use crate::provider::BoxFuture;
use crate::timestamp::UnixTimestamp;

/// Persistence for pending invocations, keyed by payment id.
pub trait StateStore: Send + Sync {
    /// Stores a new record. Nothing may be stored under its payment id yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if a record already exists under
    /// `record.payment_id`, whatever its status.
    fn insert(&self, record: PendingInvocation) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Inserts or replaces the record stored under `record.payment_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TerminalRecord`] if the existing record is
    /// terminal and `record` carries a different status. Backend failures are
    /// reported as [`StoreError::Backend`].
    fn put(&self, record: PendingInvocation) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Reads the record stored under `payment_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails or the record cannot be decoded.
    fn get<'a>(
        &'a self,
        payment_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<PendingInvocation>, StoreError>>;

    /// Removes the record stored under `payment_id`. Removing an absent record is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn delete<'a>(&'a self, payment_id: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Atomically moves the record from `from` to `to`.
    ///
    /// Returns `true` if this call performed the transition, `false` if the
    /// record is absent or not in `from`. Exactly one of several racing
    /// callers observes `true`; finalization relies on this.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TerminalRecord`] when asked to leave a terminal
    /// status, and [`StoreError`] on backend failure.
    fn transition<'a>(
        &'a self,
        payment_id: &'a str,
        from: InvocationStatus,
        to: InvocationStatus,
    ) -> BoxFuture<'a, Result<bool, StoreError>>;

    /// Removes every record whose `expires_at` is at or before `now`.
    /// Returns the number of records removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn purge_expired(&self, now: UnixTimestamp) -> BoxFuture<'_, Result<usize, StoreError>>;
}

/// Checks whether `incoming` may replace `existing`.
///
/// Shared by every backend so the no-resurrection rule is enforced
/// identically.
///
/// # Errors
///
/// Returns [`StoreError::TerminalRecord`] if `existing` is terminal and
/// `incoming` carries a different status.
pub fn check_overwrite(
    existing: &PendingInvocation,
    incoming: &PendingInvocation,
) -> Result<(), StoreError> {
    if existing.status.is_terminal() && existing.status != incoming.status {
        return Err(StoreError::TerminalRecord {
            payment_id: existing.payment_id.clone(),
            status: existing.status,
        });
    }
    Ok(())
}

/// Checks whether a status transition is allowed at all.
///
/// # Errors
///
/// Returns [`StoreError::TerminalRecord`] if `from` is terminal and `to` differs.
pub fn check_transition(
    payment_id: &str,
    from: InvocationStatus,
    to: InvocationStatus,
) -> Result<(), StoreError> {
    if from.is_terminal() && from != to {
        return Err(StoreError::TerminalRecord {
            payment_id: payment_id.to_owned(),
            status: from,
        });
    }
    Ok(())
}
