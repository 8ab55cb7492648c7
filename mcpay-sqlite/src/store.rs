use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use mcpay::error::StoreError;
use mcpay::invocation::{InvocationStatus, PendingInvocation};
use mcpay::provider::BoxFuture;
use mcpay::store::{StateStore, check_overwrite, check_transition};
use mcpay::timestamp::UnixTimestamp;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS pending_invocations (
        payment_id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        expires_at INTEGER NOT NULL,
        record TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_pending_invocations_expires_at
        ON pending_invocations(expires_at);
";

/// How long a writer waits for another process's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Persistent, shareable state store backed by SQLite.
///
/// Each record is stored as JSON alongside its status and expiry, which are
/// kept in their own columns so purges never decode the body.
/// Every write runs in an `IMMEDIATE` transaction, which makes the
/// check-then-write of [`StateStore::put`] and [`StateStore::transition`]
/// atomic across processes as well as threads.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    /// Opens (or creates) a store at `path`.
    ///
    /// On Unix the database file is restricted to 0600.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the file cannot be opened or the
    /// schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(StoreError::backend)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(StoreError::backend)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(StoreError::backend)?;
        conn.execute_batch(SCHEMA).map_err(StoreError::backend)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(_e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)) {
                #[cfg(feature = "telemetry")]
                tracing::warn!(
                    path = %path.display(),
                    error = %_e,
                    "failed to restrict state database permissions to 0600"
                );
            }
        }

        #[cfg(feature = "telemetry")]
        tracing::info!(path = %path.display(), "opened sqlite state store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// The database file this store was opened on.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await
        .map_err(StoreError::backend)?
    }
}

fn decode(json: &str) -> Result<PendingInvocation, StoreError> {
    Ok(serde_json::from_str(json)?)
}

fn to_sql_secs(ts: UnixTimestamp) -> i64 {
    i64::try_from(ts.as_secs()).unwrap_or(i64::MAX)
}

fn select_record(conn: &Connection, payment_id: &str) -> Result<Option<PendingInvocation>, StoreError> {
    conn.query_row(
        "SELECT record FROM pending_invocations WHERE payment_id = ?1",
        [payment_id],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map_err(StoreError::backend)?
    .as_deref()
    .map(decode)
    .transpose()
}

fn upsert(conn: &Connection, record: &PendingInvocation) -> Result<(), StoreError> {
    let json = serde_json::to_string(record)?;
    conn.execute(
        "INSERT INTO pending_invocations (payment_id, status, expires_at, record)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(payment_id) DO UPDATE SET
             status = excluded.status,
             expires_at = excluded.expires_at,
             record = excluded.record",
        params![
            record.payment_id,
            record.status.as_str(),
            to_sql_secs(record.expires_at),
            json
        ],
    )
    .map_err(StoreError::backend)?;
    Ok(())
}

impl StateStore for SqliteStore {
    fn insert(&self, record: PendingInvocation) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(self.with_conn(move |conn| {
            let json = serde_json::to_string(&record)?;
            let inserted = conn
                .execute(
                    "INSERT INTO pending_invocations (payment_id, status, expires_at, record)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(payment_id) DO NOTHING",
                    params![
                        record.payment_id,
                        record.status.as_str(),
                        to_sql_secs(record.expires_at),
                        json
                    ],
                )
                .map_err(StoreError::backend)?;
            if inserted == 0 {
                return Err(StoreError::Duplicate {
                    payment_id: record.payment_id,
                });
            }
            Ok(())
        }))
    }

    fn put(&self, record: PendingInvocation) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(StoreError::backend)?;
            if let Some(existing) = select_record(&tx, &record.payment_id)? {
                check_overwrite(&existing, &record)?;
            }
            upsert(&tx, &record)?;
            tx.commit().map_err(StoreError::backend)
        }))
    }

    fn get<'a>(
        &'a self,
        payment_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<PendingInvocation>, StoreError>> {
        let payment_id = payment_id.to_owned();
        Box::pin(self.with_conn(move |conn| select_record(conn, &payment_id)))
    }

    fn delete<'a>(&'a self, payment_id: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        let payment_id = payment_id.to_owned();
        Box::pin(self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM pending_invocations WHERE payment_id = ?1",
                [&payment_id],
            )
            .map_err(StoreError::backend)?;
            Ok(())
        }))
    }

    fn transition<'a>(
        &'a self,
        payment_id: &'a str,
        from: InvocationStatus,
        to: InvocationStatus,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        let payment_id = payment_id.to_owned();
        Box::pin(async move {
            check_transition(&payment_id, from, to)?;
            self.with_conn(move |conn| {
                let tx = conn
                    .transaction_with_behavior(TransactionBehavior::Immediate)
                    .map_err(StoreError::backend)?;
                let current = select_record(&tx, &payment_id)?;
                let Some(record) = current.filter(|r| r.status == from) else {
                    return Ok(false);
                };
                upsert(&tx, &record.with_status(to))?;
                tx.commit().map_err(StoreError::backend)?;
                Ok(true)
            })
            .await
        })
    }

    fn purge_expired(&self, now: UnixTimestamp) -> BoxFuture<'_, Result<usize, StoreError>> {
        Box::pin(self.with_conn(move |conn| {
            let purged = conn
                .execute(
                    "DELETE FROM pending_invocations WHERE expires_at <= ?1",
                    [to_sql_secs(now)],
                )
                .map_err(StoreError::backend)?;

            #[cfg(feature = "telemetry")]
            tracing::debug!(purged, "purged expired pending invocations");

            Ok(purged)
        }))
    }
}
