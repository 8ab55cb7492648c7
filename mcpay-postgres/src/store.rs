use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mcpay::config::PostgresStoreConfig;
use mcpay::error::StoreError;
use mcpay::invocation::{InvocationStatus, PendingInvocation};
use mcpay::provider::BoxFuture;
use mcpay::store::{StateStore, check_overwrite, check_transition};
use mcpay::timestamp::UnixTimestamp;
use postgres::{Client, GenericClient, NoTls};
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;

type PgPool = Pool<PostgresConnectionManager<NoTls>>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS pending_invocations (
        payment_id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        expires_at BIGINT NOT NULL,
        record TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_pending_invocations_expires_at
        ON pending_invocations (expires_at);
";

const SELECT: &str = "SELECT status, record FROM pending_invocations WHERE payment_id = $1";

const SELECT_FOR_UPDATE: &str =
    "SELECT status, record FROM pending_invocations WHERE payment_id = $1 FOR UPDATE";

/// Networked state store backed by Postgres.
///
/// Each record is stored as JSON next to its status and expiry columns. The
/// status column is authoritative: [`StateStore::transition`] is one
/// `UPDATE ... WHERE status = $from`, so exactly one caller on any host wins
/// it. [`StateStore::put`] locks the row (`FOR UPDATE`) for its
/// check-then-write.
///
/// The `postgres` client is blocking; every call runs on tokio's blocking
/// pool. The schema is created on first use.
pub struct PostgresStore {
    pool: Option<PgPool>,
    migrated: Arc<AtomicBool>,
}

impl fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresStore")
            .field("open", &self.pool.is_some())
            .field("migrated", &self.migrated.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for PostgresStore {
    fn drop(&mut self) {
        // Closing clients blocks, which must not happen on a runtime thread.
        if let Some(pool) = self.pool.take() {
            let _ = std::thread::spawn(move || drop(pool));
        }
    }
}

impl PostgresStore {
    /// Builds a connection pool for `config`.
    ///
    /// No connection is opened here; the first store call connects and
    /// creates the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the connection string is malformed.
    pub fn connect(config: &PostgresStoreConfig) -> Result<Self, StoreError> {
        let mut pg_config = config
            .url
            .parse::<postgres::Config>()
            .map_err(StoreError::backend)?;
        pg_config.connect_timeout(config.connect_timeout());
        let options = format!("-c statement_timeout={}", config.statement_timeout_ms);
        pg_config.options(&options);

        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .min_idle(Some(0))
            .connection_timeout(config.connect_timeout())
            .build_unchecked(manager);

        #[cfg(feature = "telemetry")]
        tracing::info!(
            max_connections = config.max_connections,
            "configured postgres state store"
        );

        Ok(Self {
            pool: Some(pool),
            migrated: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Runs `f` on a pooled connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Client) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self
            .pool
            .clone()
            .ok_or_else(|| StoreError::backend("postgres store closed"))?;
        let migrated = Arc::clone(&self.migrated);
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(StoreError::backend)?;
            if !migrated.load(Ordering::Acquire) {
                conn.batch_execute(SCHEMA).map_err(StoreError::backend)?;
                migrated.store(true, Ordering::Release);

                #[cfg(feature = "telemetry")]
                tracing::debug!("postgres state store schema ready");
            }
            f(&mut *conn)
        })
        .await
        .map_err(StoreError::backend)?
    }
}

fn decode(status: &str, json: &str) -> Result<PendingInvocation, StoreError> {
    let mut record: PendingInvocation = serde_json::from_str(json)?;
    record.status = InvocationStatus::from_wire(status).ok_or_else(|| {
        StoreError::backend(format!(
            "unknown status '{status}' stored for payment '{}'",
            record.payment_id
        ))
    })?;
    Ok(record)
}

fn to_sql_secs(ts: UnixTimestamp) -> i64 {
    i64::try_from(ts.as_secs()).unwrap_or(i64::MAX)
}

fn select_record<C: GenericClient>(
    client: &mut C,
    query: &str,
    payment_id: &str,
) -> Result<Option<PendingInvocation>, StoreError> {
    client
        .query_opt(query, &[&payment_id])
        .map_err(StoreError::backend)?
        .map(|row| {
            let status: &str = row.get(0);
            let json: &str = row.get(1);
            decode(status, json)
        })
        .transpose()
}

/// Writes `record`; `on_conflict` decides what happens to an existing row.
fn write_record<C: GenericClient>(
    client: &mut C,
    record: &PendingInvocation,
    on_conflict: &str,
) -> Result<u64, StoreError> {
    let json = serde_json::to_string(record)?;
    let statement = format!(
        "INSERT INTO pending_invocations (payment_id, status, expires_at, record)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (payment_id) {on_conflict}"
    );
    client
        .execute(
            statement.as_str(),
            &[
                &record.payment_id,
                &record.status.as_str(),
                &to_sql_secs(record.expires_at),
                &json,
            ],
        )
        .map_err(StoreError::backend)
}

const REPLACE: &str = "DO UPDATE SET
    status = EXCLUDED.status,
    expires_at = EXCLUDED.expires_at,
    record = EXCLUDED.record";

const KEEP: &str = "DO NOTHING";

impl StateStore for PostgresStore {
    fn insert(&self, record: PendingInvocation) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(self.with_conn(move |conn| {
            if write_record(conn, &record, KEEP)? == 0 {
                return Err(StoreError::Duplicate {
                    payment_id: record.payment_id,
                });
            }
            Ok(())
        }))
    }

    fn put(&self, record: PendingInvocation) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(self.with_conn(move |conn| {
            let mut tx = conn.transaction().map_err(StoreError::backend)?;
            if let Some(existing) = select_record(&mut tx, SELECT_FOR_UPDATE, &record.payment_id)? {
                check_overwrite(&existing, &record)?;
            }
            write_record(&mut tx, &record, REPLACE)?;
            tx.commit().map_err(StoreError::backend)
        }))
    }

    fn get<'a>(
        &'a self,
        payment_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<PendingInvocation>, StoreError>> {
        let payment_id = payment_id.to_owned();
        Box::pin(self.with_conn(move |conn| select_record(conn, SELECT, &payment_id)))
    }

    fn delete<'a>(&'a self, payment_id: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        let payment_id = payment_id.to_owned();
        Box::pin(self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM pending_invocations WHERE payment_id = $1",
                &[&payment_id],
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
                let moved = conn
                    .execute(
                        "UPDATE pending_invocations SET status = $3
                         WHERE payment_id = $1 AND status = $2",
                        &[&payment_id, &from.as_str(), &to.as_str()],
                    )
                    .map_err(StoreError::backend)?;
                Ok(moved == 1)
            })
            .await
        })
    }

    fn purge_expired(&self, now: UnixTimestamp) -> BoxFuture<'_, Result<usize, StoreError>> {
        Box::pin(self.with_conn(move |conn| {
            let purged = conn
                .execute(
                    "DELETE FROM pending_invocations WHERE expires_at <= $1",
                    &[&to_sql_secs(now)],
                )
                .map_err(StoreError::backend)?;
            let purged = usize::try_from(purged).unwrap_or(usize::MAX);

            #[cfg(feature = "telemetry")]
            tracing::debug!(purged, "purged expired pending invocations");

            Ok(purged)
        }))
    }
}
