//! Opening the configured state store.

use std::sync::Arc;

use mcpay::config::StoreConfig;
use mcpay::error::StoreError;
use mcpay::store::{MemoryStore, StateStore};
use mcpay_postgres::PostgresStore;
use mcpay_sqlite::SqliteStore;

/// Opens the backend named by `config`.
///
/// # Errors
///
/// Returns [`StoreError`] if a SQLite database cannot be opened or a
/// Postgres connection string is malformed. Postgres connects lazily.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn StateStore>, StoreError> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreConfig::Sqlite { path } => Ok(Arc::new(SqliteStore::open(path)?)),
        StoreConfig::Postgres(postgres) => Ok(Arc::new(PostgresStore::connect(postgres)?)),
    }
}
