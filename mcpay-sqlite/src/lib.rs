#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! SQLite-backed [`StateStore`](mcpay::StateStore) for mcpay.
//!
//! [`SqliteStore`] keeps pending invocations in a single database file in WAL
//! mode. Records survive restarts, and every server process that opens the
//! same file sees the same records, so a confirmation may land on a different
//! instance than the call that created the payment.
//!
//! ```no_run
//! use mcpay_sqlite::SqliteStore;
//!
//! # fn main() -> Result<(), mcpay::StoreError> {
//! let store = SqliteStore::open("/var/lib/mcpay/state.db")?;
//! # let _ = store;
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation

mod store;

pub use store::SqliteStore;
