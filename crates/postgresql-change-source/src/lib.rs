//! PostgreSQL change source for pos-event-bridge
//!
//! Uses an audit table (`pos_change_log`) populated by per-table triggers.
//! Each tracked table is registered once in a [`QueryRegistry`], validated
//! against `information_schema` at startup, and read through the typed query
//! templates it produces.

mod change_log;
mod pool;
mod registry;
mod source;

pub use change_log::{install_change_log, CHANGE_LOG_TABLE};
pub use pool::{new_postgresql_pool, PoolOpts};
pub use registry::{QueryRegistry, TableQueries, WRITE_BACK_COLUMNS};
pub use source::PostgresChangeSource;
