//! Postgres plumbing: pooled connections and the statement executor.

pub mod manager;
pub mod postgres;

pub use manager::{ConnectionManager, ConnectionOptions, Permissions, PoolStats};
pub use postgres::PgExecutor;
