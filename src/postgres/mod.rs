//! PostgreSQL connection handle.
//!
//! Wraps an `sqlx` pool with reachability probing, query hooks and an
//! idempotent close.

pub mod hook;
pub mod pool;
pub mod query;

pub use hook::{QueryEvent, QueryHook, QueryLogger};
pub use pool::{Db, PoolHandle, CONNECT_TIMEOUT, POOL_TIMEOUT, SERVER_TIME_QUERY};
pub use query::push_in;
