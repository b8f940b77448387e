//! PostgreSQL configuration and connection handle built on `sqlx`.
//!
//! ```no_run
//! # async fn run() -> pg_handle::Result<()> {
//! use pg_handle::{Config, Db};
//!
//! let config = Config::load()?;
//! config.validate()?;
//!
//! let db = Db::connect(&config).await?;
//! println!("server time: {}", db.server_time().await?);
//! db.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod postgres;
pub mod telemetry;

pub use config::Config;
pub use error::{PgError, Result, ValidationError};
pub use postgres::{push_in, Db, PoolHandle, QueryEvent, QueryHook, QueryLogger};
