use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::Path;

use config::{Environment, File};
use serde::Deserialize;

use crate::error::{PgError, ValidationError};

/// Connections opened per CPU when `pool_size` is left at zero.
pub const DEFAULT_POOL_SIZE_PER_CPU: u32 = 10;

/// PostgreSQL connection settings.
///
/// `max_idle_conns` and `max_open_conns` are accepted for compatibility with
/// existing settings files but are not applied to the pool; only `pool_size`
/// sizes it.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: String,
    pub database: String,
    #[serde(rename = "username")]
    pub user: String,
    pub password: String,
    /// Notification channel name -> handler identifier
    pub notify: HashMap<String, String>,
    pub debug: bool,
    pub pool_size: u32,
    pub max_idle_conns: u32,
    pub max_open_conns: u32,
}

impl Config {
    /// Load settings from `config/pg`, `config/pg-{RUN_MODE}` and `PG_*`
    /// environment variables, later sources overriding earlier ones.
    ///
    /// Nested keys use a double underscore, e.g. `PG_NOTIFY__ORDERS=orders_handler`.
    /// Nothing is defaulted and the result is not validated.
    pub fn load() -> Result<Self, PgError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        Self::load_layered(Path::new("config"), &run_mode, env_source())
    }

    fn load_layered(dir: &Path, run_mode: &str, env: Environment) -> Result<Self, PgError> {
        let base = dir.join("pg");
        let mode = dir.join(format!("pg-{}", run_mode));

        let settings = config::Config::builder()
            .add_source(File::with_name(&base.to_string_lossy()).required(false))
            .add_source(File::with_name(&mode.to_string_lossy()).required(false))
            .add_source(env)
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Load settings from a single file; the format follows the extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PgError> {
        let settings = config::Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Checks required fields in a fixed order and reports the first one missing.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.is_empty() {
            return Err(ValidationError::EmptyHost);
        }

        if self.port.is_empty() {
            return Err(ValidationError::EmptyPort);
        }

        if self.database.is_empty() {
            return Err(ValidationError::EmptyDatabase);
        }

        if self.user.is_empty() {
            return Err(ValidationError::EmptyUser);
        }

        if self.password.is_empty() {
            return Err(ValidationError::EmptyPassword);
        }

        Ok(())
    }

    /// Connection string for this database. Does not validate.
    pub fn dsn(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode=disable",
            self.user, self.password, self.host, self.port, self.database
        )
    }

    /// Same as [`Config::dsn`] with the password masked, for logs.
    pub fn dsn_masked(&self) -> String {
        format!(
            "postgres://{}:***@{}:{}/{}?sslmode=disable",
            self.user, self.host, self.port, self.database
        )
    }

    /// `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Pool size handed to the driver. Zero means ten connections per CPU.
    pub fn effective_pool_size(&self) -> u32 {
        if self.pool_size > 0 {
            return self.pool_size;
        }

        let cpus = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        DEFAULT_POOL_SIZE_PER_CPU * cpus
    }
}

/// `PG_POOL_SIZE` -> `pool_size`, `PG_NOTIFY__ORDERS` -> `notify.orders`
fn env_source() -> Environment {
    Environment::with_prefix("PG")
        .prefix_separator("_")
        .separator("__")
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("notify", &self.notify)
            .field("debug", &self.debug)
            .field("pool_size", &self.pool_size)
            .field("max_idle_conns", &self.max_idle_conns)
            .field("max_open_conns", &self.max_open_conns)
            .finish()
    }
}
