//! PostgreSQL connection pool handle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode};
use sqlx::ConnectOptions;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::{PgError, Result};

use super::hook::{QueryEvent, QueryHook, QueryLogger};

/// How long a caller may wait to check a connection out of the pool.
pub const POOL_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Upper bound on a reachability probe, covering the dial to the server.
///
/// sqlx keeps retrying refused connections until [`POOL_TIMEOUT`], so probes
/// are cut off here instead.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Reachability probe.
pub const SERVER_TIME_QUERY: &str = "SELECT now()";

/// Driver capabilities a [`Db`] needs from its pool.
#[async_trait]
pub trait PoolHandle: Clone + Send + Sync + 'static {
    /// Run a query returning a single timestamp column.
    async fn fetch_timestamp(&self, sql: &str) -> std::result::Result<DateTime<Utc>, sqlx::Error>;

    /// Release every pooled connection.
    async fn close(&self) -> std::result::Result<(), sqlx::Error>;
}

#[async_trait]
impl PoolHandle for PgPool {
    async fn fetch_timestamp(&self, sql: &str) -> std::result::Result<DateTime<Utc>, sqlx::Error> {
        sqlx::query_scalar::<_, DateTime<Utc>>(sql)
            .fetch_one(self)
            .await
    }

    async fn close(&self) -> std::result::Result<(), sqlx::Error> {
        PgPool::close(self).await;
        Ok(())
    }
}

/// Database handle representing a pool of zero or more underlying
/// connections. Safe for concurrent use; share it behind an `Arc`.
///
/// A default-constructed handle has no pool: probes report it as
/// disconnected and queries fail with [`PgError::LostConnection`].
pub struct Db<P = PgPool> {
    /// The underlying pool, `None` once closed
    pool: RwLock<Option<P>>,

    /// Hooks run around every query issued through this handle
    hooks: Vec<Arc<dyn QueryHook>>,

    /// Configuration the handle was opened with
    config: Config,
}

impl Db<PgPool> {
    /// Open a pool for `config` and verify the server is reachable.
    ///
    /// The pool is sized by `pool_size` and hands out connections with a
    /// one hour checkout timeout. The probe gives up after
    /// [`CONNECT_TIMEOUT`]; if it fails the pool is closed and the error
    /// returned.
    pub async fn connect(config: &Config) -> Result<Self> {
        let options = connect_options(config)?;

        if config.max_idle_conns > 0 || config.max_open_conns > 0 {
            tracing::warn!(
                max_idle_conns = config.max_idle_conns,
                max_open_conns = config.max_open_conns,
                "max_idle_conns and max_open_conns are not applied; pool_size sizes the pool"
            );
        }

        let pool_size = config.effective_pool_size();
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(POOL_TIMEOUT)
            .connect_lazy_with(options);

        tracing::info!(
            pool_size,
            addr = %config.addr(),
            database = %config.database,
            "PostgreSQL connection pool created"
        );

        Self::open(pool, config.clone()).await
    }

    /// The underlying pool, for queries this handle does not wrap.
    pub async fn pool(&self) -> Result<PgPool> {
        self.handle().await
    }

    /// Run `sql` expecting exactly one row.
    ///
    /// Zero rows is reported as the driver's `RowNotFound`; see
    /// [`PgError::is_no_rows`].
    pub async fn query_one<O>(&self, sql: &str) -> Result<O>
    where
        O: for<'r> sqlx::FromRow<'r, PgRow> + Send + Unpin,
    {
        let pool = self.handle().await?;
        self.run_hooked(sql, || async move {
            sqlx::query_as::<_, O>(sql).fetch_one(&pool).await
        })
        .await
    }
}

fn connect_options(config: &Config) -> Result<PgConnectOptions> {
    let port: u16 = config
        .port
        .parse()
        .map_err(|_| PgError::InvalidPort(config.port.clone()))?;

    Ok(PgConnectOptions::new()
        .host(&config.host)
        .port(port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.database)
        .ssl_mode(PgSslMode::Disable)
        // QueryLogger logs statements; slow statements still warn
        .log_statements(log::LevelFilter::Off))
}

impl<P: PoolHandle> Db<P> {
    /// Wrap an already opened pool and probe it.
    ///
    /// Installs [`QueryLogger`] when `config.debug` is set. The probe gives up
    /// after [`CONNECT_TIMEOUT`]; on failure the pool is closed before the
    /// error is returned.
    pub async fn open(pool: P, config: Config) -> Result<Self> {
        let mut db = Self {
            pool: RwLock::new(Some(pool)),
            hooks: Vec::new(),
            config,
        };

        if db.config.debug {
            db.add_query_hook(Arc::new(QueryLogger));
        }

        if let Err(e) = db.check_reachable().await {
            tracing::warn!(
                error = %e,
                addr = %db.config.addr(),
                "PostgreSQL is unreachable, closing pool"
            );
            let _ = db.close().await;
            return Err(e);
        }

        Ok(db)
    }

    pub fn add_query_hook(&mut self, hook: Arc<dyn QueryHook>) {
        self.hooks.push(hook);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Checks connection status with a live round trip, bounded by
    /// [`CONNECT_TIMEOUT`].
    pub async fn is_connected(&self) -> bool {
        self.check_reachable().await.is_ok()
    }

    /// Current time according to the database server.
    pub async fn server_time(&self) -> Result<DateTime<Utc>> {
        let pool = self.handle().await?;
        self.run_hooked(SERVER_TIME_QUERY, || async move {
            pool.fetch_timestamp(SERVER_TIME_QUERY).await
        })
        .await
    }

    /// Close the pool. Later calls are no-ops.
    pub async fn close(&self) -> Result<()> {
        let Some(pool) = self.pool.write().await.take() else {
            return Ok(());
        };

        pool.close().await?;
        tracing::info!(addr = %self.config.addr(), "PostgreSQL connection pool closed");
        Ok(())
    }

    async fn check_reachable(&self) -> Result<DateTime<Utc>> {
        match tokio::time::timeout(CONNECT_TIMEOUT, self.server_time()).await {
            Ok(result) => result,
            Err(_) => Err(PgError::Driver(sqlx::Error::PoolTimedOut)),
        }
    }

    async fn handle(&self) -> Result<P> {
        self.pool.read().await.clone().ok_or(PgError::LostConnection)
    }

    async fn run_hooked<T, F, Fut>(&self, sql: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        let mut event = QueryEvent::new(sql);
        for hook in &self.hooks {
            hook.before_query(&event)?;
        }

        let result = operation().await;
        event.finish(result.as_ref().err().map(|e| e.to_string()));

        let after = self
            .hooks
            .iter()
            .try_for_each(|hook| hook.after_query(&event));
        let value = result?;
        after?;

        Ok(value)
    }
}

impl<P> Default for Db<P> {
    fn default() -> Self {
        Self {
            pool: RwLock::new(None),
            hooks: Vec::new(),
            config: Config::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct FakePool {
        queries: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        unreachable: bool,
        stalled: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PoolHandle for FakePool {
        async fn fetch_timestamp(
            &self,
            _sql: &str,
        ) -> std::result::Result<DateTime<Utc>, sqlx::Error> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if self.stalled.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.unreachable {
                return Err(sqlx::Error::PoolTimedOut);
            }
            Ok(Utc::now())
        }

        async fn close(&self) -> std::result::Result<(), sqlx::Error> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        before: Mutex<Vec<String>>,
        after: Mutex<Vec<(String, bool)>>,
    }

    impl QueryHook for Recorder {
        fn before_query(&self, event: &QueryEvent) -> std::result::Result<(), PgError> {
            self.before
                .lock()
                .unwrap()
                .push(event.formatted_query().to_string());
            Ok(())
        }

        fn after_query(&self, event: &QueryEvent) -> std::result::Result<(), PgError> {
            self.after
                .lock()
                .unwrap()
                .push((event.formatted_query().to_string(), event.error().is_some()));
            Ok(())
        }
    }

    struct Reject;

    impl QueryHook for Reject {
        fn before_query(&self, _event: &QueryEvent) -> std::result::Result<(), PgError> {
            Err(PgError::Hook("rejected".to_string()))
        }
    }

    #[tokio::test]
    async fn test_open_probes_once() {
        let fake = FakePool::default();
        let db = Db::open(fake.clone(), Config::default()).await.unwrap();

        assert_eq!(fake.queries.load(Ordering::SeqCst), 1);
        assert_eq!(fake.closes.load(Ordering::SeqCst), 0);
        assert!(db.is_connected().await);
        assert_eq!(fake.queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_open_closes_unreachable_pool() {
        let fake = FakePool {
            unreachable: true,
            ..Default::default()
        };

        let err = Db::open(fake.clone(), Config::default())
            .await
            .err()
            .expect("open should fail");

        assert!(matches!(err, PgError::Driver(sqlx::Error::PoolTimedOut)));
        assert_eq!(fake.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_gives_up_on_stalled_server() {
        let fake = FakePool::default();
        fake.stalled.store(true, Ordering::SeqCst);
        let started = tokio::time::Instant::now();

        let err = Db::open(fake.clone(), Config::default())
            .await
            .err()
            .expect("open should fail");

        assert!(matches!(err, PgError::Driver(sqlx::Error::PoolTimedOut)));
        assert!(started.elapsed() >= CONNECT_TIMEOUT);
        assert!(started.elapsed() < CONNECT_TIMEOUT + Duration::from_secs(1));
        assert_eq!(fake.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_connected_gives_up_on_stalled_server() {
        let fake = FakePool::default();
        let db = Db::open(fake.clone(), Config::default()).await.unwrap();
        fake.stalled.store(true, Ordering::SeqCst);
        let started = tokio::time::Instant::now();

        assert!(!db.is_connected().await);
        assert!(started.elapsed() < CONNECT_TIMEOUT + Duration::from_secs(1));
        assert_eq!(fake.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_debug_installs_logger() {
        let mut config = Config::default();
        config.debug = true;
        let db = Db::open(FakePool::default(), config).await.unwrap();
        assert_eq!(db.hooks.len(), 1);

        let db = Db::open(FakePool::default(), Config::default()).await.unwrap();
        assert!(db.hooks.is_empty());
    }

    #[tokio::test]
    async fn test_hooks_observe_queries() {
        let fake = FakePool::default();
        let mut db = Db::open(fake, Config::default()).await.unwrap();
        let recorder = Arc::new(Recorder::default());
        db.add_query_hook(recorder.clone());

        db.server_time().await.unwrap();

        assert_eq!(*recorder.before.lock().unwrap(), vec![SERVER_TIME_QUERY]);
        assert_eq!(
            *recorder.after.lock().unwrap(),
            vec![(SERVER_TIME_QUERY.to_string(), false)]
        );
    }

    #[tokio::test]
    async fn test_before_hook_error_skips_query() {
        let fake = FakePool::default();
        let mut db = Db::open(fake.clone(), Config::default()).await.unwrap();
        db.add_query_hook(Arc::new(Reject));

        let err = db.server_time().await.unwrap_err();
        assert!(matches!(err, PgError::Hook(_)));
        // only the probe from open reached the pool
        assert_eq!(fake.queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_handle_is_disconnected() {
        let db: Db<FakePool> = Db::default();

        assert!(!db.is_connected().await);
        assert!(matches!(
            db.server_time().await,
            Err(PgError::LostConnection)
        ));
        assert!(db.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let fake = FakePool::default();
        let db = Db::open(fake.clone(), Config::default()).await.unwrap();

        assert!(db.close().await.is_ok());
        assert!(db.close().await.is_ok());
        assert_eq!(fake.closes.load(Ordering::SeqCst), 1);

        let queries = fake.queries.load(Ordering::SeqCst);
        assert!(matches!(
            db.server_time().await,
            Err(PgError::LostConnection)
        ));
        assert_eq!(fake.queries.load(Ordering::SeqCst), queries);
    }

    #[test]
    fn test_connect_options_from_config() {
        let config = Config {
            host: "db.internal".to_string(),
            port: "6432".to_string(),
            database: "pcs".to_string(),
            user: "app".to_string(),
            password: "hunter2".to_string(),
            debug: true,
            ..Default::default()
        };

        let options = connect_options(&config).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6432);
        assert_eq!(options.get_username(), "app");
        assert_eq!(options.get_database(), Some("pcs"));
        assert!(matches!(options.get_ssl_mode(), PgSslMode::Disable));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_port() {
        let config = Config {
            host: "localhost".to_string(),
            port: "not-a-port".to_string(),
            database: "pcs".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            ..Default::default()
        };

        let err = Db::connect(&config).await.err().expect("connect should fail");
        assert!(matches!(err, PgError::InvalidPort(ref p) if p == "not-a-port"));
    }
}
