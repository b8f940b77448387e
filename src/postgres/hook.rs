//! Query observation hooks.

use std::time::{Duration, Instant};

use crate::error::PgError;

/// A query passing through a [`Db`](super::Db) handle.
#[derive(Debug, Clone)]
pub struct QueryEvent {
    query: String,
    started_at: Instant,
    elapsed: Option<Duration>,
    error: Option<String>,
}

impl QueryEvent {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            started_at: Instant::now(),
            elapsed: None,
            error: None,
        }
    }

    /// Query text as sent to the server.
    pub fn formatted_query(&self) -> &str {
        &self.query
    }

    /// Execution time; `None` until the query has finished.
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    /// Driver error message if the query failed.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub(crate) fn finish(&mut self, error: Option<String>) {
        self.elapsed = Some(self.started_at.elapsed());
        self.error = error;
    }
}

/// Callbacks invoked around every query issued through a [`Db`](super::Db).
///
/// Returning an error from `before_query` aborts the query; an error from
/// `after_query` is reported only if the query itself succeeded.
pub trait QueryHook: Send + Sync {
    fn before_query(&self, _event: &QueryEvent) -> Result<(), PgError> {
        Ok(())
    }

    fn after_query(&self, _event: &QueryEvent) -> Result<(), PgError> {
        Ok(())
    }
}

/// Logs the text of each executed query. Installed when `debug` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryLogger;

impl QueryHook for QueryLogger {
    fn after_query(&self, event: &QueryEvent) -> Result<(), PgError> {
        tracing::info!(
            target: "pg_handle::query",
            elapsed_ms = event.elapsed().map(elapsed_ms).unwrap_or(0),
            failed = event.error().is_some(),
            "{}",
            event.formatted_query()
        );
        Ok(())
    }
}

fn elapsed_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
