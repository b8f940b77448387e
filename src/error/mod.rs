use thiserror::Error;

/// Configuration validation failures.
///
/// Every variant belongs to the same "pg config validation error" category;
/// only the first missing field is ever reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("pg config validation error: host is empty")]
    EmptyHost,

    #[error("pg config validation error: port is empty")]
    EmptyPort,

    #[error("pg config validation error: database is empty")]
    EmptyDatabase,

    #[error("pg config validation error: user is empty")]
    EmptyUser,

    #[error("pg config validation error: password is empty")]
    EmptyPassword,
}

impl ValidationError {
    /// Name of the field that failed validation.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::EmptyHost => "host",
            ValidationError::EmptyPort => "port",
            ValidationError::EmptyDatabase => "database",
            ValidationError::EmptyUser => "user",
            ValidationError::EmptyPassword => "password",
        }
    }
}

#[derive(Debug, Error)]
pub enum PgError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("connection to postgres database is lost")]
    LostConnection,

    #[error("query hook failed: {0}")]
    Hook(String),

    /// Driver errors are passed through untouched.
    #[error(transparent)]
    Driver(#[from] sqlx::Error),
}

impl PgError {
    /// Returns true when a single-row query came back empty.
    pub fn is_no_rows(&self) -> bool {
        matches!(self, PgError::Driver(sqlx::Error::RowNotFound))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, PgError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, PgError>;
