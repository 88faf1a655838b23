//! Error types for pgrun

use thiserror::Error;

/// Result type alias for runner operations
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Error types for the execution layer
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Driver other than `postgres` requested at construction time
    #[error("Unsupported driver: {0}")]
    UnsupportedDriver(String),

    /// Pool error
    #[error("Pool error: {0}")]
    Pool(String),

    /// Raw driver error
    #[error("Database error: {0}")]
    Db(#[from] tokio_postgres::Error),

    /// Execution error wrapped with the offending SQL text
    #[error("SQL `{sql}` failed: {source}")]
    Sql {
        sql: String,
        #[source]
        source: Box<RunnerError>,
    },

    /// Failure of one statement in a multi-statement execution
    #[error("Statement {index} failed: {source}")]
    Statement {
        index: usize,
        #[source]
        source: Box<RunnerError>,
    },

    /// Commit or rollback attempted after the transaction was rolled back
    #[error("Nested transaction already rolled back")]
    AlreadyRolledBack,

    /// Commit or rollback attempted after the transaction was committed
    #[error("Transaction already committed")]
    AlreadyCommitted,

    /// The builder collaborator could not render its statement
    #[error("Builder error: {0}")]
    Builder(String),

    /// Server escape-sequence configuration is unsafe for interpolation
    #[error("Unsafe interpolation: standard_conforming_strings={0}")]
    UnsafeEscapes(String),

    /// Row or scalar expected but not returned
    #[error("Not found: {0}")]
    NotFound(String),
}

impl RunnerError {
    /// Wrap an execution error with the SQL text that caused it
    pub fn sql(sql: impl Into<String>, source: RunnerError) -> Self {
        Self::Sql {
            sql: sql.into(),
            source: Box::new(source),
        }
    }

    /// Wrap an execution error with the index of the failing statement
    pub fn statement(index: usize, source: RunnerError) -> Self {
        Self::Statement {
            index,
            source: Box::new(source),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Check if this is the rollback-specific transaction error
    pub fn is_rolled_back(&self) -> bool {
        matches!(self, Self::AlreadyRolledBack)
    }

    /// Check if this is the double-commit transaction error
    pub fn is_already_committed(&self) -> bool {
        matches!(self, Self::AlreadyCommitted)
    }
}

impl From<deadpool_postgres::PoolError> for RunnerError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}
