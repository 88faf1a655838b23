//! The uniform execution gateway.
//!
//! [`Runner`] is blanket-implemented for every [`Executor`], so a pooled
//! connection, an open transaction, and a test double all expose the same
//! surface for raw SQL, builder output, statement batches, and scripts.

use crate::error::{RunnerError, RunnerResult};
use crate::executor::Executor;
use crate::script::{script_separator, split_script};
use crate::statement::{SqlBuild, Statement};
use tokio_postgres::types::ToSql;

/// Uniform execution of SQL text, scripts, and builder-produced statements.
pub trait Runner: Executor {
    /// Execute a SQL statement and return the rows-affected count.
    ///
    /// Driver errors are logged and wrapped with the offending SQL text for
    /// diagnosability. Never retried; the caller decides whether to retry.
    fn exec(
        &self,
        sql: &str,
        args: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = RunnerResult<u64>> + Send {
        async move {
            match self.execute(sql, args).await {
                Ok(rows_affected) => Ok(rows_affected),
                Err(source) => {
                    tracing::error!(sql, args = args.len(), %source, "exec failed");
                    Err(RunnerError::sql(sql, source))
                }
            }
        }
    }

    /// Render a builder to its final SQL and arguments, then execute it.
    ///
    /// Rendering itself can fail (malformed builder state); that error is
    /// returned before anything reaches the database.
    fn exec_builder<B: SqlBuild + Sync + ?Sized>(
        &self,
        builder: &B,
    ) -> impl std::future::Future<Output = RunnerResult<u64>> + Send {
        async move {
            let (sql, args) = builder.interpolate()?;
            let params: Vec<&(dyn ToSql + Sync)> = args.iter().map(|a| a.as_ref() as _).collect();
            self.exec(&sql, &params).await
        }
    }

    /// Execute pre-built statements in order, stopping at the first failure.
    ///
    /// Returns the number of statements executed. On failure the error
    /// carries the index of the failing statement. Earlier statements'
    /// effects are left intact; undoing them is the caller's transaction
    /// responsibility.
    fn exec_multi(
        &self,
        statements: &[Statement],
    ) -> impl std::future::Future<Output = RunnerResult<usize>> + Send {
        async move {
            for (index, statement) in statements.iter().enumerate() {
                let params = statement.params();
                if let Err(source) = self.execute(statement.sql(), &params).await {
                    return Err(RunnerError::statement(
                        index,
                        RunnerError::sql(statement.sql(), source),
                    ));
                }
            }
            Ok(statements.len())
        }
    }

    /// Split a script on the `GO` separator and execute each statement
    /// sequentially, applying the same arguments to every statement.
    ///
    /// Stops at the first failure, wrapping the error with the offending
    /// statement text.
    fn exec_script(
        &self,
        script: &str,
        args: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = RunnerResult<()>> + Send {
        async move {
            for statement in split_script(script, script_separator()) {
                if let Err(source) = self.execute(statement, args).await {
                    tracing::error!(sql = statement, %source, "script statement failed");
                    return Err(RunnerError::sql(statement, source));
                }
            }
            Ok(())
        }
    }
}

impl<E: Executor + ?Sized> Runner for E {}
