//! Pre-built statements and the builder collaborator contract.

use crate::error::RunnerResult;
use std::sync::Arc;
use tokio_postgres::types::ToSql;

/// A clone-friendly owned SQL parameter.
pub type SqlParam = Arc<dyn ToSql + Sync + Send>;

/// An immutable pair of SQL text and ordered arguments, ready to execute.
///
/// The runner treats a statement as an opaque value; it never inspects how
/// the statement was constructed.
///
/// # Example
///
/// ```ignore
/// let stmt = Statement::new("UPDATE users SET status = $1 WHERE id = $2")
///     .bind("inactive")
///     .bind(42_i64);
/// ```
#[derive(Clone)]
pub struct Statement {
    sql: String,
    args: Vec<SqlParam>,
}

impl Statement {
    /// Create a statement from raw SQL.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    /// Bind an argument to the statement.
    pub fn bind<T: ToSql + Sync + Send + 'static>(mut self, value: T) -> Self {
        self.args.push(Arc::new(value));
        self
    }

    /// The SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Borrow the arguments in driver parameter form.
    pub fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.args.iter().map(|a| a.as_ref() as _).collect()
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql)
            .field("args", &self.args.len())
            .finish()
    }
}

/// The narrow contract consumed from the query-builder collaborator:
/// render the final SQL text and ordered argument list.
pub trait SqlBuild {
    /// Render the statement. Fails when the builder state is malformed.
    fn interpolate(&self) -> RunnerResult<(String, Vec<SqlParam>)>;
}

impl SqlBuild for Statement {
    fn interpolate(&self) -> RunnerResult<(String, Vec<SqlParam>)> {
        Ok((self.sql.clone(), self.args.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_accumulates_args_in_order() {
        let stmt = Statement::new("INSERT INTO t (a, b) VALUES ($1, $2)")
            .bind(1_i64)
            .bind("two");
        assert_eq!(stmt.sql(), "INSERT INTO t (a, b) VALUES ($1, $2)");
        assert_eq!(stmt.params().len(), 2);
    }

    #[test]
    fn statement_interpolates_to_itself() {
        let stmt = Statement::new("SELECT 1").bind(5_i32);
        let (sql, args) = stmt.interpolate().unwrap();
        assert_eq!(sql, "SELECT 1");
        assert_eq!(args.len(), 1);
    }
}
