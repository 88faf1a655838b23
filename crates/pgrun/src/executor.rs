//! The executor capability shared by pool connections and transactions.

use crate::error::{RunnerError, RunnerResult};
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

/// An object capable of executing SQL with arguments.
///
/// Both [`Db`](crate::Db) and [`Tx`](crate::Tx) expose this capability, so
/// raw SQL, scripts, and builder output execute identically whether or not
/// they run inside a transaction. Higher-level code should depend on this
/// trait, never on the concrete type behind it.
pub trait Executor: Send + Sync {
    /// Execute a statement and return the number of affected rows.
    fn execute(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = RunnerResult<u64>> + Send;

    /// Execute a query and return all rows.
    fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = RunnerResult<Vec<Row>>> + Send;

    /// Execute a query and decode the first column of the first row as text.
    ///
    /// Used for scalar server probes (`SHOW ...`, `pg_settings` lookups).
    fn query_scalar_text(
        &self,
        sql: &str,
    ) -> impl std::future::Future<Output = RunnerResult<String>> + Send {
        async move {
            let rows = self.query(sql, &[]).await?;
            let row = rows
                .first()
                .ok_or_else(|| RunnerError::not_found(format!("no rows from `{sql}`")))?;
            Ok(row.try_get::<_, String>(0)?)
        }
    }
}

impl Executor for tokio_postgres::Client {
    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> RunnerResult<u64> {
        Ok(tokio_postgres::Client::execute(self, sql, params).await?)
    }

    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> RunnerResult<Vec<Row>> {
        Ok(tokio_postgres::Client::query(self, sql, params).await?)
    }
}

impl Executor for tokio_postgres::Transaction<'_> {
    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> RunnerResult<u64> {
        Ok(tokio_postgres::Transaction::execute(self, sql, params).await?)
    }

    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> RunnerResult<Vec<Row>> {
        Ok(tokio_postgres::Transaction::query(self, sql, params).await?)
    }
}

impl Executor for deadpool_postgres::Client {
    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> RunnerResult<u64> {
        let client: &tokio_postgres::Client = self;
        Executor::execute(client, sql, params).await
    }

    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> RunnerResult<Vec<Row>> {
        let client: &tokio_postgres::Client = self;
        Executor::query(client, sql, params).await
    }
}

impl<E: Executor> Executor for &E {
    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> RunnerResult<u64> {
        (*self).execute(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> RunnerResult<Vec<Row>> {
        (*self).query(sql, params).await
    }

    fn query_scalar_text(
        &self,
        sql: &str,
    ) -> impl std::future::Future<Output = RunnerResult<String>> + Send {
        (*self).query_scalar_text(sql)
    }
}
