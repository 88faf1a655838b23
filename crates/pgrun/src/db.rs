//! Connection pool manager, interpolation safety gate, and version probe.

use crate::config;
use crate::error::{RunnerError, RunnerResult};
use crate::executor::Executor;
use crate::pool::create_pool;
use crate::tx::Tx;
use deadpool_postgres::Pool;
use std::sync::Mutex;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

const CONFORMING_STRINGS_SQL: &str =
    "select setting from pg_settings where name='standard_conforming_strings'";

/// Cached result of the escape-sequence probe. Written once per process,
/// after the first successful query.
static CONFORMING_STRINGS: Mutex<Option<String>> = Mutex::new(None);

/// An abstract database connection pool.
///
/// Created once at startup; immutable after the safety gate and version
/// probe succeed. Implements [`Executor`], so non-transactional work runs
/// directly against pooled connections.
#[derive(Debug)]
pub struct Db {
    pool: Pool,
    driver: String,
    version: i64,
}

impl Db {
    /// Open and validate a connection pool for `driver` and `url`.
    ///
    /// Only the `postgres` driver is supported; anything else is rejected
    /// at construction time. A failed liveness probe is a fatal "cannot
    /// connect" condition and is not retried.
    pub async fn open(driver: &str, url: &str) -> RunnerResult<Db> {
        if driver != "postgres" {
            return Err(RunnerError::UnsupportedDriver(driver.to_string()));
        }
        let pool = create_pool(url)?;
        Db::from_pool(pool).await
    }

    /// Adopt an existing pool, running the safety gate and version probe.
    pub async fn from_pool(pool: Pool) -> RunnerResult<Db> {
        let mut db = Db {
            pool,
            driver: "postgres".to_string(),
            version: 0,
        };

        if let Err(err) = db.ping().await {
            config::fatal(&format!("cannot connect to database: {err}"));
            return Err(err);
        }

        pg_ensure_safe_interpolation(&db).await?;
        db.version = pg_server_version(&db).await?;

        if config::strict() {
            db.execute("SET client_min_messages TO 'DEBUG'", &[]).await?;
        }

        tracing::debug!(version = db.version, "database pool ready");
        Ok(db)
    }

    async fn ping(&self) -> RunnerResult<()> {
        self.query("SELECT 1", &[]).await?;
        Ok(())
    }

    /// Begin a new database transaction on a dedicated pooled connection.
    ///
    /// On failure returns a wrapped error (fatal in strict mode); never
    /// retried.
    pub async fn begin(&self) -> RunnerResult<Tx<deadpool_postgres::Client>> {
        let client = match self.pool.get().await {
            Ok(client) => client,
            Err(err) => {
                if config::strict() {
                    config::fatal("could not create transaction");
                }
                return Err(RunnerError::Pool(err.to_string()));
            }
        };
        if let Err(err) = Executor::execute(&client, "BEGIN", &[]).await {
            if config::strict() {
                config::fatal("could not create transaction");
            }
            return Err(err);
        }
        tracing::debug!("begin tx");
        Ok(Tx::wrap(client))
    }

    /// Detected server version (`server_version_num`, e.g. `170002`).
    pub fn version(&self) -> i64 {
        self.version
    }

    /// The driver name this pool was opened with.
    pub fn driver(&self) -> &str {
        &self.driver
    }

    /// Close the pool, releasing all resources.
    pub fn close(&self) {
        self.pool.close();
    }
}

impl Executor for Db {
    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> RunnerResult<u64> {
        let client = self.pool.get().await?;
        Executor::execute(&client, sql, params).await
    }

    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> RunnerResult<Vec<Row>> {
        let client = self.pool.get().await?;
        Executor::query(&client, sql, params).await
    }
}

/// Refuse to run with client-side interpolation enabled unless the server
/// treats backslashes in string literals as ordinary characters.
///
/// No-op while interpolation is disabled. Otherwise the
/// `standard_conforming_strings` setting is queried once per process
/// (cached only after a successful probe); a probe failure or any value
/// other than `"on"` is fatal.
pub(crate) async fn pg_ensure_safe_interpolation(executor: &impl Executor) -> RunnerResult<()> {
    if !config::interpolation_enabled() {
        return Ok(());
    }

    let cached = lock_conforming_strings().clone();
    let setting = match cached {
        Some(setting) => setting,
        None => {
            let setting = match executor.query_scalar_text(CONFORMING_STRINGS_SQL).await {
                Ok(setting) => setting,
                Err(err) => {
                    config::fatal(&format!(
                        "could not query standard_conforming_strings: {err}"
                    ));
                    return Err(err);
                }
            };
            *lock_conforming_strings() = Some(setting.clone());
            setting
        }
    };

    if setting != "on" {
        config::fatal(&format!(
            "database allows escape sequences and cannot be used with interpolation \
             (standard_conforming_strings={setting})"
        ));
        return Err(RunnerError::UnsafeEscapes(setting));
    }
    Ok(())
}

async fn pg_server_version(executor: &impl Executor) -> RunnerResult<i64> {
    let raw = match executor.query_scalar_text("SHOW server_version_num").await {
        Ok(raw) => raw,
        Err(err) => {
            config::fatal(&format!("could not query Postgres version: {err}"));
            return Err(err);
        }
    };
    raw.trim()
        .parse::<i64>()
        .map_err(|e| RunnerError::Connection(format!("bad server_version_num {raw:?}: {e}")))
}

fn lock_conforming_strings() -> std::sync::MutexGuard<'static, Option<String>> {
    CONFORMING_STRINGS
        .lock()
        .expect("conforming strings cache lock poisoned")
}

/// Forget the cached escape-sequence probe. Test hook only.
#[doc(hidden)]
pub fn reset_conforming_strings_cache() {
    *lock_conforming_strings() = None;
}
