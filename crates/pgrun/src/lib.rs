//! # pgrun
//!
//! A client-side SQL execution layer for PostgreSQL, sitting between
//! application code and the `tokio-postgres`/`deadpool-postgres` driver
//! stack.
//!
//! ## Features
//!
//! - **Nested transactions**: composable functions can each call `begin()`
//!   without knowing whether a caller already opened a transaction; one
//!   real database transaction underneath, finalized exactly once
//! - **Uniform execution**: raw SQL, multi-statement scripts, and
//!   query-builder output all run through one [`Runner`] gateway, inside
//!   or outside a transaction
//! - **Interpolation safety gate**: client-side literal interpolation is
//!   refused unless the server's string-literal escaping is verified safe
//! - **Strict mode**: upgrades transaction-handling bugs (leaked or
//!   failing transactions) to loud, fatal conditions for development
//!
//! ## Example
//!
//! ```ignore
//! use pgrun::{Db, Runner};
//!
//! let db = Db::open("postgres", &database_url).await?;
//!
//! let tx = db.begin().await?;
//! tx.exec(
//!     "UPDATE accounts SET balance = balance - $1 WHERE id = $2",
//!     &[&100_i64, &1_i64],
//! )
//! .await?;
//!
//! // a nested scope: no new database transaction is opened
//! let scope = tx.begin().await?;
//! scope.exec("INSERT INTO audit (account_id) VALUES ($1)", &[&1_i64])
//!     .await?;
//! scope.commit().await?;
//!
//! tx.commit().await?; // the real COMMIT happens here
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod pool;
pub mod runner;
pub mod script;
pub mod statement;
pub mod tx;

pub use config::{
    FatalHandler, interpolation_enabled, set_fatal_handler, set_interpolation, set_strict, strict,
};
pub use db::Db;
pub use error::{RunnerError, RunnerResult};
pub use executor::Executor;
pub use pool::{create_pool, create_pool_with_config, create_pool_with_manager_config};
pub use runner::Runner;
pub use script::{script_separator, split_script};
pub use statement::{SqlBuild, SqlParam, Statement};
pub use tx::Tx;
