//! Nested transaction lifecycle manager.
//!
//! A [`Tx`] owns exactly one real database transaction. Application code
//! structured as composable functions may each call [`Tx::begin`] without
//! knowing whether a caller already opened a transaction: a nested `begin`
//! layers a logical scope on top of the same real transaction by pushing
//! the current state onto a stack. Finalize calls unwind the stack, and
//! only the outermost scope touches the real transaction, so `COMMIT` is
//! issued exactly once. `ROLLBACK` is issued immediately at any depth and
//! is terminal for the whole nesting stack.

use crate::config;
use crate::error::{RunnerError, RunnerResult};
use crate::executor::Executor;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

/// Delay before the strict-mode watchdog checks for a leaked transaction.
const WATCHDOG_DELAY: Duration = Duration::from_secs(60);

/// Logical state of a transaction scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Pending,
    Committed,
    RolledBack,
    Errored,
}

/// State and stack are only ever mutated together, under the one lock.
struct Scopes {
    state: TxState,
    stack: Vec<TxState>,
    rolled_back: bool,
}

impl Scopes {
    fn push(&mut self) {
        self.stack.push(self.state);
        self.state = TxState::Pending;
    }

    /// Popping with an empty stack is a safe no-op (unbalanced-call guard).
    fn pop(&mut self) {
        if let Some(state) = self.stack.pop() {
            self.state = state;
        }
    }
}

struct TxInner<E> {
    executor: E,
    scopes: Mutex<Scopes>,
}

/// A transaction abstraction supporting nested logical scopes.
///
/// Clones share the same underlying transaction; pass a clone across
/// function boundaries within one unit of work. State transitions
/// (`begin`/`commit`/`rollback`/`auto_commit`/`auto_rollback`) are
/// serialized by an internal lock. Statement execution is not; concurrent
/// statement execution on one transaction is governed by the driver's own
/// contract and remains a caller obligation.
pub struct Tx<E: Executor> {
    inner: Arc<TxInner<E>>,
}

impl<E: Executor> Clone for Tx<E> {
    fn clone(&self) -> Self {
        Tx {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Executor> std::fmt::Debug for Tx<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx").finish_non_exhaustive()
    }
}

impl<E: Executor + 'static> Tx<E> {
    /// Wrap an executor holding an already-open database transaction.
    ///
    /// In strict mode this schedules a watchdog task (requires a Tokio
    /// runtime) that raises a fatal condition if the transaction is still
    /// pending after [`WATCHDOG_DELAY`]. The watchdog holds no strong
    /// reference and is a no-op once the transaction finalizes or drops.
    pub fn wrap(executor: E) -> Self {
        let tx = Tx {
            inner: Arc::new(TxInner {
                executor,
                scopes: Mutex::new(Scopes {
                    state: TxState::Pending,
                    stack: Vec::new(),
                    rolled_back: false,
                }),
            }),
        };
        if config::strict() {
            spawn_watchdog(Arc::downgrade(&tx.inner));
        }
        tx
    }
}

impl<E: Executor> Tx<E> {
    /// Open a nested logical scope on this transaction.
    ///
    /// No new database transaction is opened; the caller receives a scope
    /// handle sharing the single real transaction. Fails with
    /// [`RunnerError::AlreadyRolledBack`] once the transaction was rolled
    /// back at any depth.
    pub async fn begin(&self) -> RunnerResult<Tx<E>> {
        let mut scopes = self.inner.scopes.lock().await;
        if scopes.rolled_back {
            return Err(RunnerError::AlreadyRolledBack);
        }
        scopes.push();
        tracing::debug!(depth = scopes.stack.len(), "begin nested tx");
        Ok(self.clone())
    }

    /// Commit this scope.
    ///
    /// A nested commit unwinds one scope without touching the database; the
    /// real `COMMIT` is issued by the commit that finds the stack empty, so
    /// the underlying transaction commits exactly once. Committing again
    /// after that is a reported [`RunnerError::AlreadyCommitted`] error,
    /// never a second real commit.
    pub async fn commit(&self) -> RunnerResult<()> {
        let mut scopes = self.inner.scopes.lock().await;
        if scopes.rolled_back || scopes.state == TxState::RolledBack {
            return Err(RunnerError::AlreadyRolledBack);
        }
        if scopes.state == TxState::Committed {
            return Err(RunnerError::AlreadyCommitted);
        }

        if !scopes.stack.is_empty() {
            scopes.pop();
            tracing::debug!(depth = scopes.stack.len(), "commit nested tx");
            return Ok(());
        }

        if let Err(source) = self.inner.executor.execute("COMMIT", &[]).await {
            scopes.state = TxState::Errored;
            tracing::error!(%source, "commit failed");
            return Err(RunnerError::sql("COMMIT", source));
        }
        scopes.state = TxState::Committed;
        tracing::debug!("commit");
        Ok(())
    }

    /// Roll back the whole unit of work.
    ///
    /// The real `ROLLBACK` is issued immediately even from a nested scope;
    /// there is no partial rollback of an inner scope. Sets the terminal
    /// rollback flag: every later `commit` or `rollback` at any depth fails
    /// with [`RunnerError::AlreadyRolledBack`].
    pub async fn rollback(&self) -> RunnerResult<()> {
        let mut scopes = self.inner.scopes.lock().await;
        if scopes.rolled_back {
            return Err(RunnerError::AlreadyRolledBack);
        }
        if scopes.state == TxState::Committed {
            return Err(RunnerError::AlreadyCommitted);
        }

        if let Err(source) = self.inner.executor.execute("ROLLBACK", &[]).await {
            scopes.state = TxState::Errored;
            tracing::error!(%source, "rollback failed");
            return Err(RunnerError::sql("ROLLBACK", source));
        }
        scopes.state = TxState::RolledBack;
        scopes.rolled_back = true;
        tracing::debug!("rollback");
        Ok(())
    }

    /// Commit unless a commit or rollback already happened.
    ///
    /// Intended for guaranteed cleanup at the end of a scope: when the
    /// transaction was already explicitly finalized this pops the scope and
    /// returns success with no side effects. In strict mode a commit
    /// failure here is a fatal condition.
    pub async fn auto_commit(&self) -> RunnerResult<()> {
        let mut scopes = self.inner.scopes.lock().await;
        if scopes.rolled_back
            || matches!(scopes.state, TxState::Committed | TxState::RolledBack)
        {
            scopes.pop();
            return Ok(());
        }

        if let Err(source) = self.inner.executor.execute("COMMIT", &[]).await {
            scopes.state = TxState::Errored;
            if config::strict() {
                config::fatal(&format!("could not commit transaction: {source}"));
            }
            scopes.pop();
            tracing::error!(%source, "autocommit failed");
            return Err(RunnerError::sql("COMMIT", source));
        }
        scopes.state = TxState::Committed;
        scopes.pop();
        tracing::debug!("autocommit");
        Ok(())
    }

    /// Roll back unless a commit or rollback already happened.
    ///
    /// The rollback counterpart of [`Tx::auto_commit`], with the same
    /// idempotent no-op behavior for finalized transactions and the same
    /// strict-mode escalation on failure.
    pub async fn auto_rollback(&self) -> RunnerResult<()> {
        let mut scopes = self.inner.scopes.lock().await;
        if scopes.rolled_back
            || matches!(scopes.state, TxState::Committed | TxState::RolledBack)
        {
            scopes.pop();
            return Ok(());
        }

        if let Err(source) = self.inner.executor.execute("ROLLBACK", &[]).await {
            scopes.state = TxState::Errored;
            if config::strict() {
                config::fatal(&format!("could not rollback transaction: {source}"));
            }
            scopes.pop();
            tracing::error!(%source, "autorollback failed");
            return Err(RunnerError::sql("ROLLBACK", source));
        }
        scopes.state = TxState::RolledBack;
        scopes.rolled_back = true;
        scopes.pop();
        tracing::debug!("autorollback");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn depth(&self) -> usize {
        self.inner.scopes.lock().await.stack.len()
    }
}

fn spawn_watchdog<E: Executor + 'static>(inner: Weak<TxInner<E>>) {
    tokio::spawn(async move {
        tokio::time::sleep(WATCHDOG_DELAY).await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let scopes = inner.scopes.lock().await;
        if scopes.state == TxState::Pending && !scopes.rolled_back {
            config::fatal("a database transaction was never closed");
        }
    });
}

/// Statement execution passes straight through to the wrapped transaction
/// handle; it is deliberately not serialized by the state lock.
impl<E: Executor> Executor for Tx<E> {
    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> RunnerResult<u64> {
        self.inner.executor.execute(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> RunnerResult<Vec<Row>> {
        self.inner.executor.query(sql, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::{TestGuard, capture_fatals};
    use crate::executor::mock::MockExecutor;
    use crate::runner::Runner;

    #[tokio::test]
    async fn nested_commits_commit_real_transaction_once() {
        let _cfg = TestGuard::lock();
        let tx = Tx::wrap(MockExecutor::new());

        let scope1 = tx.begin().await.unwrap();
        let scope2 = scope1.begin().await.unwrap();
        let scope3 = scope2.begin().await.unwrap();

        scope3.commit().await.unwrap();
        scope2.commit().await.unwrap();
        scope1.commit().await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(tx.inner.executor.count("COMMIT"), 1);
        assert_eq!(tx.depth().await, 0);
    }

    #[tokio::test]
    async fn over_commit_is_a_reported_error() {
        let _cfg = TestGuard::lock();
        let tx = Tx::wrap(MockExecutor::new());
        tx.commit().await.unwrap();

        let err = tx.commit().await.unwrap_err();
        assert!(err.is_already_committed());
        assert_eq!(tx.inner.executor.count("COMMIT"), 1);
    }

    #[tokio::test]
    async fn rollback_at_any_depth_hits_real_transaction() {
        let _cfg = TestGuard::lock();
        let tx = Tx::wrap(MockExecutor::new());
        let scope1 = tx.begin().await.unwrap();
        let scope2 = scope1.begin().await.unwrap();

        scope2.rollback().await.unwrap();
        assert_eq!(tx.inner.executor.count("ROLLBACK"), 1);

        // terminal for every scope, with the rollback-specific error
        assert!(scope1.commit().await.unwrap_err().is_rolled_back());
        assert!(tx.commit().await.unwrap_err().is_rolled_back());
        assert!(tx.rollback().await.unwrap_err().is_rolled_back());
        assert!(tx.begin().await.unwrap_err().is_rolled_back());
        assert_eq!(tx.inner.executor.count("ROLLBACK"), 1);
    }

    #[tokio::test]
    async fn commit_after_rollback_is_rollback_error_not_commit_error() {
        let _cfg = TestGuard::lock();
        let tx = Tx::wrap(MockExecutor::new());
        tx.rollback().await.unwrap();

        let err = tx.commit().await.unwrap_err();
        assert!(err.is_rolled_back());
        assert!(!err.is_already_committed());
    }

    #[tokio::test]
    async fn rollback_after_commit_is_commit_error() {
        let _cfg = TestGuard::lock();
        let tx = Tx::wrap(MockExecutor::new());
        tx.commit().await.unwrap();
        assert!(tx.rollback().await.unwrap_err().is_already_committed());
    }

    #[tokio::test]
    async fn auto_calls_are_noops_after_explicit_finalize() {
        let _cfg = TestGuard::lock();
        let tx = Tx::wrap(MockExecutor::new());
        tx.commit().await.unwrap();

        tx.auto_commit().await.unwrap();
        tx.auto_rollback().await.unwrap();
        assert_eq!(tx.inner.executor.count("COMMIT"), 1);
        assert_eq!(tx.inner.executor.count("ROLLBACK"), 0);

        let tx = Tx::wrap(MockExecutor::new());
        tx.rollback().await.unwrap();
        tx.auto_rollback().await.unwrap();
        tx.auto_commit().await.unwrap();
        assert_eq!(tx.inner.executor.count("ROLLBACK"), 1);
        assert_eq!(tx.inner.executor.count("COMMIT"), 0);
    }

    #[tokio::test]
    async fn auto_commit_commits_when_still_pending() {
        let _cfg = TestGuard::lock();
        let tx = Tx::wrap(MockExecutor::new());
        tx.auto_commit().await.unwrap();
        assert_eq!(tx.inner.executor.count("COMMIT"), 1);

        // a second auto call sees the committed state and stays idle
        tx.auto_commit().await.unwrap();
        assert_eq!(tx.inner.executor.count("COMMIT"), 1);
    }

    #[tokio::test]
    async fn auto_rollback_cleans_up_abandoned_scope() {
        let _cfg = TestGuard::lock();
        let tx = Tx::wrap(MockExecutor::new());
        let scope = tx.begin().await.unwrap();
        // scope exits without commit, e.g. on an error path
        scope.auto_rollback().await.unwrap();

        assert_eq!(tx.inner.executor.count("ROLLBACK"), 1);
        assert!(tx.commit().await.unwrap_err().is_rolled_back());
    }

    #[tokio::test]
    async fn strict_auto_commit_failure_is_fatal() {
        let _cfg = TestGuard::lock();
        crate::config::set_strict(true);
        let fatals = capture_fatals();

        let tx = Tx::wrap(MockExecutor::failing_on("COMMIT"));
        let err = tx.auto_commit().await.unwrap_err();
        assert!(matches!(err, RunnerError::Sql { .. }));
        assert_eq!(fatals.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn commit_failure_transitions_to_errored() {
        let _cfg = TestGuard::lock();
        let tx = Tx::wrap(MockExecutor::failing_on("COMMIT"));
        assert!(tx.commit().await.is_err());
        assert_eq!(tx.inner.scopes.lock().await.state, TxState::Errored);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_scopes_keep_state_and_stack_consistent() {
        let _cfg = TestGuard::lock();
        let tx = Tx::wrap(MockExecutor::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let scope = tx.begin().await.unwrap();
                tokio::task::yield_now().await;
                scope.commit().await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // every scope balanced its push with a pop; outermost commit is real
        assert_eq!(tx.depth().await, 0);
        tx.commit().await.unwrap();
        assert_eq!(tx.inner.executor.count("COMMIT"), 1);
    }

    #[tokio::test]
    async fn execution_goes_through_to_the_wrapped_handle() {
        let _cfg = TestGuard::lock();
        let tx = Tx::wrap(MockExecutor::new());
        tx.exec("UPDATE t SET x = 1", &[]).await.unwrap();
        assert_eq!(tx.inner.executor.count("UPDATE t SET x = 1"), 1);
        tx.commit().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_flags_leaked_transaction_in_strict_mode() {
        let _cfg = TestGuard::lock();
        crate::config::set_strict(true);
        let fatals = capture_fatals();

        let tx = Tx::wrap(MockExecutor::new());
        // paused clock auto-advances past the watchdog deadline
        tokio::time::sleep(WATCHDOG_DELAY + Duration::from_secs(1)).await;

        assert_eq!(fatals.lock().unwrap().len(), 1);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_is_silent_after_finalize_or_drop() {
        let _cfg = TestGuard::lock();
        crate::config::set_strict(true);
        let fatals = capture_fatals();

        let committed = Tx::wrap(MockExecutor::new());
        committed.commit().await.unwrap();

        let dropped = Tx::wrap(MockExecutor::new());
        drop(dropped);

        tokio::time::sleep(WATCHDOG_DELAY + Duration::from_secs(1)).await;

        assert!(fatals.lock().unwrap().is_empty());
        drop(committed);
    }
}
