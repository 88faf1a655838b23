//! Process-wide runner configuration.
//!
//! Two read-only flags govern the whole process: `interpolation` (client-side
//! literal substitution, guarded by the safety gate in [`crate::db`]) and
//! `strict` (upgrades commit/rollback/leak failures to fatal conditions,
//! intended for development and test environments).
//!
//! Fatal conditions (connection failures at startup, safety-gate violations,
//! strict-mode finalize failures, leaked transactions) go through a single
//! injectable handler. The default logs and aborts the process; tests install
//! a capturing handler instead.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

static ENABLE_INTERPOLATION: AtomicBool = AtomicBool::new(false);
static STRICT: AtomicBool = AtomicBool::new(false);

/// Handler invoked on fatal conditions in place of process abort.
pub type FatalHandler = Box<dyn Fn(&str) + Send + Sync>;

static FATAL_HANDLER: Mutex<Option<FatalHandler>> = Mutex::new(None);

/// Enable or disable client-side literal interpolation process-wide.
///
/// Enabling this makes the next [`crate::db::Db::open`] run the escape
/// safety gate against the server before any statement executes.
pub fn set_interpolation(enabled: bool) {
    ENABLE_INTERPOLATION.store(enabled, Ordering::SeqCst);
}

/// Whether client-side literal interpolation is enabled.
pub fn interpolation_enabled() -> bool {
    ENABLE_INTERPOLATION.load(Ordering::SeqCst)
}

/// Enable or disable strict mode process-wide.
pub fn set_strict(enabled: bool) {
    STRICT.store(enabled, Ordering::SeqCst);
}

/// Whether strict mode is enabled.
pub fn strict() -> bool {
    STRICT.load(Ordering::SeqCst)
}

/// Install a handler for fatal conditions, replacing the default
/// log-and-abort behavior. `None` restores the default.
pub fn set_fatal_handler(handler: Option<FatalHandler>) {
    *FATAL_HANDLER.lock().expect("fatal handler lock poisoned") = handler;
}

/// Report a fatal condition.
///
/// Invokes the installed handler if any; otherwise logs at error level and
/// aborts the process. Callers must still return an error afterwards, since
/// an installed handler may choose not to terminate.
pub(crate) fn fatal(message: &str) {
    let guard = FATAL_HANDLER.lock().expect("fatal handler lock poisoned");
    match guard.as_ref() {
        Some(handler) => handler(message),
        None => {
            tracing::error!(%message, "fatal runner condition");
            std::process::abort();
        }
    }
}
