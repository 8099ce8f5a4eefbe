//! Structured logging setup.
//!
//! Log levels:
//! - ERROR: Fatal engine errors that halt a run
//! - WARN: Recoverable problems (failed manager actions, rule errors, retries)
//! - INFO: Run lifecycle (start, termination, evaluation summaries)
//! - DEBUG: Per-timestep phase traces (dispatch, commit, gate decisions)
//! - TRACE: Per-rule and per-completion detail
//!
//! The filter is read from `WORKGYM_LOG` (any `EnvFilter` directive). Debug
//! mode can also be enabled with `WORKGYM_DEBUG=1`. Logs go to stderr.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::EnvFilter;

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "WORKGYM_LOG";

/// Environment variable enabling debug-level output.
pub const DEBUG_ENV: &str = "WORKGYM_DEBUG";

/// Initialize logging at the default level.
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_with_debug(debug: bool) {
    let debug_enabled = debug || env_debug();
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

fn env_debug() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "workgym=debug"
    } else {
        "workgym=info"
    }
}
