//! The `Logger` collaborator (§6).
//!
//! The command dispatcher logs the assembled filter before dispatch and
//! logs directory errors after a failed response. The default
//! implementation adapts this onto the `log` crate, the same facade the
//! collaborator transport library builds its own diagnostics on.

use std::error::Error as StdError;

/// A sink for request tracing and error reporting.
///
/// Implementations are expected to be cheap to call when tracing is
/// disabled: [`trace_enabled`](Logger::trace_enabled) lets the dispatcher
/// skip building a trace message entirely in the common case.
pub trait Logger: Send + Sync {
    /// Whether [`trace`](Logger::trace) calls should be assembled at all.
    fn trace_enabled(&self) -> bool;

    /// Record a diagnostic trace message (request summaries, filters).
    fn trace(&self, msg: &str);

    /// Record an error, optionally with the underlying cause.
    fn error(&self, msg: &str, cause: Option<&(dyn StdError + 'static)>);
}

/// A [`Logger`] backed by the `log` crate's global dispatch.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogCrateLogger;

impl Logger for LogCrateLogger {
    fn trace_enabled(&self) -> bool {
        log::log_enabled!(log::Level::Trace)
    }

    fn trace(&self, msg: &str) {
        log::trace!("{}", msg);
    }

    fn error(&self, msg: &str, cause: Option<&(dyn StdError + 'static)>) {
        match cause {
            Some(cause) => log::error!("{}: {}", msg, cause),
            None => log::error!("{}", msg),
        }
    }
}

/// A [`Logger`] that discards everything. Useful for tests and for
/// callers who wire up tracing through a different channel.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn trace_enabled(&self) -> bool {
        false
    }

    fn trace(&self, _msg: &str) {}

    fn error(&self, _msg: &str, _cause: Option<&(dyn StdError + 'static)>) {}
}
