//! Process-wide logging handler slot.
//!
//! The transport reports its diagnostics two ways: every event goes to
//! `tracing` at the mapped level, and, when an application has
//! installed a [`LogHandler`], the same event is forwarded to it. At
//! most one handler may be installed at a time; with none installed
//! the forwarding is a no-op.
//!
//! A handler that panics is suppressed: logging never takes the
//! transport down.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{EpoxyError, Result};

/// Log severity, ordered `Debug < Information < Warning < Error < Fatal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Verbose diagnostics.
    Debug,
    /// Lifecycle milestones: connect, accept, disconnect.
    Information,
    /// Recoverable oddities: late responses, unknown events.
    Warning,
    /// Failures that terminate a connection.
    Error,
    /// Failures that stop an acceptor.
    Fatal,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Severity::Debug => "debug",
            Severity::Information => "information",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Receiver for transport log events.
pub trait LogHandler: Send + Sync + 'static {
    /// Handle one log event.
    fn handle(&self, severity: Severity, message: &str);
}

impl<F> LogHandler for F
where
    F: Fn(Severity, &str) + Send + Sync + 'static,
{
    fn handle(&self, severity: Severity, message: &str) {
        (self)(severity, message)
    }
}

static HANDLER: Mutex<Option<Arc<dyn LogHandler>>> = Mutex::new(None);

/// Install the process-wide log handler.
///
/// # Errors
///
/// Fails with `InvalidOperation` if a handler is already installed.
pub fn set_handler(handler: Arc<dyn LogHandler>) -> Result<()> {
    let mut slot = HANDLER.lock();
    if slot.is_some() {
        return Err(EpoxyError::InvalidOperation(
            "a log handler is already installed".to_string(),
        ));
    }
    *slot = Some(handler);
    Ok(())
}

/// Remove the process-wide log handler. A no-op when none is installed.
pub fn remove_handler() {
    HANDLER.lock().take();
}

/// Emit one event to `tracing` and to the installed handler, if any.
pub(crate) fn emit(severity: Severity, message: &str) {
    match severity {
        Severity::Debug => tracing::debug!("{message}"),
        Severity::Information => tracing::info!("{message}"),
        Severity::Warning => tracing::warn!("{message}"),
        Severity::Error => tracing::error!("{message}"),
        Severity::Fatal => tracing::error!(fatal = true, "{message}"),
    }

    let handler = HANDLER.lock().clone();
    if let Some(handler) = handler {
        let _ = catch_unwind(AssertUnwindSafe(|| handler.handle(severity, message)));
    }
}
