use super::Session;
use std::sync::{Arc, Mutex};
use tracing::{Level, event};

/// Receives every statement a session sends to storage.
pub trait DiagnosticLogger: Send + Sync {
    fn log_statement(&self, statement: &str);
}

pub type SharedLogger = Arc<dyn DiagnosticLogger>;

/// Default logger: one `DEBUG` event per statement.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl DiagnosticLogger for TracingLogger {
    fn log_statement(&self, statement: &str) {
        event!(Level::DEBUG, statement = %statement, "session statement");
    }
}

/// Keeps statements in memory; handy for inspecting what a batch run issued.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    statements: Mutex<Vec<String>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements
            .lock()
            .map(|statements| statements.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.statements.lock().map(|s| s.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DiagnosticLogger for MemoryLogger {
    fn log_statement(&self, statement: &str) {
        if let Ok(mut statements) = self.statements.lock() {
            statements.push(statement.to_string());
        }
    }
}

/// Scoped suspension of a session's diagnostic logger.
///
/// Acquiring installs "no logging" and remembers the previous logger;
/// the previous logger is put back by [`LoggerSuspension::release`] or, on any
/// other exit path (error, early drop of the owning cursor), by `Drop`.
pub struct LoggerSuspension<S: Session> {
    session: Arc<S>,
    previous: Option<Option<SharedLogger>>,
}

impl<S: Session> LoggerSuspension<S> {
    pub fn acquire(session: Arc<S>) -> Self {
        let previous = session.set_diagnostic_logger(None);
        Self {
            session,
            previous: Some(previous),
        }
    }

    pub fn release(mut self) {
        self.restore();
    }

    fn restore(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.session.set_diagnostic_logger(previous);
        }
    }
}

impl<S: Session> Drop for LoggerSuspension<S> {
    fn drop(&mut self) {
        self.restore();
    }
}
