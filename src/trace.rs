//! Statement tracing.
//!
//! Every statement a coordinator sends to the database (`BEGIN`, savepoint
//! control, `COMMIT`, `ROLLBACK`, raw statements) is reported to the
//! coordinator's [`StatementTracer`] along with how long it took.

use std::time::Duration;

use log::Level;

use crate::transaction::{CoordinatorId, Statement, TransactionId};

/// A statement that reached the driver.
#[derive(Debug)]
pub struct StatementEvent<'a> {
    pub coordinator: CoordinatorId,
    pub transaction: TransactionId,
    pub statement: &'a Statement,
    /// Nesting depth the statement belongs to; 0 for the real transaction.
    pub depth: usize,
    pub elapsed: Duration,
    /// Driver error, if the statement failed.
    pub error: Option<&'a dyn std::error::Error>,
}

impl StatementEvent<'_> {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Receives statement events from a coordinator.
pub trait StatementTracer: Send + Sync {
    fn on_statement(&self, event: &StatementEvent<'_>);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl StatementTracer for NoopTracer {
    fn on_statement(&self, _event: &StatementEvent<'_>) {}
}

/// Writes events through the `log` facade under the `txnest::sql` target.
///
/// Successful statements are logged at the configured level, failures and
/// statements slower than the threshold at `warn`.
#[derive(Debug, Clone)]
pub struct LogTracer {
    level: Level,
    slow_threshold: Option<Duration>,
}

impl LogTracer {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            slow_threshold: None,
        }
    }

    /// Escalate statements slower than `threshold` to `warn`.
    pub fn slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = Some(threshold);
        self
    }

    fn is_slow(&self, elapsed: Duration) -> bool {
        self.slow_threshold.is_some_and(|t| elapsed >= t)
    }
}

impl Default for LogTracer {
    fn default() -> Self {
        Self::new(Level::Debug)
    }
}

impl StatementTracer for LogTracer {
    fn on_statement(&self, event: &StatementEvent<'_>) {
        match event.error {
            Some(err) => log::warn!(
                target: "txnest::sql",
                "[{}] {} failed after {:?}: {}",
                event.transaction,
                event.statement,
                event.elapsed,
                err
            ),
            None if self.is_slow(event.elapsed) => log::warn!(
                target: "txnest::sql",
                "[{}] slow statement {} took {:?}",
                event.transaction,
                event.statement,
                event.elapsed
            ),
            None => log::log!(
                target: "txnest::sql",
                self.level,
                "[{}] {} ({:?}, depth {})",
                event.transaction,
                event.statement,
                event.elapsed,
                event.depth
            ),
        }
    }
}

/// Collects statement text, marking failures with a `!` prefix.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingTracer {
    pub(crate) events: parking_lot::Mutex<Vec<String>>,
}

#[cfg(test)]
impl StatementTracer for RecordingTracer {
    fn on_statement(&self, event: &StatementEvent<'_>) {
        let line = if event.succeeded() {
            event.statement.to_string()
        } else {
            format!("!{}", event.statement)
        };
        self.events.lock().push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::MemoryError;

    fn event<'a>(
        statement: &'a Statement,
        elapsed: Duration,
        error: Option<&'a dyn std::error::Error>,
    ) -> StatementEvent<'a> {
        StatementEvent {
            coordinator: CoordinatorId::generate(),
            transaction: TransactionId::generate(),
            statement,
            depth: 0,
            elapsed,
            error,
        }
    }

    #[test]
    fn test_slow_threshold() {
        let tracer = LogTracer::default().slow_threshold(Duration::from_millis(50));
        assert!(!tracer.is_slow(Duration::from_millis(10)));
        assert!(tracer.is_slow(Duration::from_millis(50)));
        assert!(!LogTracer::default().is_slow(Duration::from_secs(60)));
    }

    #[test]
    fn test_log_tracer_handles_every_outcome() {
        let _ = env_logger::builder().is_test(true).try_init();
        let tracer = LogTracer::new(Level::Info).slow_threshold(Duration::from_millis(5));
        let err = MemoryError::Injected("COMMIT".to_string());

        tracer.on_statement(&event(&Statement::Begin, Duration::from_millis(1), None));
        tracer.on_statement(&event(&Statement::Begin, Duration::from_millis(9), None));
        tracer.on_statement(&event(&Statement::Commit, Duration::ZERO, Some(&err)));
    }

    #[test]
    fn test_recording_tracer_marks_failures() {
        let tracer = RecordingTracer::default();
        let err = MemoryError::EmptyStatement;

        tracer.on_statement(&event(&Statement::Begin, Duration::ZERO, None));
        tracer.on_statement(&event(&Statement::Rollback, Duration::ZERO, Some(&err)));

        assert_eq!(*tracer.events.lock(), vec!["BEGIN", "!ROLLBACK"]);
    }
}
