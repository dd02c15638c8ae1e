//! In-process driver with MySQL savepoint semantics.
//!
//! `MemoryDatabase` keeps no tables. Statements other than savepoint
//! control are parsed and buffered as "writes" of the open transaction;
//! committing publishes them to the committed log, rolling back discards
//! them. Every successful statement is recorded in a journal so callers can
//! see exactly what SQL reached the database.

use std::sync::Arc;

use parking_lot::Mutex;
use sqlparser::ast as sp;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser as SqlParser;
use thiserror::Error;

use super::{Connection, Transaction};

/// Result type for the in-memory driver.
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Errors raised by the in-memory driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("empty statement")]
    EmptyStatement,

    #[error("multiple statements not supported")]
    MultipleStatements,

    /// Mirrors MySQL error 1305.
    #[error("SAVEPOINT {0} does not exist")]
    UnknownSavepoint(String),

    /// BEGIN/COMMIT/ROLLBACK must go through the transaction object.
    #[error("transaction control statement not allowed here: {0}")]
    TransactionControl(String),

    #[error("injected failure: {0}")]
    Injected(String),
}

impl From<sqlparser::parser::ParserError> for MemoryError {
    fn from(e: sqlparser::parser::ParserError) -> Self {
        MemoryError::Syntax(e.to_string())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    journal: Vec<String>,
    committed: Vec<String>,
    /// Uppercased statement prefixes that must fail.
    failures: Vec<String>,
    open: usize,
    next_id: u64,
}

impl MemoryState {
    fn check(&self, sql: &str) -> MemoryResult<()> {
        let upper = sql.trim().to_uppercase();
        if self.failures.iter().any(|prefix| upper.starts_with(prefix.as_str())) {
            return Err(MemoryError::Injected(sql.trim().to_string()));
        }
        Ok(())
    }
}

/// A shared in-memory database. Clones refer to the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every statement starting with `prefix` fail, case-insensitively.
    ///
    /// Applies to `BEGIN`, `COMMIT` and `ROLLBACK` as well.
    pub fn fail_on(&self, prefix: impl AsRef<str>) {
        let prefix = prefix.as_ref().trim().to_uppercase();
        self.inner.lock().failures.push(prefix);
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.inner.lock().failures.clear();
    }

    /// Every statement that succeeded, in order.
    pub fn journal(&self) -> Vec<String> {
        self.inner.lock().journal.clone()
    }

    /// Writes published by committed transactions.
    pub fn committed(&self) -> Vec<String> {
        self.inner.lock().committed.clone()
    }

    /// Number of transactions begun and not yet finished.
    pub fn open_transactions(&self) -> usize {
        self.inner.lock().open
    }
}

impl Connection for MemoryDatabase {
    type Transaction = MemoryTransaction;
    type Error = MemoryError;

    fn begin(&self) -> MemoryResult<MemoryTransaction> {
        let mut state = self.inner.lock();
        state.check("BEGIN")?;
        state.journal.push("BEGIN".to_string());
        state.open += 1;
        state.next_id += 1;

        Ok(MemoryTransaction {
            id: state.next_id,
            db: Arc::clone(&self.inner),
            writes: Vec::new(),
            savepoints: Vec::new(),
            finished: false,
        })
    }
}

/// A savepoint and the number of writes buffered when it was set.
#[derive(Debug)]
struct Marker {
    name: String,
    writes: usize,
}

/// An open transaction on a [`MemoryDatabase`].
///
/// Dropping it without committing rolls it back.
#[derive(Debug)]
pub struct MemoryTransaction {
    id: u64,
    db: Arc<Mutex<MemoryState>>,
    writes: Vec<String>,
    savepoints: Vec<Marker>,
    finished: bool,
}

impl MemoryTransaction {
    /// Sequence number assigned by the database at `BEGIN`.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Writes buffered so far.
    pub fn pending(&self) -> &[String] {
        &self.writes
    }

    /// Names of the savepoints currently set, oldest first.
    pub fn savepoints(&self) -> Vec<&str> {
        self.savepoints.iter().map(|m| m.name.as_str()).collect()
    }

    fn position(&self, name: &str) -> MemoryResult<usize> {
        self.savepoints
            .iter()
            .rposition(|m| m.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| MemoryError::UnknownSavepoint(name.to_string()))
    }

    fn apply(&mut self, sql: &str) -> MemoryResult<u64> {
        match parse_single(sql)? {
            sp::Statement::Savepoint { name } => {
                // MySQL replaces an existing savepoint of the same name.
                self.savepoints
                    .retain(|m| !m.name.eq_ignore_ascii_case(&name.value));
                self.savepoints.push(Marker {
                    name: name.value,
                    writes: self.writes.len(),
                });
                Ok(0)
            }
            sp::Statement::ReleaseSavepoint { name } => {
                let pos = self.position(&name.value)?;
                self.savepoints.truncate(pos);
                Ok(0)
            }
            sp::Statement::Rollback {
                savepoint: Some(name),
                ..
            } => {
                let pos = self.position(&name.value)?;
                self.writes.truncate(self.savepoints[pos].writes);
                self.savepoints.truncate(pos + 1);
                Ok(0)
            }
            sp::Statement::StartTransaction { .. }
            | sp::Statement::Commit { .. }
            | sp::Statement::Rollback { .. } => {
                Err(MemoryError::TransactionControl(sql.trim().to_string()))
            }
            _ => {
                self.writes.push(sql.trim().to_string());
                Ok(1)
            }
        }
    }
}

fn parse_single(sql: &str) -> MemoryResult<sp::Statement> {
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(MemoryError::EmptyStatement);
    }

    let mut statements = SqlParser::parse_sql(&MySqlDialect {}, sql)?;
    match statements.len() {
        0 => Err(MemoryError::EmptyStatement),
        1 => Ok(statements.remove(0)),
        _ => Err(MemoryError::MultipleStatements),
    }
}

impl Transaction for MemoryTransaction {
    type Error = MemoryError;

    fn execute(&mut self, sql: &str) -> MemoryResult<u64> {
        let db = Arc::clone(&self.db);
        let mut state = db.lock();
        state.check(sql)?;
        let rows = self.apply(sql)?;
        state.journal.push(sql.trim().to_string());
        Ok(rows)
    }

    fn commit(mut self) -> MemoryResult<()> {
        let db = Arc::clone(&self.db);
        let mut state = db.lock();
        state.check("COMMIT")?;

        let writes = std::mem::take(&mut self.writes);
        state.committed.extend(writes);
        state.journal.push("COMMIT".to_string());
        state.open = state.open.saturating_sub(1);
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self) -> MemoryResult<()> {
        let db = Arc::clone(&self.db);
        let mut state = db.lock();
        state.check("ROLLBACK")?;

        state.journal.push("ROLLBACK".to_string());
        state.open = state.open.saturating_sub(1);
        self.finished = true;
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        // An abandoned transaction goes back to the database rolled back.
        if !self.finished {
            let mut state = self.db.lock();
            state.journal.push("ROLLBACK".to_string());
            state.open = state.open.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_publishes_writes() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin().unwrap();
        tx.execute("INSERT INTO users (id) VALUES (1)").unwrap();
        assert_eq!(db.open_transactions(), 1);

        tx.commit().unwrap();

        assert_eq!(db.committed(), vec!["INSERT INTO users (id) VALUES (1)"]);
        assert_eq!(
            db.journal(),
            vec!["BEGIN", "INSERT INTO users (id) VALUES (1)", "COMMIT"]
        );
        assert_eq!(db.open_transactions(), 0);
    }

    #[test]
    fn test_rollback_to_savepoint_discards_later_writes() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin().unwrap();
        tx.execute("INSERT INTO t (id) VALUES (1)").unwrap();
        tx.execute("SAVEPOINT SP1").unwrap();
        tx.execute("INSERT INTO t (id) VALUES (2)").unwrap();
        tx.execute("SAVEPOINT SP2").unwrap();

        tx.execute("ROLLBACK TO SAVEPOINT SP1").unwrap();

        // SP1 survives, SP2 is gone.
        assert_eq!(tx.savepoints(), vec!["SP1"]);
        assert_eq!(tx.pending(), &["INSERT INTO t (id) VALUES (1)".to_string()]);
        tx.commit().unwrap();
        assert_eq!(db.committed().len(), 1);
    }

    #[test]
    fn test_release_removes_later_savepoints() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin().unwrap();
        tx.execute("SAVEPOINT SP1").unwrap();
        tx.execute("SAVEPOINT SP2").unwrap();

        tx.execute("RELEASE SAVEPOINT SP1").unwrap();
        assert!(tx.savepoints().is_empty());

        let err = tx.execute("RELEASE SAVEPOINT SP2").unwrap_err();
        assert_eq!(err, MemoryError::UnknownSavepoint("SP2".to_string()));
    }

    #[test]
    fn test_unknown_savepoint_rollback_fails() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin().unwrap();
        let err = tx.execute("ROLLBACK TO SAVEPOINT SP9").unwrap_err();
        assert!(matches!(err, MemoryError::UnknownSavepoint(_)));
    }

    #[test]
    fn test_transaction_control_rejected() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin().unwrap();
        assert!(matches!(
            tx.execute("COMMIT"),
            Err(MemoryError::TransactionControl(_))
        ));
        assert!(matches!(
            tx.execute("ROLLBACK"),
            Err(MemoryError::TransactionControl(_))
        ));
    }

    #[test]
    fn test_syntax_error() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin().unwrap();
        assert!(matches!(
            tx.execute("INSERT INTO"),
            Err(MemoryError::Syntax(_))
        ));
        assert_eq!(tx.execute("   "), Err(MemoryError::EmptyStatement));
    }

    #[test]
    fn test_injected_failures() {
        let db = MemoryDatabase::new();
        db.fail_on("begin");
        assert!(matches!(db.begin(), Err(MemoryError::Injected(_))));
        assert!(db.journal().is_empty());

        db.clear_failures();
        db.fail_on("SAVEPOINT");
        let mut tx = db.begin().unwrap();
        assert!(tx.execute("SAVEPOINT SP1").is_err());
        assert!(tx.savepoints().is_empty());
        // RELEASE SAVEPOINT does not start with SAVEPOINT.
        assert!(matches!(
            tx.execute("RELEASE SAVEPOINT SP1"),
            Err(MemoryError::UnknownSavepoint(_))
        ));
    }

    #[test]
    fn test_drop_rolls_back() {
        let db = MemoryDatabase::new();
        {
            let mut tx = db.begin().unwrap();
            tx.execute("INSERT INTO t (id) VALUES (1)").unwrap();
        }

        assert_eq!(db.open_transactions(), 0);
        assert!(db.committed().is_empty());
        assert_eq!(db.journal().last().map(String::as_str), Some("ROLLBACK"));
    }

    #[test]
    fn test_failed_commit_returns_resource() {
        let db = MemoryDatabase::new();
        db.fail_on("COMMIT");
        let mut tx = db.begin().unwrap();
        tx.execute("INSERT INTO t (id) VALUES (1)").unwrap();

        assert!(tx.commit().is_err());
        assert_eq!(db.open_transactions(), 0);
        assert!(db.committed().is_empty());
    }
}
