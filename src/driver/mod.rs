//! Driver seam between the coordinator and a SQL database.
//!
//! The coordinator never talks to a database directly. It needs a
//! [`Connection`] able to begin transactions, and a [`Transaction`] able to
//! run savepoint statements and finish itself. Any SQL driver can be plugged
//! in by implementing these two traits.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Coordinator                          │
//! │   (start / commit / rollback / run_in / adopt / get_active) │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                     ┌─────────────────┐
//!                     │   Connection    │──── begin()
//!                     └─────────────────┘
//!                              │
//!                              ▼
//!                     ┌─────────────────┐
//!                     │   Transaction   │──── execute() / commit() / rollback()
//!                     └─────────────────┘
//! ```

pub mod memory;

/// A source of real database transactions.
pub trait Connection: Send + Sync {
    /// The transaction type produced by [`Connection::begin`].
    type Transaction: Transaction;

    /// Error returned when a transaction cannot be started.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Begin a new real transaction.
    fn begin(&self) -> Result<Self::Transaction, Self::Error>;
}

/// An open database transaction.
///
/// `commit` and `rollback` consume the transaction: once either returns,
/// the underlying resource belongs to the connection again, whatever the
/// outcome.
pub trait Transaction: Send {
    /// Error returned by statements and finalization.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Execute a statement, returning the number of affected rows.
    fn execute(&mut self, sql: &str) -> Result<u64, Self::Error>;

    /// Commit the transaction.
    fn commit(self) -> Result<(), Self::Error>;

    /// Roll the transaction back.
    fn rollback(self) -> Result<(), Self::Error>;
}
