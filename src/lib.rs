//! txnest - nested transactions for SQL connections
//!
//! This crate lets re-entrant application code ask for "a transaction"
//! without knowing whether it owns the outermost one. The first request in a
//! call chain begins a real database transaction; every nested request while
//! one is active becomes a savepoint. Inner commits and rollbacks release or
//! roll back their savepoint, and only the outermost scope finalizes the real
//! transaction.
//!
//! The active transaction travels through the call chain inside a
//! [`TxContext`](transaction::TxContext) value passed as an ordinary argument.
//!
//! # Example
//!
//! ```no_run
//! use txnest::driver::memory::MemoryDatabase;
//! use txnest::transaction::{Coordinator, TransactionError, TxContext};
//!
//! let db = MemoryDatabase::new();
//! let coordinator = Coordinator::new(db.clone());
//!
//! coordinator
//!     .run_in(&TxContext::new(), |ctx| -> Result<(), TransactionError> {
//!         coordinator.execute(ctx, "INSERT INTO users (id) VALUES (1)")?;
//!         coordinator.run_in(ctx, |inner| -> Result<(), TransactionError> {
//!             coordinator.execute(inner, "INSERT INTO audit (id) VALUES (1)")?;
//!             Ok(())
//!         })
//!     })
//!     .unwrap();
//! ```

pub mod config;
pub mod driver;
pub mod trace;
pub mod transaction;
