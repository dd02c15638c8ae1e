//! Nested transaction coordination.
//!
//! The first `start` in a call chain begins a real transaction; every nested
//! `start` while it is active issues a savepoint instead. `commit` and
//! `rollback` release or roll back the innermost savepoint, and only the
//! outermost scope finalizes the real transaction.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Coordinator                          │
//! │  (start / commit / rollback / run_in / adopt / get_active)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │  TxContext  │       │  TxHandle   │       │  Statement  │
//!  │  (binding)  │       │ (depth/mtx) │       │ (SQL text)  │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use txnest::transaction::{Coordinator, TxContext};
//!
//! let coordinator = Coordinator::new(connection);
//!
//! let ctx = coordinator.start(&TxContext::new())?;   // BEGIN
//! let ctx = coordinator.start(&ctx)?;                // SAVEPOINT SP1
//! let ctx = coordinator.rollback(&ctx)?;             // ROLLBACK TO SAVEPOINT SP1
//! let ctx = coordinator.commit(&ctx)?;               // COMMIT
//! ```

mod context;
mod coordinator;
mod error;
mod handle;
mod statement;

pub use context::{CoordinatorId, TransactionId, TxContext};
pub use coordinator::{ActiveTransaction, Coordinator, TxOf};
pub use error::{BoxError, TransactionError, TransactionResult};
pub use handle::{Origin, TransactionInfo};
pub use statement::{InvalidNameError, SavepointName, SavepointPrefix, Statement};
