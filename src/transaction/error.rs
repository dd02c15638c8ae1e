//! Transaction error types.

use thiserror::Error;

use crate::transaction::statement::Statement;

/// Boxed driver error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Commit, rollback or execute without a bound transaction.
    #[error("no active transaction")]
    NoActiveTransaction,

    /// Adopt called while a transaction is already bound.
    #[error("transaction already active")]
    AlreadyActive,

    /// Adopt called without a transaction.
    #[error("no transaction provided")]
    NoTransactionProvided,

    /// The database rejected a statement.
    #[error("{statement} failed: {source}")]
    Driver {
        /// SQL text of the failed statement.
        statement: String,
        #[source]
        source: BoxError,
    },
}

impl TransactionError {
    /// Wrap a driver error raised while running `statement`.
    pub fn driver(
        statement: &Statement,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Driver {
            statement: statement.to_string(),
            source: Box::new(source),
        }
    }

    /// Check if this error is a caller protocol violation.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            TransactionError::NoActiveTransaction
                | TransactionError::AlreadyActive
                | TransactionError::NoTransactionProvided
        )
    }

    /// Check if this error came from the database.
    pub fn is_driver(&self) -> bool {
        matches!(self, TransactionError::Driver { .. })
    }
}
