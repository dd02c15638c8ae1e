//! Transaction coordinator - maps nested transaction scopes onto savepoints.
//!
//! The Coordinator is the main entry point for transactions.
//! It handles:
//! - Beginning a real transaction for the outermost scope
//! - Issuing savepoints for nested scopes
//! - Releasing or rolling back savepoints as nested scopes finish
//! - Finalizing the real transaction when the outermost scope finishes

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{MappedMutexGuard, MutexGuard};

use crate::config::CoordinatorConfig;
use crate::driver::{Connection, Transaction};
use crate::trace::{StatementEvent, StatementTracer};
use crate::transaction::context::{CoordinatorId, TransactionId, TxContext};
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::handle::{Origin, TransactionInfo, TxHandle};
use crate::transaction::statement::{SavepointPrefix, Statement};

/// Transaction type of a connection.
pub type TxOf<C> = <C as Connection>::Transaction;

/// Exclusive access to the real transaction behind a context.
///
/// Coordinator operations on the same context block while this guard is
/// alive, so drop it before calling back into the coordinator.
pub type ActiveTransaction<'a, T> = MappedMutexGuard<'a, T>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finish {
    Commit,
    Rollback,
}

/// Nested transaction coordinator.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
pub struct Coordinator<C: Connection> {
    inner: Arc<CoordinatorInner<C>>,
}

struct CoordinatorInner<C> {
    /// Key of this coordinator's binding in a context.
    id: CoordinatorId,
    /// Source of real transactions.
    connection: C,
    prefix: SavepointPrefix,
    tracer: Arc<dyn StatementTracer>,
}

impl<C: Connection> Coordinator<C> {
    /// Create a coordinator with the default configuration.
    pub fn new(connection: C) -> Self {
        Self::with_config(connection, CoordinatorConfig::default())
    }

    /// Create a coordinator; the tracer follows the configuration.
    pub fn with_config(connection: C, config: CoordinatorConfig) -> Self {
        let tracer = config.tracer();
        Self::with_tracer(connection, config, tracer)
    }

    /// Create a coordinator reporting statements to `tracer`.
    pub fn with_tracer(
        connection: C,
        config: CoordinatorConfig,
        tracer: Arc<dyn StatementTracer>,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                id: CoordinatorId::generate(),
                connection,
                prefix: config.savepoint_prefix,
                tracer,
            }),
        }
    }

    pub fn id(&self) -> CoordinatorId {
        self.inner.id
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &C {
        &self.inner.connection
    }

    /// Start a transaction scope.
    ///
    /// Without an active transaction in `ctx` this begins a real transaction
    /// and returns a new context carrying it. Otherwise it sets a savepoint on
    /// the active transaction and returns `ctx` unchanged.
    ///
    /// On error nothing was started; do not commit or roll back.
    pub fn start(&self, ctx: &TxContext<TxOf<C>>) -> TransactionResult<TxContext<TxOf<C>>> {
        if let Some(handle) = ctx.handle(self.id()) {
            let mut guard = handle.lock();
            let state = &mut *guard;

            if let Some(tx) = state.tx.as_mut() {
                let number = state.last_savepoint + 1;
                let statement = Statement::Savepoint(self.inner.prefix.savepoint(number));
                self.run_statement(handle.id(), tx, &statement, state.open.len() + 1)?;

                // Only record savepoints the database actually created.
                state.last_savepoint = number;
                state.open.push(number);
                return Ok(ctx.clone());
            }
        }

        self.begin(ctx)
    }

    /// Commit the innermost scope.
    ///
    /// Nested scopes release their savepoint and get `ctx` back unchanged.
    /// The outermost scope commits the real transaction and gets a context
    /// without it.
    pub fn commit(&self, ctx: &TxContext<TxOf<C>>) -> TransactionResult<TxContext<TxOf<C>>> {
        self.finish(ctx, Finish::Commit)
    }

    /// Roll back the innermost scope.
    ///
    /// Nested scopes roll back to their savepoint; the outermost scope rolls
    /// back the real transaction.
    pub fn rollback(&self, ctx: &TxContext<TxOf<C>>) -> TransactionResult<TxContext<TxOf<C>>> {
        self.finish(ctx, Finish::Rollback)
    }

    /// Execute a function within a transaction scope, committing on `Ok` and
    /// rolling back on `Err`.
    ///
    /// The function's error always wins. If the commit fails the scope is
    /// rolled back and the commit error is returned. A failing rollback after
    /// either failure is logged, not returned.
    pub fn run_in<F, R, E>(&self, ctx: &TxContext<TxOf<C>>, f: F) -> Result<R, E>
    where
        F: FnOnce(&TxContext<TxOf<C>>) -> Result<R, E>,
        E: From<TransactionError>,
    {
        let scope = self.start(ctx)?;

        match f(&scope) {
            Ok(value) => match self.commit(&scope) {
                Ok(_) => Ok(value),
                Err(e) => {
                    self.rollback_after_failure(&scope, &e);
                    Err(e.into())
                }
            },
            Err(e) => {
                self.rollback_after_failure(&scope, &"scope returned an error");
                Err(e)
            }
        }
    }

    /// Bring an already open transaction under coordination.
    ///
    /// Nested `start` calls on the returned context use savepoints on `tx`,
    /// and the outermost commit or rollback finalizes it. Fails if `tx` is
    /// `None` or a transaction is already active in `ctx`; in the latter case
    /// `tx` is dropped.
    pub fn adopt(
        &self,
        ctx: &TxContext<TxOf<C>>,
        tx: Option<TxOf<C>>,
    ) -> TransactionResult<TxContext<TxOf<C>>> {
        let tx = tx.ok_or(TransactionError::NoTransactionProvided)?;
        if self.is_active(ctx) {
            return Err(TransactionError::AlreadyActive);
        }

        let id = TransactionId::generate();
        log::debug!("coordinator {}: adopted transaction {}", self.id(), id);
        Ok(ctx.bind(self.id(), Arc::new(TxHandle::new(id, tx, Origin::Adopted))))
    }

    /// The real transaction active in `ctx`, whatever the nesting depth.
    pub fn get_active<'a>(
        &self,
        ctx: &'a TxContext<TxOf<C>>,
    ) -> Option<ActiveTransaction<'a, TxOf<C>>> {
        let handle = ctx.handle(self.id())?;
        MutexGuard::try_map(handle.lock(), |state| state.tx.as_mut()).ok()
    }

    /// Run a statement on the active transaction.
    pub fn execute(&self, ctx: &TxContext<TxOf<C>>, sql: &str) -> TransactionResult<u64> {
        let handle = ctx
            .handle(self.id())
            .ok_or(TransactionError::NoActiveTransaction)?;
        let mut guard = handle.lock();
        let state = &mut *guard;
        let depth = state.depth();
        let tx = state
            .tx
            .as_mut()
            .ok_or(TransactionError::NoActiveTransaction)?;

        self.run_statement(handle.id(), tx, &Statement::Raw(sql.to_string()), depth)
    }

    /// Check if `ctx` carries an active transaction of this coordinator.
    pub fn is_active(&self, ctx: &TxContext<TxOf<C>>) -> bool {
        ctx.handle(self.id()).is_some_and(|h| h.is_live())
    }

    /// Number of open savepoints, or `None` without an active transaction.
    pub fn depth(&self, ctx: &TxContext<TxOf<C>>) -> Option<usize> {
        let handle = ctx.handle(self.id())?;
        let state = handle.lock();
        if state.is_finalized() {
            None
        } else {
            Some(state.depth())
        }
    }

    /// Get a snapshot of the active transaction.
    pub fn info(&self, ctx: &TxContext<TxOf<C>>) -> Option<TransactionInfo> {
        ctx.handle(self.id())?.info(self.id(), &self.inner.prefix)
    }

    fn begin(&self, ctx: &TxContext<TxOf<C>>) -> TransactionResult<TxContext<TxOf<C>>> {
        let id = TransactionId::generate();
        let started = Instant::now();
        let result = self.inner.connection.begin();
        self.trace(id, &Statement::Begin, 0, started, result.as_ref().err());

        let tx = result.map_err(|e| TransactionError::driver(&Statement::Begin, e))?;
        log::debug!("coordinator {}: began transaction {}", self.id(), id);

        Ok(ctx.bind(self.id(), Arc::new(TxHandle::new(id, tx, Origin::Begun))))
    }

    fn finish(
        &self,
        ctx: &TxContext<TxOf<C>>,
        finish: Finish,
    ) -> TransactionResult<TxContext<TxOf<C>>> {
        let handle = ctx
            .handle(self.id())
            .ok_or(TransactionError::NoActiveTransaction)?;
        let mut guard = handle.lock();
        let state = &mut *guard;

        if let Some(&number) = state.open.last() {
            let tx = state
                .tx
                .as_mut()
                .ok_or(TransactionError::NoActiveTransaction)?;
            let name = self.inner.prefix.savepoint(number);
            // ROLLBACK TO keeps the savepoint in the database; it is simply
            // never addressed again.
            let statement = match finish {
                Finish::Commit => Statement::ReleaseSavepoint(name),
                Finish::Rollback => Statement::RollbackToSavepoint(name),
            };
            self.run_statement(handle.id(), tx, &statement, state.open.len())?;

            state.open.pop();
            return Ok(ctx.clone());
        }

        // The transaction goes back to the driver even if finalizing fails.
        let tx = state
            .tx
            .take()
            .ok_or(TransactionError::NoActiveTransaction)?;

        let started = Instant::now();
        let (statement, result) = match finish {
            Finish::Commit => (Statement::Commit, tx.commit()),
            Finish::Rollback => (Statement::Rollback, tx.rollback()),
        };
        self.trace(handle.id(), &statement, 0, started, result.as_ref().err());
        result.map_err(|e| TransactionError::driver(&statement, e))?;

        log::debug!(
            "coordinator {}: finalized transaction {} with {}",
            self.id(),
            handle.id(),
            statement
        );
        Ok(ctx.unbind(self.id()))
    }

    /// Best-effort rollback of `scope` after `cause` failed it.
    fn rollback_after_failure(&self, scope: &TxContext<TxOf<C>>, cause: &dyn fmt::Display) {
        // A failed root COMMIT already handed the transaction back.
        let Some(depth) = self.depth(scope) else {
            return;
        };

        if let Err(e) = self.rollback(scope) {
            if depth == 0 {
                log::error!(
                    "coordinator {}: rollback after failure ({}) failed: {}",
                    self.id(),
                    cause,
                    e
                );
            } else {
                log::warn!(
                    "coordinator {}: savepoint rollback at depth {} after failure ({}) failed: {}",
                    self.id(),
                    depth,
                    cause,
                    e
                );
            }
        }
    }

    fn run_statement(
        &self,
        tx_id: TransactionId,
        tx: &mut TxOf<C>,
        statement: &Statement,
        depth: usize,
    ) -> TransactionResult<u64> {
        let started = Instant::now();
        let result = tx.execute(&statement.to_string());
        self.trace(tx_id, statement, depth, started, result.as_ref().err());
        result.map_err(|e| TransactionError::driver(statement, e))
    }

    fn trace<E: std::error::Error>(
        &self,
        transaction: TransactionId,
        statement: &Statement,
        depth: usize,
        started: Instant,
        error: Option<&E>,
    ) {
        self.inner.tracer.on_statement(&StatementEvent {
            coordinator: self.id(),
            transaction,
            statement,
            depth,
            elapsed: started.elapsed(),
            error: error.map(|e| e as &dyn std::error::Error),
        });
    }
}

impl<C: Connection> Clone for Coordinator<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connection> fmt::Debug for Coordinator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("id", &self.inner.id)
            .field("savepoint_prefix", &self.inner.prefix)
            .finish()
    }
}
