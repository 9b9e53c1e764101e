use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use sqlx::{PgPool, Postgres, Transaction};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::config::UnitOfWorkConfig;
use crate::executor::{
    ExecutionContext, PoolContext, SlotGuard, TransactionContext, TransactionSlot,
};
use crate::lifecycle::{Lifecycle, SessionState};
use crate::options::{Mode, SessionOptions};
use crate::pool::DbPool;
use crate::repositories::{OrderRepository, ProductRepository, Repository, UserRepository};
use crate::{TransactionAware, TransactionError, TransactionResult};

/// Unit of Work pattern for managing database transactions.
///
/// The UnitOfWork manages the lifecycle of database transactions and provides
/// a factory method to create new sessions, one per logical operation.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Session: UnitOfWorkSession + 'static;

    /// Options used by [`UnitOfWork::begin`] for everything but the mode.
    fn default_options(&self) -> SessionOptions {
        SessionOptions::default()
    }

    /// Begin a new session.
    ///
    /// In transactional mode the transaction is opened before this returns;
    /// a store rejection or a fired signal yields
    /// [`TransactionError::BeginFailed`].
    async fn begin_with(
        &self,
        options: SessionOptions,
        cancel: &CancelSignal,
    ) -> TransactionResult<Self::Session>;

    async fn begin(&self, mode: Mode, cancel: &CancelSignal) -> TransactionResult<Self::Session> {
        self.begin_with(self.default_options().with_mode(mode), cancel)
            .await
    }

    /// Run `work` inside one session and resolve it.
    ///
    /// Commits when `work` succeeds, rolls back when it fails. The error
    /// from `work` is returned unchanged; a failing rollback is logged and
    /// never replaces it.
    async fn run<T, F>(
        &self,
        options: SessionOptions,
        cancel: &CancelSignal,
        work: F,
    ) -> TransactionResult<T>
    where
        T: Send,
        F: for<'s> FnOnce(&'s Self::Session) -> BoxFuture<'s, TransactionResult<T>> + Send,
    {
        let session = self.begin_with(options, cancel).await?;

        let outcome = match work(&session).await {
            Ok(value) => session.commit().await.map(|()| value),
            Err(err) => Err(err),
        };

        if let Err(err) = &outcome {
            if !err.is_outcome_ambiguous() {
                if let Err(rollback_err) = session.rollback().await {
                    warn!(
                        unit_of_work = %session.id(),
                        error = %rollback_err,
                        cause = %err,
                        "Rollback after failed unit of work did not complete"
                    );
                }
            }
        }
        outcome
    }
}

/// Represents a single unit-of-work session.
///
/// All repositories handed out by one session share its execution context.
/// Exactly one terminal action applies: the first of `commit` or `rollback`
/// wins, a later `rollback` is a silent no-op and a later `commit` fails with
/// [`TransactionError::NotOpen`].
#[async_trait]
pub trait UnitOfWorkSession: Send + Sync {
    fn id(&self) -> Uuid;

    fn mode(&self) -> Mode;

    fn state(&self) -> SessionState;

    /// The signal the session was begun with. Repository calls made inside
    /// [`UnitOfWork::run`] usually pass this one along.
    fn signal(&self) -> &CancelSignal;

    /// Get the execution context for this session (the transaction or the pool).
    fn executor(&self) -> TransactionResult<Arc<dyn ExecutionContext>>;

    /// Get the repository of kind `R`, creating it on first request.
    fn repository<R: Repository>(&self) -> TransactionResult<Arc<R>>;

    fn users(&self) -> TransactionResult<Arc<UserRepository>> {
        self.repository()
    }

    fn products(&self) -> TransactionResult<Arc<ProductRepository>> {
        self.repository()
    }

    fn orders(&self) -> TransactionResult<Arc<OrderRepository>> {
        self.repository()
    }

    /// Register a component that needs to be notified of transaction events.
    fn register_transaction_aware(&self, observer: Arc<dyn TransactionAware>);

    /// Commit the session and notify all registered observers.
    ///
    /// Refused with [`TransactionError::Cancelled`] if the session's signal
    /// has fired; the session stays open so the caller's rollback still
    /// applies. Once the commit reaches the store it is not cancellable.
    async fn commit(&self) -> TransactionResult<()>;

    /// Roll the session back and notify all registered observers.
    ///
    /// No-op when the session is no longer open.
    async fn rollback(&self) -> TransactionResult<()>;
}

/// Default implementation of UnitOfWork for PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresUnitOfWork {
    pool: PgPool,
    defaults: SessionOptions,
}

impl PostgresUnitOfWork {
    /// Create a new PostgresUnitOfWork with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            defaults: SessionOptions::default(),
        }
    }

    /// Build a unit of work on a configured pool, with session defaults
    /// taken from the `[unit_of_work]` settings.
    pub fn from_config(pool: &DbPool, config: &UnitOfWorkConfig) -> Self {
        Self::new(pool.pool().clone()).with_default_options(SessionOptions::from_config(config))
    }

    pub fn with_default_options(mut self, defaults: SessionOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn open_transaction(
        &self,
        options: &SessionOptions,
        cancel: &CancelSignal,
    ) -> TransactionResult<(Transaction<'static, Postgres>, i32)> {
        if let Some(cause) = cancel.cause() {
            return Err(TransactionError::begin_cancelled(cause));
        }

        let mut tx = cancel
            .run(self.pool.begin())
            .await
            .map_err(TransactionError::begin_cancelled)?
            .map_err(TransactionError::begin)?;

        let backend_pid = cancel
            .run(sqlx::query_scalar::<_, i32>("SELECT pg_backend_pid()").fetch_one(&mut *tx))
            .await
            .map_err(TransactionError::begin_cancelled)?
            .map_err(TransactionError::begin)?;

        if let Some(level) = options.isolation_level {
            let statement = format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql());
            cancel
                .run(sqlx::query(&statement).execute(&mut *tx))
                .await
                .map_err(TransactionError::begin_cancelled)?
                .map_err(TransactionError::begin)?;
        }

        if let Some(timeout) = options.statement_timeout {
            let statement = format!("SET LOCAL statement_timeout = {}", timeout.as_millis());
            cancel
                .run(sqlx::query(&statement).execute(&mut *tx))
                .await
                .map_err(TransactionError::begin_cancelled)?
                .map_err(TransactionError::begin)?;
        }

        Ok((tx, backend_pid))
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    type Session = PostgresUnitOfWorkSession;

    fn default_options(&self) -> SessionOptions {
        self.defaults
    }

    async fn begin_with(
        &self,
        options: SessionOptions,
        cancel: &CancelSignal,
    ) -> TransactionResult<Self::Session> {
        let id = Uuid::new_v4();
        let lifecycle = Arc::new(Lifecycle::new());

        if !options.mode.is_transactional() {
            debug!(unit_of_work = %id, mode = %options.mode, "Unit of work opened");
            let context = Arc::new(PoolContext::new(self.pool.clone(), lifecycle.clone()));
            return Ok(PostgresUnitOfWorkSession::new(
                id,
                options.mode,
                context,
                None,
                lifecycle,
                cancel.clone(),
            ));
        }

        let (tx, backend_pid) = self.open_transaction(&options, cancel).await.map_err(|err| {
            warn!(unit_of_work = %id, error = %err, "Failed to open unit of work");
            err
        })?;

        debug!(
            unit_of_work = %id,
            mode = %options.mode,
            isolation_level = options.isolation_level.map(|level| level.as_sql()),
            backend_pid,
            "Unit of work opened"
        );

        let slot = Arc::new(TransactionSlot::new(tx, Some(backend_pid)));
        let context = Arc::new(TransactionContext::new(
            slot.clone(),
            lifecycle.clone(),
            self.pool.clone(),
        ));
        Ok(PostgresUnitOfWorkSession::new(
            id,
            options.mode,
            context,
            Some(slot),
            lifecycle,
            cancel.clone(),
        ))
    }
}

/// Default implementation of UnitOfWorkSession for PostgreSQL.
///
/// Dropping a session that is still open rolls it back: the transaction is
/// released, which makes the store discard it, and every repository the
/// session handed out starts failing with [`TransactionError::Closed`]. If a
/// statement or row stream holds the transaction at that moment, it is
/// released as soon as that holder lets go.
pub struct PostgresUnitOfWorkSession {
    id: Uuid,
    mode: Mode,
    context: Arc<dyn ExecutionContext>,
    slot: Option<Arc<TransactionSlot>>,
    lifecycle: Arc<Lifecycle>,
    cancel: CancelSignal,
    repositories: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    observers: Arc<RwLock<Vec<Arc<dyn TransactionAware>>>>,
}

impl PostgresUnitOfWorkSession {
    fn new(
        id: Uuid,
        mode: Mode,
        context: Arc<dyn ExecutionContext>,
        slot: Option<Arc<TransactionSlot>>,
        lifecycle: Arc<Lifecycle>,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            id,
            mode,
            context,
            slot,
            lifecycle,
            cancel,
            repositories: Mutex::new(HashMap::new()),
            observers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Lock the transaction for a commit. Waiting happens while the session
    /// is still open and under its signal; a live row stream is never waited
    /// for, since it may belong to the caller.
    async fn lock_for_commit<'a>(
        &'a self,
        slot: &'a TransactionSlot,
    ) -> TransactionResult<SlotGuard<'a>> {
        if let Some(guard) = slot.try_lock(&self.lifecycle) {
            return Ok(guard);
        }
        if slot.is_streaming() {
            return Err(TransactionError::StreamActive);
        }
        Ok(self.cancel.run(slot.lock(&self.lifecycle)).await?)
    }

    async fn notify_observers(&self, committed: bool) {
        let observers = self.observers.read().clone();
        for observer in observers.iter() {
            let result = if committed {
                observer.on_commit(self.id).await
            } else {
                observer.on_rollback(self.id).await
            };
            if let Err(err) = result {
                warn!(
                    unit_of_work = %self.id,
                    committed,
                    error = %err,
                    "Transaction observer failed"
                );
            }
        }
    }
}

#[async_trait]
impl UnitOfWorkSession for PostgresUnitOfWorkSession {
    fn id(&self) -> Uuid {
        self.id
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    fn signal(&self) -> &CancelSignal {
        &self.cancel
    }

    fn executor(&self) -> TransactionResult<Arc<dyn ExecutionContext>> {
        self.lifecycle.ensure_open()?;
        Ok(self.context.clone())
    }

    fn repository<R: Repository>(&self) -> TransactionResult<Arc<R>> {
        self.lifecycle.ensure_open()?;

        let repository = self
            .repositories
            .lock()
            .entry(TypeId::of::<R>())
            .or_insert_with(|| {
                Arc::new(R::bind(self.context.clone())) as Arc<dyn Any + Send + Sync>
            })
            .clone();

        // Entries are keyed by `TypeId::of::<R>()`.
        Ok(repository.downcast::<R>().unwrap_or_else(|_| unreachable!()))
    }

    fn register_transaction_aware(&self, observer: Arc<dyn TransactionAware>) {
        self.observers.write().push(observer);
    }

    async fn commit(&self) -> TransactionResult<()> {
        let state = self.lifecycle.state();
        if !state.is_open() {
            return Err(TransactionError::NotOpen(state));
        }
        if let Some(cause) = self.cancel.cause() {
            debug!(unit_of_work = %self.id, %cause, "Commit refused, signal fired");
            return Err(TransactionError::Cancelled(cause));
        }

        let guard = match &self.slot {
            Some(slot) => Some(self.lock_for_commit(slot).await?),
            None => None,
        };
        if let Some(cause) = self.cancel.cause() {
            debug!(unit_of_work = %self.id, %cause, "Commit refused, signal fired");
            return Err(TransactionError::Cancelled(cause));
        }

        // A commit abandoned after this point may or may not have reached the store.
        let resolution = self
            .lifecycle
            .begin_resolve(SessionState::FailedToResolve)
            .map_err(TransactionError::NotOpen)?;

        let tx = match guard {
            Some(mut guard) => match guard.take() {
                Some(tx) => Some(tx),
                None => {
                    resolution.finish(SessionState::RolledBack);
                    return Err(TransactionError::Closed(SessionState::RolledBack));
                }
            },
            None => None,
        };

        if let Some(tx) = tx {
            if let Err(err) = tx.commit().await {
                resolution.finish(SessionState::FailedToResolve);
                error!(
                    unit_of_work = %self.id,
                    outcome = "ambiguous",
                    error = %err,
                    "Transaction commit failed; the store may or may not hold its writes"
                );
                return Err(TransactionError::CommitFailed(err));
            }
        }

        resolution.finish(SessionState::Committed);
        debug!(unit_of_work = %self.id, mode = %self.mode, "Unit of work committed");

        // Notify observers after successful commit
        self.notify_observers(true).await;
        Ok(())
    }

    async fn rollback(&self) -> TransactionResult<()> {
        let resolution = match self.lifecycle.begin_resolve(SessionState::RolledBack) {
            Ok(resolution) => resolution,
            Err(state) => {
                trace!(unit_of_work = %self.id, %state, "Rollback skipped, unit of work already resolved");
                return Ok(());
            }
        };

        let tx = match &self.slot {
            Some(slot) => match slot.try_lock(&self.lifecycle) {
                Some(mut guard) => guard.take(),
                None => {
                    debug!(
                        unit_of_work = %self.id,
                        "Transaction busy; it is released when the current holder finishes"
                    );
                    None
                }
            },
            None => None,
        };

        if let Some(tx) = tx {
            if let Err(err) = tx.rollback().await {
                resolution.finish(SessionState::FailedToResolve);
                warn!(unit_of_work = %self.id, error = %err, "Transaction rollback failed");
                return Err(TransactionError::RollbackFailed(err));
            }
        }

        resolution.finish(SessionState::RolledBack);
        debug!(unit_of_work = %self.id, mode = %self.mode, "Unit of work rolled back");

        // Notify observers after successful rollback
        self.notify_observers(false).await;
        Ok(())
    }
}

impl Drop for PostgresUnitOfWorkSession {
    fn drop(&mut self) {
        let Ok(resolution) = self.lifecycle.begin_resolve(SessionState::RolledBack) else {
            return;
        };

        // A busy slot is emptied by its holder once the state has moved on.
        if let Some(slot) = &self.slot {
            if let Some(mut guard) = slot.try_lock(&self.lifecycle) {
                guard.take();
            }
        }
        resolution.finish(SessionState::RolledBack);

        if self.mode.is_transactional() {
            warn!(unit_of_work = %self.id, "Unit of work dropped while open; rolled back");
        } else {
            debug!(unit_of_work = %self.id, "Unit of work dropped while open");
        }
    }
}

impl std::fmt::Debug for PostgresUnitOfWorkSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresUnitOfWorkSession")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("state", &self.lifecycle.state())
            .finish()
    }
}
