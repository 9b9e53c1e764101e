//! Postgres Unit of Work
//!
//! Binds several repositories to one execution context (a transaction or the
//! shared pool) and resolves them with exactly one commit or rollback.
//! Every store call takes a [`CancelSignal`] and aborts when it fires.

pub mod cancel;
pub mod config;
pub mod entities;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod options;
pub mod pool;
pub mod repositories;
pub mod schema;
pub mod service;
pub mod telemetry;
pub mod transaction_aware;
pub mod unit_of_work;

pub use cancel::{CancelCause, CancelSignal};
pub use crate::config::{DatabaseConfig, LoggingConfig, Settings, UnitOfWorkConfig};
pub use entities::{Order, Product, User};
pub use error::{TransactionError, TransactionResult};
pub use executor::{ExecutionContext, ExecutionContextExt, PoolContext, Statement, TransactionContext};
pub use lifecycle::SessionState;
pub use options::{IsolationLevel, Mode, SessionOptions};
pub use pool::DbPool;
pub use repositories::{OrderRepository, ProductRepository, Repository, UserRepository};
pub use service::OrderService;
pub use transaction_aware::TransactionAware;
pub use unit_of_work::{PostgresUnitOfWork, PostgresUnitOfWorkSession, UnitOfWork, UnitOfWorkSession};
